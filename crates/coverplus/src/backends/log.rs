use std::error::Error;

use async_trait::async_trait;
use linkme::distributed_slice;
use tracing::info;

use crate::config::CoverConfig;
use crate::cover::DispatchError;
use crate::cover::MotorCommand;
use crate::cover::MotorCommandSink;
use crate::engine;
use crate::engine::Backend;

#[distributed_slice(engine::BACKEND_REGISTRY)]
fn init_log(ctx: &engine::BackendContext) -> engine::BackendFactoryResult {
    match &ctx.config.backends.log {
        Some(_) => Ok(Some(Box::new(LogBackend))),
        None => Ok(None),
    }
}

/// Dry-run backend: commands are logged instead of sent anywhere
pub struct LogBackend;

#[async_trait]
impl Backend for LogBackend {
    fn name(&self) -> &str {
        "log"
    }

    async fn start(&mut self) -> Result<(), Box<dyn Error + Send>> {
        info!("Log backend active, real covers will not move");
        Ok(())
    }

    fn sink(&self, cover: &CoverConfig) -> Box<dyn MotorCommandSink> {
        Box::new(LogSink {
            entity_id: cover.real_entity_id.clone(),
        })
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
        Ok(())
    }
}

struct LogSink {
    entity_id: String,
}

impl MotorCommandSink for LogSink {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn send(&mut self, command: MotorCommand) -> Result<(), DispatchError> {
        info!("[{}] motor command {}", self.entity_id, command);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cover::TiltPolicy;

    #[test]
    fn test_log_sink_accepts_everything() {
        let cover = CoverConfig {
            cover_id: "cover.office".to_string(),
            name: "Office".to_string(),
            real_entity_id: "cover.office_motor".to_string(),
            unique_id: "office".to_string(),
            open_time: Duration::from_secs(20),
            tilt_time: Duration::from_millis(750),
            trace_ticks: false,
            tilt_policy: TiltPolicy::Explicit,
        };

        let mut sink = LogBackend.sink(&cover);
        assert_eq!(sink.entity_id(), "cover.office_motor");
        for command in [MotorCommand::Open, MotorCommand::Stop, MotorCommand::Close] {
            assert!(sink.send(command).is_ok());
        }
    }
}
