use std::error::Error;

use async_trait::async_trait;
use linkme::distributed_slice;

use crate::config::Config;
use crate::config::CoverConfig;
use crate::cover::MotorCommandSink;

/// Result type for backend factory functions
pub type BackendFactoryResult = anyhow::Result<Option<Box<dyn Backend>>>;

pub struct BackendContext<'a> {
    pub config: &'a Config,
}

/// Backend factories. Each returns `Ok(None)` when its section is absent.
#[distributed_slice]
pub static REGISTRY: [fn(&BackendContext) -> BackendFactoryResult];

/// Transport that carries motor commands to real covers
#[async_trait]
pub trait Backend: Send + Sync {
    /// Get the name/identifier of this backend
    fn name(&self) -> &str;

    /// Connect to whatever the backend talks to
    async fn start(&mut self) -> Result<(), Box<dyn Error + Send>>;

    /// Create the command sink for one real cover
    ///
    /// Sinks must stay usable for the lifetime of the backend and must never
    /// block when sending.
    fn sink(&self, cover: &CoverConfig) -> Box<dyn MotorCommandSink>;

    /// Shut down the backend gracefully
    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>>;
}

/// Build the single configured backend from the registry
pub fn backend_from_config(config: &Config) -> anyhow::Result<Box<dyn Backend>> {
    let ctx = BackendContext { config };
    let mut found: Vec<Box<dyn Backend>> = Vec::new();

    for constr in REGISTRY {
        if let Some(backend) = constr(&ctx)? {
            found.push(backend);
        }
    }

    match found.len() {
        0 => anyhow::bail!("no motor backend configured"),
        1 => Ok(found.remove(0)),
        _ => anyhow::bail!(
            "several motor backends configured: {}",
            found
                .iter()
                .map(|b| b.name().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}
