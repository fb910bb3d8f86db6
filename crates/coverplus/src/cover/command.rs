//! Motor command sink.
//!
//! The real cover only understands open, close and stop. Commands are
//! fire-and-forget: `send` hands the command to the transport and returns
//! without any acknowledgement, because the hardware never reports back.

use serde::Serialize;

/// The three primitive commands every real cover supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum MotorCommand {
    Open,
    Close,
    Stop,
}

/// Failure to hand a command to the real cover.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("transport for {entity_id} is closed")]
    Closed { entity_id: String },

    #[error("transport for {entity_id} is busy, command {command} dropped")]
    Busy {
        entity_id: String,
        command: MotorCommand,
    },

    #[error("failed to dispatch {command} to {entity_id}: {message}")]
    Other {
        entity_id: String,
        command: MotorCommand,
        message: String,
    },
}

/// One-way channel to a single real cover.
///
/// Implementations must not block: the call returns as soon as the command is
/// queued for delivery. The real cover honors only its latest command, so
/// sending a new one implicitly supersedes whatever it was doing.
pub trait MotorCommandSink: Send {
    /// The real entity this sink drives.
    fn entity_id(&self) -> &str;

    fn send(&mut self, command: MotorCommand) -> Result<(), DispatchError>;
}

impl MotorCommandSink for Box<dyn MotorCommandSink> {
    fn entity_id(&self) -> &str {
        (**self).entity_id()
    }

    fn send(&mut self, command: MotorCommand) -> Result<(), DispatchError> {
        (**self).send(command)
    }
}

/// Sink that records every command for tests
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    pub sent: std::sync::Arc<std::sync::Mutex<Vec<MotorCommand>>>,
    pub fail: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands sent so far
    pub fn commands(&self) -> Vec<MotorCommand> {
        self.sent.lock().unwrap().clone()
    }

    /// Commands rendered as a space separated string, handy for snapshots
    pub fn transcript(&self) -> String {
        self.commands()
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Make every following send fail
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl MotorCommandSink for RecordingSink {
    fn entity_id(&self) -> &str {
        "cover.recording"
    }

    fn send(&mut self, command: MotorCommand) -> Result<(), DispatchError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(DispatchError::Closed {
                entity_id: self.entity_id().to_string(),
            });
        }
        self.sent.lock().unwrap().push(command);
        Ok(())
    }
}
