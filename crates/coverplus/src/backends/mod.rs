mod log;
#[cfg(feature = "backend_mqtt")]
mod mqtt;

#[cfg(test)]
pub use log::LogBackend;
