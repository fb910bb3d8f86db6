pub mod api;
mod backends;
pub mod config;
pub mod cover;
pub mod engine;

pub use config::format_diagnostics;
pub use config::Config;
pub use config::Diagnostic;
pub use config::LogLevel;
pub use cover::CoverCommand;
pub use cover::CoverError;
pub use cover::CoverSnapshot;
pub use engine::Engine;
