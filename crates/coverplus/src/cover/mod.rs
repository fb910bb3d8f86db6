mod command;
mod error;
pub mod motion;
mod orchestrator;
mod scheduler;
mod state;

pub use command::DispatchError;
pub use command::MotorCommand;
pub use command::MotorCommandSink;
#[cfg(test)]
pub use command::RecordingSink;
pub use error::CoverError;
pub use motion::Axis;
pub use orchestrator::CoverSettings;
pub use orchestrator::Orchestrator;
pub use orchestrator::Tick;
pub use orchestrator::TiltPolicy;
pub use scheduler::CoverCommand;
pub use scheduler::CoverHandle;
pub use state::CoverSnapshot;
pub use state::Direction;
pub use state::Phase;
pub use state::Target;
pub use state::VirtualCoverState;

/// Slug used to derive a virtual entity id from a display name.
///
/// Lowercase ASCII alphanumerics are kept, every other run of characters
/// collapses into a single underscore.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_separator = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('_');
            }
            pending_separator = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }
    slug
}
