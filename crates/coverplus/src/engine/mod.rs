mod backend;
#[allow(clippy::module_inception)]
mod engine;
mod snapshot;

pub use backend::backend_from_config;
pub use backend::Backend;
pub use backend::BackendContext;
pub use backend::BackendFactoryResult;
pub use backend::REGISTRY as BACKEND_REGISTRY;
pub use engine::Engine;
pub use snapshot::SavedPosition;
pub use snapshot::StateFile;
