//! Hidden-service registry: persistent services on disk and runtime/ephemeral ones.

mod persistent;
mod registry;
mod runtime;

pub use persistent::persist_runtime;
pub use registry::{refresh_all, register_hidden_service};
pub use runtime::{register_runtime, remove_runtime};
