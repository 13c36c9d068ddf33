//! Task dependency engine — store, registry, status, ordering, execution.

pub mod error;
pub mod eventlog;
pub mod executor;
pub mod fingerprint;
pub mod parser;
pub mod profile;
pub mod registry;
pub mod resolver;
pub mod status;
pub mod store;
pub mod table;
pub mod task;
pub mod types;
pub mod workdir;

pub use error::{ActionError, EngineError};
pub use executor::{Engine, EngineConfig};
pub use registry::{FileTable, TaskRegistry};
pub use status::{StatusKind, TaskStatus};
pub use task::{CleanTargets, Cleanup, CleanupList, FnCleanup, Task, TaskBuilder, TaskContext};
