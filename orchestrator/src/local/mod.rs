//! Collaborators backed by the local filesystem and child processes.

pub mod audit;
pub mod content_store;
pub mod identity;
pub mod notify;
pub mod process;

pub use audit::{JsonlAuditLog, MemoryAuditLog};
pub use content_store::{content_address, FsContentStore};
pub use identity::StaticIdentityResolver;
pub use notify::TracingNotificationSink;
pub use process::{ProcessExecutor, ProcessQualityValidator, ProcessTrainer};
