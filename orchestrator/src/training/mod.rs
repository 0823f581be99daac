//! Model training over validated contributions.

pub mod artifacts;
pub mod dataset;
pub mod metrics;
pub mod orchestrator;

pub use artifacts::ArtifactVersioner;
pub use dataset::{Dataset, DatasetError};
pub use metrics::{normalize_metric_name, parse_metrics};
pub use orchestrator::TrainingOrchestrator;
