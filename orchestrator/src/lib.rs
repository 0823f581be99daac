//! PureChain Orchestrator
//!
//! Coordinates the data-contribution pipeline around the reputation ledger:
//!
//! - **Submissions**: identity resolution, staging, quality validation,
//!   content storage, ledger reward or penalty, audit mirror, notification
//! - **Training**: dataset assembly from validated contributions, trainer
//!   invocation, versioned artifacts, performance gating, notifications
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────┐     ┌───────────────────────┐
//! │ SubmissionOrchestrator│     │ TrainingOrchestrator  │
//! └───────────┬───────────┘     └───────────┬───────────┘
//!             │                             │
//!             ▼                             ▼
//! ┌─────────────────────────────────────────────────────┐
//! │ Collaborators (traits)                              │
//! │ IdentityResolver · ContentStore · QualityValidator  │
//! │ Trainer · Ledger · AuditLog · NotificationSink      │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Collaborators are trait objects; `local` provides filesystem and
//! child-process implementations and `collaborators::mock` in-process fakes.

pub mod collaborators;
pub mod config;
pub mod error;
pub mod identity;
pub mod local;
pub mod messages;
pub mod retry;
pub mod staging;
pub mod steps;
pub mod submission;
pub mod training;
pub mod types;

pub use collaborators::{Collaborators, TrainingCollaborators};
pub use config::OrchestratorConfig;
pub use error::{CollaboratorError, ErrorKind, ErrorResponse, OrchestratorError, Result, Step};
pub use identity::derive_unique_id;
pub use submission::SubmissionOrchestrator;
pub use training::TrainingOrchestrator;
pub use types::*;
