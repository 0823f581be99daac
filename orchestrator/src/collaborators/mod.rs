//! Collaborator interfaces and the bundles the orchestrators are built from.

pub mod mock;
pub mod traits;

use std::sync::Arc;

use purechain_ledger::Ledger;

pub use traits::*;

/// Everything the submission pipeline talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub identity: Arc<dyn IdentityResolver>,
    pub store: Arc<dyn ContentStore>,
    pub validator: Arc<dyn QualityValidator>,
    pub ledger: Arc<dyn Ledger>,
    pub audit: Arc<dyn AuditLog>,
    pub notifier: Arc<dyn NotificationSink>,
}

/// Everything the training pipeline talks to.
#[derive(Clone)]
pub struct TrainingCollaborators {
    pub store: Arc<dyn ContentStore>,
    pub trainer: Arc<dyn Trainer>,
    pub ledger: Arc<dyn Ledger>,
    pub audit: Arc<dyn AuditLog>,
    pub notifier: Arc<dyn NotificationSink>,
}

impl TrainingCollaborators {
    /// Share the store, ledger, audit log and sink of a submission bundle.
    pub fn from_submission(collaborators: &Collaborators, trainer: Arc<dyn Trainer>) -> Self {
        Self {
            store: Arc::clone(&collaborators.store),
            trainer,
            ledger: Arc::clone(&collaborators.ledger),
            audit: Arc::clone(&collaborators.audit),
            notifier: Arc::clone(&collaborators.notifier),
        }
    }
}
