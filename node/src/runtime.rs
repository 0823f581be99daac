//! Wires the filesystem and child-process collaborators into both orchestrators.

use anyhow::Context;
use std::sync::Arc;
use tracing::info;

use purechain_ledger::{Ledger, ReputationLedger};
use purechain_orchestrator::collaborators::{AuditLog, Executor};
use purechain_orchestrator::local::{
    FsContentStore, JsonlAuditLog, ProcessExecutor, ProcessQualityValidator, ProcessTrainer,
    StaticIdentityResolver, TracingNotificationSink,
};
use purechain_orchestrator::{
    Collaborators, SubmissionOrchestrator, TrainingCollaborators, TrainingOrchestrator,
};

use crate::config::Config;

/// A fully assembled node.
pub struct Node {
    pub submissions: SubmissionOrchestrator,
    pub training: TrainingOrchestrator,
    pub ledger: Arc<dyn Ledger>,
    pub audit: Arc<dyn AuditLog>,
}

impl Node {
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let orchestrator = config.orchestrator_config();
        let data_dir = &config.node.data_dir;
        tokio::fs::create_dir_all(data_dir)
            .await
            .with_context(|| format!("creating {}", data_dir.display()))?;

        let ledger = ReputationLedger::open(config.ledger_journal())
            .await
            .context("opening ledger journal")?
            .with_duplicate_key(orchestrator.submission.policy.duplicate_key);
        let ledger: Arc<dyn Ledger> = Arc::new(ledger);

        let audit: Arc<dyn AuditLog> = Arc::new(
            JsonlAuditLog::open(config.audit_dir())
                .await
                .context("opening audit log")?,
        );
        let store = Arc::new(
            FsContentStore::new(config.content_dir())
                .await
                .context("opening content store")?,
        );

        let mut notifier = TracingNotificationSink::new();
        if let Some(outbox) = &config.notifications.outbox {
            notifier = notifier.with_outbox(outbox);
        }

        let validator: Arc<dyn Executor> =
            Arc::new(ProcessExecutor::new(orchestrator.process.validator.clone()));
        let trainer: Arc<dyn Executor> =
            Arc::new(ProcessExecutor::new(orchestrator.process.trainer.clone()));

        let collaborators = Collaborators {
            identity: Arc::new(StaticIdentityResolver::new(config.identities.clone())),
            store,
            validator: Arc::new(ProcessQualityValidator::new(validator)),
            ledger: Arc::clone(&ledger),
            audit: Arc::clone(&audit),
            notifier: Arc::new(notifier),
        };
        let training_collaborators = TrainingCollaborators::from_submission(
            &collaborators,
            Arc::new(ProcessTrainer::new(trainer)),
        );

        info!(
            data_dir = %data_dir.display(),
            identities = config.identities.len(),
            "Node assembled"
        );

        Ok(Self {
            submissions: SubmissionOrchestrator::new(orchestrator.clone(), collaborators),
            training: TrainingOrchestrator::new(orchestrator, training_collaborators),
            ledger,
            audit,
        })
    }
}
