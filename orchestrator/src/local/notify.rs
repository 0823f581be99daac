//! Notification delivery through the log, with an optional outbox file.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

use crate::collaborators::{CollabResult, NotificationSink};
use crate::error::CollaboratorError;

/// Logs every message and appends it to an outbox file when one is set.
#[derive(Default)]
pub struct TracingNotificationSink {
    outbox: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl TracingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also append each message as a JSON line to `path`.
    pub fn with_outbox(mut self, path: impl Into<PathBuf>) -> Self {
        self.outbox = Some(path.into());
        self
    }
}

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> CollabResult<()> {
        if recipient.trim().is_empty() {
            return Err(CollaboratorError::Rejected("empty recipient".to_string()));
        }

        info!(recipient = %recipient, subject = %subject, "Notification sent");

        if let Some(path) = &self.outbox {
            let mut line = serde_json::to_vec(&json!({
                "recipient": recipient,
                "subject": subject,
                "body": body,
                "sentAt": Utc::now(),
            }))
            .map_err(|e| CollaboratorError::MalformedOutput(e.to_string()))?;
            line.push(b'\n');

            let _guard = self.write_lock.lock().await;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            file.write_all(&line).await?;
            file.flush().await?;
        }

        Ok(())
    }
}
