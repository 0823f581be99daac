//! Append-only event journal backing the ledger.
//!
//! The ledger writes every committed event to its journal before applying it
//! in memory, and rebuilds its state by replaying the journal on open.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{LedgerError, Result};
use crate::types::LedgerEvent;

/// Durable, ordered storage for ledger events.
#[async_trait]
pub trait Journal: Send + Sync {
    /// Append the events of one operation. Either all are durable or none are.
    async fn append(&self, events: &[LedgerEvent]) -> Result<()>;

    /// Load every committed event in append order.
    async fn load(&self) -> Result<Vec<LedgerEvent>>;
}

/// In-memory journal (for tests and ephemeral ledgers).
#[derive(Default)]
pub struct MemoryJournal {
    events: Mutex<Vec<LedgerEvent>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }
}

#[async_trait]
impl Journal for MemoryJournal {
    async fn append(&self, events: &[LedgerEvent]) -> Result<()> {
        self.events.lock().await.extend_from_slice(events);
        Ok(())
    }

    async fn load(&self) -> Result<Vec<LedgerEvent>> {
        Ok(self.events.lock().await.clone())
    }
}

/// One journaled operation. A batch is a single line, so a torn write loses
/// the whole operation and never half of it.
#[derive(Serialize)]
struct BatchRef<'a> {
    events: &'a [LedgerEvent],
}

#[derive(Deserialize)]
struct Batch {
    events: Vec<LedgerEvent>,
}

/// JSON-lines journal file, one committed operation per line.
pub struct FileJournal {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileJournal {
    /// Open (or create on first append) a journal at the given path.
    ///
    /// Bytes after the last complete line are left over from an interrupted
    /// append and are truncated before anything else is written.
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        truncate_torn_tail(&path).await?;
        info!(path = %path.display(), "Opened ledger journal");

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn truncate_torn_tail(path: &Path) -> Result<()> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let complete = bytes.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
    if complete < bytes.len() {
        warn!(
            path = %path.display(),
            dropped_bytes = bytes.len() - complete,
            "Truncating torn journal tail"
        );
        let file = fs::OpenOptions::new().write(true).open(path).await?;
        file.set_len(complete as u64).await?;
        file.sync_data().await?;
    }
    Ok(())
}

async fn write_durably(file: &mut fs::File, buf: &[u8]) -> std::io::Result<()> {
    file.write_all(buf).await?;
    file.flush().await?;
    file.sync_data().await
}

#[async_trait]
impl Journal for FileJournal {
    async fn append(&self, events: &[LedgerEvent]) -> Result<()> {
        let mut buf = serde_json::to_vec(&BatchRef { events })?;
        buf.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let committed_len = file.metadata().await?.len();

        if let Err(e) = write_durably(&mut file, &buf).await {
            warn!(error = %e, "Journal append failed, rolling back partial write");
            if let Err(rollback) = file.set_len(committed_len).await {
                warn!(error = %rollback, "Failed to roll back partial journal write");
            }
            return Err(e.into());
        }

        debug!(count = events.len(), "Journaled ledger events");
        Ok(())
    }

    async fn load(&self) -> Result<Vec<LedgerEvent>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut events = Vec::with_capacity(lines.len() * 2);

        for (index, line) in lines.iter().enumerate() {
            match serde_json::from_str::<Batch>(line) {
                Ok(batch) => events.extend(batch.events),
                // A torn final line means the operation never committed.
                Err(e) if index + 1 == lines.len() && !content.ends_with('\n') => {
                    warn!(error = %e, "Ignoring torn journal tail");
                }
                Err(e) => {
                    return Err(LedgerError::Journal(format!(
                        "corrupt journal line {}: {}",
                        index + 1,
                        e
                    )));
                }
            }
        }

        Ok(events)
    }
}
