//! Versioned artifact publishing.
//!
//! Each successful run gets its own directory,
//! `<artifact_dir>/<model_id>/<version>/`, and published files are never
//! overwritten.

use chrono::{DateTime, Duration, DurationRound, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::ArtifactNames;
use crate::types::ArtifactPaths;

const VERSION_FORMAT: &str = "%Y%m%dT%H%M%S%3fZ";

/// Hands out strictly increasing, timestamp-shaped version labels.
#[derive(Default)]
pub struct ArtifactVersioner {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl ArtifactVersioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn next(&self) -> String {
        let now = Utc::now();
        let now = now.duration_trunc(Duration::milliseconds(1)).unwrap_or(now);

        let mut last = self.last.lock().await;
        let version = match *last {
            Some(prev) if now <= prev => prev + Duration::milliseconds(1),
            _ => now,
        };
        *last = Some(version);

        version.format(VERSION_FORMAT).to_string()
    }
}

/// Move the run's artifacts from `work_dir` into a fresh version directory.
pub async fn publish(
    work_dir: &Path,
    artifact_dir: &Path,
    model_id: &str,
    version: &str,
    names: &ArtifactNames,
) -> std::io::Result<ArtifactPaths> {
    let model_src = work_dir.join(&names.model);
    let scaler_src = work_dir.join(&names.scaler);
    for src in [&model_src, &scaler_src] {
        if fs::metadata(src).await.is_err() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("trainer did not produce {}", src.display()),
            ));
        }
    }

    let model_root = artifact_dir.join(sanitize(model_id));
    fs::create_dir_all(&model_root).await?;

    // create_dir (not create_dir_all) fails if the version already exists.
    let version_dir = model_root.join(version);
    fs::create_dir(&version_dir).await?;

    let model_path = version_dir.join(&names.model);
    let scaler_path = version_dir.join(&names.scaler);
    move_file(&model_src, &model_path).await?;
    move_file(&scaler_src, &scaler_path).await?;

    info!(model_id = %model_id, version = %version, path = %version_dir.display(), "Published artifacts");

    Ok(ArtifactPaths {
        version: version.to_string(),
        model_path: model_path.display().to_string(),
        scaler_path: scaler_path.display().to_string(),
    })
}

async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    // Work and artifact directories may sit on different filesystems.
    fs::copy(from, to).await?;
    fs::remove_file(from).await
}

fn sanitize(model_id: &str) -> PathBuf {
    let cleaned: String = model_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    PathBuf::from(cleaned)
}
