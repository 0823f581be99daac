//! Temporary staging of uploads for validation.

use std::path::Path;
use tempfile::NamedTempFile;

/// An upload written to the staging directory.
///
/// The file is removed when this value is dropped, which covers early
/// returns, errors and cancellation of the owning task.
#[derive(Debug)]
pub struct StagedUpload {
    file: NamedTempFile,
}

impl StagedUpload {
    /// Write `bytes` to a fresh file in `dir`, keeping the original extension.
    pub async fn stage(dir: &Path, file_name: &str, bytes: &[u8]) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;

        let suffix = Path::new(file_name)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy().to_ascii_lowercase()))
            .unwrap_or_default();

        let file = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(&suffix)
            .tempfile_in(dir)?;
        tokio::fs::write(file.path(), bytes).await?;

        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_staged_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();

        let staged = StagedUpload::stage(dir.path(), "Patients.CSV", b"a,b\n1,2\n").await.unwrap();
        let path = staged.path().to_path_buf();

        assert_eq!(path.extension().unwrap(), "csv");
        assert_eq!(std::fs::read(&path).unwrap(), b"a,b\n1,2\n");

        drop(staged);
        assert!(!path.exists());
    }
}
