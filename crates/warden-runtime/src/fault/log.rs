//! Append-only crash log.

use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::record::CrashRecord;

#[derive(Debug, thiserror::Error)]
pub enum FaultLogError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to append to {path}: {source}")]
    Append {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type FaultLogResult<T> = Result<T, FaultLogError>;

/// Durable, append-only record of every fault. The supervisor task writes
/// it, except for panics, which the panic hook writes directly.
#[derive(Debug, Clone)]
pub struct CrashLog {
    path: PathBuf,
}

impl CrashLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the parent directory if needed.
    pub async fn ensure_dir(&self) -> FaultLogResult<()> {
        let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) else {
            return Ok(());
        };
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| FaultLogError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })
    }

    pub async fn append(&self, record: &CrashRecord) -> FaultLogResult<()> {
        self.ensure_dir().await?;
        let append_err = |source: std::io::Error| FaultLogError::Append {
            path: self.path.clone(),
            source,
        };

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(append_err)?;
        file.write_all(record.to_log_entry().as_bytes())
            .await
            .map_err(append_err)?;
        file.flush().await.map_err(append_err)
    }

    /// Blocking variant for contexts without a runtime (panic hook).
    pub fn append_blocking(&self, record: &CrashRecord) -> FaultLogResult<()> {
        use std::io::Write;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| FaultLogError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let append_err = |source: std::io::Error| FaultLogError::Append {
            path: self.path.clone(),
            source,
        };
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(append_err)?;
        file.write_all(record.to_log_entry().as_bytes())
            .map_err(append_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FaultCategory;
    use crate::process::ProcessStats;

    #[tokio::test]
    async fn test_append_creates_directory_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let log = CrashLog::new(dir.path().join("logs").join("errors.log"));

        let first = CrashRecord::new(FaultCategory::Exception, "first", "", ProcessStats::default());
        let second = CrashRecord::new(FaultCategory::Transport, "second", "", ProcessStats::default());
        log.append(&first).await.unwrap();
        log.append_blocking(&second).unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert!(content.contains("Message: first"));
        assert!(content.contains("Message: second"));
        assert!(content.find("first").unwrap() < content.find("second").unwrap());
        assert_eq!(content.matches(&"-".repeat(80)).count(), 2);
    }

    #[tokio::test]
    async fn test_unwritable_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "").unwrap();

        let log = CrashLog::new(blocker.join("errors.log"));
        let record = CrashRecord::new(FaultCategory::Exception, "x", "", ProcessStats::default());
        assert!(log.append(&record).await.is_err());
    }
}
