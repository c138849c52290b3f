//! Advisory file locks shared by every filtersync process on the same data dir.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::app::{Result, SyncError};

/// Exclusive lock on a lock file, released when dropped.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Blocks until the lock is held. Only for short critical sections.
    pub fn exclusive(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = Self::open(path)?;
        file.lock_exclusive()?;
        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    /// Returns `None` while another holder has the lock.
    pub fn try_exclusive(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        let file = Self::open(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                _file: file,
                path: path.to_path_buf(),
            })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Polls until the lock is free without blocking the runtime.
    pub async fn acquire(
        path: impl AsRef<Path>,
        poll: Duration,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let path = path.as_ref();
        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            if let Some(lock) = Self::try_exclusive(path)? {
                return Ok(lock);
            }
            debug!("Waiting for {}", path.display());
            tokio::select! {
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(path: &Path) -> Result<File> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?)
    }
}

/// `<file>.lock` next to `path`.
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}
