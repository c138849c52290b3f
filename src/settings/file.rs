use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::app::lock::lock_path_for;
use crate::app::{FileLock, Result, SyncError};
use crate::domain::Settings;
use crate::settings::SettingsRepository;

/// Settings persisted as TOML and broadcast through a watch channel.
///
/// Several processes may share one file: every update holds `<file>.lock` and
/// starts from what is on disk, so edits made elsewhere are never overwritten.
pub struct FileSettings {
    path: Option<PathBuf>,
    tx: watch::Sender<Settings>,
    write_lock: Mutex<()>,
}

impl FileSettings {
    /// Loads `path`, falling back to defaults only when the file does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let settings = match Self::read(&path)? {
            Some(settings) => settings,
            None => {
                debug!("No settings at {}, using defaults", path.display());
                Settings::default()
            }
        };
        Ok(Self::with(Some(path), settings))
    }

    /// Settings that live only as long as the process.
    pub fn in_memory(settings: Settings) -> Self {
        Self::with(None, settings)
    }

    fn with(path: Option<PathBuf>, settings: Settings) -> Self {
        let (tx, _) = watch::channel(settings);
        Self {
            path,
            tx,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Re-reads the file and republishes it if another process changed it.
    /// Returns whether anything changed.
    pub fn reload(&self) -> Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        let Some(loaded) = Self::read(path)? else {
            return Ok(false);
        };
        Ok(self.tx.send_if_modified(|current| {
            if *current == loaded {
                false
            } else {
                *current = loaded.clone();
                true
            }
        }))
    }

    /// `None` when the file does not exist yet.
    fn read(path: &Path) -> Result<Option<Settings>> {
        match fs::read_to_string(path) {
            Ok(content) => Self::decode(path, &content).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn decode(path: &Path, content: &str) -> Result<Settings> {
        match toml::from_str(content) {
            Ok(settings) => Ok(settings),
            Err(e) if cfg!(debug_assertions) => Err(SyncError::Corrupt(format!(
                "{}: {}",
                path.display(),
                e
            ))),
            Err(e) => {
                warn!("Settings file {} is corrupt, using defaults: {}", path.display(), e);
                Ok(Settings::default())
            }
        }
    }

    fn persist(path: &Path, settings: &Settings) -> Result<()> {
        let content = toml::to_string_pretty(settings)
            .map_err(|e| SyncError::Other(format!("cannot encode settings: {}", e)))?;
        let dir = path
            .parent()
            .ok_or_else(|| SyncError::Other(format!("no parent for {}", path.display())))?;
        fs::create_dir_all(dir)?;

        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(content.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(path)?;
        Ok(())
    }
}

impl SettingsRepository for FileSettings {
    fn current(&self) -> Settings {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }

    fn update(&self, mutate: &mut dyn FnMut(&mut Settings)) -> Result<Settings> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| SyncError::Other(format!("settings lock poisoned: {}", e)))?;

        let settings = match &self.path {
            Some(path) => {
                let _file_lock = FileLock::exclusive(lock_path_for(path))?;
                let mut settings = Self::read(path)?.unwrap_or_else(|| self.current());
                mutate(&mut settings);
                Self::persist(path, &settings)?;
                settings
            }
            None => {
                let mut settings = self.current();
                mutate(&mut settings);
                settings
            }
        };
        self.tx.send_replace(settings.clone());
        Ok(settings)
    }
}
