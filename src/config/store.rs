//! Live configuration store
//!
//! Holds the current document behind a `tokio::sync::watch` channel. Writers
//! always replace the whole document, readers take an `Arc` snapshot, so a
//! cycle can never observe a half-applied edit.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::{debug, info};

use super::document::{InvalidValue, SyncConfig};

/// Why a document could not be loaded, reloaded or saved
#[derive(Debug)]
pub enum ConfigError {
    /// The file does not exist
    NotFound(PathBuf),
    /// Reading or writing the file failed
    Io(PathBuf, std::io::Error),
    /// Not valid JSON, or a required key is missing
    Parse(PathBuf, serde_json::Error),
    /// Parsed, but a value is out of range
    Invalid(InvalidValue),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NotFound(path) => {
                write!(f, "Config file '{}' not found, please create it first", path.display())
            }
            ConfigError::Io(path, e) => write!(f, "Failed to access config file '{}': {}", path.display(), e),
            ConfigError::Parse(path, e) => write!(f, "Invalid config document '{}': {}", path.display(), e),
            ConfigError::Invalid(e) => write!(f, "Invalid config value {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(_, e) => Some(e),
            ConfigError::Parse(_, e) => Some(e),
            _ => None,
        }
    }
}

/// Default document location: `$XDG_CONFIG_HOME/bulb-screen-sync/bulb_config.json`
pub fn default_config_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(crate::constants::config::APP_DIR);
    path.push(crate::constants::config::FILENAME);
    path
}

fn read_document(path: &Path) -> Result<SyncConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotFound(path.to_path_buf())
        } else {
            ConfigError::Io(path.to_path_buf(), e)
        }
    })?;
    let document: SyncConfig = serde_json::from_str(&contents)
        .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
    document.validate().map_err(ConfigError::Invalid)?;
    Ok(document)
}

pub struct ConfigStore {
    path: PathBuf,
    current: watch::Sender<Arc<SyncConfig>>,
    version: AtomicU64,
}

impl ConfigStore {
    /// Load the document from disk; any failure here is fatal to the caller
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let document = read_document(&path)?;
        info!(path = %path.display(), "Loaded config");
        let (current, _) = watch::channel(Arc::new(document));
        Ok(Self {
            path,
            current,
            version: AtomicU64::new(1),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the document as it is right now
    pub fn current(&self) -> Arc<SyncConfig> {
        self.current.borrow().clone()
    }

    /// Incremented on every replacement
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Receiver notified on every replacement
    pub fn subscribe(&self) -> watch::Receiver<Arc<SyncConfig>> {
        self.current.subscribe()
    }

    /// Re-read the file, replacing the document only if its content changed
    ///
    /// Returns `Ok(true)` when a replacement happened. On error the previous
    /// document stays authoritative.
    pub fn reload(&self) -> Result<bool, ConfigError> {
        let document = read_document(&self.path)?;
        let replaced = self.replace_if_changed(document);
        if replaced {
            info!(path = %self.path.display(), version = self.version(), "Config reloaded");
        } else {
            debug!(path = %self.path.display(), "Config file unchanged");
        }
        Ok(replaced)
    }

    /// Validate, persist and adopt a new document
    pub fn save(&self, document: SyncConfig) -> Result<(), ConfigError> {
        document.validate().map_err(ConfigError::Invalid)?;
        self.write_document(&document)?;
        if self.replace_if_changed(document) {
            info!(path = %self.path.display(), version = self.version(), "Config saved and applied");
        }
        Ok(())
    }

    fn write_document(&self, document: &SyncConfig) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| ConfigError::Io(parent.to_path_buf(), e))?;
            }
        }
        let json = serde_json::to_string_pretty(document)
            .map_err(|e| ConfigError::Parse(self.path.clone(), e))?;
        fs::write(&self.path, json).map_err(|e| ConfigError::Io(self.path.clone(), e))?;
        info!(path = %self.path.display(), "Saved config");
        Ok(())
    }

    fn replace_if_changed(&self, document: SyncConfig) -> bool {
        let replaced = self.current.send_if_modified(|current| {
            if **current == document {
                false
            } else {
                *current = Arc::new(document);
                true
            }
        });
        if replaced {
            self.version.fetch_add(1, Ordering::AcqRel);
        }
        replaced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::document::tests::SAMPLE_DOCUMENT;
    use tempfile::tempdir;

    fn write(path: &Path, contents: &str) {
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bulb_config.json");
        let err = ConfigStore::load(&path).err().unwrap();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_load_malformed_json_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bulb_config.json");
        write(&path, "{ \"capture\": ");
        let err = ConfigStore::load(&path).err().unwrap();
        assert!(matches!(err, ConfigError::Parse(..)));
    }

    #[test]
    fn test_load_invalid_value_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bulb_config.json");
        write(&path, &SAMPLE_DOCUMENT.replace("\"crop_percent\": 0.1", "\"crop_percent\": 0.6"));
        let err = ConfigStore::load(&path).err().unwrap();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_reload_identical_document_does_not_replace() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bulb_config.json");
        write(&path, SAMPLE_DOCUMENT);
        let store = ConfigStore::load(&path).unwrap();
        let before = store.current();
        let rx = store.subscribe();

        // Same content, different formatting
        let reformatted: serde_json::Value = serde_json::from_str(SAMPLE_DOCUMENT).unwrap();
        write(&path, &serde_json::to_string(&reformatted).unwrap());

        assert!(!store.reload().unwrap());
        assert!(Arc::ptr_eq(&before, &store.current()));
        assert_eq!(store.version(), 1);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_reload_changed_document_replaces() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bulb_config.json");
        write(&path, SAMPLE_DOCUMENT);
        let store = ConfigStore::load(&path).unwrap();
        let mut rx = store.subscribe();

        write(&path, &SAMPLE_DOCUMENT.replace("\"monitor_index\": 1", "\"monitor_index\": 2"));

        assert!(store.reload().unwrap());
        assert_eq!(store.current().capture.monitor_index, 2);
        assert_eq!(store.version(), 2);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().capture.monitor_index, 2);
    }

    #[test]
    fn test_reload_malformed_keeps_previous_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bulb_config.json");
        write(&path, SAMPLE_DOCUMENT);
        let store = ConfigStore::load(&path).unwrap();

        write(&path, "not json at all");
        assert!(store.reload().is_err());
        assert_eq!(store.current().capture.downsample, 4);
        assert_eq!(store.version(), 1);
    }

    #[test]
    fn test_save_writes_and_adopts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bulb_config.json");
        write(&path, SAMPLE_DOCUMENT);
        let store = ConfigStore::load(&path).unwrap();

        let mut edited = (*store.current()).clone();
        edited.capture.transition_ms = 250;
        store.save(edited).unwrap();

        assert_eq!(store.current().capture.transition_ms, 250);
        let on_disk: SyncConfig = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.capture.transition_ms, 250);

        // Reloading what we just wrote is a no-op
        assert!(!store.reload().unwrap());
    }

    #[test]
    fn test_save_rejects_invalid_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bulb_config.json");
        write(&path, SAMPLE_DOCUMENT);
        let store = ConfigStore::load(&path).unwrap();

        let mut edited = (*store.current()).clone();
        edited.capture.downsample = 0;
        assert!(matches!(store.save(edited), Err(ConfigError::Invalid(_))));
        assert_eq!(store.current().capture.downsample, 4);
        assert_eq!(fs::read_to_string(&path).unwrap(), SAMPLE_DOCUMENT);
    }
}
