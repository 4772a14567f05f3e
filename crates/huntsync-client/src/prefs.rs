//! Local preferences that live outside the sync engine.
//!
//! The mute flag is stored as `"1"` or `"0"` in a one-line file and fanned
//! out to every subscriber in the process whenever it changes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::constants::MUTE_FILE_NAME;

#[derive(Debug, thiserror::Error)]
pub enum PrefsError {
    #[error("no config directory available on this platform")]
    NoConfigDir,
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// `<config dir>/huntsync/muted`.
pub fn default_mute_path() -> Result<PathBuf, PrefsError> {
    dirs::config_dir()
        .map(|d| d.join("huntsync").join(MUTE_FILE_NAME))
        .ok_or(PrefsError::NoConfigDir)
}

/// Persisted mute flag. Clones share the file and the subscribers.
#[derive(Clone, Debug)]
pub struct MutePreference {
    path: PathBuf,
    tx: Arc<watch::Sender<bool>>,
}

impl MutePreference {
    /// Load from `path`. A missing file means unmuted.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PrefsError> {
        let path = path.into();
        let muted = match std::fs::read_to_string(&path) {
            Ok(text) => text.trim() == "1",
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(source) => return Err(PrefsError::Io { path, source }),
        };
        let (tx, _) = watch::channel(muted);
        Ok(Self { path, tx: Arc::new(tx) })
    }

    pub fn open_default() -> Result<Self, PrefsError> {
        Self::open(default_mute_path()?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> bool {
        *self.tx.borrow()
    }

    /// Persist and notify subscribers.
    pub fn set(&self, muted: bool) -> Result<(), PrefsError> {
        let io_err = |source| PrefsError::Io { path: self.path.clone(), source };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(&self.path, if muted { "1" } else { "0" }).map_err(io_err)?;
        debug!(muted, path = %self.path.display(), "mute preference saved");
        self.tx.send_replace(muted);
        Ok(())
    }

    pub fn toggle(&self) -> Result<bool, PrefsError> {
        let muted = !self.get();
        self.set(muted)?;
        Ok(muted)
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_unmuted() {
        let dir = tempfile::tempdir().unwrap();
        let pref = MutePreference::open(dir.path().join("muted")).unwrap();
        assert!(!pref.get());
    }

    #[test]
    fn test_set_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("muted");
        let pref = MutePreference::open(&path).unwrap();
        pref.set(true).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1");

        let reopened = MutePreference::open(&path).unwrap();
        assert!(reopened.get());
        assert!(!reopened.toggle().unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "0");
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let dir = tempfile::tempdir().unwrap();
        let pref = MutePreference::open(dir.path().join("muted")).unwrap();
        let other_tab = pref.clone();
        let mut rx = other_tab.subscribe();

        pref.set(true).unwrap();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
        assert!(other_tab.get());
    }
}
