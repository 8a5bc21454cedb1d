//! Config file watcher
//!
//! Polls the document's modification stamp and asks the store to reload when
//! it moves. The store decides whether the content actually changed, so a
//! spurious touch costs one parse and nothing else.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::store::ConfigStore;
use crate::shutdown::Shutdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

fn stamp(path: &Path) -> Option<FileStamp> {
    fs::metadata(path).ok().map(|meta| FileStamp {
        modified: meta.modified().ok(),
        len: meta.len(),
    })
}

/// Stream of change events for one file
pub struct FileWatcher {
    path: PathBuf,
    last: Option<FileStamp>,
    ticker: Interval,
}

impl FileWatcher {
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        let path = path.into();
        let last = stamp(&path);
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { path, last, ticker }
    }

    /// Resolves on the next observed change (including deletion/recreation)
    pub async fn changed(&mut self) {
        loop {
            self.ticker.tick().await;
            let current = stamp(&self.path);
            if current != self.last {
                debug!(path = %self.path.display(), "Config file stamp changed");
                self.last = current;
                return;
            }
        }
    }
}

fn reload(store: &ConfigStore) {
    match store.reload() {
        Ok(true) => {}
        Ok(false) => debug!("Config change detected but content is identical"),
        Err(e) => warn!(error = %e, "Config reload failed, keeping previous config"),
    }
}

/// Reload the store every time its file changes, until shutdown
pub async fn watch_config(store: Arc<ConfigStore>, poll_interval: Duration, mut shutdown: Shutdown) {
    let mut watcher = FileWatcher::new(store.path(), poll_interval);
    info!(path = %store.path().display(), "Watching config file for changes");

    // Edits between the store's load and the baseline stamp above would
    // otherwise go unnoticed until the next one
    reload(&store);

    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = watcher.changed() => reload(&store),
        }
    }
    debug!("Config watcher stopped");
}

pub fn spawn_watcher(store: Arc<ConfigStore>, shutdown: Shutdown) -> JoinHandle<()> {
    let interval = Duration::from_millis(crate::constants::config::WATCH_INTERVAL_MS);
    tokio::spawn(watch_config(store, interval, shutdown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::document::tests::SAMPLE_DOCUMENT;
    use crate::shutdown;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_watcher_reports_change() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bulb_config.json");
        fs::write(&path, "a").unwrap();

        let mut watcher = FileWatcher::new(&path, Duration::from_millis(10));
        fs::write(&path, "abc").unwrap();

        tokio::time::timeout(Duration::from_secs(2), watcher.changed())
            .await
            .expect("change should be observed");
    }

    #[tokio::test]
    async fn test_watch_config_applies_edit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bulb_config.json");
        fs::write(&path, SAMPLE_DOCUMENT).unwrap();
        let store = Arc::new(ConfigStore::load(&path).unwrap());
        let mut rx = store.subscribe();

        let (trigger, shutdown) = shutdown::channel();
        let task = tokio::spawn(watch_config(store.clone(), Duration::from_millis(10), shutdown));

        fs::write(
            &path,
            SAMPLE_DOCUMENT.replace("\"update_delay\": 0.3", "\"update_delay\": 0.75"),
        )
        .unwrap();

        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .expect("reload should happen")
            .unwrap();
        assert_eq!(store.current().capture.update_delay, 0.75);

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("watcher should stop on shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_edit_before_watcher_starts_is_applied() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bulb_config.json");
        fs::write(&path, SAMPLE_DOCUMENT).unwrap();
        let store = Arc::new(ConfigStore::load(&path).unwrap());
        let mut rx = store.subscribe();

        // Lands after load, before the watcher ever runs
        fs::write(
            &path,
            SAMPLE_DOCUMENT.replace("\"update_delay\": 0.3", "\"update_delay\": 0.75"),
        )
        .unwrap();

        let (trigger, shutdown) = shutdown::channel();
        let task = tokio::spawn(watch_config(store.clone(), Duration::from_secs(3600), shutdown));
        // The poll interval is far too long to be what picks it up
        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .expect("reload should happen at startup")
            .unwrap();
        assert_eq!(store.current().capture.update_delay, 0.75);

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("watcher should stop on shutdown")
            .unwrap();
    }
}
