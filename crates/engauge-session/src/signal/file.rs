//! Directory-backed signal store shared across processes.
//!
//! Each key is a file in the signal directory. A `notify` watcher on the
//! directory turns writes from any process into [`StorageEvent`]s.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{bail, Context, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{ContextId, SignalStore, StorageEvent, EVENT_CHANNEL_CAPACITY};

/// Values this process wrote last, by key, with the writing context.
type LocalWrites = Arc<Mutex<HashMap<String, (String, ContextId)>>>;

pub struct FileStore {
    dir: PathBuf,
    events: broadcast::Sender<StorageEvent>,
    local_writes: LocalWrites,
    // Dropping the watcher stops notifications.
    _watcher: RecommendedWatcher,
}

impl FileStore {
    /// Open (creating if needed) the signal directory and start watching it.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create signal directory {}", dir.display()))?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let local_writes: LocalWrites = Arc::default();

        let mut watcher = {
            let events = events.clone();
            let local_writes = Arc::clone(&local_writes);
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(event) => forward_event(&event, &events, &local_writes),
                Err(e) => warn!(error = %e, "Signal directory watch error"),
            })
            .context("Failed to create signal directory watcher")?
        };
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch signal directory {}", dir.display()))?;

        debug!(dir = %dir.display(), "Signal store opened");
        Ok(Self {
            dir,
            events,
            local_writes,
            _watcher: watcher,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &str) -> Result<PathBuf> {
        if !is_valid_key(key) {
            bail!("Invalid signal key: {:?}", key);
        }
        Ok(self.dir.join(key))
    }
}

/// Keys become file names, so they must be a single visible path component.
fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('.')
        && !key.contains(['/', '\\'])
        && key != ".."
}

fn forward_event(
    event: &notify::Event,
    events: &broadcast::Sender<StorageEvent>,
    local_writes: &LocalWrites,
) {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return;
    }

    for path in &event.paths {
        let Some(key) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        // Temp files from in-progress writes
        if key.starts_with('.') {
            continue;
        }

        let value = std::fs::read_to_string(path).ok();
        let source = local_writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .filter(|(written, _)| value.as_deref() == Some(written.as_str()))
            .map(|(_, ctx)| *ctx);

        let _ = events.send(StorageEvent {
            key: key.to_string(),
            source,
        });
    }
}

impl SignalStore for FileStore {
    fn set_item(&self, source: ContextId, key: &str, value: &str) -> Result<()> {
        let path = self.key_path(key)?;
        let tmp = self.dir.join(format!(".{}.{}.tmp", key, source));

        self.local_writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), (value.to_string(), source));

        std::fs::write(&tmp, value)
            .with_context(|| format!("Failed to write signal file {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace signal file {}", path.display()))?;
        Ok(())
    }

    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let path = self.key_path(key)?;
        match std::fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read signal file {}", path.display())),
        }
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.dir).context("Failed to list signal directory")? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if is_valid_key(name) {
                    keys.push(name.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn next_event_for(
        rx: &mut broadcast::Receiver<StorageEvent>,
        key: &str,
    ) -> StorageEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = rx.recv().await.unwrap();
                if event.key == key {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for signal event")
    }

    #[test]
    fn test_is_valid_key() {
        assert!(is_valid_key("ra-logout"));
        assert!(is_valid_key("custom_logout.v2"));

        assert!(!is_valid_key(""));
        assert!(!is_valid_key(".hidden"));
        assert!(!is_valid_key(".."));
        assert!(!is_valid_key("a/b"));
        assert!(!is_valid_key("a\\b"));
    }

    #[test]
    fn test_set_get_and_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let ctx = ContextId::random();

        assert_eq!(store.get_item("ra-logout").unwrap(), None);
        store.set_item(ctx, "ra-logout", "1700000000000").unwrap();
        store.set_item(ctx, "ra-logout", "1700000000001").unwrap();

        assert_eq!(
            store.get_item("ra-logout").unwrap().as_deref(),
            Some("1700000000001")
        );
        // No temp files left behind
        assert_eq!(store.keys().unwrap(), vec!["ra-logout"]);
    }

    #[test]
    fn test_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        assert!(store.set_item(ContextId::random(), "../escape", "1").is_err());
        assert!(store.get_item(".tmp").is_err());
    }

    #[tokio::test]
    async fn test_write_from_other_store_has_no_source() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FileStore::open(dir.path()).unwrap();
        let reader = FileStore::open(dir.path()).unwrap();
        let mut own_rx = writer.subscribe();
        let mut other_rx = reader.subscribe();
        let ctx = ContextId::random();

        writer.set_item(ctx, "ra-logout", "1700000000000").unwrap();

        let seen_by_other = next_event_for(&mut other_rx, "ra-logout").await;
        assert_eq!(seen_by_other.source, None);

        let seen_by_writer = next_event_for(&mut own_rx, "ra-logout").await;
        assert_eq!(seen_by_writer.source, Some(ctx));
    }
}
