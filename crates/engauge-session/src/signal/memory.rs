use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use tokio::sync::broadcast;

use super::{ContextId, SignalStore, StorageEvent, EVENT_CHANNEL_CAPACITY};

/// In-process signal store. Sessions sharing one `Arc<MemoryStore>` behave
/// like tabs of the same browser origin.
pub struct MemoryStore {
    items: Mutex<HashMap<String, String>>,
    events: broadcast::Sender<StorageEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            items: Mutex::new(HashMap::new()),
            events,
        }
    }

    fn items(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalStore for MemoryStore {
    fn set_item(&self, source: ContextId, key: &str, value: &str) -> Result<()> {
        self.items().insert(key.to_string(), value.to_string());
        // No receivers is fine: nobody is listening yet.
        let _ = self.events.send(StorageEvent {
            key: key.to_string(),
            source: Some(source),
        });
        Ok(())
    }

    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items().get(key).cloned())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.items().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}
