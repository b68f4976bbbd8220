//! Origin-scoped key/value storage with change notifications.
//!
//! This is the channel the logout broadcast travels on. A session writes a
//! timestamp under its logout key; every other session subscribed to the same
//! store sees the change and drops its credential. Values are opaque triggers
//! and never carry the credential.
//!
//! - `MemoryStore`: sessions inside one process
//! - `FileStore`: every process pointing at the same directory

pub mod file;
pub mod memory;

use std::fmt;

use anyhow::Result;
use tokio::sync::broadcast;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Capacity of the change-notification channel.
/// Logout signals are rare; 64 leaves headroom for bursts of unrelated keys.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Identifies one client context (the equivalent of a browser tab).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A change to one key of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    /// Context that wrote the value, or `None` if it came from another process.
    pub source: Option<ContextId>,
}

/// Key/value store shared by every context of one origin.
///
/// Writes are synchronous. Subscribers receive an event for every write,
/// including their own; filtering by `source` is the subscriber's job.
pub trait SignalStore: Send + Sync {
    fn set_item(&self, source: ContextId, key: &str, value: &str) -> Result<()>;

    fn get_item(&self, key: &str) -> Result<Option<String>>;

    fn keys(&self) -> Result<Vec<String>>;

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent>;
}
