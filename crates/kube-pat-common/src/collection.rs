//! Watched keyed collections.
//!
//! A [`WatchedCollection`] is a read-only, externally maintained cache of
//! objects (translation specs or services) with change notifications. The
//! controller never writes to it.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::error::PatResult;
use crate::types::{AddressTranslationSpec, ObjectKey, ServiceSnapshot};

/// Capacity of the change notification channel of a collection.
pub const WATCH_CHANNEL_CAPACITY: usize = 256;

/// A change observed on a watched collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// An object appeared.
    Added(ObjectKey),
    /// An object was re-delivered, possibly with new content.
    Updated {
        key: ObjectKey,
        old_version: Option<String>,
        new_version: Option<String>,
    },
    /// An object disappeared.
    Deleted(ObjectKey),
}

impl WatchEvent {
    /// Returns the key of the object the event is about.
    pub fn key(&self) -> &ObjectKey {
        match self {
            WatchEvent::Added(key) | WatchEvent::Deleted(key) => key,
            WatchEvent::Updated { key, .. } => key,
        }
    }

    /// Returns true if the event can change the desired state.
    ///
    /// Updates that carry the same resource version are periodic resyncs and
    /// are ignored.
    pub fn is_relevant(&self) -> bool {
        match self {
            WatchEvent::Added(_) | WatchEvent::Deleted(_) => true,
            WatchEvent::Updated {
                old_version,
                new_version,
                ..
            } => old_version.is_none() || old_version != new_version,
        }
    }
}

/// Objects stored in a watched collection.
pub trait Keyed {
    fn key(&self) -> &ObjectKey;

    fn resource_version(&self) -> Option<&str>;
}

impl Keyed for AddressTranslationSpec {
    fn key(&self) -> &ObjectKey {
        &self.key
    }

    fn resource_version(&self) -> Option<&str> {
        self.resource_version.as_deref()
    }
}

impl Keyed for ServiceSnapshot {
    fn key(&self) -> &ObjectKey {
        &self.key
    }

    fn resource_version(&self) -> Option<&str> {
        self.resource_version.as_deref()
    }
}

/// A cached, watched collection of objects keyed by `namespace/name`.
pub trait WatchedCollection<T>: Send + Sync {
    /// Returns a short name for logging (e.g. "services").
    fn name(&self) -> &str;

    /// Lists every object currently in the cache.
    fn list(&self) -> PatResult<Vec<Arc<T>>>;

    /// Looks up one object by key.
    fn get(&self, key: &ObjectKey) -> Option<Arc<T>>;

    /// Subscribes to change notifications.
    fn subscribe(&self) -> broadcast::Receiver<WatchEvent>;
}
