//! Watched collections backed by the Kubernetes API
//!
//! A [`KubeCollection`] keeps the converted domain objects of one resource
//! kind in memory. A driver task consumes a `kube::runtime::watcher` stream
//! and turns its events into [`WatchEvent`]s.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use futures::{pin_mut, StreamExt};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Resource};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use kube_pat_common::{
    Keyed, ObjectKey, PatError, PatResult, WatchEvent, WatchedCollection, WATCH_CHANNEL_CAPACITY,
};

use super::convert::{object_key, FromKube};

/// In-memory objects of a collection and their change notifications.
struct Store<T> {
    objects: RwLock<BTreeMap<ObjectKey, Arc<T>>>,
    events: broadcast::Sender<WatchEvent>,
}

impl<T: Keyed> Store<T> {
    fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            objects: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    fn apply(&self, object: T) {
        let key = object.key().clone();
        let new_version = object.resource_version().map(str::to_string);
        let previous = self.objects.write().insert(key.clone(), Arc::new(object));
        self.notify(match previous {
            None => WatchEvent::Added(key),
            Some(old) => WatchEvent::Updated {
                key,
                old_version: old.resource_version().map(str::to_string),
                new_version,
            },
        });
    }

    fn delete(&self, key: &ObjectKey) {
        if self.objects.write().remove(key).is_some() {
            self.notify(WatchEvent::Deleted(key.clone()));
        }
    }

    /// Swaps in the result of a full re-list.
    ///
    /// Objects missing from `objects` are reported as deleted.
    fn replace(&self, objects: BTreeMap<ObjectKey, Arc<T>>) {
        let previous = std::mem::replace(&mut *self.objects.write(), objects.clone());

        for (key, object) in &objects {
            match previous.get(key) {
                None => self.notify(WatchEvent::Added(key.clone())),
                Some(old) => self.notify(WatchEvent::Updated {
                    key: key.clone(),
                    old_version: old.resource_version().map(str::to_string),
                    new_version: object.resource_version().map(str::to_string),
                }),
            }
        }
        for key in previous.keys().filter(|k| !objects.contains_key(*k)) {
            self.notify(WatchEvent::Deleted(key.clone()));
        }
    }

    fn notify(&self, event: WatchEvent) {
        // No subscriber yet is fine, the first pass lists everything
        let _ = self.events.send(event);
    }
}

/// Collection of converted objects fed by a Kubernetes watcher.
pub struct KubeCollection<T> {
    name: String,
    store: Arc<Store<T>>,
    ready: watch::Receiver<bool>,
}

impl<T> KubeCollection<T>
where
    T: Keyed + Send + Sync + 'static,
{
    /// Starts watching `api` and returns the collection with its driver task.
    ///
    /// Objects that fail to convert are logged and treated as absent.
    pub fn spawn<K>(name: impl Into<String>, api: Api<K>) -> (Self, JoinHandle<()>)
    where
        K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
        K::DynamicType: Default,
        T: FromKube<K>,
    {
        let name = name.into();
        let store = Arc::new(Store::new());
        let (ready_tx, ready) = watch::channel(false);

        let driver = tokio::spawn(drive(
            name.clone(),
            api,
            Arc::clone(&store),
            ready_tx,
        ));

        (Self { name, store, ready }, driver)
    }

    /// Waits until the initial listing completed.
    pub async fn ready(&self) -> PatResult<()> {
        let mut ready = self.ready.clone();
        ready
            .wait_for(|synced| *synced)
            .await
            .map(|_| ())
            .map_err(|_| PatError::cache_list(self.name.clone(), "watcher stopped before sync"))
    }

    fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }
}

impl<T> WatchedCollection<T> for KubeCollection<T>
where
    T: Keyed + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn list(&self) -> PatResult<Vec<Arc<T>>> {
        if !self.is_ready() {
            return Err(PatError::cache_list(self.name.clone(), "cache not synced"));
        }
        Ok(self.store.objects.read().values().cloned().collect())
    }

    fn get(&self, key: &ObjectKey) -> Option<Arc<T>> {
        self.store.objects.read().get(key).cloned()
    }

    fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.store.events.subscribe()
    }
}

async fn drive<K, T>(
    name: String,
    api: Api<K>,
    store: Arc<Store<T>>,
    ready: watch::Sender<bool>,
) where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default,
    T: Keyed + FromKube<K>,
{
    let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
    pin_mut!(stream);

    // Objects of a re-list in progress
    let mut relist: Option<BTreeMap<ObjectKey, Arc<T>>> = None;

    while let Some(event) = stream.next().await {
        match event {
            Ok(Event::Init) => {
                debug!(collection = %name, "Listing");
                relist = Some(BTreeMap::new());
            }
            Ok(Event::InitApply(object)) => {
                let Some(objects) = relist.as_mut() else {
                    continue;
                };
                if let Some(converted) = convert::<K, T>(&name, &object) {
                    objects.insert(converted.key().clone(), Arc::new(converted));
                }
            }
            Ok(Event::InitDone) => {
                if let Some(objects) = relist.take() {
                    info!(collection = %name, count = objects.len(), "Cache synced");
                    store.replace(objects);
                }
                ready.send_replace(true);
            }
            Ok(Event::Apply(object)) => match convert::<K, T>(&name, &object) {
                Some(converted) => store.apply(converted),
                None => {
                    if let Ok(key) = object_key(&object) {
                        store.delete(&key);
                    }
                }
            },
            Ok(Event::Delete(object)) => match object_key(&object) {
                Ok(key) => store.delete(&key),
                Err(e) => warn!(collection = %name, error = %e, "Ignoring deletion"),
            },
            Err(e) => warn!(collection = %name, error = %e, "Watch failed, retrying"),
        }
    }

    warn!(collection = %name, "Watch stream ended");
}

fn convert<K, T>(collection: &str, object: &K) -> Option<T>
where
    K: Resource,
    T: FromKube<K>,
{
    match T::from_kube(object) {
        Ok(converted) => Some(converted),
        Err(e) => {
            warn!(collection, error = %e, "Ignoring object");
            None
        }
    }
}
