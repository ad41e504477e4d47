//! In-memory implementations of the capability traits.
//!
//! The fakes keep enough state to answer the controller the way the real
//! systems would, and count every call so tests can assert on write
//! behaviour.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use kube_pat_common::{
    Keyed, LoadBalancerApi, LoadBalancerPort, LoadBalancerService, ObjectKey, PacketFilter,
    PatError, PatResult, WatchEvent, WatchedCollection, WATCH_CHANNEL_CAPACITY,
};

/// Watched collection backed by a map, fed by the test.
pub struct MemoryCollection<T> {
    name: String,
    objects: RwLock<BTreeMap<ObjectKey, Arc<T>>>,
    events: broadcast::Sender<WatchEvent>,
    list_failure: Mutex<Option<String>>,
}

impl<T: Keyed + Send + Sync> MemoryCollection<T> {
    pub fn new(name: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            name: name.into(),
            objects: RwLock::new(BTreeMap::new()),
            events,
            list_failure: Mutex::new(None),
        }
    }

    /// Creates a collection pre-populated with `objects`, without events.
    pub fn with_objects(name: impl Into<String>, objects: impl IntoIterator<Item = T>) -> Self {
        let collection = Self::new(name);
        {
            let mut map = collection.objects.write();
            for object in objects {
                map.insert(object.key().clone(), Arc::new(object));
            }
        }
        collection
    }

    /// Inserts or replaces an object and notifies subscribers.
    pub fn upsert(&self, object: T) {
        let key = object.key().clone();
        let new_version = object.resource_version().map(str::to_string);
        let previous = self.objects.write().insert(key.clone(), Arc::new(object));
        let event = match previous {
            None => WatchEvent::Added(key),
            Some(old) => WatchEvent::Updated {
                key,
                old_version: old.resource_version().map(str::to_string),
                new_version,
            },
        };
        let _ = self.events.send(event);
    }

    /// Removes an object and notifies subscribers.
    pub fn remove(&self, key: &ObjectKey) -> Option<Arc<T>> {
        let removed = self.objects.write().remove(key);
        if removed.is_some() {
            let _ = self.events.send(WatchEvent::Deleted(key.clone()));
        }
        removed
    }

    /// Re-delivers an object unchanged, like a periodic informer resync.
    pub fn resync(&self, key: &ObjectKey) {
        let version = self
            .objects
            .read()
            .get(key)
            .and_then(|o| o.resource_version().map(str::to_string));
        let _ = self.events.send(WatchEvent::Updated {
            key: key.clone(),
            old_version: version.clone(),
            new_version: version,
        });
    }

    /// Makes every following `list()` fail until cleared with `None`.
    pub fn fail_listing(&self, message: Option<&str>) {
        *self.list_failure.lock() = message.map(str::to_string);
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl<T: Keyed + Send + Sync> WatchedCollection<T> for MemoryCollection<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn list(&self) -> PatResult<Vec<Arc<T>>> {
        if let Some(message) = self.list_failure.lock().clone() {
            return Err(PatError::cache_list(self.name.clone(), message));
        }
        Ok(self.objects.read().values().cloned().collect())
    }

    fn get(&self, key: &ObjectKey) -> Option<Arc<T>> {
        self.objects.read().get(key).cloned()
    }

    fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}

/// Packet filter operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    Append,
    Exists,
    Clear,
    List,
}

/// Packet filter that keeps chains in memory and logs every call.
#[derive(Default)]
pub struct RecordingPacketFilter {
    chains: Mutex<BTreeMap<(String, String), Vec<Vec<String>>>>,
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<FilterOp>>,
    yielding: AtomicBool,
}

impl RecordingPacketFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `op` fail until [`RecordingPacketFilter::recover`] is called.
    pub fn fail_on(&self, op: FilterOp) {
        self.failing.lock().insert(op);
    }

    /// Makes every call yield to the runtime before it is recorded, so
    /// concurrent callers get a chance to interleave.
    pub fn yield_on_calls(&self, enabled: bool) {
        self.yielding.store(enabled, Ordering::SeqCst);
    }

    async fn maybe_yield(&self) {
        if self.yielding.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
    }

    /// Clears all injected failures.
    pub fn recover(&self) {
        self.failing.lock().clear();
    }

    /// Rules of a chain, each joined with spaces.
    pub fn rules(&self, table: &str, chain: &str) -> Vec<String> {
        self.chains
            .lock()
            .get(&(table.to_string(), chain.to_string()))
            .map(|rules| rules.iter().map(|r| r.join(" ")).collect())
            .unwrap_or_default()
    }

    /// Every call made so far, in order (e.g. "clear nat PREROUTING").
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of calls of the given operation.
    pub fn count(&self, op: FilterOp) -> usize {
        let prefix = op_name(op);
        self.calls
            .lock()
            .iter()
            .filter(|c| c.split(' ').next() == Some(prefix))
            .count()
    }

    fn record(&self, op: FilterOp, table: &str, chain: &str, rule: &[String]) -> PatResult<()> {
        let mut line = format!("{} {} {}", op_name(op), table, chain);
        if !rule.is_empty() {
            line.push(' ');
            line.push_str(&rule.join(" "));
        }
        self.calls.lock().push(line.clone());

        if self.failing.lock().contains(&op) {
            return Err(PatError::ShellCommandFailed {
                command: line,
                exit_code: 1,
                output: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

fn op_name(op: FilterOp) -> &'static str {
    match op {
        FilterOp::Append => "append",
        FilterOp::Exists => "exists",
        FilterOp::Clear => "clear",
        FilterOp::List => "list",
    }
}

#[async_trait]
impl PacketFilter for RecordingPacketFilter {
    async fn append(&self, table: &str, chain: &str, rule: &[String]) -> PatResult<()> {
        self.maybe_yield().await;
        self.record(FilterOp::Append, table, chain, rule)?;
        self.chains
            .lock()
            .entry((table.to_string(), chain.to_string()))
            .or_default()
            .push(rule.to_vec());
        Ok(())
    }

    async fn exists(&self, table: &str, chain: &str, rule: &[String]) -> PatResult<bool> {
        self.maybe_yield().await;
        self.record(FilterOp::Exists, table, chain, rule)?;
        Ok(self
            .chains
            .lock()
            .get(&(table.to_string(), chain.to_string()))
            .is_some_and(|rules| rules.iter().any(|r| r.as_slice() == rule)))
    }

    async fn clear_chain(&self, table: &str, chain: &str) -> PatResult<()> {
        self.maybe_yield().await;
        self.record(FilterOp::Clear, table, chain, &[])?;
        self.chains
            .lock()
            .remove(&(table.to_string(), chain.to_string()));
        Ok(())
    }

    async fn list(&self, table: &str, chain: &str) -> PatResult<Vec<String>> {
        self.maybe_yield().await;
        self.record(FilterOp::List, table, chain, &[])?;
        Ok(self
            .rules(table, chain)
            .into_iter()
            .map(|rule| format!("-A {} {}", chain, rule))
            .collect())
    }
}

/// Load-balancer API over an in-memory map of services.
#[derive(Default)]
pub struct FakeLoadBalancer {
    services: Mutex<HashMap<ObjectKey, Vec<LoadBalancerPort>>>,
    fetches: AtomicUsize,
    updates: AtomicUsize,
    fail_updates: Mutex<bool>,
}

impl FakeLoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a load-balancer service with its current ports.
    pub fn with_service(self, key: ObjectKey, ports: Vec<LoadBalancerPort>) -> Self {
        self.services.lock().insert(key, ports);
        self
    }

    /// Current ports of a service, if it exists.
    pub fn ports(&self, key: &ObjectKey) -> Option<Vec<LoadBalancerPort>> {
        self.services.lock().get(key).cloned()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of successful and failed `update_ports` calls.
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    /// Makes every following update fail at the transport level.
    pub fn fail_updates(&self, fail: bool) {
        *self.fail_updates.lock() = fail;
    }
}

#[async_trait]
impl LoadBalancerApi for FakeLoadBalancer {
    async fn fetch(&self, service: &ObjectKey) -> PatResult<LoadBalancerService> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.services
            .lock()
            .get(service)
            .map(|ports| LoadBalancerService {
                key: service.clone(),
                ports: ports.clone(),
            })
            .ok_or_else(|| PatError::LoadBalancerNotFound {
                service: service.clone(),
            })
    }

    async fn update_ports(
        &self,
        service: &ObjectKey,
        ports: &[LoadBalancerPort],
    ) -> PatResult<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if *self.fail_updates.lock() {
            return Err(PatError::load_balancer(
                "update",
                service.clone(),
                "injected failure",
            ));
        }
        let mut services = self.services.lock();
        match services.get_mut(service) {
            Some(current) => {
                *current = ports.to_vec();
                Ok(())
            }
            None => Err(PatError::LoadBalancerNotFound {
                service: service.clone(),
            }),
        }
    }
}
