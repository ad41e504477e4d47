//! ResourceCache - joined view over translation specs and services
//!
//! The cache derives the forwarding table of a pass by joining every
//! translation spec with the service it references. It holds no state of its
//! own; both collections are maintained by their watchers.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use kube_pat_common::{
    AddressTranslationSpec, ForwardingEntry, PatError, PatResult, ServiceSnapshot, WatchEvent,
    WatchedCollection,
};

use crate::trigger::ReconcileTrigger;

/// Read-only join of translation specs and services.
#[derive(Clone)]
pub struct ResourceCache {
    specs: Arc<dyn WatchedCollection<AddressTranslationSpec>>,
    services: Arc<dyn WatchedCollection<ServiceSnapshot>>,
}

impl ResourceCache {
    pub fn new(
        specs: Arc<dyn WatchedCollection<AddressTranslationSpec>>,
        services: Arc<dyn WatchedCollection<ServiceSnapshot>>,
    ) -> Self {
        Self { specs, services }
    }

    /// Lists the specs and returns the outcome of resolving each of them.
    ///
    /// Specs are visited in `namespace/name` order. Service lookups happen
    /// lazily while iterating.
    pub fn resolve(&self) -> PatResult<Entries> {
        let mut specs = self.specs.list()?;
        specs.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(Entries {
            specs: specs.into_iter(),
            services: Arc::clone(&self.services),
        })
    }

    /// Returns the valid forwarding entries, logging the specs that fail to
    /// resolve.
    pub fn entries(&self) -> PatResult<impl Iterator<Item = ForwardingEntry>> {
        Ok(self.resolve()?.filter_map(|result| match result {
            Ok(entry) => Some(entry),
            Err(e) => {
                log_skipped(&e);
                None
            }
        }))
    }

    /// Requests a reconciliation on every relevant change of either
    /// collection.
    ///
    /// Subscriptions are taken before returning, so no change made after
    /// this call is missed.
    pub fn forward_events(&self, trigger: &ReconcileTrigger) -> Vec<JoinHandle<()>> {
        vec![
            spawn_forwarder(
                self.specs.name().to_string(),
                self.specs.subscribe(),
                trigger.clone(),
            ),
            spawn_forwarder(
                self.services.name().to_string(),
                self.services.subscribe(),
                trigger.clone(),
            ),
        ]
    }
}

/// Lazy sequence of resolved specs, created once per pass.
pub struct Entries {
    specs: std::vec::IntoIter<Arc<AddressTranslationSpec>>,
    services: Arc<dyn WatchedCollection<ServiceSnapshot>>,
}

impl Iterator for Entries {
    type Item = PatResult<ForwardingEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let spec = self.specs.next()?;
        Some(resolve_spec(&spec, self.services.as_ref()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.specs.size_hint()
    }
}

/// Joins one spec with its service.
///
/// The first declared port of the service decides the protocol and the
/// destination port.
fn resolve_spec(
    spec: &AddressTranslationSpec,
    services: &dyn WatchedCollection<ServiceSnapshot>,
) -> PatResult<ForwardingEntry> {
    let service_key = spec.service_key();
    let service = services
        .get(&service_key)
        .ok_or_else(|| PatError::ServiceNotFound {
            spec: spec.key.clone(),
            service: service_key.clone(),
        })?;

    if !service.service_type.is_cluster_internal() {
        return Err(PatError::InvalidServiceType {
            spec: spec.key.clone(),
            service: service_key,
            service_type: service.service_type.to_string(),
        });
    }

    let dest_ip = service.cluster_ip.ok_or_else(|| PatError::MissingClusterIp {
        spec: spec.key.clone(),
        service: service_key.clone(),
    })?;

    let target = service
        .ports
        .first()
        .ok_or_else(|| PatError::NoServicePorts {
            spec: spec.key.clone(),
            service: service_key.clone(),
        })?;

    let src_port = u16::try_from(spec.port)
        .ok()
        .filter(|port| *port != 0)
        .ok_or_else(|| PatError::InvalidPort {
            spec: spec.key.clone(),
            port: spec.port,
        })?;

    Ok(ForwardingEntry {
        protocol: target.protocol,
        src_port,
        dest_ip,
        dest_port: target.port,
        spec: spec.key.clone(),
        service: service_key,
    })
}

/// Logs a spec that was left out of the forwarding table.
pub(crate) fn log_skipped(error: &PatError) {
    match error {
        PatError::ServiceNotFound { spec, service }
        | PatError::MissingClusterIp { spec, service }
        | PatError::NoServicePorts { spec, service }
        | PatError::InvalidServiceType { spec, service, .. } => {
            warn!(spec = %spec, service = %service, error = %error, "Skipping translation");
        }
        PatError::InvalidPort { spec, .. } => {
            warn!(spec = %spec, error = %error, "Skipping translation");
        }
        _ => warn!(error = %error, "Skipping translation"),
    }
}

fn spawn_forwarder(
    collection: String,
    mut events: broadcast::Receiver<WatchEvent>,
    trigger: ReconcileTrigger,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) if event.is_relevant() => {
                    debug!(collection = %collection, key = %event.key(), "Change detected");
                    trigger.request();
                }
                Ok(event) => {
                    trace!(collection = %collection, key = %event.key(), "Ignoring resync");
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(collection = %collection, missed, "Change notifications lagged");
                    trigger.request();
                }
                Err(RecvError::Closed) => {
                    debug!(collection = %collection, "Change notifications closed");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use kube_pat_common::{ObjectKey, Protocol, ServiceType};
    use kube_pat_test::fixtures::*;
    use kube_pat_test::MemoryCollection;
    use pretty_assertions::assert_eq;
    use tokio::time::timeout;

    fn cache(
        specs: Vec<AddressTranslationSpec>,
        services: Vec<ServiceSnapshot>,
    ) -> (
        Arc<MemoryCollection<AddressTranslationSpec>>,
        Arc<MemoryCollection<ServiceSnapshot>>,
        ResourceCache,
    ) {
        let specs = Arc::new(MemoryCollection::with_objects("specs", specs));
        let services = Arc::new(MemoryCollection::with_objects("services", services));
        let cache = ResourceCache::new(specs.clone(), services.clone());
        (specs, services, cache)
    }

    #[test]
    fn test_resolves_cluster_ip_service() {
        let (_, _, cache) = cache(
            vec![spec("web", "nginx", 8080)],
            vec![cluster_ip_service("nginx", "10.0.0.5", Protocol::Tcp, 80)],
        );

        let entries: Vec<_> = cache.entries().unwrap().collect();
        assert_eq!(
            entries,
            vec![ForwardingEntry {
                protocol: Protocol::Tcp,
                src_port: 8080,
                dest_ip: "10.0.0.5".parse().unwrap(),
                dest_port: 80,
                spec: ObjectKey::new(NAMESPACE, "web"),
                service: ObjectKey::new(NAMESPACE, "nginx"),
            }]
        );
    }

    #[test]
    fn test_first_service_port_wins() {
        let mut svc = cluster_ip_service("dns", "10.96.0.10", Protocol::Udp, 53);
        svc.ports
            .push(kube_pat_common::ServicePort::new(Protocol::Tcp, 53));
        let (_, _, cache) = cache(vec![spec("dns", "dns", 53)], vec![svc]);

        let entry = cache.entries().unwrap().next().unwrap();
        assert_eq!(entry.protocol, Protocol::Udp);
        assert_eq!(entry.dest_port, 53);
    }

    #[test]
    fn test_specs_are_sorted_by_key() {
        let (_, _, cache) = cache(
            vec![spec("zeta", "svc", 2), spec("alpha", "svc", 1)],
            vec![cluster_ip_service("svc", "10.0.0.1", Protocol::Tcp, 80)],
        );

        let names: Vec<_> = cache
            .entries()
            .unwrap()
            .map(|e| e.spec.name)
            .collect();
        assert_eq!(names, vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[test]
    fn test_missing_service_is_skipped() {
        let (_, _, cache) = cache(
            vec![spec("orphan", "missing", 80), spec("web", "nginx", 8080)],
            vec![cluster_ip_service("nginx", "10.0.0.5", Protocol::Tcp, 80)],
        );

        let results: Vec<_> = cache.resolve().unwrap().collect();
        assert_eq!(results.len(), 2);
        assert!(matches!(
            &results[0],
            Err(PatError::ServiceNotFound { service, .. }) if service.name == "missing"
        ));
        assert!(results[1].is_ok());
        assert_eq!(cache.entries().unwrap().count(), 1);
    }

    #[test]
    fn test_validation_failures() {
        let (_, _, cache) = cache(
            vec![
                spec("a-external", "lb", 80),
                spec("b-headless", "headless", 80),
                spec("c-portless", "portless", 80),
                spec("d-negative", "ok", -1),
                spec("e-zero", "ok", 0),
                spec("f-huge", "ok", 70000),
            ],
            vec![
                service_of_type("lb", ServiceType::LoadBalancer, "10.0.0.1", Protocol::Tcp, 80),
                headless_service("headless", Protocol::Tcp, 80),
                ServiceSnapshot {
                    ports: Vec::new(),
                    ..cluster_ip_service("portless", "10.0.0.2", Protocol::Tcp, 80)
                },
                cluster_ip_service("ok", "10.0.0.3", Protocol::Tcp, 80),
            ],
        );

        let errors: Vec<_> = cache
            .resolve()
            .unwrap()
            .map(|r| r.unwrap_err())
            .collect();
        assert!(matches!(
            &errors[0],
            PatError::InvalidServiceType { service_type, .. } if service_type == "LoadBalancer"
        ));
        assert!(matches!(errors[1], PatError::MissingClusterIp { .. }));
        assert!(matches!(errors[2], PatError::NoServicePorts { .. }));
        assert!(matches!(errors[3], PatError::InvalidPort { port: -1, .. }));
        assert!(matches!(errors[4], PatError::InvalidPort { port: 0, .. }));
        assert!(matches!(errors[5], PatError::InvalidPort { port: 70000, .. }));
        assert!(errors.iter().all(PatError::is_entry_scoped));
    }

    #[test]
    fn test_service_lookup_uses_spec_namespace() {
        let mut svc = cluster_ip_service("nginx", "10.0.0.5", Protocol::Tcp, 80);
        svc.key = ObjectKey::new("other", "nginx");
        let (_, _, cache) = cache(vec![spec("web", "nginx", 8080)], vec![svc]);

        assert!(matches!(
            cache.resolve().unwrap().next(),
            Some(Err(PatError::ServiceNotFound { .. }))
        ));
    }

    #[test]
    fn test_list_failure_is_returned() {
        let (specs, _, cache) = cache(vec![spec("web", "nginx", 8080)], Vec::new());
        specs.fail_listing(Some("connection reset"));

        match cache.resolve() {
            Err(PatError::CacheList { collection, .. }) => assert_eq!(collection, "specs"),
            Err(e) => panic!("Expected CacheList, got {:?}", e),
            Ok(_) => panic!("Expected CacheList, got entries"),
        }
    }

    #[tokio::test]
    async fn test_forward_events() {
        let (specs, services, cache) = cache(
            vec![spec("web", "nginx", 8080)],
            vec![cluster_ip_service("nginx", "10.0.0.5", Protocol::Tcp, 80)],
        );
        let trigger = ReconcileTrigger::new();
        let handles = cache.forward_events(&trigger);

        // Resyncs with an unchanged version are ignored
        services.resync(&ObjectKey::new(NAMESPACE, "nginx"));
        specs.resync(&ObjectKey::new(NAMESPACE, "web"));
        assert!(timeout(Duration::from_millis(100), trigger.notified())
            .await
            .is_err());

        let mut changed = cluster_ip_service("nginx", "10.0.0.6", Protocol::Tcp, 80);
        changed.resource_version = Some("2".to_string());
        services.upsert(changed);
        timeout(Duration::from_secs(1), trigger.notified())
            .await
            .expect("service update triggers");

        specs.remove(&ObjectKey::new(NAMESPACE, "web"));
        timeout(Duration::from_secs(1), trigger.notified())
            .await
            .expect("spec deletion triggers");

        for handle in handles {
            handle.abort();
        }
    }
}
