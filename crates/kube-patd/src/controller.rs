//! Controller - drives reconciliation passes
//!
//! A pass rebuilds the PREROUTING chain from the joined view of the cache
//! and then synchronizes the load balancer of every configured protocol.
//! Passes are serialized: the forwarder lives behind an async mutex that is
//! held for the whole pass.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use kube_pat_common::{ForwardingEntry, LoadBalancerApi, PatError, PatResult, Protocol};

use crate::cache::{log_skipped, ResourceCache};
use crate::config::ControllerOptions;
use crate::lb_sync::{LoadBalancerSynchronizer, SyncOutcome};
use crate::port_forwarder::PortForwarder;
use crate::trigger::ReconcileTrigger;

/// Summary of one reconciliation pass.
#[derive(Debug, Default)]
pub struct PassReport {
    /// False when the controller was stopped and the pass did nothing.
    pub ran: bool,
    /// Entries whose DNAT rule was installed, in installation order.
    pub installed: Vec<ForwardingEntry>,
    /// Entry-scoped failures of the pass.
    pub skipped: Vec<PatError>,
    /// Load-balancer outcome per protocol.
    pub load_balancers: BTreeMap<Protocol, SyncOutcome>,
    /// PREROUTING rules read back at the end of the pass.
    pub rules: Vec<String>,
}

impl PassReport {
    fn not_run() -> Self {
        Self::default()
    }

    /// Returns the load-balancer outcome of `protocol`.
    pub fn load_balancer(&self, protocol: Protocol) -> Option<SyncOutcome> {
        self.load_balancers.get(&protocol).copied()
    }
}

/// Reconciliation controller.
pub struct Controller {
    cache: ResourceCache,
    forwarder: Mutex<PortForwarder>,
    lb_sync: LoadBalancerSynchronizer,
    options: ControllerOptions,
    running: AtomicBool,
}

impl Controller {
    /// Creates a stopped controller.
    pub fn new(
        cache: ResourceCache,
        forwarder: PortForwarder,
        load_balancer: Arc<dyn LoadBalancerApi>,
        options: ControllerOptions,
    ) -> Self {
        Self {
            cache,
            forwarder: Mutex::new(forwarder),
            lb_sync: LoadBalancerSynchronizer::new(load_balancer),
            options,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Marks the controller running and performs the initial pass.
    pub async fn start(&self) -> PatResult<PassReport> {
        self.running.store(true, Ordering::SeqCst);
        info!("Starting PAT controller");
        self.reconcile().await
    }

    /// Stops the controller. A pass in flight completes, later requests are
    /// ignored.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Stopping PAT controller");
        }
    }

    /// Runs one reconciliation pass.
    ///
    /// Entry-scoped failures are logged and reported, every other failure
    /// aborts the pass and is returned.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> PatResult<PassReport> {
        if !self.is_running() {
            debug!("Controller stopped, ignoring reconciliation request");
            return Ok(PassReport::not_run());
        }

        let mut forwarder = self.forwarder.lock().await;
        if !self.is_running() {
            debug!("Controller stopped while waiting for the previous pass");
            return Ok(PassReport::not_run());
        }

        let mut report = PassReport {
            ran: true,
            ..PassReport::default()
        };

        forwarder.clear().await?;

        for result in self.cache.resolve()? {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    log_skipped(&e);
                    report.skipped.push(e);
                    continue;
                }
            };

            match forwarder.forward(&entry).await {
                Ok(()) => report.installed.push(entry),
                Err(e) if e.is_entry_scoped() => {
                    warn!(spec = %entry.spec, service = %entry.service, error = %e, "Skipping translation");
                    report.skipped.push(e);
                }
                Err(e) => return Err(e),
            }
        }

        for protocol in Protocol::ALL {
            let outcome = match self.options.load_balancer(protocol) {
                Some(target) => self.lb_sync.sync(protocol, target, &self.cache).await?,
                None => SyncOutcome::Unconfigured,
            };
            report.load_balancers.insert(protocol, outcome);
        }

        report.rules = forwarder.print().await;

        info!(
            installed = report.installed.len(),
            skipped = report.skipped.len(),
            "Reconciliation pass complete"
        );
        Ok(report)
    }

    /// Runs the reconciliation worker until `shutdown` is cancelled.
    ///
    /// Pass failures are logged and the worker keeps waiting for the next
    /// request.
    pub async fn run(&self, trigger: ReconcileTrigger, shutdown: CancellationToken) {
        if let Err(e) = self.start().await {
            error!(error = %e, "Initial reconciliation pass failed");
        }

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = trigger.notified() => {
                    if let Err(e) = self.reconcile().await {
                        error!(error = %e, "Reconciliation pass failed");
                    }
                }
            }
        }

        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use kube_pat_common::{AddressTranslationSpec, ServiceSnapshot};
    use kube_pat_test::fixtures::*;
    use kube_pat_test::{FakeLoadBalancer, FilterOp, MemoryCollection, RecordingPacketFilter};
    use pretty_assertions::assert_eq;

    struct Harness {
        specs: Arc<MemoryCollection<AddressTranslationSpec>>,
        filter: Arc<RecordingPacketFilter>,
        controller: Arc<Controller>,
    }

    fn harness() -> Harness {
        let specs = Arc::new(MemoryCollection::with_objects(
            "specs",
            [spec("web", "nginx", 8080)],
        ));
        let services: Arc<MemoryCollection<ServiceSnapshot>> = Arc::new(
            MemoryCollection::with_objects(
                "services",
                [cluster_ip_service("nginx", "10.0.0.5", Protocol::Tcp, 80)],
            ),
        );
        let filter = Arc::new(RecordingPacketFilter::new());
        let controller = Controller::new(
            ResourceCache::new(specs.clone(), services),
            PortForwarder::without_masquerade(filter.clone(), "eth0"),
            Arc::new(FakeLoadBalancer::new()),
            ControllerOptions::default(),
        );
        Harness {
            specs,
            filter,
            controller: Arc::new(controller),
        }
    }

    #[tokio::test]
    async fn test_stopped_controller_does_nothing() {
        let h = harness();
        let report = h.controller.reconcile().await.unwrap();
        assert!(!report.ran);
        assert!(h.filter.calls().is_empty());
    }

    #[tokio::test]
    async fn test_start_runs_initial_pass() {
        let h = harness();
        let report = h.controller.start().await.unwrap();

        assert!(h.controller.is_running());
        assert!(report.ran);
        assert_eq!(report.installed.len(), 1);
        assert_eq!(
            report.load_balancer(Protocol::Tcp),
            Some(SyncOutcome::Unconfigured)
        );
        assert_eq!(
            report.rules,
            vec!["-A PREROUTING -p tcp -i eth0 --dport 8080 -j DNAT --to-destination 10.0.0.5:80".to_string()]
        );
        assert_eq!(h.filter.calls()[0], "clear nat PREROUTING");
    }

    #[tokio::test]
    async fn test_stop_ignores_later_requests() {
        let h = harness();
        h.controller.start().await.unwrap();
        h.controller.stop();
        let calls = h.filter.calls().len();

        assert!(!h.controller.reconcile().await.unwrap().ran);
        assert_eq!(h.filter.calls().len(), calls);
    }

    #[tokio::test]
    async fn test_list_failure_aborts_pass() {
        let h = harness();
        h.controller.start().await.unwrap();

        h.specs.fail_listing(Some("watch stream closed"));
        assert!(matches!(
            h.controller.reconcile().await,
            Err(PatError::CacheList { .. })
        ));
        assert!(h.controller.is_running());

        h.specs.fail_listing(None);
        assert_eq!(h.controller.reconcile().await.unwrap().installed.len(), 1);
    }

    #[tokio::test]
    async fn test_run_until_cancelled() {
        let h = harness();
        let trigger = ReconcileTrigger::new();
        let shutdown = CancellationToken::new();

        let worker = {
            let controller = h.controller.clone();
            let trigger = trigger.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { controller.run(trigger, shutdown).await })
        };

        // Initial pass plus one requested pass
        trigger.request();
        for _ in 0..100 {
            if h.filter.count(FilterOp::Clear) >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(h.filter.count(FilterOp::Clear), 2);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .expect("worker exits")
            .unwrap();
        assert!(!h.controller.is_running());
    }
}
