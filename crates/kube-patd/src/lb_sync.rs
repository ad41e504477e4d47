//! LoadBalancerSynchronizer - keeps load-balancer ports in line with the
//! forwarding table
//!
//! Each protocol has a load-balancer service, possibly shared with the
//! other protocols. The synchronizer replaces the ports of one protocol
//! when, and only when, the set of required ports differs from the
//! advertised one. Ports of other protocols are written back unchanged.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use kube_pat_common::{LoadBalancerApi, LoadBalancerPort, ObjectKey, PatError, PatResult, Protocol};

use crate::cache::ResourceCache;

/// Result of synchronizing one protocol's load balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No load balancer is configured for the protocol.
    Unconfigured,
    /// The configured load-balancer service does not exist.
    NotFound,
    /// No entry requires a port, the advertised list was left alone.
    Empty,
    /// The advertised ports already match the required set.
    InSync,
    /// The advertised port list was replaced.
    Updated,
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncOutcome::Unconfigured => "unconfigured",
            SyncOutcome::NotFound => "not-found",
            SyncOutcome::Empty => "empty",
            SyncOutcome::InSync => "in-sync",
            SyncOutcome::Updated => "updated",
        };
        f.write_str(s)
    }
}

/// Synchronizes load-balancer ports with the current cache contents.
#[derive(Clone)]
pub struct LoadBalancerSynchronizer {
    api: Arc<dyn LoadBalancerApi>,
}

impl LoadBalancerSynchronizer {
    pub fn new(api: Arc<dyn LoadBalancerApi>) -> Self {
        Self { api }
    }

    /// Brings the ports of `target` in line with the entries of `protocol`.
    ///
    /// An empty required set never results in an update. A missing target
    /// only skips this protocol.
    #[instrument(skip(self, cache), fields(target = %target))]
    pub async fn sync(
        &self,
        protocol: Protocol,
        target: &ObjectKey,
        cache: &ResourceCache,
    ) -> PatResult<SyncOutcome> {
        let required = required_ports(cache, protocol)?;
        if required.is_empty() {
            debug!("No ports required, leaving load balancer untouched");
            return Ok(SyncOutcome::Empty);
        }

        let current = match self.api.fetch(target).await {
            Ok(service) => service,
            Err(e @ PatError::LoadBalancerNotFound { .. }) => {
                warn!(error = %e, "Skipping load balancer synchronization");
                return Ok(SyncOutcome::NotFound);
            }
            Err(e) => return Err(e),
        };

        let wanted: BTreeSet<u16> = required.iter().map(|p| p.port).collect();
        let advertised = current.advertised_ports(protocol);
        if wanted == advertised {
            debug!(ports = ?wanted, "Load balancer ports in sync");
            return Ok(SyncOutcome::InSync);
        }

        let ports = current.with_ports(protocol, &required);
        self.api.update_ports(target, &ports).await?;
        info!(
            previous = ?advertised,
            ports = ?wanted,
            "Updated load balancer ports"
        );
        Ok(SyncOutcome::Updated)
    }
}

/// Computes the ports the load balancer of `protocol` must advertise.
///
/// Ports are ordered by number. When two entries claim the same port the
/// first one in cache order names it, like the packet filter keeps the
/// first rule.
pub fn required_ports(cache: &ResourceCache, protocol: Protocol) -> PatResult<Vec<LoadBalancerPort>> {
    let mut ports = BTreeMap::new();
    for entry in cache.resolve()?.filter_map(Result::ok) {
        if entry.protocol == protocol {
            ports
                .entry(entry.src_port)
                .or_insert_with(|| entry.load_balancer_port());
        }
    }
    Ok(ports.into_values().collect())
}
