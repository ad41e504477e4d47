//! Capability traits for the external systems the controller writes to.
//!
//! The controller owns the NAT table of the packet filter and the port list
//! of the load-balancer services. Both are reached only through these traits.

use async_trait::async_trait;

use crate::error::PatResult;
use crate::types::{LoadBalancerPort, LoadBalancerService, ObjectKey};

/// Packet filter command interface (iptables semantics).
///
/// A rule is passed as its argument vector without the table, chain and
/// action, e.g. `["-o", "eth0", "-j", "MASQUERADE"]`.
#[async_trait]
pub trait PacketFilter: Send + Sync {
    /// Appends a rule at the end of a chain.
    async fn append(&self, table: &str, chain: &str, rule: &[String]) -> PatResult<()>;

    /// Returns true if an identical rule exists in the chain.
    async fn exists(&self, table: &str, chain: &str, rule: &[String]) -> PatResult<bool>;

    /// Removes every rule of a chain.
    async fn clear_chain(&self, table: &str, chain: &str) -> PatResult<()>;

    /// Lists the rules of a chain in `-S` format.
    async fn list(&self, table: &str, chain: &str) -> PatResult<Vec<String>>;
}

/// Read/update interface of the load-balancer services.
#[async_trait]
pub trait LoadBalancerApi: Send + Sync {
    /// Fetches the current definition of a load-balancer service.
    ///
    /// Returns [`PatError::LoadBalancerNotFound`] when the service does not
    /// exist and [`PatError::LoadBalancer`] for transport failures.
    ///
    /// [`PatError::LoadBalancerNotFound`]: crate::PatError::LoadBalancerNotFound
    /// [`PatError::LoadBalancer`]: crate::PatError::LoadBalancer
    async fn fetch(&self, service: &ObjectKey) -> PatResult<LoadBalancerService>;

    /// Replaces the advertised port list of a load-balancer service.
    async fn update_ports(&self, service: &ObjectKey, ports: &[LoadBalancerPort])
        -> PatResult<()>;
}
