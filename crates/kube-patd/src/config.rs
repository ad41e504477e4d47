//! Controller configuration

use std::collections::BTreeMap;

use kube_pat_common::{ObjectKey, PatResult, Protocol};

use crate::tables::defaults;

/// Settings of a [`Controller`](crate::controller::Controller).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Load-balancer service per protocol. Protocols without an entry are
    /// not synchronized.
    pub load_balancers: BTreeMap<Protocol, ObjectKey>,

    /// Ingress interface for DNAT, egress interface for masquerade.
    pub interface: String,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            load_balancers: BTreeMap::new(),
            interface: defaults::INTERFACE.to_string(),
        }
    }
}

impl ControllerOptions {
    /// Sets the load balancer of `protocol` from a `namespace/name` flag.
    ///
    /// An empty or blank value disables synchronization for the protocol.
    pub fn with_load_balancer(mut self, protocol: Protocol, value: &str) -> PatResult<Self> {
        match parse_target(value)? {
            Some(key) => {
                self.load_balancers.insert(protocol, key);
            }
            None => {
                self.load_balancers.remove(&protocol);
            }
        }
        Ok(self)
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = interface.into();
        self
    }

    /// Returns the load balancer configured for `protocol`.
    pub fn load_balancer(&self, protocol: Protocol) -> Option<&ObjectKey> {
        self.load_balancers.get(&protocol)
    }
}

/// Parses an optional `namespace/name` target.
pub fn parse_target(value: &str) -> PatResult<Option<ObjectKey>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value.parse().map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube_pat_common::PatError;

    #[test]
    fn test_defaults() {
        let options = ControllerOptions::default();
        assert_eq!(options.interface, "eth0");
        assert!(options.load_balancers.is_empty());
    }

    #[test]
    fn test_with_load_balancer() {
        let options = ControllerOptions::default()
            .with_load_balancer(Protocol::Tcp, "kube-pat/kube-pat-tcp")
            .unwrap()
            .with_load_balancer(Protocol::Udp, "")
            .unwrap()
            .with_interface("ens3");

        assert_eq!(
            options.load_balancer(Protocol::Tcp),
            Some(&ObjectKey::new("kube-pat", "kube-pat-tcp"))
        );
        assert_eq!(options.load_balancer(Protocol::Udp), None);
        assert_eq!(options.interface, "ens3");
    }

    #[test]
    fn test_empty_value_disables_protocol() {
        let options = ControllerOptions::default()
            .with_load_balancer(Protocol::Udp, "kube-pat/kube-pat-udp")
            .unwrap()
            .with_load_balancer(Protocol::Udp, "  ")
            .unwrap();
        assert!(options.load_balancers.is_empty());
    }

    #[test]
    fn test_malformed_target() {
        assert!(matches!(
            parse_target("kube-pat-tcp"),
            Err(PatError::InvalidConfig { .. })
        ));
    }
}
