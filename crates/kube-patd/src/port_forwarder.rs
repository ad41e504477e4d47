//! PortForwarder - translates forwarding entries into DNAT rules
//!
//! The forwarder owns the NAT PREROUTING chain. A reconciliation pass always
//! calls [`PortForwarder::clear`] first and then [`PortForwarder::forward`]
//! for each entry, so no rule of a previous pass survives.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use kube_pat_common::{ForwardingEntry, ObjectKey, PacketFilter, PatError, PatResult, Protocol};

use crate::commands::{build_dnat_rule, build_masquerade_rule};
use crate::tables::{NAT_TABLE, POSTROUTING_CHAIN, PREROUTING_CHAIN};

/// Configures port address translation to redirect L3 traffic.
pub struct PortForwarder {
    filter: Arc<dyn PacketFilter>,

    /// Ingress interface of the DNAT rules
    interface: String,

    /// Ports claimed in the current pass, per protocol
    claimed: HashMap<Protocol, HashMap<u16, ObjectKey>>,
}

impl PortForwarder {
    /// Creates a forwarder and installs the egress masquerade rule.
    ///
    /// The masquerade rule is independent of the per-pass state and is only
    /// appended when not already present.
    pub async fn new(filter: Arc<dyn PacketFilter>, interface: impl Into<String>) -> PatResult<Self> {
        let forwarder = Self::without_masquerade(filter, interface);
        forwarder.install_masquerade().await?;
        Ok(forwarder)
    }

    /// Creates a forwarder without touching the POSTROUTING chain.
    pub fn without_masquerade(filter: Arc<dyn PacketFilter>, interface: impl Into<String>) -> Self {
        Self {
            filter,
            interface: interface.into(),
            claimed: HashMap::new(),
        }
    }

    async fn install_masquerade(&self) -> PatResult<()> {
        let rule = build_masquerade_rule(&self.interface);
        if self
            .filter
            .exists(NAT_TABLE, POSTROUTING_CHAIN, &rule)
            .await?
        {
            info!(interface = %self.interface, "Masquerade rule already installed");
            return Ok(());
        }
        self.filter
            .append(NAT_TABLE, POSTROUTING_CHAIN, &rule)
            .await?;
        info!(interface = %self.interface, "Configured postrouting masquerade");
        Ok(())
    }

    /// Clears the current forwarding configuration.
    ///
    /// The claimed-port bookkeeping is reset even if the flush fails.
    #[instrument(skip(self))]
    pub async fn clear(&mut self) -> PatResult<()> {
        self.claimed.clear();
        self.filter.clear_chain(NAT_TABLE, PREROUTING_CHAIN).await?;
        debug!("Cleared {} chain", PREROUTING_CHAIN);
        Ok(())
    }

    /// Installs the DNAT rule of one entry.
    ///
    /// Fails with [`PatError::PortConflict`] when another entry of this pass
    /// already claimed the same protocol and port.
    pub async fn forward(&mut self, entry: &ForwardingEntry) -> PatResult<()> {
        self.claim(entry)?;

        let rule = build_dnat_rule(entry, &self.interface);
        if let Err(e) = self.filter.append(NAT_TABLE, PREROUTING_CHAIN, &rule).await {
            self.release(entry);
            return Err(e);
        }

        debug!(
            spec = %entry.spec,
            protocol = %entry.protocol,
            port = entry.src_port,
            destination = %entry.destination(),
            "Installed DNAT rule"
        );
        Ok(())
    }

    /// Logs the rules of the PREROUTING chain and returns them.
    ///
    /// Failures only degrade observability and yield an empty list.
    pub async fn print(&self) -> Vec<String> {
        match self.filter.list(NAT_TABLE, PREROUTING_CHAIN).await {
            Ok(rules) => {
                info!(count = rules.len(), "IPTables {} configuration", PREROUTING_CHAIN);
                for rule in &rules {
                    info!("  {}", rule);
                }
                rules
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch IPTables rules");
                Vec::new()
            }
        }
    }

    /// Returns true if `port` is claimed for `protocol` in the current pass.
    pub fn is_claimed(&self, protocol: Protocol, port: u16) -> bool {
        self.claimed
            .get(&protocol)
            .is_some_and(|ports| ports.contains_key(&port))
    }

    fn claim(&mut self, entry: &ForwardingEntry) -> PatResult<()> {
        let ports = self.claimed.entry(entry.protocol).or_default();
        if let Some(owner) = ports.get(&entry.src_port) {
            return Err(PatError::PortConflict {
                protocol: entry.protocol,
                port: entry.src_port,
                claimed_by: owner.clone(),
            });
        }
        ports.insert(entry.src_port, entry.spec.clone());
        Ok(())
    }

    fn release(&mut self, entry: &ForwardingEntry) {
        if let Some(ports) = self.claimed.get_mut(&entry.protocol) {
            ports.remove(&entry.src_port);
        }
    }
}
