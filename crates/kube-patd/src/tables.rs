//! Packet filter tables, chains and defaults used by kube-patd

/// iptables table holding the translation rules
pub const NAT_TABLE: &str = "nat";

/// Chain receiving the per-entry DNAT rules (flushed on every pass)
pub const PREROUTING_CHAIN: &str = "PREROUTING";

/// Chain receiving the masquerade rule (installed once)
pub const POSTROUTING_CHAIN: &str = "POSTROUTING";

/// Defaults for the daemon flags
pub mod defaults {
    /// Ingress interface for DNAT and egress interface for masquerade
    pub const INTERFACE: &str = "eth0";

    /// Load-balancer service handling incoming TCP traffic
    pub const TCP_SERVICE: &str = "kube-pat/kube-pat-tcp";

    /// Load-balancer service handling incoming UDP traffic
    pub const UDP_SERVICE: &str = "kube-pat/kube-pat-udp";

    /// Log filter when RUST_LOG is unset
    pub const LOG_LEVEL: &str = "info";
}

/// PortAddressTranslation API group and version
pub mod api {
    pub const GROUP: &str = "k8s.deslauriers.io";
    pub const VERSION: &str = "v1beta1";
    pub const KIND: &str = "PortAddressTranslation";
}
