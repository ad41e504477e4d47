//! kube-patd - Port Address Translation controller
//!
//! kube-patd exposes node ports of a Kubernetes cluster through
//! PortAddressTranslation resources, handling:
//! - DNAT rules from the node interface to ClusterIP services
//! - Egress masquerade on the same interface
//! - Port lists of the per-protocol load-balancer services
//! - Event-driven, serialized reconciliation passes

pub mod cache;
pub mod commands;
pub mod config;
pub mod controller;
pub mod iptables;
pub mod k8s;
pub mod lb_sync;
pub mod port_forwarder;
pub mod tables;
pub mod trigger;

pub use cache::{Entries, ResourceCache};
pub use config::ControllerOptions;
pub use controller::{Controller, PassReport};
pub use iptables::Iptables;
pub use lb_sync::{LoadBalancerSynchronizer, SyncOutcome};
pub use port_forwarder::PortForwarder;
pub use trigger::ReconcileTrigger;
