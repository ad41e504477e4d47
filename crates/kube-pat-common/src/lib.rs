//! Shared infrastructure for the kube-pat port address translation controller.
//!
//! - [`types`]: the domain model (translation specs, service snapshots,
//!   forwarding entries, load-balancer ports)
//! - [`collection`]: the watched keyed collection capability
//! - [`backend`]: packet filter and load-balancer capabilities
//! - [`shell`]: safe shell command execution with proper quoting
//! - [`error`]: the error taxonomy
//!
//! # Architecture
//!
//! The controller follows this pattern:
//!
//! 1. Watch `PortAddressTranslation` resources and services through
//!    [`WatchedCollection`]s
//! 2. Join both collections into a forwarding table on every relevant change
//! 3. Rebuild the NAT PREROUTING chain through a [`PacketFilter`]
//! 4. Keep the load-balancer services in line through a [`LoadBalancerApi`]

pub mod backend;
pub mod collection;
pub mod error;
pub mod shell;
pub mod types;

// Re-export commonly used items at crate root
pub use backend::{LoadBalancerApi, PacketFilter};
pub use collection::{Keyed, WatchEvent, WatchedCollection, WATCH_CHANNEL_CAPACITY};
pub use error::{ErrorScope, PatError, PatResult};
pub use types::{
    AddressTranslationSpec, ForwardingEntry, LoadBalancerPort, LoadBalancerService, ObjectKey,
    Protocol, ServicePort, ServiceSnapshot, ServiceType,
};
