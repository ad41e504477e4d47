//! Test infrastructure for the kube-pat controller.
//!
//! - [`fixtures`]: builders for translation specs, services and
//!   load-balancer ports
//! - [`fakes`]: in-memory implementations of the capability traits that
//!   record every call

pub mod fakes;
pub mod fixtures;

pub use fakes::{FakeLoadBalancer, FilterOp, MemoryCollection, RecordingPacketFilter};
