//! Kubernetes adapters for the controller's capability traits

pub mod collection;
pub mod convert;
pub mod crd;
pub mod load_balancer;
pub mod service;

pub use collection::KubeCollection;
pub use convert::FromKube;
pub use crd::{crd_yaml, PortAddressTranslation, PortAddressTranslationSpec};
pub use load_balancer::KubeLoadBalancer;
