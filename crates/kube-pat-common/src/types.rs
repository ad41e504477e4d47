//! Domain model shared by the controller, its adapters and its tests.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::error::PatError;

/// Namespaced object identity, displayed as `namespace/name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    /// Object namespace.
    pub namespace: String,
    /// Object name.
    pub name: String,
}

impl ObjectKey {
    /// Creates a new key.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Returns the key with `/` replaced by `-`, usable inside port names.
    pub fn to_dashed(&self) -> String {
        format!("{}-{}", self.namespace, self.name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ObjectKey {
    type Err = PatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((namespace, name))
                if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(namespace, name))
            }
            _ => Err(PatError::invalid_config(
                "service",
                format!("expected <namespace>/<name>, got '{}'", s),
            )),
        }
    }
}

/// Transport protocol of a service port.
///
/// Kubernetes defaults an unset port protocol to TCP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    /// Protocols a load balancer can be configured for.
    pub const ALL: [Protocol; 3] = [Protocol::Tcp, Protocol::Udp, Protocol::Sctp];

    /// Returns the Kubernetes spelling ("TCP", "UDP", "SCTP").
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Sctp => "SCTP",
        }
    }

    /// Returns the name iptables expects after `-p`.
    pub fn iptables_name(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Sctp => "sctp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = PatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TCP" => Ok(Protocol::Tcp),
            "UDP" => Ok(Protocol::Udp),
            "SCTP" => Ok(Protocol::Sctp),
            _ => Err(PatError::invalid_config(
                "protocol",
                format!("unknown protocol '{}'", s),
            )),
        }
    }
}

/// Kubernetes service type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceType {
    ClusterIp,
    NodePort,
    LoadBalancer,
    ExternalName,
    Other(String),
}

impl ServiceType {
    /// Parses the `spec.type` field. An unset type means ClusterIP.
    pub fn from_spec(value: Option<&str>) -> Self {
        match value {
            None | Some("ClusterIP") => ServiceType::ClusterIp,
            Some("NodePort") => ServiceType::NodePort,
            Some("LoadBalancer") => ServiceType::LoadBalancer,
            Some("ExternalName") => ServiceType::ExternalName,
            Some(other) => ServiceType::Other(other.to_string()),
        }
    }

    /// Returns true for services only reachable from inside the cluster.
    pub fn is_cluster_internal(&self) -> bool {
        matches!(self, ServiceType::ClusterIp)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ServiceType::ClusterIp => "ClusterIP",
            ServiceType::NodePort => "NodePort",
            ServiceType::LoadBalancer => "LoadBalancer",
            ServiceType::ExternalName => "ExternalName",
            ServiceType::Other(s) => s,
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A port declared by a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePort {
    pub name: Option<String>,
    pub protocol: Protocol,
    pub port: u16,
}

impl ServicePort {
    pub fn new(protocol: Protocol, port: u16) -> Self {
        Self {
            name: None,
            protocol,
            port,
        }
    }
}

/// Cached view of a Kubernetes service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSnapshot {
    /// Service identity.
    pub key: ObjectKey,
    /// Service type.
    pub service_type: ServiceType,
    /// Cluster-internal address; `None` for headless services.
    pub cluster_ip: Option<IpAddr>,
    /// Declared ports, in declaration order.
    pub ports: Vec<ServicePort>,
    /// Resource version the snapshot was taken at.
    pub resource_version: Option<String>,
}

/// A user-declared port address translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressTranslationSpec {
    /// Identity of the translation resource.
    pub key: ObjectKey,
    /// Name of the target service, in the same namespace.
    pub service: String,
    /// Desired external port.
    pub port: i32,
    /// Resource version the spec was read at.
    pub resource_version: Option<String>,
}

impl AddressTranslationSpec {
    /// Returns the identity of the referenced service.
    pub fn service_key(&self) -> ObjectKey {
        ObjectKey::new(self.key.namespace.clone(), self.service.clone())
    }
}

/// A fully resolved forwarding rule, derived once per pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardingEntry {
    pub protocol: Protocol,
    /// External port matched on the ingress interface.
    pub src_port: u16,
    pub dest_ip: IpAddr,
    pub dest_port: u16,
    /// Translation spec the entry was derived from.
    pub spec: ObjectKey,
    /// Service the entry forwards to.
    pub service: ObjectKey,
}

impl ForwardingEntry {
    /// Returns the DNAT target (`addr:port`, IPv6 addresses bracketed).
    pub fn destination(&self) -> String {
        SocketAddr::new(self.dest_ip, self.dest_port).to_string()
    }

    /// Returns the load-balancer port advertising this entry.
    pub fn load_balancer_port(&self) -> LoadBalancerPort {
        LoadBalancerPort {
            name: port_name(&self.spec, self.src_port),
            protocol: self.protocol,
            port: self.src_port,
        }
    }
}

/// Longest port name a Service accepts (a DNS label).
pub const MAX_PORT_NAME_LEN: usize = 63;

/// Names a load-balancer port `<namespace>-<name>-<port>`.
///
/// Names over [`MAX_PORT_NAME_LEN`] are truncated and disambiguated with a
/// hash of the full spec key.
fn port_name(spec: &ObjectKey, port: u16) -> String {
    let name = format!("{}-{}", spec.to_dashed(), port);
    if name.len() <= MAX_PORT_NAME_LEN {
        return name;
    }

    let mut hasher = DefaultHasher::new();
    spec.hash(&mut hasher);
    let suffix = format!("-{:08x}-{}", hasher.finish() as u32, port);
    let prefix: String = spec
        .to_dashed()
        .chars()
        .take(MAX_PORT_NAME_LEN - suffix.len())
        .collect();
    format!("{}{}", prefix.trim_end_matches('-'), suffix)
}

/// A port advertised by the external load-balancer service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerPort {
    pub name: String,
    pub protocol: Protocol,
    pub port: u16,
}

/// Current definition of a load-balancer service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerService {
    pub key: ObjectKey,
    pub ports: Vec<LoadBalancerPort>,
}

impl LoadBalancerService {
    /// Returns the set of ports currently advertised for `protocol`.
    pub fn advertised_ports(&self, protocol: Protocol) -> BTreeSet<u16> {
        self.ports
            .iter()
            .filter(|p| p.protocol == protocol)
            .map(|p| p.port)
            .collect()
    }

    /// Returns the port list with the ports of `protocol` replaced by
    /// `ports`.
    ///
    /// Ports of other protocols are kept, so a single service can front
    /// both the TCP and the UDP translations.
    pub fn with_ports(&self, protocol: Protocol, ports: &[LoadBalancerPort]) -> Vec<LoadBalancerPort> {
        self.ports
            .iter()
            .filter(|p| p.protocol != protocol)
            .chain(ports)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_object_key_parse() {
        let key: ObjectKey = "kube-pat/kube-pat-tcp".parse().unwrap();
        assert_eq!(key.namespace, "kube-pat");
        assert_eq!(key.name, "kube-pat-tcp");
        assert_eq!(key.to_string(), "kube-pat/kube-pat-tcp");
        assert_eq!(key.to_dashed(), "kube-pat-kube-pat-tcp");
    }

    #[test]
    fn test_object_key_parse_invalid() {
        assert!("no-slash".parse::<ObjectKey>().is_err());
        assert!("/name".parse::<ObjectKey>().is_err());
        assert!("ns/".parse::<ObjectKey>().is_err());
        assert!("a/b/c".parse::<ObjectKey>().is_err());
    }

    #[test]
    fn test_protocol() {
        assert_eq!("udp".parse::<Protocol>().unwrap(), Protocol::Udp);
        assert_eq!("TCP".parse::<Protocol>().unwrap(), Protocol::Tcp);
        assert!("ICMP".parse::<Protocol>().is_err());
        assert_eq!(Protocol::Sctp.iptables_name(), "sctp");
        assert_eq!(Protocol::default(), Protocol::Tcp);
    }

    #[test]
    fn test_service_type() {
        assert!(ServiceType::from_spec(None).is_cluster_internal());
        assert!(ServiceType::from_spec(Some("ClusterIP")).is_cluster_internal());
        assert!(!ServiceType::from_spec(Some("LoadBalancer")).is_cluster_internal());
        assert_eq!(
            ServiceType::from_spec(Some("Weird")),
            ServiceType::Other("Weird".to_string())
        );
    }

    #[test]
    fn test_forwarding_entry_destination() {
        let mut entry = ForwardingEntry {
            protocol: Protocol::Tcp,
            src_port: 8080,
            dest_ip: "10.0.0.5".parse().unwrap(),
            dest_port: 80,
            spec: ObjectKey::new("default", "web"),
            service: ObjectKey::new("default", "nginx"),
        };
        assert_eq!(entry.destination(), "10.0.0.5:80");

        entry.dest_ip = "fd00::5".parse().unwrap();
        assert_eq!(entry.destination(), "[fd00::5]:80");

        let port = entry.load_balancer_port();
        assert_eq!(port.name, "default-web-8080");
        assert_eq!(port.port, 8080);
        assert_eq!(port.protocol, Protocol::Tcp);
    }

    #[test]
    fn test_advertised_ports() {
        let lb = LoadBalancerService {
            key: ObjectKey::new("kube-pat", "kube-pat-tcp"),
            ports: vec![
                LoadBalancerPort {
                    name: "a".to_string(),
                    protocol: Protocol::Tcp,
                    port: 80,
                },
                LoadBalancerPort {
                    name: "b".to_string(),
                    protocol: Protocol::Udp,
                    port: 53,
                },
            ],
        };
        assert_eq!(lb.advertised_ports(Protocol::Tcp), BTreeSet::from([80]));
        assert_eq!(lb.advertised_ports(Protocol::Udp), BTreeSet::from([53]));
        assert!(lb.advertised_ports(Protocol::Sctp).is_empty());
    }

    #[test]
    fn test_long_port_names_fit_a_dns_label() {
        let entry = |name: &str, port| ForwardingEntry {
            protocol: Protocol::Udp,
            src_port: port,
            dest_ip: "10.0.0.5".parse().unwrap(),
            dest_port: 53,
            spec: ObjectKey::new("a-rather-long-namespace-for-tenant-workloads", name),
            service: ObjectKey::new("default", "coredns"),
        };

        let first = entry("dns-forwarder-with-a-very-long-name", 5353).load_balancer_port();
        let second = entry("dns-forwarder-with-a-very-long-name-2", 5353).load_balancer_port();

        assert!(first.name.len() <= MAX_PORT_NAME_LEN);
        assert!(first.name.ends_with("-5353"));
        assert!(!first.name.contains("--"));
        assert!(first.name.starts_with("a-rather-long-namespace"));
        assert!(second.name.len() <= MAX_PORT_NAME_LEN);
        assert_ne!(first.name, second.name);
        assert_eq!(
            first.name,
            entry("dns-forwarder-with-a-very-long-name", 5353)
                .load_balancer_port()
                .name
        );
    }

    #[test]
    fn test_with_ports_keeps_other_protocols() {
        let lb = LoadBalancerService {
            key: ObjectKey::new("kube-pat", "kube-pat"),
            ports: vec![
                LoadBalancerPort {
                    name: "default-dns-53".to_string(),
                    protocol: Protocol::Udp,
                    port: 53,
                },
                LoadBalancerPort {
                    name: "default-old-22".to_string(),
                    protocol: Protocol::Tcp,
                    port: 22,
                },
            ],
        };
        let web = LoadBalancerPort {
            name: "default-web-8080".to_string(),
            protocol: Protocol::Tcp,
            port: 8080,
        };

        let ports = lb.with_ports(Protocol::Tcp, std::slice::from_ref(&web));
        assert_eq!(ports, vec![lb.ports[0].clone(), web]);
    }
}
