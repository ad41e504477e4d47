//! Test fixtures for common translation scenarios

use std::net::IpAddr;

use kube_pat_common::{
    AddressTranslationSpec, LoadBalancerPort, ObjectKey, Protocol, ServicePort, ServiceSnapshot,
    ServiceType,
};

/// Default namespace used by the fixtures.
pub const NAMESPACE: &str = "default";

/// Translation spec `default/<name>` forwarding `port` to service `service`.
pub fn spec(name: &str, service: &str, port: i32) -> AddressTranslationSpec {
    AddressTranslationSpec {
        key: ObjectKey::new(NAMESPACE, name),
        service: service.to_string(),
        port,
        resource_version: Some("1".to_string()),
    }
}

/// ClusterIP service `default/<name>` with a single port.
pub fn cluster_ip_service(name: &str, ip: &str, protocol: Protocol, port: u16) -> ServiceSnapshot {
    service_of_type(name, ServiceType::ClusterIp, ip, protocol, port)
}

/// Service `default/<name>` of the given type with a single port.
pub fn service_of_type(
    name: &str,
    service_type: ServiceType,
    ip: &str,
    protocol: Protocol,
    port: u16,
) -> ServiceSnapshot {
    ServiceSnapshot {
        key: ObjectKey::new(NAMESPACE, name),
        service_type,
        cluster_ip: Some(parse_ip(ip)),
        ports: vec![ServicePort::new(protocol, port)],
        resource_version: Some("1".to_string()),
    }
}

/// Headless ClusterIP service (`clusterIP: None`).
pub fn headless_service(name: &str, protocol: Protocol, port: u16) -> ServiceSnapshot {
    ServiceSnapshot {
        cluster_ip: None,
        ..cluster_ip_service(name, "10.0.0.1", protocol, port)
    }
}

/// Load-balancer port as the controller names it for spec `default/<spec>`.
pub fn lb_port(spec: &str, protocol: Protocol, port: u16) -> LoadBalancerPort {
    LoadBalancerPort {
        name: format!("{}-{}-{}", NAMESPACE, spec, port),
        protocol,
        port,
    }
}

/// Load-balancer service key used by the scenarios for `protocol`.
pub fn lb_key(protocol: Protocol) -> ObjectKey {
    ObjectKey::new(
        "kube-pat",
        format!("kube-pat-{}", protocol.iptables_name()),
    )
}

fn parse_ip(ip: &str) -> IpAddr {
    match ip.parse() {
        Ok(addr) => addr,
        Err(e) => panic!("invalid fixture address {}: {}", ip, e),
    }
}
