//! Conversions from core/v1 Service objects

use std::net::IpAddr;

use k8s_openapi::api::core::v1::{Service, ServicePort as KubeServicePort};
use kube::ResourceExt;

use kube_pat_common::{
    LoadBalancerPort, LoadBalancerService, PatError, PatResult, Protocol, ServicePort,
    ServiceSnapshot, ServiceType,
};

use super::convert::{object_key, FromKube};

/// Value of `spec.clusterIP` for headless services
const HEADLESS_CLUSTER_IP: &str = "None";

impl FromKube<Service> for ServiceSnapshot {
    fn from_kube(service: &Service) -> PatResult<Self> {
        let key = object_key(service)?;
        let spec = service.spec.as_ref();

        let cluster_ip = match spec.and_then(|s| s.cluster_ip.as_deref()) {
            None | Some("") | Some(HEADLESS_CLUSTER_IP) => None,
            Some(ip) => Some(ip.parse::<IpAddr>().map_err(|e| {
                PatError::invalid_config("spec.clusterIP", format!("{} on {}: {}", ip, key, e))
            })?),
        };

        let ports = spec
            .and_then(|s| s.ports.as_ref())
            .map(|ports| ports.iter().map(service_port).collect::<PatResult<Vec<_>>>())
            .transpose()?
            .unwrap_or_default();

        Ok(ServiceSnapshot {
            service_type: ServiceType::from_spec(spec.and_then(|s| s.type_.as_deref())),
            cluster_ip,
            ports,
            resource_version: service.resource_version(),
            key,
        })
    }
}

impl FromKube<Service> for LoadBalancerService {
    fn from_kube(service: &Service) -> PatResult<Self> {
        let key = object_key(service)?;
        let ports = service
            .spec
            .as_ref()
            .and_then(|s| s.ports.as_ref())
            .map(|ports| {
                ports
                    .iter()
                    .map(|p| {
                        let port = service_port(p)?;
                        Ok(LoadBalancerPort {
                            name: port.name.unwrap_or_default(),
                            protocol: port.protocol,
                            port: port.port,
                        })
                    })
                    .collect::<PatResult<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();
        Ok(LoadBalancerService { key, ports })
    }
}

/// Converts a load-balancer port into its Kubernetes form.
pub fn to_kube_port(port: &LoadBalancerPort) -> KubeServicePort {
    KubeServicePort {
        name: Some(port.name.clone()),
        protocol: Some(port.protocol.as_str().to_string()),
        port: i32::from(port.port),
        ..KubeServicePort::default()
    }
}

fn service_port(port: &KubeServicePort) -> PatResult<ServicePort> {
    let protocol = match port.protocol.as_deref() {
        Some(p) => p.parse()?,
        None => Protocol::default(),
    };
    let number = u16::try_from(port.port)
        .map_err(|_| PatError::invalid_config("spec.ports.port", format!("{} out of range", port.port)))?;
    Ok(ServicePort {
        name: port.name.clone(),
        protocol,
        port: number,
    })
}
