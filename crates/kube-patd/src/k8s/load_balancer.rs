//! Load-balancer services accessed through the Kubernetes API

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use serde_json::json;
use tracing::debug;

use kube_pat_common::{
    LoadBalancerApi, LoadBalancerPort, LoadBalancerService, ObjectKey, PatError, PatResult,
};

use super::convert::FromKube;
use super::service::to_kube_port;

/// Field manager recorded on the patched services
const FIELD_MANAGER: &str = "kube-patd";

/// [`LoadBalancerApi`] over core/v1 Services.
#[derive(Clone)]
pub struct KubeLoadBalancer {
    client: Client,
}

impl KubeLoadBalancer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, service: &ObjectKey) -> Api<Service> {
        Api::namespaced(self.client.clone(), &service.namespace)
    }
}

/// Merge patch replacing the whole port list of a service.
pub fn ports_patch(ports: &[LoadBalancerPort]) -> serde_json::Value {
    let ports: Vec<_> = ports.iter().map(to_kube_port).collect();
    json!({ "spec": { "ports": ports } })
}

#[async_trait]
impl LoadBalancerApi for KubeLoadBalancer {
    async fn fetch(&self, service: &ObjectKey) -> PatResult<LoadBalancerService> {
        let found = self
            .api(service)
            .get_opt(&service.name)
            .await
            .map_err(|e| PatError::load_balancer("fetch", service.clone(), e.to_string()))?;

        match found {
            Some(svc) => LoadBalancerService::from_kube(&svc),
            None => Err(PatError::LoadBalancerNotFound {
                service: service.clone(),
            }),
        }
    }

    async fn update_ports(&self, service: &ObjectKey, ports: &[LoadBalancerPort]) -> PatResult<()> {
        let patch = ports_patch(ports);
        debug!(service = %service, %patch, "Patching load balancer ports");
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..PatchParams::default()
        };
        self.api(service)
            .patch(&service.name, &params, &Patch::Merge(&patch))
            .await
            .map_err(|e| PatError::load_balancer("update", service.clone(), e.to_string()))?;
        Ok(())
    }
}
