//! PortAddressTranslation custom resource

use kube::{CustomResource, CustomResourceExt, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use kube_pat_common::{AddressTranslationSpec, PatResult};

use super::convert::{object_key, FromKube};

/// Forwards an external port of the node to a ClusterIP service.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[kube(
    group = "k8s.deslauriers.io",
    version = "v1beta1",
    kind = "PortAddressTranslation",
    plural = "portaddresstranslations",
    shortname = "pat",
    namespaced,
    printcolumn = r#"{"name":"Service","type":"string","jsonPath":".spec.service"}"#,
    printcolumn = r#"{"name":"Port","type":"integer","jsonPath":".spec.port"}"#
)]
pub struct PortAddressTranslationSpec {
    /// Name of the ClusterIP service in the same namespace
    pub service: String,
    /// External port forwarded to the service
    pub port: i32,
}

impl FromKube<PortAddressTranslation> for AddressTranslationSpec {
    fn from_kube(pat: &PortAddressTranslation) -> PatResult<Self> {
        Ok(AddressTranslationSpec {
            key: object_key(pat)?,
            service: pat.spec.service.clone(),
            port: pat.spec.port,
            resource_version: pat.resource_version(),
        })
    }
}

/// Renders the CustomResourceDefinition as YAML.
pub fn crd_yaml() -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(&PortAddressTranslation::crd())
}
