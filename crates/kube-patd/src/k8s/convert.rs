//! Conversion of Kubernetes objects into domain types

use kube::{Resource, ResourceExt};

use kube_pat_common::{ObjectKey, PatError, PatResult};

/// Domain types that can be read from a Kubernetes object of kind `K`.
pub trait FromKube<K>: Sized {
    fn from_kube(object: &K) -> PatResult<Self>;
}

/// Returns the `namespace/name` identity of a namespaced object.
pub fn object_key<K: Resource>(object: &K) -> PatResult<ObjectKey> {
    let namespace = object.namespace().ok_or_else(|| {
        PatError::invalid_config(
            "metadata.namespace",
            format!("{} is not namespaced", object.name_any()),
        )
    })?;
    Ok(ObjectKey::new(namespace, object.name_any()))
}
