use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata shared by every stored object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Parents whose deletion cascades to this object
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
    /// Bumped by the store on every write; used as the optimistic concurrency token
    #[serde(default)]
    pub resource_version: u64,
    /// Bumped by the store on every spec write
    #[serde(default)]
    pub generation: u64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ..Default::default()
        }
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    /// Record `owner` as a parent of this object.
    pub fn owned_by<T: Resource>(mut self, owner: &T) -> Self {
        let reference = OwnerReference::to(owner);
        if !self.owner_references.contains(&reference) {
            self.owner_references.push(reference);
        }
        self
    }

    /// True when every `selector` entry is present with the same value.
    pub fn matches(&self, selector: &BTreeMap<String, String>) -> bool {
        selector
            .iter()
            .all(|(k, v)| self.labels.get(k).map(|l| l == v).unwrap_or(false))
    }
}

/// Reference from a child to the object that created it.
/// Owners always live in the child's namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub uid: String,
}

impl OwnerReference {
    pub fn to<T: Resource>(owner: &T) -> Self {
        Self {
            kind: T::KIND.to_string(),
            name: owner.meta().name.clone(),
            uid: owner.meta().uid.clone(),
        }
    }

    pub fn key(&self, namespace: &str) -> String {
        registry_key(&self.kind, namespace, &self.name)
    }
}

/// Store key of an object: `/registry/<kind>/<namespace>/<name>`.
pub fn registry_key(kind: &str, namespace: &str, name: &str) -> String {
    format!("/registry/{}/{}/{}", kind, namespace, name)
}

/// Split a store key back into `(kind, namespace, name)`.
pub fn parse_registry_key(key: &str) -> Option<(&str, &str, &str)> {
    let rest = key.strip_prefix("/registry/")?;
    let mut parts = rest.splitn(3, '/');
    let kind = parts.next()?;
    let namespace = parts.next()?;
    let name = parts.next()?;
    if kind.is_empty() || name.is_empty() {
        return None;
    }
    Some((kind, namespace, name))
}

/// A stored, named object kind.
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Registry path segment, e.g. `nodesets`.
    const KIND: &'static str;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn key(&self) -> String {
        registry_key(Self::KIND, &self.meta().namespace, &self.meta().name)
    }
}

/// A resource with a status subresource written separately from its spec.
pub trait HasStatus: Resource {
    type Status: Serialize + DeserializeOwned + Clone + Default + PartialEq + Send + Sync;

    fn status(&self) -> &Self::Status;
    fn status_mut(&mut self) -> &mut Self::Status;
}

macro_rules! impl_resource {
    ($ty:ty, $kind:expr) => {
        impl $crate::meta::Resource for $ty {
            const KIND: &'static str = $kind;

            fn meta(&self) -> &$crate::meta::ObjectMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut $crate::meta::ObjectMeta {
                &mut self.meta
            }
        }
    };
    ($ty:ty, $kind:expr, $status:ty) => {
        impl_resource!($ty, $kind);

        impl $crate::meta::HasStatus for $ty {
            type Status = $status;

            fn status(&self) -> &$status {
                &self.status
            }

            fn status_mut(&mut self) -> &mut $status {
                &mut self.status
            }
        }
    };
}

pub(crate) use impl_resource;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_key_round_trips() {
        let key = registry_key("nodesets", "openstack", "edpm-compute");
        assert_eq!(key, "/registry/nodesets/openstack/edpm-compute");
        assert_eq!(
            parse_registry_key(&key),
            Some(("nodesets", "openstack", "edpm-compute"))
        );
        assert_eq!(parse_registry_key("/registry/nodesets"), None);
        assert_eq!(parse_registry_key("/other/a/b/c"), None);
    }

    #[test]
    fn label_selector_matching() {
        let mut meta = ObjectMeta::new("ns", "a");
        meta.labels.insert("osdpns".into(), "compute".into());
        meta.labels.insert("hostname".into(), "edpm-0".into());

        let mut selector = BTreeMap::new();
        assert!(meta.matches(&selector));
        selector.insert("osdpns".to_string(), "compute".to_string());
        assert!(meta.matches(&selector));
        selector.insert("hostname".to_string(), "edpm-1".to_string());
        assert!(!meta.matches(&selector));
    }
}
