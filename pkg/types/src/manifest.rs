use serde::{Deserialize, Serialize};

use crate::configmap::ConfigMap;
use crate::deployment::Deployment;
use crate::issuer::Issuer;
use crate::network::{DNSMasq, NetConfig};
use crate::nodeset::NodeSet;
use crate::secret::Secret;
use crate::service::Service;
use crate::version::Version;

/// A user-submitted object, tagged by `kind`.
///
/// Example:
/// ```yaml
/// kind: NodeSet
/// metadata:
///   name: compute
///   namespace: openstack
/// spec:
///   services: [bootstrap, configure-network]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Manifest {
    NodeSet(NodeSet),
    Deployment(Deployment),
    Service(Service),
    Secret(Secret),
    ConfigMap(ConfigMap),
    NetConfig(NetConfig),
    DNSMasq(DNSMasq),
    Version(Version),
    Issuer(Issuer),
}

impl Manifest {
    pub fn name(&self) -> &str {
        match self {
            Manifest::NodeSet(o) => &o.meta.name,
            Manifest::Deployment(o) => &o.meta.name,
            Manifest::Service(o) => &o.meta.name,
            Manifest::Secret(o) => &o.meta.name,
            Manifest::ConfigMap(o) => &o.meta.name,
            Manifest::NetConfig(o) => &o.meta.name,
            Manifest::DNSMasq(o) => &o.meta.name,
            Manifest::Version(o) => &o.meta.name,
            Manifest::Issuer(o) => &o.meta.name,
        }
    }
}

/// Parse a multi-document YAML stream. Empty documents are skipped.
pub fn parse_manifests(content: &str) -> anyhow::Result<Vec<Manifest>> {
    let mut manifests = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(content) {
        let value = serde_yaml::Value::deserialize(doc)?;
        if value.is_null() {
            continue;
        }
        manifests.push(serde_yaml::from_value(value)?);
    }
    Ok(manifests)
}
