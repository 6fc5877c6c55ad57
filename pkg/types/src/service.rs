use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::meta::{ObjectMeta, impl_resource};
use crate::nodeset::DataSource;

/// Certificate requirement of a service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TlsCertSpec {
    /// `dnsnames` and/or `ips`
    #[serde(default)]
    pub contents: Vec<String>,
    /// Networks whose names/addresses become SANs; empty means all
    #[serde(default)]
    pub networks: Vec<String>,
    /// Label selecting the issuer; empty selects the internal root CA
    #[serde(default)]
    pub issuer: String,
    #[serde(default)]
    pub key_usages: Vec<String>,
    /// Mount directory override under the cert path
    #[serde(default)]
    pub edpm_role_service_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    #[serde(default)]
    pub data_sources: Vec<DataSource>,
    #[serde(default)]
    pub tls_certs: BTreeMap<String, TlsCertSpec>,
    #[serde(default)]
    pub playbook: String,
    #[serde(default)]
    pub playbook_contents: String,
    #[serde(default)]
    pub role: String,
    /// Secret holding a CA bundle mounted into the runner
    #[serde(default)]
    pub ca_certs: String,
    /// Runner image override
    #[serde(default)]
    pub openstack_ansible_ee_image: String,
    /// Service whose certs this one reuses
    #[serde(default)]
    pub certs_from: String,
    /// Mount every cert bundle of the rollout (install-certs)
    #[serde(default)]
    pub add_cert_mounts: bool,
    /// Dispatched once per Deployment instead of once per NodeSet
    #[serde(default)]
    pub deploy_on_all_node_sets: bool,
    /// Image map keys copied into the Deployment after a successful run
    #[serde(default)]
    pub container_image_fields: Vec<String>,
    #[serde(default)]
    pub edpm_service_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    #[serde(rename = "metadata")]
    pub meta: ObjectMeta,
    #[serde(default)]
    pub spec: ServiceSpec,
}

impl_resource!(Service, "services");

impl Service {
    pub fn new(namespace: &str, name: &str, spec: ServiceSpec) -> Self {
        Self {
            meta: ObjectMeta::new(namespace, name),
            spec,
        }
    }

    /// Service type, defaulting to the service name.
    pub fn service_type(&self) -> &str {
        if self.spec.edpm_service_type.is_empty() {
            &self.meta.name
        } else {
            &self.spec.edpm_service_type
        }
    }

    pub fn is_global(&self) -> bool {
        self.spec.deploy_on_all_node_sets
    }
}
