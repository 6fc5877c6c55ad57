use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::condition::Conditions;
use crate::meta::{ObjectMeta, impl_resource};

// --- Ansible options ---

/// Reference to a ConfigMap or Secret whose entries are merged into variables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    /// Prepended to every key taken from the source
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub config_map_ref: Option<SourceRef>,
    #[serde(default)]
    pub secret_ref: Option<SourceRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub name: String,
    /// A missing optional source is ignored instead of failing
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnsibleOpts {
    #[serde(default)]
    pub ansible_user: String,
    #[serde(default)]
    pub ansible_host: String,
    #[serde(default)]
    pub ansible_port: Option<u16>,
    /// User variables. String values are parsed as YAML when building inventories.
    #[serde(default)]
    pub ansible_vars: BTreeMap<String, Value>,
    #[serde(default)]
    pub ansible_vars_from: Vec<DataSource>,
}

// --- Networks ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkRef {
    pub name: String,
    #[serde(default)]
    pub subnet_name: String,
    #[serde(default)]
    pub default_route: bool,
    #[serde(default)]
    pub fixed_ip: Option<String>,
}

// --- NodeSet spec ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeTemplate {
    /// Secret holding `ssh-privatekey` (and `authorized_keys` when provisioning)
    #[serde(default)]
    pub ansible_ssh_private_key_secret: String,
    #[serde(default)]
    pub management_network: String,
    #[serde(default)]
    pub networks: Vec<NetworkRef>,
    #[serde(default)]
    pub ansible: AnsibleOpts,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSection {
    /// Defaults to the node's key in `NodeSetSpec::nodes`
    #[serde(default)]
    pub host_name: String,
    #[serde(default)]
    pub management_network: String,
    /// Overrides the template networks when non-empty
    #[serde(default)]
    pub networks: Vec<NetworkRef>,
    #[serde(default)]
    pub ansible: AnsibleOpts,
}

/// Hardware provisioning parameters applied to every node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaremetalSetTemplate {
    #[serde(default)]
    pub bmh_namespace: String,
    #[serde(default)]
    pub bmh_label_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub os_image: String,
    #[serde(default)]
    pub ctlplane_interface: String,
    #[serde(default)]
    pub cloud_user_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSetSpec {
    #[serde(default)]
    pub node_template: NodeTemplate,
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeSection>,
    /// Services rolled out, in order, by Deployments without an override
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Upper bound on a packed cert secret, in bytes
    #[serde(default = "default_secret_max_size")]
    pub secret_max_size: usize,
    #[serde(default)]
    pub pre_provisioned: bool,
    #[serde(default = "default_tls_enabled")]
    pub tls_enabled: bool,
    #[serde(default)]
    pub baremetal_set_template: BaremetalSetTemplate,
}

fn default_secret_max_size() -> usize {
    pkg_constants::state::DEFAULT_SECRET_MAX_SIZE
}
fn default_tls_enabled() -> bool {
    true
}

impl Default for NodeSetSpec {
    fn default() -> Self {
        Self {
            node_template: NodeTemplate::default(),
            nodes: BTreeMap::new(),
            services: Vec::new(),
            tags: Vec::new(),
            secret_max_size: default_secret_max_size(),
            pre_provisioned: false,
            tls_enabled: default_tls_enabled(),
            baremetal_set_template: BaremetalSetTemplate::default(),
        }
    }
}

// --- NodeSet status ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSetStatus {
    #[serde(default)]
    pub conditions: Conditions,
    /// Per-Deployment snapshot of that Deployment's conditions for this NodeSet
    #[serde(default)]
    pub deployment_statuses: BTreeMap<String, Conditions>,
    /// hostName → network → resolved hostname
    #[serde(default)]
    pub all_hostnames: BTreeMap<String, BTreeMap<String, String>>,
    /// hostName → network → reserved address
    #[serde(default)]
    pub all_ips: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub dns_cluster_addresses: Vec<String>,
    #[serde(default)]
    pub ctlplane_search_domain: String,
    #[serde(default)]
    pub config_map_hashes: BTreeMap<String, String>,
    #[serde(default)]
    pub secret_hashes: BTreeMap<String, String>,
    #[serde(default)]
    pub container_images: BTreeMap<String, String>,
    /// Hash of the config-relevant spec as of the last reconcile
    #[serde(default)]
    pub config_hash: String,
    /// Hash the most recent successful Deployment rolled out
    #[serde(default)]
    pub deployed_config_hash: String,
    #[serde(default)]
    pub inventory_secret_name: String,
    #[serde(default)]
    pub deployed_version: String,
    #[serde(default)]
    pub observed_generation: u64,
}

// --- NodeSet ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSet {
    #[serde(rename = "metadata")]
    pub meta: ObjectMeta,
    #[serde(default)]
    pub spec: NodeSetSpec,
    #[serde(default)]
    pub status: NodeSetStatus,
}

impl_resource!(NodeSet, "nodesets", NodeSetStatus);

impl NodeSet {
    pub fn new(namespace: &str, name: &str, spec: NodeSetSpec) -> Self {
        Self {
            meta: ObjectMeta::new(namespace, name),
            spec,
            status: NodeSetStatus::default(),
        }
    }

    /// Networks of a node: its own list, else the template's.
    pub fn node_networks<'a>(&'a self, node: &'a NodeSection) -> &'a [NetworkRef] {
        if node.networks.is_empty() {
            &self.spec.node_template.networks
        } else {
            &node.networks
        }
    }

    /// Host name of a node, falling back to its key.
    pub fn host_name<'a>(&self, key: &'a str, node: &'a NodeSection) -> &'a str {
        if node.host_name.is_empty() {
            key
        } else {
            &node.host_name
        }
    }

    /// Name of the generated inventory secret.
    pub fn inventory_secret_name(&self) -> String {
        format!("dataplanenodeset-{}", self.meta.name)
    }

    /// Whether hardware provisioning participates in readiness.
    pub fn needs_provisioning(&self) -> bool {
        !self.spec.pre_provisioned && !self.spec.nodes.is_empty()
    }
}

/// A host name containing a dot is treated as fully qualified.
pub fn host_name_is_fqdn(host_name: &str) -> bool {
    host_name.contains('.')
}

/// Short form of a host name (everything before the first dot).
pub fn short_host_name(host_name: &str) -> &str {
    host_name.split('.').next().unwrap_or(host_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults_from_yaml() {
        let spec: NodeSetSpec = serde_yaml::from_str(
            r#"
node_template:
  ansible_ssh_private_key_secret: dataplane-ansible-ssh-private-key-secret
services: [bootstrap, configure-network]
nodes:
  edpm-compute-0:
    host_name: edpm-compute-0.example.com
"#,
        )
        .unwrap();
        assert!(spec.tls_enabled);
        assert!(!spec.pre_provisioned);
        assert_eq!(spec.secret_max_size, 1_048_576);
        assert_eq!(spec.services, vec!["bootstrap", "configure-network"]);
        assert_eq!(
            spec.nodes["edpm-compute-0"].host_name,
            "edpm-compute-0.example.com"
        );
    }

    #[test]
    fn node_networks_fall_back_to_template() {
        let mut spec = NodeSetSpec::default();
        spec.node_template.networks = vec![NetworkRef {
            name: "ctlplane".into(),
            subnet_name: "subnet1".into(),
            ..Default::default()
        }];
        let ns = NodeSet::new("openstack", "compute", spec);

        let plain = NodeSection::default();
        assert_eq!(ns.node_networks(&plain)[0].name, "ctlplane");

        let own = NodeSection {
            networks: vec![NetworkRef {
                name: "internalapi".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(ns.node_networks(&own)[0].name, "internalapi");
    }

    #[test]
    fn host_name_helpers() {
        assert!(host_name_is_fqdn("edpm-0.example.com"));
        assert!(!host_name_is_fqdn("edpm-0"));
        assert_eq!(short_host_name("edpm-0.example.com"), "edpm-0");
        assert_eq!(short_host_name("edpm-0"), "edpm-0");

        let ns = NodeSet::new("openstack", "compute", NodeSetSpec::default());
        let node = NodeSection::default();
        assert_eq!(ns.host_name("edpm-1", &node), "edpm-1");
        assert_eq!(ns.inventory_secret_name(), "dataplanenodeset-compute");
    }
}
