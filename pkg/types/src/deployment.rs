use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::condition::Conditions;
use crate::meta::{ObjectMeta, impl_resource};

// --- Deployment spec ---

/// Rollout request. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    /// NodeSets rolled out, started in this order
    pub node_sets: Vec<String>,
    /// Failed attempts tolerated per automation run
    #[serde(default = "default_backoff_limit")]
    pub backoff_limit: u32,
    #[serde(default = "default_preserve_jobs")]
    pub preserve_jobs: bool,
    #[serde(default)]
    pub ansible_tags: String,
    #[serde(default)]
    pub ansible_limit: String,
    #[serde(default)]
    pub ansible_skip_tags: String,
    #[serde(default)]
    pub ansible_extra_vars: BTreeMap<String, Value>,
    /// Replaces every NodeSet's own service list when non-empty
    #[serde(default)]
    pub services_override: Vec<String>,
    /// Seconds between polls while waiting on NodeSets
    #[serde(default = "default_requeue_time")]
    pub deployment_requeue_time: u64,
}

fn default_backoff_limit() -> u32 {
    pkg_constants::state::DEFAULT_BACKOFF_LIMIT
}
fn default_preserve_jobs() -> bool {
    true
}
fn default_requeue_time() -> u64 {
    pkg_constants::state::DEFAULT_REQUEUE_SECS
}

impl Default for DeploymentSpec {
    fn default() -> Self {
        Self {
            node_sets: Vec::new(),
            backoff_limit: default_backoff_limit(),
            preserve_jobs: default_preserve_jobs(),
            ansible_tags: String::new(),
            ansible_limit: String::new(),
            ansible_skip_tags: String::new(),
            ansible_extra_vars: BTreeMap::new(),
            services_override: Vec::new(),
            deployment_requeue_time: default_requeue_time(),
        }
    }
}

// --- Deployment status ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentStatus {
    #[serde(default)]
    pub conditions: Conditions,
    /// NodeSet name → service conditions plus `NodeSetDeploymentReady`
    #[serde(default)]
    pub node_set_conditions: BTreeMap<String, Conditions>,
    #[serde(default)]
    pub config_map_hashes: BTreeMap<String, String>,
    #[serde(default)]
    pub secret_hashes: BTreeMap<String, String>,
    /// NodeSet name → NodeSet config hash this Deployment rolled out
    #[serde(default)]
    pub node_set_hashes: BTreeMap<String, String>,
    #[serde(default)]
    pub container_images: BTreeMap<String, String>,
    /// Terminal once true
    #[serde(default)]
    pub deployed: bool,
    #[serde(default)]
    pub deployed_version: String,
    #[serde(default)]
    pub observed_generation: u64,
}

// --- Deployment ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    #[serde(rename = "metadata")]
    pub meta: ObjectMeta,
    pub spec: DeploymentSpec,
    #[serde(default)]
    pub status: DeploymentStatus,
}

impl_resource!(Deployment, "deployments", DeploymentStatus);

impl Deployment {
    pub fn new(namespace: &str, name: &str, spec: DeploymentSpec) -> Self {
        Self {
            meta: ObjectMeta::new(namespace, name),
            spec,
            status: DeploymentStatus::default(),
        }
    }

    pub fn references(&self, node_set: &str) -> bool {
        self.spec.node_sets.iter().any(|n| n == node_set)
    }
}
