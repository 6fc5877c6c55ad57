//! Pre-commit defaulting and validation of user-submitted records.

use pkg_constants::state::DEFAULT_ANSIBLE_USER;
use pkg_state::registry::Registry;
use pkg_types::deployment::Deployment;
use pkg_types::nodeset::NodeSet;
use pkg_types::validate::{validate_deployment_spec, validate_name, validate_node_set_spec};
use std::collections::BTreeSet;
use tracing::debug;

use crate::deployment::{blocking_condition, is_running};

/// Why a record was turned away.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("invalid {kind} {name}: {reason}")]
    Invalid {
        kind: &'static str,
        name: String,
        reason: String,
    },
    #[error("node {node} already exists in another cluster")]
    DuplicateNode { node: String },
    #[error(
        "could not patch nodeset while deployment {deployment} (blocked on {condition} condition) is running"
    )]
    NodeSetBusy {
        deployment: String,
        condition: String,
    },
    #[error("Deployment {name} spec is immutable")]
    Immutable { name: String },
}

/// Fill in the NodeSet fields that have defaults.
pub fn default_node_set(node_set: &mut NodeSet) {
    let spec = &mut node_set.spec;
    for (key, node) in spec.nodes.iter_mut() {
        if node.host_name.is_empty() {
            node.host_name = key.clone();
        }
    }
    if spec.pre_provisioned && spec.node_template.ansible.ansible_user.is_empty() {
        spec.node_template.ansible.ansible_user = DEFAULT_ANSIBLE_USER.to_string();
    }
}

/// Admission gate in front of the store.
#[derive(Clone)]
pub struct Admission {
    registry: Registry,
}

impl Admission {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Default and validate a NodeSet create or update, returning the
    /// record to store.
    pub async fn admit_node_set(&self, mut node_set: NodeSet) -> anyhow::Result<NodeSet> {
        default_node_set(&mut node_set);
        let name = node_set.meta.name.clone();
        validate_name(&name)
            .and_then(|_| validate_node_set_spec(&node_set.spec))
            .map_err(|e| AdmissionError::Invalid {
                kind: "NodeSet",
                name: name.clone(),
                reason: e.to_string(),
            })?;

        self.check_duplicate_nodes(&node_set).await?;

        let namespace = &node_set.meta.namespace;
        if let Some(existing) = self.registry.get::<NodeSet>(namespace, &name).await? {
            if existing.spec != node_set.spec {
                self.check_not_deploying(&node_set).await?;
            }
        }
        debug!("Admitted NodeSet {}/{}", namespace, name);
        Ok(node_set)
    }

    /// Validate a Deployment create. An existing Deployment may only be
    /// resubmitted unchanged.
    pub async fn admit_deployment(&self, deployment: Deployment) -> anyhow::Result<Deployment> {
        let name = deployment.meta.name.clone();
        validate_name(&name)
            .and_then(|_| validate_deployment_spec(&deployment.spec))
            .map_err(|e| AdmissionError::Invalid {
                kind: "Deployment",
                name: name.clone(),
                reason: e.to_string(),
            })?;

        if let Some(existing) = self
            .registry
            .get::<Deployment>(&deployment.meta.namespace, &name)
            .await?
        {
            if existing.spec != deployment.spec {
                return Err(AdmissionError::Immutable { name }.into());
            }
        }
        Ok(deployment)
    }

    async fn check_duplicate_nodes(&self, node_set: &NodeSet) -> anyhow::Result<()> {
        let mut taken = BTreeSet::new();
        for other in self.registry.list::<NodeSet>(&node_set.meta.namespace).await? {
            if other.meta.name == node_set.meta.name {
                continue;
            }
            for (key, node) in &other.spec.nodes {
                taken.insert(key.clone());
                if !node.host_name.is_empty() {
                    taken.insert(node.host_name.clone());
                }
                if !node.ansible.ansible_host.is_empty() {
                    taken.insert(node.ansible.ansible_host.clone());
                }
            }
        }

        for (key, node) in &node_set.spec.nodes {
            let host_name = node_set.host_name(key, node);
            let candidates = [host_name, node.ansible.ansible_host.as_str()];
            if let Some(dup) = candidates
                .iter()
                .find(|c| !c.is_empty() && taken.contains(**c))
            {
                return Err(AdmissionError::DuplicateNode {
                    node: dup.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    async fn check_not_deploying(&self, node_set: &NodeSet) -> anyhow::Result<()> {
        let name = &node_set.meta.name;
        for deployment in self
            .registry
            .list::<Deployment>(&node_set.meta.namespace)
            .await?
        {
            if !deployment.references(name) {
                continue;
            }
            let Some(conditions) = deployment.status.node_set_conditions.get(name) else {
                continue;
            };
            if is_running(conditions) {
                return Err(AdmissionError::NodeSetBusy {
                    deployment: deployment.meta.name.clone(),
                    condition: blocking_condition(conditions),
                }
                .into());
            }
        }
        Ok(())
    }
}
