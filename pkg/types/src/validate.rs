use anyhow::{Result, bail};

use crate::deployment::DeploymentSpec;
use crate::nodeset::NodeSetSpec;

/// Validate an RFC-1123 label style resource name.
/// Rules: lowercase `[a-z0-9-]`, max 63 chars, no leading/trailing hyphens.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name.len() > pkg_constants::network::DNS1123_LABEL_MAX_LENGTH {
        bail!("name '{}' exceeds 63 characters (got {})", name, name.len());
    }
    if name.starts_with('-') || name.ends_with('-') {
        bail!("name '{}' must not start or end with a hyphen", name);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        bail!(
            "name '{}' must contain only lowercase letters, digits, and hyphens [a-z0-9-]",
            name
        );
    }
    Ok(())
}

/// Validate a host name: dot-separated labels, each a valid name, 253 chars max.
pub fn validate_host_name(host: &str) -> Result<()> {
    if host.len() > 253 {
        bail!("host name '{}' exceeds 253 characters", host);
    }
    for label in host.split('.') {
        validate_name(label).map_err(|e| anyhow::anyhow!("host name '{}': {}", host, e))?;
    }
    Ok(())
}

/// Structural checks on a NodeSet spec.
pub fn validate_node_set_spec(spec: &NodeSetSpec) -> Result<()> {
    if spec.secret_max_size == 0 {
        bail!("secret_max_size must be greater than zero");
    }
    for (key, node) in &spec.nodes {
        let host = if node.host_name.is_empty() {
            key
        } else {
            &node.host_name
        };
        validate_host_name(host)?;
        for net in node.networks.iter().chain(&spec.node_template.networks) {
            if net.name.is_empty() {
                bail!("node {} declares a network without a name", key);
            }
        }
    }
    for service in &spec.services {
        validate_name(service)?;
    }
    Ok(())
}

/// Structural checks on a Deployment spec.
pub fn validate_deployment_spec(spec: &DeploymentSpec) -> Result<()> {
    if spec.node_sets.is_empty() {
        bail!("node_sets must reference at least one NodeSet");
    }
    for name in &spec.node_sets {
        validate_name(name)?;
    }
    if spec.deployment_requeue_time < 1 {
        bail!("deployment_requeue_time must be at least 1");
    }
    for service in &spec.services_override {
        validate_name(service)?;
    }
    Ok(())
}
