//! Automation inventory of a NodeSet.

use anyhow::Context as _;
use pkg_constants::images::DEFAULT_IMAGES;
use pkg_constants::labels;
use pkg_constants::network::CTLPLANE_NETWORK;
use pkg_constants::paths::SSH_KEY_DIR;
use pkg_network::ipam::{NodeReservations, cidr_prefix};
use pkg_state::registry::Registry;
use pkg_types::meta::ObjectMeta;
use pkg_types::network::IPSet;
use pkg_types::nodeset::{AnsibleOpts, NetworkRef, NodeSection, NodeSet, host_name_is_fqdn, short_host_name};
use pkg_types::secret::Secret;
use pkg_types::service::Service;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::datasource;

type Vars = Map<String, Value>;

/// Render the inventory of `node_set` and store it in its inventory secret.
/// Returns the secret name.
pub async fn generate_inventory(
    registry: &Registry,
    node_set: &NodeSet,
    reservations: &NodeReservations,
    dns_addresses: &[String],
    images: &BTreeMap<String, String>,
) -> anyhow::Result<String> {
    let document = render_inventory(registry, node_set, reservations, dns_addresses, images).await?;

    let secret_name = node_set.inventory_secret_name();
    let mut secret_labels = BTreeMap::new();
    secret_labels.insert(
        labels::OPERATOR_NAME.to_string(),
        labels::OPERATOR_NAME_VALUE.to_string(),
    );
    secret_labels.insert(labels::RUN_NODESET.to_string(), node_set.meta.name.clone());
    secret_labels.insert(labels::INVENTORY.to_string(), "true".to_string());
    secret_labels.extend(node_set.meta.labels.clone());

    let seed = Secret {
        meta: ObjectMeta::new(&node_set.meta.namespace, &secret_name).owned_by(node_set),
        data: BTreeMap::new(),
    };
    let (_, op) = registry
        .create_or_patch(seed, |s| {
            s.meta.labels.extend(secret_labels);
            s.data.insert(labels::INVENTORY.to_string(), document);
        })
        .await
        .with_context(|| format!("storing inventory of NodeSet {}", node_set.meta.name))?;
    debug!("Inventory secret {}: {:?}", secret_name, op);
    Ok(secret_name)
}

/// The inventory document of `node_set` as YAML.
pub async fn render_inventory(
    registry: &Registry,
    node_set: &NodeSet,
    reservations: &NodeReservations,
    dns_addresses: &[String],
    images: &BTreeMap<String, String>,
) -> anyhow::Result<String> {
    let namespace = &node_set.meta.namespace;
    let template = &node_set.spec.node_template;

    let mut vars = Vars::new();
    for (k, v) in datasource::collect_vars(registry, namespace, &template.ansible.ansible_vars_from)
        .await
        .context("could not get ansible group vars from configMap/secret")?
    {
        vars.insert(k, Value::String(v));
    }
    apply_connection_vars(&mut vars, &template.ansible, &template.management_network);
    for image in DEFAULT_IMAGES {
        let Some(var) = image.inventory_var else {
            continue;
        };
        if template.ansible.ansible_vars.contains_key(var) {
            continue;
        }
        if let Some(value) = images.get(image.field) {
            vars.insert(var.to_string(), Value::String(value.clone()));
        }
    }
    apply_user_vars(&mut vars, &template.ansible);
    apply_network_vars(&mut vars, &template.networks);

    vars.insert("edpm_nodeset_name".into(), json!(node_set.meta.name));
    vars.insert("edpm_tls_certs_enabled".into(), json!(node_set.spec.tls_enabled));
    if !node_set.spec.tags.is_empty() {
        vars.insert("nodeset_tags".into(), json!(node_set.spec.tags));
    }
    vars.insert("edpm_services".into(), json!(node_set.spec.services));
    let mut service_types = Vec::new();
    for name in &node_set.spec.services {
        match registry.get::<Service>(namespace, name).await? {
            Some(svc) => service_types.push(svc.service_type().to_string()),
            None => {
                warn!(
                    "NodeSet {}: could not get service {}, using name as service type",
                    node_set.meta.name, name
                );
                service_types.push(name.clone());
            }
        }
    }
    vars.insert("edpm_service_types".into(), json!(service_types));
    vars.insert(
        "ansible_ssh_private_key_file".into(),
        json!(format!("{}/ssh_key_{}", SSH_KEY_DIR, node_set.meta.name)),
    );

    let mut hosts = Vars::new();
    for (key, node) in &node_set.spec.nodes {
        let host_name = node_set.host_name(key, node);
        let from = datasource::collect_vars(registry, namespace, &node.ansible.ansible_vars_from)
            .await
            .context("could not get ansible host vars from configMap/secret")?;
        let mut host = host_vars(node, host_name, from);
        if let Some(ip_set) = reservations.get(host_name) {
            apply_ipam_vars(&mut host, ip_set, dns_addresses, host_name);
        }
        hosts.insert(short_host_name(host_name).to_string(), Value::Object(host));
    }

    let mut group = Vars::new();
    group.insert("hosts".into(), Value::Object(hosts));
    group.insert("vars".into(), Value::Object(vars));
    let mut document = Vars::new();
    document.insert(node_set.meta.name.clone(), Value::Object(group));

    info!(
        "NodeSet {}: rendered inventory for {} host(s)",
        node_set.meta.name,
        node_set.spec.nodes.len()
    );
    serde_yaml::to_string(&Value::Object(document)).context("Could not serialize NodeSet inventory")
}

fn host_vars(node: &NodeSection, host_name: &str, from: BTreeMap<String, String>) -> Vars {
    let mut vars: Vars = from.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
    let ansible_host = if node.ansible.ansible_host.is_empty() {
        host_name
    } else {
        node.ansible.ansible_host.as_str()
    };
    vars.insert("ansible_host".into(), json!(ansible_host));
    apply_connection_vars(&mut vars, &node.ansible, &node.management_network);
    apply_user_vars(&mut vars, &node.ansible);
    apply_network_vars(&mut vars, &node.networks);
    vars
}

fn apply_connection_vars(vars: &mut Vars, ansible: &AnsibleOpts, management_network: &str) {
    if !ansible.ansible_user.is_empty() {
        vars.insert("ansible_user".into(), json!(ansible.ansible_user));
    }
    if let Some(port) = ansible.ansible_port.filter(|p| *p > 0) {
        vars.insert("ansible_port".into(), json!(port.to_string()));
    }
    if !management_network.is_empty() {
        vars.insert("management_network".into(), json!(management_network));
    }
}

/// User variables. A string holding a YAML mapping or sequence is expanded
/// into that structure; every other value is kept as given.
fn apply_user_vars(vars: &mut Vars, ansible: &AnsibleOpts) {
    for (key, value) in &ansible.ansible_vars {
        let parsed = match value {
            Value::String(s) => match serde_yaml::from_str::<Value>(s) {
                Ok(v @ (Value::Object(_) | Value::Array(_))) => v,
                _ => value.clone(),
            },
            other => other.clone(),
        };
        vars.insert(key.clone(), parsed);
    }
}

fn apply_network_vars(vars: &mut Vars, networks: &[NetworkRef]) {
    if networks.is_empty() {
        return;
    }
    let mut names = Vec::new();
    let mut lower = Vars::new();
    for net in networks {
        if net.name.eq_ignore_ascii_case(CTLPLANE_NETWORK) {
            continue;
        }
        names.push(net.name.clone());
        lower.insert(net.name.clone(), json!(net.name.to_ascii_lowercase()));
    }
    vars.insert("nodeset_networks".into(), json!(names));
    vars.insert("networks_lower".into(), Value::Object(lower));
}

fn apply_ipam_vars(vars: &mut Vars, ip_set: &IPSet, dns_addresses: &[String], host_name: &str) {
    let mut search_domains = Vec::new();
    for res in &ip_set.status.reservations {
        let net = res.network.to_ascii_lowercase();
        vars.insert(format!("{}_ip", net), json!(res.address));
        if let Ok(prefix) = cidr_prefix(&res.cidr).parse::<u8>() {
            vars.insert(format!("{}_cidr", net), json!(prefix));
        }
        if res.vlan.is_some() || net != CTLPLANE_NETWORK {
            vars.insert(format!("{}_vlan_id", net), json!(res.vlan));
        }
        vars.insert(format!("{}_mtu", net), json!(res.mtu));
        vars.insert(format!("{}_gateway_ip", net), json!(res.gateway));
        vars.insert(
            format!("{}_host_routes", net),
            serde_json::to_value(&res.routes).unwrap_or(Value::Null),
        );

        if net == CTLPLANE_NETWORK {
            vars.insert(format!("{}_dns_nameservers", net), json!(dns_addresses));
            if host_name_is_fqdn(host_name) {
                vars.insert("canonical_hostname".into(), json!(host_name));
                if let Some((_, domain)) = host_name.split_once('.') {
                    if domain != res.dns_domain {
                        search_domains.push(domain.to_string());
                    }
                }
            } else {
                vars.insert(
                    "canonical_hostname".into(),
                    json!(format!("{}.{}", host_name, res.dns_domain)),
                );
            }
        }
        search_domains.push(res.dns_domain.clone());
    }
    vars.insert("dns_search_domains".into(), json!(search_domains));
}
