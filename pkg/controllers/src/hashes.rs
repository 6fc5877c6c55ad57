//! Content hashes used for change detection.

use pkg_constants::labels;
use pkg_pki::bundle::bundle_secret_name;
use pkg_state::registry::Registry;
use pkg_types::nodeset::{NodeSection, NodeSet, NodeTemplate};
use pkg_types::secret::Secret;
use pkg_types::service::Service;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::datasource;

/// Hex SHA-256 of the JSON form of `value`.
pub fn object_hash<T: Serialize>(value: &T) -> anyhow::Result<String> {
    let bytes = serde_json::to_vec(value)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFields<'a> {
    node_template: &'a NodeTemplate,
    nodes: &'a BTreeMap<String, NodeSection>,
}

/// Hash of the NodeSet fields whose change calls for a new rollout.
pub fn config_hash(node_set: &NodeSet) -> anyhow::Result<String> {
    object_hash(&ConfigFields {
        node_template: &node_set.spec.node_template,
        nodes: &node_set.spec.nodes,
    })
}

/// ConfigMap and Secret hashes of everything `services` consumed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputHashes {
    pub config_maps: BTreeMap<String, String>,
    pub secrets: BTreeMap<String, String>,
}

impl InputHashes {
    /// Record the data sources of `service` and, for `node_sets` with TLS
    /// enabled, every cert bundle issued for it.
    pub async fn add_service(
        &mut self,
        registry: &Registry,
        service: &Service,
        node_sets: &[NodeSet],
    ) -> anyhow::Result<()> {
        let namespace = &service.meta.namespace;
        for source in &service.spec.data_sources {
            let (config_map, secret) = datasource::resolve(registry, namespace, source).await?;
            if let Some(cm) = config_map {
                self.config_maps
                    .insert(cm.meta.name.clone(), object_hash(&cm.data)?);
            }
            if let Some(s) = secret {
                self.secrets.insert(s.meta.name.clone(), object_hash(&s.data)?);
            }
        }

        for node_set in node_sets.iter().filter(|n| n.spec.tls_enabled) {
            for cert_key in service.spec.tls_certs.keys() {
                for bundle in cert_bundles(registry, node_set, &service.meta.name, cert_key).await? {
                    self.secrets
                        .insert(bundle.meta.name.clone(), object_hash(&bundle.data)?);
                }
            }
        }
        Ok(())
    }
}

/// Every bundle secret of one service cert, in index order.
pub async fn cert_bundles(
    registry: &Registry,
    node_set: &NodeSet,
    service: &str,
    cert_key: &str,
) -> anyhow::Result<Vec<Secret>> {
    let namespace = &node_set.meta.namespace;
    let first_name = bundle_secret_name(&node_set.meta.name, service, cert_key, 0);
    let Some(first) = registry.get::<Secret>(namespace, &first_name).await? else {
        return Ok(Vec::new());
    };
    let count = bundle_count(&first);
    let mut bundles = vec![first];
    for index in 1..count {
        let name = bundle_secret_name(&node_set.meta.name, service, cert_key, index);
        if let Some(bundle) = registry.get::<Secret>(namespace, &name).await? {
            bundles.push(bundle);
        }
    }
    Ok(bundles)
}

/// Bundle count recorded on a bundle secret's labels.
pub fn bundle_count(bundle: &Secret) -> usize {
    bundle
        .meta
        .labels
        .get(labels::NUMBER_OF_SECRETS)
        .and_then(|v| v.parse().ok())
        .unwrap_or(1)
}
