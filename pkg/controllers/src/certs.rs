//! Node certificates and their packing into bundle secrets.

use anyhow::{Context as _, bail};
use pkg_constants::labels;
use pkg_constants::network::{CERT_CONTENT_DNS_NAMES, CERT_CONTENT_IPS, CTLPLANE_NETWORK};
use pkg_pki::bundle::{bundle_secret_name, pack_cert_bundles};
use pkg_pki::ca::{CertRequest, ClusterCA};
use pkg_state::registry::{OperationResult, Registry};
use pkg_types::issuer::{Issuer, IssuerSpec};
use pkg_types::meta::ObjectMeta;
use pkg_types::nodeset::{NodeSet, short_host_name};
use pkg_types::secret::Secret;
use pkg_types::service::{Service, TlsCertSpec};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::hashes::object_hash;

/// Name of the internal root CA issuer and of its CA secret.
pub const ROOT_CA_ISSUER_NAME: &str = "rootca-internal";

/// Label recording which request a node certificate was issued for.
const CERT_REQUEST_LABEL: &str = "osdp-cert-request";

const TLS_CRT: &str = "tls.crt";
const TLS_KEY: &str = "tls.key";
const CA_CRT: &str = "ca.crt";

const DEFAULT_KEY_USAGES: &[&str] = &[
    "digital signature",
    "key encipherment",
    "server auth",
    "client auth",
];

/// Make sure the internal root CA issuer of `namespace` exists.
pub async fn ensure_root_issuer(registry: &Registry, namespace: &str) -> anyhow::Result<Issuer> {
    if let Some(issuer) = registry.get::<Issuer>(namespace, ROOT_CA_ISSUER_NAME).await? {
        return Ok(issuer);
    }

    let ca = ClusterCA::new(ROOT_CA_ISSUER_NAME)?;
    let mut ca_secret = Secret::new(namespace, ROOT_CA_ISSUER_NAME);
    ca_secret
        .data
        .insert(TLS_CRT.to_string(), ca.ca_cert_pem().to_string());
    ca_secret.data.insert(TLS_KEY.to_string(), ca.ca_key_pem());
    registry.create(ca_secret).await?;

    let mut issuer_labels = BTreeMap::new();
    issuer_labels.insert(labels::ROOT_CA_ISSUER_INTERNAL.to_string(), String::new());
    let issuer = Issuer {
        meta: ObjectMeta::new(namespace, ROOT_CA_ISSUER_NAME).with_labels(issuer_labels),
        spec: IssuerSpec {
            ca_secret_name: ROOT_CA_ISSUER_NAME.to_string(),
        },
    };
    info!("Created root CA issuer {}/{}", namespace, ROOT_CA_ISSUER_NAME);
    registry.create(issuer).await
}

/// The CA of the single issuer carrying `label`.
async fn issuer_ca(registry: &Registry, namespace: &str, label: &str) -> anyhow::Result<ClusterCA> {
    let mut selector = BTreeMap::new();
    selector.insert(label.to_string(), String::new());
    let mut issuers = registry.list_selected::<Issuer>(namespace, &selector).await?;
    if issuers.len() != 1 {
        bail!(
            "expected exactly one issuer with label {} in namespace {}, found {}",
            label,
            namespace,
            issuers.len()
        );
    }
    let Some(issuer) = issuers.pop() else {
        bail!("issuer with label {} disappeared", label);
    };
    let secret = registry
        .get_required::<Secret>(namespace, &issuer.spec.ca_secret_name)
        .await?;
    let (Some(cert), Some(key)) = (secret.data.get(TLS_CRT), secret.data.get(TLS_KEY)) else {
        bail!(
            "CA secret {} of issuer {} lacks {} or {}",
            secret.meta.name,
            issuer.meta.name,
            TLS_CRT,
            TLS_KEY
        );
    };
    ClusterCA::from_pem(&issuer.meta.name, cert, key)
        .with_context(|| format!("loading CA of issuer {}", issuer.meta.name))
}

#[derive(Serialize)]
struct RequestFingerprint<'a> {
    issuer: &'a str,
    request_cn: &'a str,
    dns_names: &'a [String],
    ips: &'a [String],
    key_usages: &'a [String],
}

/// SAN values from `by_network` for the cert's networks, or all of them.
fn select_by_network(by_network: Option<&BTreeMap<String, String>>, cert: &TlsCertSpec) -> Vec<String> {
    let Some(by_network) = by_network else {
        return Vec::new();
    };
    if cert.networks.is_empty() {
        return by_network.values().cloned().collect();
    }
    cert.networks
        .iter()
        .filter_map(|net| by_network.get(&net.to_ascii_lowercase()).cloned())
        .collect()
}

fn wants(cert: &TlsCertSpec, content: &str) -> bool {
    cert.contents.is_empty() || cert.contents.iter().any(|c| c == content)
}

/// Issue (or reuse) one certificate per node for `cert_key` of `service`
/// and pack them into the NodeSet's bundle secrets. Returns whether any
/// bundle was created or changed, in which case the caller should come back
/// shortly. Bundles past the new count are deleted.
pub async fn ensure_tls_certs(
    registry: &Registry,
    node_set: &NodeSet,
    service: &Service,
    cert_key: &str,
) -> anyhow::Result<bool> {
    let namespace = &node_set.meta.namespace;
    let Some(cert) = service.spec.tls_certs.get(cert_key) else {
        bail!("service {} declares no cert {}", service.meta.name, cert_key);
    };
    let issuer_label = if cert.issuer.is_empty() {
        labels::ROOT_CA_ISSUER_INTERNAL
    } else {
        cert.issuer.as_str()
    };
    let ca = issuer_ca(registry, namespace, issuer_label).await?;
    let key_usages: Vec<String> = if cert.key_usages.is_empty() {
        DEFAULT_KEY_USAGES.iter().map(|u| u.to_string()).collect()
    } else {
        cert.key_usages.clone()
    };

    let mut certs_data = BTreeMap::new();
    for (node_name, node) in &node_set.spec.nodes {
        let host_name = node_set.host_name(node_name, node);
        let names = node_set.status.all_hostnames.get(host_name);
        let ips = node_set.status.all_ips.get(host_name);

        let Some(base_name) = names.and_then(|n| n.get(CTLPLANE_NETWORK)).cloned() else {
            bail!(
                "control plane network not found for node {} , tls-e requires a control plane network to be present",
                node_name
            );
        };
        let request = CertRequest {
            common_name: short_host_name(&base_name).to_string(),
            dns_names: if wants(cert, CERT_CONTENT_DNS_NAMES) {
                select_by_network(names, cert)
            } else {
                Vec::new()
            },
            ips: if wants(cert, CERT_CONTENT_IPS) {
                select_by_network(ips, cert)
            } else {
                Vec::new()
            },
            key_usages: key_usages.clone(),
        };

        let cert_name = format!("{}-{}-{}", service.meta.name, cert_key, host_name);
        let secret = ensure_node_cert(
            registry,
            node_set,
            &ca,
            issuer_label,
            &cert_name,
            host_name,
            &service.meta.name,
            cert_key,
            &request,
        )
        .await?;
        for key in [TLS_KEY, TLS_CRT, CA_CRT] {
            let value = secret.data.get(key).cloned().unwrap_or_default();
            certs_data.insert(format!("{}-{}", base_name, key), value);
        }
    }

    let bundles = pack_cert_bundles(&certs_data, node_set.spec.secret_max_size);
    let count = bundles.len();
    let mut changed = false;
    for (index, data) in bundles.into_iter().enumerate() {
        let name = bundle_secret_name(&node_set.meta.name, &service.meta.name, cert_key, index);
        let mut bundle_labels = BTreeMap::new();
        bundle_labels.insert(labels::NUMBER_OF_SECRETS.to_string(), count.to_string());
        bundle_labels.insert(labels::SECRET_NUMBER.to_string(), index.to_string());
        let seed = Secret {
            meta: ObjectMeta::new(namespace, &name).owned_by(node_set),
            data: BTreeMap::new(),
        };
        let (_, op) = registry
            .create_or_patch(seed, |s| {
                s.meta.labels.extend(bundle_labels);
                s.data = data;
            })
            .await
            .with_context(|| format!("error creating certs secret for {}", service.meta.name))?;
        if op != OperationResult::Unchanged {
            debug!("Cert bundle {}: {:?}", name, op);
            changed = true;
        }
    }

    let mut stale = count;
    loop {
        let name = bundle_secret_name(&node_set.meta.name, &service.meta.name, cert_key, stale);
        if !registry.delete::<Secret>(namespace, &name).await? {
            break;
        }
        info!("Deleted stale cert bundle {}", name);
        changed = true;
        stale += 1;
    }
    Ok(changed)
}

#[allow(clippy::too_many_arguments)]
async fn ensure_node_cert(
    registry: &Registry,
    node_set: &NodeSet,
    ca: &ClusterCA,
    issuer: &str,
    cert_name: &str,
    host_name: &str,
    service: &str,
    cert_key: &str,
    request: &CertRequest,
) -> anyhow::Result<Secret> {
    let namespace = &node_set.meta.namespace;
    let fingerprint = object_hash(&RequestFingerprint {
        issuer,
        request_cn: &request.common_name,
        dns_names: &request.dns_names,
        ips: &request.ips,
        key_usages: &request.key_usages,
    })?;

    if let Some(existing) = registry.get::<Secret>(namespace, cert_name).await? {
        if existing.meta.labels.get(CERT_REQUEST_LABEL) == Some(&fingerprint) {
            return Ok(existing);
        }
    }

    let issued = ca.issue(request)?;
    let mut cert_labels = BTreeMap::new();
    cert_labels.insert(labels::HOSTNAME.to_string(), host_name.to_string());
    cert_labels.insert(labels::SERVICE.to_string(), service.to_string());
    cert_labels.insert(labels::SERVICE_CERT_KEY.to_string(), cert_key.to_string());
    cert_labels.insert(labels::NODESET.to_string(), node_set.meta.name.clone());
    cert_labels.insert(CERT_REQUEST_LABEL.to_string(), fingerprint);

    let mut data = BTreeMap::new();
    data.insert(TLS_CRT.to_string(), issued.cert_pem);
    data.insert(TLS_KEY.to_string(), issued.key_pem);
    data.insert(CA_CRT.to_string(), issued.ca_pem);

    let seed = Secret {
        meta: ObjectMeta::new(namespace, cert_name).owned_by(node_set),
        data: BTreeMap::new(),
    };
    let (secret, _) = registry
        .create_or_patch(seed, |s| {
            s.meta.labels.extend(cert_labels);
            s.data = data;
        })
        .await?;
    info!("Issued certificate {} for {}", cert_name, host_name);
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::nodeset::{NodeSection, NodeSetSpec};
    use pkg_types::service::ServiceSpec;

    fn make_nodeset(hosts: &[&str], max_size: usize) -> NodeSet {
        let mut spec = NodeSetSpec {
            tls_enabled: true,
            secret_max_size: max_size,
            ..Default::default()
        };
        let mut ns_status = pkg_types::nodeset::NodeSetStatus::default();
        for (i, host) in hosts.iter().enumerate() {
            spec.nodes.insert(
                host.to_string(),
                NodeSection {
                    host_name: host.to_string(),
                    ..Default::default()
                },
            );
            let mut names = BTreeMap::new();
            names.insert("ctlplane".to_string(), format!("{}.ctlplane.example.com", host));
            names.insert(
                "internalapi".to_string(),
                format!("{}.internalapi.example.com", host),
            );
            ns_status.all_hostnames.insert(host.to_string(), names);
            let mut ips = BTreeMap::new();
            ips.insert("ctlplane".to_string(), format!("192.168.122.{}", 100 + i));
            ns_status.all_ips.insert(host.to_string(), ips);
        }
        let mut ns = NodeSet::new("openstack", "compute", spec);
        ns.status = ns_status;
        ns
    }

    fn make_service(networks: &[&str]) -> Service {
        let mut tls_certs = BTreeMap::new();
        tls_certs.insert(
            "default".to_string(),
            TlsCertSpec {
                contents: vec!["dnsnames".into(), "ips".into()],
                networks: networks.iter().map(|n| n.to_string()).collect(),
                ..Default::default()
            },
        );
        Service::new(
            "openstack",
            "libvirt",
            ServiceSpec {
                tls_certs,
                ..Default::default()
            },
        )
    }

    async fn setup(ns: NodeSet) -> (Registry, NodeSet) {
        let registry = Registry::in_memory().await.unwrap();
        ensure_root_issuer(&registry, "openstack").await.unwrap();
        let status = ns.status.clone();
        let mut ns = registry.create(ns).await.unwrap();
        ns.status = status;
        (registry, ns)
    }

    #[tokio::test]
    async fn test_root_issuer_is_created_once() {
        let registry = Registry::in_memory().await.unwrap();
        let a = ensure_root_issuer(&registry, "openstack").await.unwrap();
        let b = ensure_root_issuer(&registry, "openstack").await.unwrap();
        assert_eq!(a.meta.uid, b.meta.uid);
        assert!(a.meta.labels.contains_key(labels::ROOT_CA_ISSUER_INTERNAL));
    }

    #[tokio::test]
    async fn test_issues_and_packs_then_settles() {
        let (registry, ns) = setup(make_nodeset(&["edpm-compute-0", "edpm-compute-1"], 1_048_576)).await;
        let svc = make_service(&[]);

        assert!(ensure_tls_certs(&registry, &ns, &svc, "default").await.unwrap());
        // second pass reuses every node certificate and changes nothing
        assert!(!ensure_tls_certs(&registry, &ns, &svc, "default").await.unwrap());

        let bundle = registry
            .get_required::<Secret>("openstack", "compute-libvirt-default-certs-0")
            .await
            .unwrap();
        assert_eq!(bundle.meta.labels[labels::NUMBER_OF_SECRETS], "1");
        assert_eq!(bundle.data.len(), 6);
        assert!(bundle
            .data
            .contains_key("edpm-compute-0.ctlplane.example.com-tls.crt"));

        let node_cert = registry
            .get_required::<Secret>("openstack", "libvirt-default-edpm-compute-1")
            .await
            .unwrap();
        assert_eq!(node_cert.meta.labels[labels::HOSTNAME], "edpm-compute-1");
        assert_eq!(node_cert.meta.labels[labels::NODESET], "compute");
    }

    #[tokio::test]
    async fn test_small_bound_splits_and_stale_bundles_go() {
        let (registry, ns) = setup(make_nodeset(&["a", "b", "c"], 1)).await;
        let svc = make_service(&["ctlplane"]);
        ensure_tls_certs(&registry, &ns, &svc, "default").await.unwrap();
        for i in 0..3 {
            let name = format!("compute-libvirt-default-certs-{}", i);
            let bundle = registry.get_required::<Secret>("openstack", &name).await.unwrap();
            assert_eq!(bundle.meta.labels[labels::NUMBER_OF_SECRETS], "3");
            assert_eq!(bundle.meta.labels[labels::SECRET_NUMBER], i.to_string());
        }

        let mut shrunk = ns.clone();
        shrunk.spec.nodes.remove("c");
        assert!(ensure_tls_certs(&registry, &shrunk, &svc, "default").await.unwrap());
        assert!(registry
            .get::<Secret>("openstack", "compute-libvirt-default-certs-2")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_missing_ctlplane_name_fails() {
        let mut ns = make_nodeset(&["edpm-compute-0"], 1_048_576);
        ns.status.all_hostnames.clear();
        let (registry, ns) = setup(ns).await;
        let err = ensure_tls_certs(&registry, &ns, &make_service(&[]), "default")
            .await
            .unwrap_err();
        assert!(err
            .to_string()
            .starts_with("control plane network not found for node edpm-compute-0"));
    }

    #[test]
    fn test_network_filter() {
        let ns = make_nodeset(&["a"], 1);
        let names = ns.status.all_hostnames.get("a");
        let cert = TlsCertSpec {
            networks: vec!["InternalApi".into()],
            ..Default::default()
        };
        assert_eq!(
            select_by_network(names, &cert),
            vec!["a.internalapi.example.com".to_string()]
        );
        assert_eq!(select_by_network(names, &TlsCertSpec::default()).len(), 2);
    }
}
