use anyhow::{Context as _, bail};
use pkg_constants::images::OS_IMAGE_FIELD;
use pkg_constants::labels;
use pkg_constants::network::CTLPLANE_NETWORK;
use pkg_network::Readiness;
use pkg_network::ipam::{NodeReservations, cidr_prefix};
use pkg_state::registry::Registry;
use pkg_types::baremetal::{BaremetalHost, BaremetalSet, BaremetalSetSpec, BaremetalSetStatus};
use pkg_types::condition::message;
use pkg_types::meta::ObjectMeta;
use pkg_types::nodeset::NodeSet;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Desired provisioning request for `node_set` from its reservations.
pub fn build_spec(
    node_set: &NodeSet,
    reservations: &NodeReservations,
    images: &BTreeMap<String, String>,
) -> anyhow::Result<BaremetalSetSpec> {
    let template = &node_set.spec.baremetal_set_template;
    let mut spec = BaremetalSetSpec {
        hosts: BTreeMap::new(),
        bmh_namespace: template.bmh_namespace.clone(),
        bmh_label_selector: template.bmh_label_selector.clone(),
        os_image: template.os_image.clone(),
        ctlplane_interface: template.ctlplane_interface.clone(),
        ctlplane_gateway: String::new(),
        domain_name: String::new(),
        cloud_user_name: template.cloud_user_name.clone(),
        deployment_ssh_secret: node_set.spec.node_template.ansible_ssh_private_key_secret.clone(),
    };
    if spec.os_image.is_empty() {
        if let Some(image) = images.get(OS_IMAGE_FIELD) {
            spec.os_image = image.clone();
        }
    }

    for (key, node) in &node_set.spec.nodes {
        let host_name = node_set.host_name(key, node);
        let Some(ip_set) = reservations.get(host_name) else {
            bail!("no IPSet found for host: {}", host_name);
        };
        let mut host = BaremetalHost::default();
        for res in &ip_set.status.reservations {
            if !res.network.eq_ignore_ascii_case(CTLPLANE_NETWORK) {
                continue;
            }
            host.ctl_plane_ip = format!("{}/{}", res.address, cidr_prefix(&res.cidr));
            let Some(gateway) = &res.gateway else {
                bail!("{} gateway is missing", CTLPLANE_NETWORK);
            };
            spec.ctlplane_gateway = gateway.clone();
            spec.domain_name = res.dns_domain.clone();
        }
        spec.hosts.insert(host_name.to_string(), host);
    }
    Ok(spec)
}

/// Create or refresh the NodeSet's `BaremetalSet` and report whether the
/// hardware is provisioned.
pub async fn ensure_provisioned(
    registry: &Registry,
    node_set: &NodeSet,
    reservations: &NodeReservations,
    images: &BTreeMap<String, String>,
) -> anyhow::Result<Readiness<()>> {
    let spec = build_spec(node_set, reservations, images)?;
    let mut set_labels = BTreeMap::new();
    set_labels.insert(
        labels::RESERVATION_NODESET.to_string(),
        node_set.meta.name.clone(),
    );
    let seed = BaremetalSet {
        meta: ObjectMeta::new(&node_set.meta.namespace, &node_set.meta.name).owned_by(node_set),
        spec: BaremetalSetSpec::default(),
        status: BaremetalSetStatus::default(),
    };
    let host_count = spec.hosts.len();
    let (set, op) = registry
        .create_or_patch(seed, |b| {
            b.meta.labels.extend(set_labels);
            b.spec = spec;
        })
        .await
        .with_context(|| format!("reconciling BaremetalSet {}", node_set.meta.name))?;
    debug!("BaremetalSet {} ({} hosts): {:?}", set.meta.name, host_count, op);

    if !set.status.ready {
        info!("NodeSet {}: BaremetalSet not ready, waiting...", node_set.meta.name);
        return Ok(Readiness::Waiting(message::BAREMETAL_WAITING.to_string()));
    }
    Ok(Readiness::Ready(()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::network::{IPReservation, IPSet, IPSetSpec, IPSetStatus};
    use pkg_types::nodeset::{NodeSection, NodeSetSpec};

    fn make_nodeset() -> NodeSet {
        let mut spec = NodeSetSpec::default();
        spec.node_template.ansible_ssh_private_key_secret = "dataplane-ssh".into();
        spec.nodes.insert("edpm-compute-0".into(), NodeSection::default());
        NodeSet::new("openstack", "compute", spec)
    }

    fn reservations(gateway: Option<&str>) -> NodeReservations {
        let mut out = NodeReservations::new();
        out.insert(
            "edpm-compute-0".into(),
            IPSet {
                meta: ObjectMeta::new("openstack", "edpm-compute-0"),
                spec: IPSetSpec::default(),
                status: IPSetStatus {
                    reservations: vec![IPReservation {
                        network: "ctlplane".into(),
                        subnet: "subnet1".into(),
                        address: "192.168.122.100".into(),
                        cidr: "192.168.122.0/24".into(),
                        gateway: gateway.map(String::from),
                        dns_domain: "ctlplane.example.com".into(),
                        ..Default::default()
                    }],
                    ready: true,
                    ..Default::default()
                },
            },
        );
        out
    }

    fn images() -> BTreeMap<String, String> {
        let mut images = BTreeMap::new();
        images.insert(OS_IMAGE_FIELD.to_string(), "default/os:1".to_string());
        images
    }

    #[test]
    fn test_build_spec() {
        let spec = build_spec(&make_nodeset(), &reservations(Some("192.168.122.1")), &images()).unwrap();
        assert_eq!(spec.hosts["edpm-compute-0"].ctl_plane_ip, "192.168.122.100/24");
        assert_eq!(spec.ctlplane_gateway, "192.168.122.1");
        assert_eq!(spec.domain_name, "ctlplane.example.com");
        assert_eq!(spec.os_image, "default/os:1");
        assert_eq!(spec.deployment_ssh_secret, "dataplane-ssh");

        let mut ns = make_nodeset();
        ns.spec.baremetal_set_template.os_image = "custom/os:2".into();
        let spec = build_spec(&ns, &reservations(Some("192.168.122.1")), &images()).unwrap();
        assert_eq!(spec.os_image, "custom/os:2");
    }

    #[test]
    fn test_build_spec_errors() {
        let err = build_spec(&make_nodeset(), &reservations(None), &images()).unwrap_err();
        assert_eq!(err.to_string(), "ctlplane gateway is missing");

        let err = build_spec(&make_nodeset(), &NodeReservations::new(), &images()).unwrap_err();
        assert_eq!(err.to_string(), "no IPSet found for host: edpm-compute-0");
    }

    #[tokio::test]
    async fn test_waits_until_ready() {
        let registry = Registry::in_memory().await.unwrap();
        let ns = registry.create(make_nodeset()).await.unwrap();
        let res = reservations(Some("192.168.122.1"));

        let first = ensure_provisioned(&registry, &ns, &res, &images()).await.unwrap();
        assert!(matches!(first, Readiness::Waiting(_)));

        registry
            .patch_status::<BaremetalSet, _>("openstack", "compute", 3, |s| s.ready = true)
            .await
            .unwrap();
        let second = ensure_provisioned(&registry, &ns, &res, &images()).await.unwrap();
        assert!(matches!(second, Readiness::Ready(_)));
    }
}
