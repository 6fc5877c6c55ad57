use pkg_constants::network::CTLPLANE_NETWORK;
use pkg_constants::state::STATUS_UPDATE_ATTEMPTS;
use pkg_state::error::InvalidConfig;
use pkg_state::registry::Registry;
use pkg_types::condition::message;
use pkg_types::meta::ObjectMeta;
use pkg_types::network::{DNSData, DNSDataSpec, DNSDataStatus, DNSHost, DNSMasq};
use pkg_types::nodeset::{NodeSet, host_name_is_fqdn, short_host_name};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::Readiness;
use crate::ipam::NodeReservations;

/// Name data derived for a NodeSet once its records are published.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DnsDetails {
    /// Addresses nodes use as name servers
    pub server_addresses: Vec<String>,
    pub cluster_addresses: Vec<String>,
    pub ctlplane_search_domain: String,
    /// host name → lowercased network → name on that network
    pub hostnames: BTreeMap<String, BTreeMap<String, String>>,
    /// host name → lowercased network → address on that network
    pub ips: BTreeMap<String, BTreeMap<String, String>>,
}

/// Store-backed name records for NodeSets.
#[derive(Clone)]
pub struct NameFacade {
    registry: Registry,
    attempts: u32,
}

impl NameFacade {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            attempts: STATUS_UPDATE_ATTEMPTS,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// The namespace's name service, once it exists and is ready.
    /// More than one is an error.
    pub async fn check_name_service(&self, namespace: &str) -> anyhow::Result<Readiness<DNSMasq>> {
        let mut services = self.registry.list::<DNSMasq>(namespace).await?;
        if services.len() > 1 {
            return Err(
                InvalidConfig(message::DNS_DATA_MULTIPLE_DNSMASQ.to_string()).into(),
            );
        }
        match services.pop() {
            None => Ok(Readiness::Waiting(format!(
                "no DNSMasq found in namespace {}",
                namespace
            ))),
            Some(svc) if !svc.status.ready => Ok(Readiness::Waiting(format!(
                "DNSMasq {} is not ready",
                svc.meta.name
            ))),
            Some(svc) => Ok(Readiness::Ready(svc)),
        }
    }

    /// Publish the records of `node_set` and report its name data.
    ///
    /// Without a ready name service nothing is written.
    pub async fn ensure_dns_data(
        &self,
        node_set: &NodeSet,
        reservations: &NodeReservations,
    ) -> anyhow::Result<Readiness<DnsDetails>> {
        let namespace = &node_set.meta.namespace;
        let name_service = match self.check_name_service(namespace).await? {
            Readiness::Ready(svc) => svc,
            Readiness::Waiting(msg) => return Ok(Readiness::Waiting(msg)),
        };

        let (hosts, mut details) = build_records(node_set, reservations);
        details.server_addresses = name_service.status.dns_addresses.clone();
        details.cluster_addresses = name_service.status.dns_cluster_addresses.clone();

        let seed = DNSData {
            meta: ObjectMeta::new(namespace, &node_set.meta.name).owned_by(node_set),
            spec: DNSDataSpec::default(),
            status: DNSDataStatus::default(),
        };
        let record_count = hosts.len();
        let (_, op) = self
            .registry
            .create_or_patch(seed, |d| d.spec.hosts = hosts)
            .await?;
        debug!(
            "DNSData {}: {} record(s) ({:?})",
            node_set.meta.name, record_count, op
        );

        // Records are served straight from the store, so a written
        // DNSData is live.
        let published = self
            .registry
            .patch_status::<DNSData, _>(namespace, &node_set.meta.name, self.attempts, |s| {
                s.ready = true
            })
            .await?;
        match published {
            Some(data) if data.status.ready => Ok(Readiness::Ready(details)),
            _ => Ok(Readiness::Waiting(message::DNS_DATA_WAITING.to_string())),
        }
    }

    /// Addresses published for `host` in `namespace`. Matching is
    /// case-insensitive and covers every name of a record.
    pub async fn resolve(&self, namespace: &str, host: &str) -> anyhow::Result<Vec<String>> {
        let mut addrs = Vec::new();
        for data in self.registry.list::<DNSData>(namespace).await? {
            if !data.status.ready {
                continue;
            }
            for record in &data.spec.hosts {
                if record
                    .hostnames
                    .iter()
                    .any(|h| h.eq_ignore_ascii_case(host))
                    && !addrs.contains(&record.ip)
                {
                    addrs.push(record.ip.clone());
                }
            }
        }
        if !addrs.is_empty() {
            info!("Resolved {} to {}", host, addrs.join(", "));
        }
        Ok(addrs)
    }
}

/// Records for every reservation, in node key order.
///
/// Each address gets `<short>.<domain>` unless that equals the node's host
/// name. A fully qualified host name is also published on the control-plane
/// network. The control-plane domain becomes the search domain.
pub fn build_records(
    node_set: &NodeSet,
    reservations: &NodeReservations,
) -> (Vec<DNSHost>, DnsDetails) {
    let mut hosts = Vec::new();
    let mut details = DnsDetails::default();

    for (key, node) in &node_set.spec.nodes {
        let host_name = node_set.host_name(key, node);
        let Some(ip_set) = reservations.get(host_name) else {
            continue;
        };
        let short = short_host_name(host_name);
        let names = details.hostnames.entry(host_name.to_string()).or_default();
        let ips = details.ips.entry(host_name.to_string()).or_default();

        for res in &ip_set.status.reservations {
            let net = res.network.to_ascii_lowercase();
            let mut record_names = Vec::new();

            let fqdn = if res.dns_domain.is_empty() {
                short.to_string()
            } else {
                format!("{}.{}", short, res.dns_domain)
            };
            if fqdn != host_name {
                record_names.push(fqdn.clone());
                names.insert(net.clone(), fqdn);
            }
            if net == CTLPLANE_NETWORK {
                if host_name_is_fqdn(host_name) {
                    record_names.push(host_name.to_string());
                    names.insert(net.clone(), host_name.to_string());
                }
                if details.ctlplane_search_domain.is_empty() {
                    details.ctlplane_search_domain = res.dns_domain.clone();
                }
            }
            names.entry(net.clone()).or_insert_with(|| host_name.to_string());
            ips.insert(net, res.address.clone());

            hosts.push(DNSHost {
                ip: res.address.clone(),
                hostnames: record_names,
            });
        }
    }
    (hosts, details)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::network::{DNSMasqStatus, IPReservation, IPSet, IPSetSpec, IPSetStatus};
    use pkg_types::nodeset::{NodeSection, NodeSetSpec};

    fn node_set() -> NodeSet {
        let mut spec = NodeSetSpec::default();
        spec.nodes.insert(
            "edpm-compute-0".into(),
            NodeSection {
                host_name: "edpm-compute-0".into(),
                ..Default::default()
            },
        );
        spec.nodes.insert(
            "edpm-compute-1".into(),
            NodeSection {
                host_name: "edpm-compute-1.example.com".into(),
                ..Default::default()
            },
        );
        NodeSet::new("openstack", "compute", spec)
    }

    fn reservation(network: &str, address: &str, domain: &str) -> IPReservation {
        IPReservation {
            network: network.into(),
            subnet: "subnet1".into(),
            address: address.into(),
            cidr: "192.168.122.0/24".into(),
            dns_domain: domain.into(),
            ..Default::default()
        }
    }

    fn reservations() -> NodeReservations {
        let mut out = NodeReservations::new();
        let mk = |host: &str, res: Vec<IPReservation>| IPSet {
            meta: ObjectMeta::new("openstack", host),
            spec: IPSetSpec::default(),
            status: IPSetStatus {
                reservations: res,
                ready: true,
                ..Default::default()
            },
        };
        out.insert(
            "edpm-compute-0".into(),
            mk(
                "edpm-compute-0",
                vec![
                    reservation("CtlPlane", "192.168.122.100", "ctlplane.example.com"),
                    reservation("InternalApi", "172.17.0.100", "internalapi.example.com"),
                ],
            ),
        );
        out.insert(
            "edpm-compute-1.example.com".into(),
            mk(
                "edpm-compute-1.example.com",
                vec![reservation("ctlplane", "192.168.122.101", "ctlplane.example.com")],
            ),
        );
        out
    }

    fn dnsmasq(name: &str, ready: bool) -> DNSMasq {
        DNSMasq {
            meta: ObjectMeta::new("openstack", name),
            status: DNSMasqStatus {
                ready,
                dns_addresses: vec!["192.168.122.80".into()],
                dns_cluster_addresses: vec!["10.217.4.10".into()],
            },
        }
    }

    #[test]
    fn test_records_follow_node_order() {
        let (hosts, details) = build_records(&node_set(), &reservations());
        assert_eq!(hosts.len(), 3);
        assert_eq!(hosts[0].ip, "192.168.122.100");
        assert_eq!(
            hosts[0].hostnames,
            vec!["edpm-compute-0.ctlplane.example.com".to_string()]
        );
        assert_eq!(
            hosts[2].hostnames,
            vec![
                "edpm-compute-1.ctlplane.example.com".to_string(),
                "edpm-compute-1.example.com".to_string()
            ]
        );
        assert_eq!(details.ctlplane_search_domain, "ctlplane.example.com");
        assert_eq!(
            details.hostnames["edpm-compute-0"]["internalapi"],
            "edpm-compute-0.internalapi.example.com"
        );
        assert_eq!(
            details.hostnames["edpm-compute-1.example.com"]["ctlplane"],
            "edpm-compute-1.example.com"
        );
        assert_eq!(details.ips["edpm-compute-0"]["ctlplane"], "192.168.122.100");
    }

    #[tokio::test]
    async fn test_waits_for_name_service() {
        let registry = Registry::in_memory().await.unwrap();
        let ns = registry.create(node_set()).await.unwrap();
        let facade = NameFacade::new(registry.clone());

        let result = facade.ensure_dns_data(&ns, &reservations()).await.unwrap();
        assert!(matches!(result, Readiness::Waiting(_)));

        registry.create(dnsmasq("dns", false)).await.unwrap();
        let result = facade.ensure_dns_data(&ns, &reservations()).await.unwrap();
        assert!(matches!(result, Readiness::Waiting(_)));
        assert!(
            registry
                .get::<DNSData>("openstack", "compute")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_multiple_name_services_fail() {
        let registry = Registry::in_memory().await.unwrap();
        registry.create(dnsmasq("dns-a", true)).await.unwrap();
        registry.create(dnsmasq("dns-b", true)).await.unwrap();
        let facade = NameFacade::new(registry);
        let err = facade.check_name_service("openstack").await.unwrap_err();
        assert_eq!(err.to_string(), message::DNS_DATA_MULTIPLE_DNSMASQ);
        assert!(pkg_state::error::is_invalid_config(&err));
    }

    #[tokio::test]
    async fn test_publishes_and_resolves() {
        let registry = Registry::in_memory().await.unwrap();
        let ns = registry.create(node_set()).await.unwrap();
        registry.create(dnsmasq("dns", true)).await.unwrap();
        let facade = NameFacade::new(registry.clone());

        let Readiness::Ready(details) = facade.ensure_dns_data(&ns, &reservations()).await.unwrap()
        else {
            panic!("expected published records");
        };
        assert_eq!(details.server_addresses, vec!["192.168.122.80".to_string()]);
        assert_eq!(details.cluster_addresses, vec!["10.217.4.10".to_string()]);

        let data = registry
            .get::<DNSData>("openstack", "compute")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(data.spec.hosts.len(), 3);
        assert!(data.status.ready);

        assert_eq!(
            facade
                .resolve("openstack", "EDPM-COMPUTE-0.internalapi.example.com")
                .await
                .unwrap(),
            vec!["172.17.0.100".to_string()]
        );
        assert!(facade.resolve("openstack", "nowhere").await.unwrap().is_empty());
    }
}
