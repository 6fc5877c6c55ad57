use anyhow::{Context as _, bail};
use pkg_constants::labels;
use pkg_constants::state::STATUS_UPDATE_ATTEMPTS;
use pkg_state::registry::Registry;
use pkg_types::condition::{self, Conditions, Severity, reason};
use pkg_types::meta::ObjectMeta;
use pkg_types::network::{IPReservation, IPSet, IPSetSpec, IPSetStatus, NetConfig, SubnetDef};
use pkg_types::nodeset::{NetworkRef, NodeSet};
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::Readiness;

/// Reservations per node host name.
pub type NodeReservations = BTreeMap<String, IPSet>;

/// Store-backed address allocator.
///
/// Every node of a NodeSet gets one `IPSet`, named after its host name and
/// owned by the NodeSet. Addresses come from the namespace's `NetConfig`.
/// Allocation for all NodeSets of the operator is serialised so two nodes
/// never receive the same address.
#[derive(Clone)]
pub struct AddressFacade {
    registry: Registry,
    attempts: u32,
    alloc_lock: Arc<Mutex<()>>,
}

impl AddressFacade {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            attempts: STATUS_UPDATE_ATTEMPTS,
            alloc_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Reserve addresses for every node of `node_set`.
    ///
    /// Stale reservations of removed nodes are released first. Returns
    /// `Waiting` while no `NetConfig` exists or a node could not get all of
    /// its addresses yet.
    pub async fn ensure_ip_sets(
        &self,
        node_set: &NodeSet,
    ) -> anyhow::Result<Readiness<NodeReservations>> {
        let namespace = &node_set.meta.namespace;
        let removed = self.cleanup_stale(node_set).await?;
        if removed > 0 {
            info!(
                "NodeSet {}: released {} stale reservation(s)",
                node_set.meta.name, removed
            );
        }

        let mut net_configs = self.registry.list::<NetConfig>(namespace).await?;
        net_configs.sort_by(|a, b| a.meta.name.cmp(&b.meta.name));
        let Some(net_config) = net_configs.into_iter().next() else {
            return Ok(Readiness::Waiting(format!(
                "no NetConfig found in namespace {}",
                namespace
            )));
        };

        let _guard = self.alloc_lock.lock().await;
        let mut used = self.used_addresses(namespace).await?;
        let mut reservations = NodeReservations::new();
        let mut waiting = Vec::new();

        for (key, node) in &node_set.spec.nodes {
            let host_name = node_set.host_name(key, node).to_string();
            let networks = node_set.node_networks(node).to_vec();
            if networks.is_empty() {
                bail!("No Networks defined for node {} or template", key);
            }

            let mut node_labels = BTreeMap::new();
            node_labels.insert(
                labels::RESERVATION_NODESET.to_string(),
                node_set.meta.name.clone(),
            );
            let seed = IPSet {
                meta: ObjectMeta::new(namespace, &host_name)
                    .with_labels(node_labels.clone())
                    .owned_by(node_set),
                spec: IPSetSpec::default(),
                status: IPSetStatus::default(),
            };
            let (ip_set, _) = self
                .registry
                .create_or_patch(seed, |s| {
                    s.meta.labels.extend(node_labels);
                    s.spec.networks = networks;
                })
                .await?;

            let status = allocate(&ip_set, &net_config, &mut used)?;
            let ready = status.ready;
            let message = status.message.clone();
            let written = self
                .registry
                .patch_status::<IPSet, _>(namespace, &host_name, self.attempts, |s| {
                    *s = status.clone();
                })
                .await?;
            if !ready {
                waiting.push(format!("{}: {}", host_name, message));
            }
            if let Some(written) = written {
                reservations.insert(host_name, written);
            }
        }

        if waiting.is_empty() {
            Ok(Readiness::Ready(reservations))
        } else {
            Ok(Readiness::Waiting(waiting.join("; ")))
        }
    }

    /// Delete reservations of this NodeSet whose node no longer exists.
    pub async fn cleanup_stale(&self, node_set: &NodeSet) -> anyhow::Result<usize> {
        let mut selector = BTreeMap::new();
        selector.insert(
            labels::RESERVATION_NODESET.to_string(),
            node_set.meta.name.clone(),
        );
        let current: BTreeSet<&str> = node_set
            .spec
            .nodes
            .iter()
            .map(|(key, node)| node_set.host_name(key, node))
            .collect();

        let mut removed = 0;
        for ip_set in self
            .registry
            .list_selected::<IPSet>(&node_set.meta.namespace, &selector)
            .await?
        {
            if current.contains(ip_set.meta.name.as_str()) {
                continue;
            }
            debug!("Releasing IPSet {}", ip_set.meta.name);
            if self
                .registry
                .delete::<IPSet>(&ip_set.meta.namespace, &ip_set.meta.name)
                .await?
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Every address reserved in the namespace, keyed by network, with the
    /// name of the IPSet holding it.
    async fn used_addresses(&self, namespace: &str) -> anyhow::Result<UsedAddresses> {
        let mut used = UsedAddresses::new();
        for ip_set in self.registry.list::<IPSet>(namespace).await? {
            for r in &ip_set.status.reservations {
                if let Ok(addr) = ipv4(&r.address) {
                    used.insert(
                        (r.network.to_ascii_lowercase(), addr),
                        ip_set.meta.name.clone(),
                    );
                }
            }
        }
        Ok(used)
    }
}

type UsedAddresses = BTreeMap<(String, u32), String>;

/// Compute the status of `ip_set`: keep valid reservations, allocate the
/// missing ones.
fn allocate(
    ip_set: &IPSet,
    net_config: &NetConfig,
    used: &mut UsedAddresses,
) -> anyhow::Result<IPSetStatus> {
    let owner = &ip_set.meta.name;
    let mut reservations = Vec::new();
    let mut problems = Vec::new();

    for net_ref in &ip_set.spec.networks {
        let Some(network) = net_config.network(&net_ref.name) else {
            problems.push(format!("network {} not found in NetConfig", net_ref.name));
            continue;
        };
        let Some(subnet) = find_subnet(&network.subnets, net_ref) else {
            problems.push(format!(
                "subnet {} not found on network {}",
                net_ref.subnet_name, net_ref.name
            ));
            continue;
        };
        let net_key = network.name.to_ascii_lowercase();
        let range = SubnetRange::parse(subnet)?;

        let previous = ip_set
            .status
            .reservations
            .iter()
            .find(|r| r.network.eq_ignore_ascii_case(&network.name) && r.subnet == subnet.name)
            .and_then(|r| ipv4(&r.address).ok());

        let address = match &net_ref.fixed_ip {
            Some(fixed) => {
                let addr = ipv4(fixed)?;
                if !range.contains(addr) {
                    bail!(
                        "fixed IP {} of {} is outside subnet {} ({})",
                        fixed,
                        owner,
                        subnet.name,
                        subnet.cidr
                    );
                }
                match used.get(&(net_key.clone(), addr)) {
                    Some(holder) if holder != owner => {
                        problems.push(format!(
                            "fixed IP {} on {} is already reserved by {}",
                            fixed, network.name, holder
                        ));
                        continue;
                    }
                    _ => Some(addr),
                }
            }
            None => match previous {
                Some(addr) if range.allocatable(addr) => Some(addr),
                _ => range.next_free(|a| used.contains_key(&(net_key.clone(), a))),
            },
        };

        let Some(address) = address else {
            problems.push(format!(
                "no free address left in subnet {} of network {}",
                subnet.name, network.name
            ));
            continue;
        };
        if let Some(old) = previous {
            if old != address {
                used.remove(&(net_key.clone(), old));
            }
        }
        used.insert((net_key, address), owner.clone());

        reservations.push(IPReservation {
            network: network.name.clone(),
            subnet: subnet.name.clone(),
            address: Ipv4Addr::from(address).to_string(),
            cidr: subnet.cidr.clone(),
            vlan: subnet.vlan,
            gateway: subnet.gateway.clone(),
            mtu: network.mtu,
            routes: subnet.routes.clone(),
            dns_domain: network.dns_domain.clone(),
        });
    }

    let mut conditions = Conditions::new();
    let ready = problems.is_empty();
    let message = if ready {
        "all addresses reserved".to_string()
    } else {
        problems.join(", ")
    };
    if ready {
        conditions.mark_true(condition::READY, message.clone());
    } else {
        conditions.mark_false(
            condition::READY,
            reason::REQUESTED,
            Severity::Info,
            message.clone(),
        );
    }
    // keep transition times stable across passes
    conditions.restore_last_transition_times(&ip_set.status.conditions);

    Ok(IPSetStatus {
        reservations,
        ready,
        message,
        conditions,
    })
}

fn find_subnet<'a>(subnets: &'a [SubnetDef], net_ref: &NetworkRef) -> Option<&'a SubnetDef> {
    if net_ref.subnet_name.is_empty() {
        return match subnets {
            [only] => Some(only),
            _ => None,
        };
    }
    subnets.iter().find(|s| s.name == net_ref.subnet_name)
}

fn ipv4(addr: &str) -> anyhow::Result<u32> {
    addr.parse::<Ipv4Addr>()
        .map(u32::from)
        .with_context(|| format!("invalid IPv4 address {}", addr))
}

/// Allocation bounds of one subnet as IPv4 integers.
struct SubnetRange {
    network: u32,
    broadcast: u32,
    ranges: Vec<(u32, u32)>,
    excluded: BTreeSet<u32>,
}

impl SubnetRange {
    fn parse(subnet: &SubnetDef) -> anyhow::Result<Self> {
        let (base, prefix) = subnet
            .cidr
            .split_once('/')
            .and_then(|(ip, p)| Some((ip, p.parse::<u32>().ok().filter(|p| *p <= 32)?)))
            .with_context(|| format!("invalid CIDR {}", subnet.cidr))?;
        let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
        let network = ipv4(base)? & mask;
        let broadcast = network | !mask;

        let mut ranges = Vec::new();
        for r in &subnet.allocation_ranges {
            let (start, end) = (ipv4(&r.start)?, ipv4(&r.end)?);
            if start > end {
                bail!("allocation range {}-{} is reversed", r.start, r.end);
            }
            ranges.push((start.max(network), end.min(broadcast)));
        }
        if ranges.is_empty() && broadcast > network + 1 {
            ranges.push((network + 1, broadcast - 1));
        }
        let excluded = subnet
            .exclude_addresses
            .iter()
            .chain(&subnet.gateway)
            .map(|a| ipv4(a))
            .collect::<anyhow::Result<_>>()?;

        Ok(Self {
            network,
            broadcast,
            ranges,
            excluded,
        })
    }

    fn contains(&self, addr: u32) -> bool {
        (self.network..=self.broadcast).contains(&addr)
    }

    fn allocatable(&self, addr: u32) -> bool {
        !self.excluded.contains(&addr)
            && self.ranges.iter().any(|(start, end)| (*start..=*end).contains(&addr))
    }

    fn next_free(&self, taken: impl Fn(u32) -> bool) -> Option<u32> {
        self.ranges.iter().find_map(|(start, end)| {
            (*start..=*end).find(|a| !self.excluded.contains(a) && !taken(*a))
        })
    }
}

/// Prefix length of a reservation's CIDR, as a string.
pub fn cidr_prefix(cidr: &str) -> &str {
    cidr.split_once('/').map(|(_, p)| p).unwrap_or("")
}
