use anyhow::bail;
use pkg_constants::state::{DEFAULT_REQUEUE_SECS, SHORT_REQUEUE_SECS, UPDATE_SERVICE_TYPE};
use pkg_network::Readiness;
use pkg_network::dns::DnsDetails;
use pkg_network::ipam::NodeReservations;
use pkg_types::condition::{
    BAREMETAL_PROVISION_READY, Conditions, DEPLOYMENT_READY, DNS_DATA_READY, INPUT_READY,
    IP_RESERVATION_READY, NODESET_DEPLOYMENT_READY, SETUP_READY, Severity, message, reason,
};
use pkg_types::deployment::Deployment;
use pkg_types::meta::{Resource, registry_key};
use pkg_types::nodeset::{NodeSet, NodeSetStatus};
use pkg_types::secret::Secret;
use pkg_types::service::Service;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::baremetal;
use crate::context::{Context, ReconcileResult};
use crate::datasource;
use crate::hashes::config_hash;
use crate::inventory::generate_inventory;
use crate::services::ensure_services;
use crate::version::{container_images, get_version};

const SSH_PRIVATE_KEY: &str = "ssh-privatekey";
const SSH_AUTHORIZED_KEYS: &str = "authorized_keys";

/// Controller that prepares NodeSets for rollout: addresses, names,
/// hardware and the inventory, then mirrors the outcome of the latest
/// Deployment into `DeploymentReady`.
pub struct NodeSetController {
    ctx: Context,
}

impl NodeSetController {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    pub async fn reconcile(&self, namespace: &str, name: &str) -> anyhow::Result<ReconcileResult> {
        let registry = &self.ctx.registry;
        let key = registry_key(NodeSet::KIND, namespace, name);
        let Some(node_set) = registry.get::<NodeSet>(namespace, name).await? else {
            debug!("NodeSet {}/{} is gone", namespace, name);
            self.ctx.index.remove_dependent(&key).await;
            return Ok(ReconcileResult::Done);
        };
        self.ctx
            .index
            .set_references(&key, reference_keys(&node_set))
            .await;

        let previous = node_set.status.clone();
        let mut status = init_status(&node_set);
        let result = self.prepare(&node_set, &mut status).await;

        status.conditions.summarize_ready(message::NODESET_READY);
        status
            .conditions
            .restore_last_transition_times(&previous.conditions);

        if status != previous {
            self.ctx.write_status(&node_set, status).await?;
        }
        result
    }

    async fn prepare(
        &self,
        node_set: &NodeSet,
        status: &mut NodeSetStatus,
    ) -> anyhow::Result<ReconcileResult> {
        let registry = &self.ctx.registry;
        let namespace = node_set.meta.namespace.as_str();
        let name = node_set.meta.name.as_str();
        let waiting = ReconcileResult::requeue_secs(DEFAULT_REQUEUE_SECS);

        status.conditions.mark_false(
            SETUP_READY,
            reason::REQUESTED,
            Severity::Info,
            message::READY_INIT,
        );

        let hash = config_hash(node_set)?;
        if hash != status.deployed_config_hash {
            status.config_hash = hash;
        }

        if let Err(e) = ensure_services(registry, namespace, &self.ctx.catalog).await {
            status.conditions.mark_false(
                SETUP_READY,
                reason::ERROR,
                Severity::Error,
                format!("NodeSet error occurred {}", e),
            );
            return Err(e);
        }

        let reservations = match self.ensure_addresses(node_set, status).await? {
            Some(r) => r,
            None => return Ok(waiting),
        };
        let dns = match self.ensure_names(node_set, &reservations, status).await? {
            Some(d) => d,
            None => return Ok(waiting),
        };
        status.dns_cluster_addresses = dns.cluster_addresses.clone();
        status.ctlplane_search_domain = dns.ctlplane_search_domain.clone();
        status.all_hostnames = dns.hostnames.clone();
        status.all_ips = dns.ips.clone();

        if let Some(result) = self.verify_ssh_secret(node_set, status).await? {
            return Ok(result);
        }
        status.conditions.mark_true(INPUT_READY, message::INPUT_READY);

        let version = get_version(registry, namespace).await?;
        let images = container_images(&self.ctx.config, version.as_ref());

        if node_set.needs_provisioning() {
            status
                .conditions
                .mark_unknown(BAREMETAL_PROVISION_READY, reason::INIT, reason::INIT);
            match baremetal::ensure_provisioned(registry, node_set, &reservations, &images).await {
                Ok(Readiness::Ready(())) => status
                    .conditions
                    .mark_true(BAREMETAL_PROVISION_READY, message::BAREMETAL_READY),
                Ok(Readiness::Waiting(msg)) => {
                    status.conditions.mark_false(
                        BAREMETAL_PROVISION_READY,
                        reason::REQUESTED,
                        Severity::Info,
                        msg,
                    );
                    return Ok(waiting);
                }
                Err(e) => {
                    status.conditions.mark_false(
                        BAREMETAL_PROVISION_READY,
                        reason::ERROR,
                        Severity::Error,
                        e.to_string(),
                    );
                    return Err(e);
                }
            }
        }

        let check = match self.check_deployments(node_set, status).await {
            Ok(check) => check,
            Err(e) => {
                status.conditions.mark_false(
                    DEPLOYMENT_READY,
                    reason::ERROR,
                    Severity::Error,
                    format!("Deployment error occurred {}", e),
                );
                warn!("NodeSet {}: unable to read Deployments: {}", name, e);
                return Err(e);
            }
        };

        if !matches!(check, DeploymentCheck::Running | DeploymentCheck::Failed { .. }) {
            match generate_inventory(
                registry,
                node_set,
                &reservations,
                &dns.server_addresses,
                &images,
            )
            .await
            {
                Ok(secret) => status.inventory_secret_name = secret,
                Err(e) => {
                    let msg = format!("Unable to generate inventory for {}", name);
                    warn!("{}: {}", msg, e);
                    status.conditions.mark_false(
                        SETUP_READY,
                        reason::ERROR,
                        Severity::Error,
                        format!("NodeSet error occurred {}", msg),
                    );
                    return Err(e);
                }
            }
        }
        status.conditions.mark_true(SETUP_READY, message::SETUP_READY);

        match check {
            DeploymentCheck::Ready => {
                status
                    .conditions
                    .mark_true(DEPLOYMENT_READY, message::DEPLOYMENT_READY);
            }
            DeploymentCheck::Running => {
                info!("NodeSet {}: deployment still running", name);
                status.conditions.mark_false(
                    DEPLOYMENT_READY,
                    reason::REQUESTED,
                    Severity::Info,
                    message::DEPLOYMENT_WAITING,
                );
            }
            DeploymentCheck::Failed { deployment, message } => {
                self.log_failed_runs(namespace, &deployment).await;
                status.conditions.mark_false(
                    DEPLOYMENT_READY,
                    reason::ERROR,
                    Severity::Error,
                    message,
                );
            }
            DeploymentCheck::None => {
                status.conditions.mark_false(
                    DEPLOYMENT_READY,
                    reason::REQUESTED,
                    Severity::Info,
                    "Deployment not started",
                );
            }
        }
        Ok(ReconcileResult::Done)
    }

    async fn ensure_addresses(
        &self,
        node_set: &NodeSet,
        status: &mut NodeSetStatus,
    ) -> anyhow::Result<Option<NodeReservations>> {
        match self.ctx.addresses.ensure_ip_sets(node_set).await {
            Ok(Readiness::Ready(reservations)) => {
                status
                    .conditions
                    .mark_true(IP_RESERVATION_READY, message::IP_RESERVATION_READY);
                Ok(Some(reservations))
            }
            Ok(Readiness::Waiting(msg)) => {
                info!("NodeSet {}: addresses not ready: {}", node_set.meta.name, msg);
                status.conditions.mark_false(
                    IP_RESERVATION_READY,
                    reason::REQUESTED,
                    Severity::Info,
                    message::IP_RESERVATION_WAITING,
                );
                Ok(None)
            }
            Err(e) => {
                status.conditions.mark_false(
                    IP_RESERVATION_READY,
                    reason::ERROR,
                    Severity::Error,
                    format!("NodeSetIPReservationReady error occurred {}", e),
                );
                Err(e)
            }
        }
    }

    async fn ensure_names(
        &self,
        node_set: &NodeSet,
        reservations: &NodeReservations,
        status: &mut NodeSetStatus,
    ) -> anyhow::Result<Option<DnsDetails>> {
        match self.ctx.names.ensure_dns_data(node_set, reservations).await {
            Ok(Readiness::Ready(details)) => {
                status
                    .conditions
                    .mark_true(DNS_DATA_READY, message::DNS_DATA_READY);
                Ok(Some(details))
            }
            Ok(Readiness::Waiting(msg)) => {
                info!("NodeSet {}: name data not ready: {}", node_set.meta.name, msg);
                status.conditions.mark_false(
                    DNS_DATA_READY,
                    reason::REQUESTED,
                    Severity::Info,
                    message::DNS_DATA_WAITING,
                );
                Ok(None)
            }
            Err(e) => {
                status.conditions.mark_false(
                    DNS_DATA_READY,
                    reason::ERROR,
                    Severity::Error,
                    e.to_string(),
                );
                Err(e)
            }
        }
    }

    /// `Some` when the pass has to stop here.
    async fn verify_ssh_secret(
        &self,
        node_set: &NodeSet,
        status: &mut NodeSetStatus,
    ) -> anyhow::Result<Option<ReconcileResult>> {
        let secret_name = &node_set.spec.node_template.ansible_ssh_private_key_secret;
        let Some(secret) = self
            .ctx
            .registry
            .get::<Secret>(&node_set.meta.namespace, secret_name)
            .await?
        else {
            info!(
                "NodeSet {}: waiting for secret {}",
                node_set.meta.name, secret_name
            );
            status.conditions.mark_false(
                INPUT_READY,
                reason::REQUESTED,
                Severity::Info,
                format!("Input data resources missing: secret/{}", secret_name),
            );
            return Ok(Some(ReconcileResult::requeue_secs(SHORT_REQUEUE_SECS)));
        };

        let mut required = vec![SSH_PRIVATE_KEY];
        if !node_set.spec.pre_provisioned {
            required.push(SSH_AUTHORIZED_KEYS);
        }
        if let Some(missing) = required.iter().find(|k| !secret.data.contains_key(**k)) {
            let msg = format!("field {} not found in Secret {}", missing, secret_name);
            status
                .conditions
                .mark_false(INPUT_READY, reason::REQUESTED, Severity::Error, msg.clone());
            bail!(msg);
        }
        Ok(None)
    }

    /// Fold every Deployment of this NodeSet, oldest first, into `status`.
    async fn check_deployments(
        &self,
        node_set: &NodeSet,
        status: &mut NodeSetStatus,
    ) -> anyhow::Result<DeploymentCheck> {
        let registry = &self.ctx.registry;
        let namespace = &node_set.meta.namespace;
        let name = &node_set.meta.name;
        let mut deployments: Vec<Deployment> = registry
            .list::<Deployment>(namespace)
            .await?
            .into_iter()
            .filter(|d| d.references(name))
            .collect();
        deployments.sort_by(oldest_first);

        let mut check = DeploymentCheck::None;
        for deployment in &deployments {
            let conditions = deployment
                .status
                .node_set_conditions
                .get(name)
                .cloned()
                .unwrap_or_default();
            status
                .deployment_statuses
                .insert(deployment.meta.name.clone(), conditions.clone());

            if conditions.is_error(NODESET_DEPLOYMENT_READY) {
                let message = conditions
                    .get(NODESET_DEPLOYMENT_READY)
                    .map(|c| c.message.clone())
                    .unwrap_or_default();
                return Ok(DeploymentCheck::Failed {
                    deployment: deployment.meta.name.clone(),
                    message,
                });
            } else if conditions.is_false(NODESET_DEPLOYMENT_READY) {
                check = DeploymentCheck::Running;
            } else if conditions.is_true(NODESET_DEPLOYMENT_READY) {
                let rolled_out = deployment.status.node_set_hashes.get(name);
                if rolled_out != Some(&status.config_hash) {
                    check = DeploymentCheck::None;
                    continue;
                }
                check = DeploymentCheck::Ready;
                status
                    .config_map_hashes
                    .extend(deployment.status.config_map_hashes.clone());
                status
                    .secret_hashes
                    .extend(deployment.status.secret_hashes.clone());
                status
                    .container_images
                    .extend(deployment.status.container_images.clone());
                status.deployed_config_hash = status.config_hash.clone();

                let services = if deployment.spec.services_override.is_empty() {
                    &node_set.spec.services
                } else {
                    &deployment.spec.services_override
                };
                for svc_name in services {
                    let service = registry.get_required::<Service>(namespace, svc_name).await?;
                    if service.service_type() == UPDATE_SERVICE_TYPE {
                        status.deployed_version = deployment.status.deployed_version.clone();
                    }
                }
            } else {
                check = DeploymentCheck::None;
            }
        }
        Ok(check)
    }

    async fn log_failed_runs(&self, namespace: &str, deployment: &str) {
        let mut selector = BTreeMap::new();
        selector.insert(
            pkg_constants::labels::RUN_DEPLOYMENT.to_string(),
            deployment.to_string(),
        );
        match self
            .ctx
            .registry
            .list_selected::<pkg_types::job::AutomationRun>(namespace, &selector)
            .await
        {
            Ok(runs) => {
                for run in runs.iter().filter(|r| r.is_exhausted()) {
                    info!(
                        "AutomationRun {} failed due to {} with message: {}",
                        run.meta.name, run.status.reason, run.status.message
                    );
                }
            }
            Err(e) => warn!("Unable to list AutomationRuns for diagnostics: {}", e),
        }
    }
}

/// Outcome of the Deployments touching one NodeSet.
#[derive(Debug, Clone, PartialEq)]
enum DeploymentCheck {
    None,
    Ready,
    Running,
    Failed { deployment: String, message: String },
}

/// Deployments ordered by when their `DeploymentReady` last moved. Ones
/// without the condition are newest; ties fall back to creation time, then
/// name.
pub fn oldest_first(a: &Deployment, b: &Deployment) -> Ordering {
    let a_time = a
        .status
        .conditions
        .get(DEPLOYMENT_READY)
        .map(|c| c.last_transition_time);
    let b_time = b
        .status
        .conditions
        .get(DEPLOYMENT_READY)
        .map(|c| c.last_transition_time);
    let by_time = match (a_time, b_time) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_time
        .then_with(|| a.meta.created_at.cmp(&b.meta.created_at))
        .then_with(|| a.meta.name.cmp(&b.meta.name))
}

/// Status a pass starts from: conditions reset, results carried over.
fn init_status(node_set: &NodeSet) -> NodeSetStatus {
    let mut status = node_set.status.clone();
    let mut types = vec![
        DEPLOYMENT_READY,
        INPUT_READY,
        SETUP_READY,
        IP_RESERVATION_READY,
        DNS_DATA_READY,
    ];
    if node_set.needs_provisioning() {
        types.push(BAREMETAL_PROVISION_READY);
    }
    status.conditions = Conditions::init(&types);
    status.deployment_statuses = BTreeMap::new();
    status.observed_generation = node_set.meta.generation;
    status
}

/// Keys of the Secrets and ConfigMaps whose change re-triggers the NodeSet.
pub fn reference_keys(node_set: &NodeSet) -> Vec<String> {
    let namespace = &node_set.meta.namespace;
    let template = &node_set.spec.node_template;
    let mut keys = Vec::new();
    if !template.ansible_ssh_private_key_secret.is_empty() {
        keys.push(registry_key(
            Secret::KIND,
            namespace,
            &template.ansible_ssh_private_key_secret,
        ));
    }
    keys.extend(datasource::reference_keys(
        namespace,
        &template.ansible.ansible_vars_from,
    ));
    for node in node_set.spec.nodes.values() {
        keys.extend(datasource::reference_keys(
            namespace,
            &node.ansible.ansible_vars_from,
        ));
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use pkg_constants::labels;
    use pkg_state::registry::Registry;
    use pkg_types::config::OperatorConfig;
    use pkg_types::deployment::DeploymentSpec;
    use pkg_types::network::{
        AllocationRange, DNSMasq, DNSMasqStatus, NetConfig, NetConfigSpec, NetworkDef, SubnetDef,
    };
    use pkg_types::nodeset::{NetworkRef, NodeSection, NodeSetSpec};
    use pkg_types::service::ServiceSpec;
    use std::sync::Arc;

    async fn make_context() -> Context {
        let registry = Registry::in_memory().await.unwrap();
        let catalog = vec![Service::new(
            "",
            "bootstrap",
            ServiceSpec {
                playbook: "osp.edpm.bootstrap".into(),
                ..Default::default()
            },
        )];
        Context::new(registry, Arc::new(OperatorConfig::default()), catalog)
    }

    async fn add_network(ctx: &Context) {
        ctx.registry
            .create(NetConfig {
                meta: pkg_types::meta::ObjectMeta::new("openstack", "netconfig"),
                spec: NetConfigSpec {
                    networks: vec![NetworkDef {
                        name: "ctlplane".into(),
                        dns_domain: "ctlplane.example.com".into(),
                        mtu: 1500,
                        subnets: vec![SubnetDef {
                            name: "subnet1".into(),
                            cidr: "192.168.122.0/24".into(),
                            gateway: Some("192.168.122.1".into()),
                            allocation_ranges: vec![AllocationRange {
                                start: "192.168.122.100".into(),
                                end: "192.168.122.250".into(),
                            }],
                            ..Default::default()
                        }],
                    }],
                },
            })
            .await
            .unwrap();
        ctx.registry
            .create(DNSMasq {
                meta: pkg_types::meta::ObjectMeta::new("openstack", "dns"),
                status: DNSMasqStatus {
                    ready: true,
                    dns_addresses: vec!["192.168.122.80".into()],
                    dns_cluster_addresses: vec!["172.30.0.10".into()],
                },
            })
            .await
            .unwrap();
    }

    async fn add_ssh_secret(ctx: &Context) {
        let mut secret = Secret::new("openstack", "dataplane-ssh");
        secret.data.insert(SSH_PRIVATE_KEY.into(), "key".into());
        ctx.registry.create(secret).await.unwrap();
    }

    fn make_nodeset() -> NodeSet {
        let mut spec = NodeSetSpec::default();
        spec.pre_provisioned = true;
        spec.tls_enabled = false;
        spec.services = vec!["bootstrap".into()];
        spec.node_template.ansible_ssh_private_key_secret = "dataplane-ssh".into();
        spec.node_template.networks = vec![NetworkRef {
            name: "ctlplane".into(),
            subnet_name: "subnet1".into(),
            default_route: true,
            fixed_ip: None,
        }];
        spec.nodes
            .insert("edpm-compute-0".into(), NodeSection::default());
        NodeSet::new("openstack", "compute", spec)
    }

    async fn get(ctx: &Context) -> NodeSet {
        ctx.registry
            .get_required::<NodeSet>("openstack", "compute")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_waits_for_network_config() {
        let ctx = make_context().await;
        ctx.registry.create(make_nodeset()).await.unwrap();
        let controller = NodeSetController::new(ctx.clone());

        let result = controller.reconcile("openstack", "compute").await.unwrap();
        assert_eq!(result, ReconcileResult::requeue_secs(DEFAULT_REQUEUE_SECS));
        let ns = get(&ctx).await;
        assert!(ns.status.conditions.is_false(IP_RESERVATION_READY));
        assert!(!ns.status.conditions.is_true(SETUP_READY));
        assert!(!ns.status.config_hash.is_empty());
        // catalog was installed before anything else
        assert!(
            ctx.registry
                .get::<Service>("openstack", "bootstrap")
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_waits_for_ssh_secret() {
        let ctx = make_context().await;
        add_network(&ctx).await;
        ctx.registry.create(make_nodeset()).await.unwrap();
        let controller = NodeSetController::new(ctx.clone());

        let result = controller.reconcile("openstack", "compute").await.unwrap();
        assert_eq!(result, ReconcileResult::requeue_secs(SHORT_REQUEUE_SECS));
        let ns = get(&ctx).await;
        assert!(ns.status.conditions.is_true(IP_RESERVATION_READY));
        assert!(ns.status.conditions.is_true(DNS_DATA_READY));
        assert!(ns.status.conditions.is_false(INPUT_READY));
        assert_eq!(
            ns.status.all_ips["edpm-compute-0"]["ctlplane"],
            "192.168.122.100"
        );
    }

    #[tokio::test]
    async fn test_setup_completes_and_is_stable() {
        let ctx = make_context().await;
        add_network(&ctx).await;
        add_ssh_secret(&ctx).await;
        ctx.registry.create(make_nodeset()).await.unwrap();
        let controller = NodeSetController::new(ctx.clone());

        controller.reconcile("openstack", "compute").await.unwrap();
        let ns = get(&ctx).await;
        assert!(ns.status.conditions.is_true(SETUP_READY));
        assert!(ns.status.conditions.is_false(DEPLOYMENT_READY));
        assert!(!ns.status.conditions.is_true(pkg_types::condition::READY));
        assert_eq!(ns.status.inventory_secret_name, "dataplanenodeset-compute");
        let inventory = ctx
            .registry
            .get_required::<Secret>("openstack", "dataplanenodeset-compute")
            .await
            .unwrap();
        assert_eq!(inventory.meta.labels[labels::INVENTORY], "true");

        let hash = ns.status.config_hash.clone();
        controller.reconcile("openstack", "compute").await.unwrap();
        let again = get(&ctx).await;
        assert_eq!(again.status.config_hash, hash);
        assert_eq!(again.meta.resource_version, ns.meta.resource_version);
    }

    #[tokio::test]
    async fn test_follows_successful_deployment() {
        let ctx = make_context().await;
        add_network(&ctx).await;
        add_ssh_secret(&ctx).await;
        ctx.registry.create(make_nodeset()).await.unwrap();
        let controller = NodeSetController::new(ctx.clone());
        controller.reconcile("openstack", "compute").await.unwrap();
        let hash = get(&ctx).await.status.config_hash;

        let mut deployment = Deployment::new(
            "openstack",
            "edpm",
            DeploymentSpec {
                node_sets: vec!["compute".into()],
                ..Default::default()
            },
        );
        let mut conditions = Conditions::new();
        conditions.mark_true(NODESET_DEPLOYMENT_READY, "done");
        deployment
            .status
            .node_set_conditions
            .insert("compute".into(), conditions);
        deployment
            .status
            .node_set_hashes
            .insert("compute".into(), hash.clone());
        deployment
            .status
            .container_images
            .insert("ovnControllerImage".into(), "ovn:2".into());
        ctx.registry.create(deployment).await.unwrap();

        controller.reconcile("openstack", "compute").await.unwrap();
        let ns = get(&ctx).await;
        assert!(ns.status.conditions.is_true(DEPLOYMENT_READY));
        assert!(ns.status.conditions.is_true(pkg_types::condition::READY));
        assert_eq!(ns.status.deployed_config_hash, hash);
        assert_eq!(ns.status.container_images["ovnControllerImage"], "ovn:2");
        assert!(ns.status.deployment_statuses.contains_key("edpm"));

        // a template change makes the NodeSet stale again
        ctx.registry
            .create_or_patch(ns.clone(), |n: &mut NodeSet| {
                n.spec.node_template.ansible.ansible_user = "admin".into();
            })
            .await
            .unwrap();
        controller.reconcile("openstack", "compute").await.unwrap();
        let ns = get(&ctx).await;
        assert_ne!(ns.status.config_hash, ns.status.deployed_config_hash);
        assert!(!ns.status.conditions.is_true(DEPLOYMENT_READY));
    }

    #[tokio::test]
    async fn test_failed_deployment_surfaces_error() {
        let ctx = make_context().await;
        add_network(&ctx).await;
        add_ssh_secret(&ctx).await;
        ctx.registry.create(make_nodeset()).await.unwrap();

        let mut deployment = Deployment::new(
            "openstack",
            "edpm",
            DeploymentSpec {
                node_sets: vec!["compute".into()],
                ..Default::default()
            },
        );
        let mut conditions = Conditions::new();
        conditions.mark_false(
            NODESET_DEPLOYMENT_READY,
            reason::BACKOFF_LIMIT_EXCEEDED,
            Severity::Error,
            "backoff limit reached",
        );
        deployment
            .status
            .node_set_conditions
            .insert("compute".into(), conditions);
        ctx.registry.create(deployment).await.unwrap();

        let controller = NodeSetController::new(ctx.clone());
        controller.reconcile("openstack", "compute").await.unwrap();
        let ns = get(&ctx).await;
        let ready = ns.status.conditions.get(DEPLOYMENT_READY).unwrap();
        assert!(ready.is_error());
        assert_eq!(ready.message, "backoff limit reached");
        // inventory is left alone while a deployment failed
        assert!(ns.status.inventory_secret_name.is_empty());
    }

    #[test]
    fn test_deployment_ordering() {
        let now = Utc::now();
        let mut old = Deployment::new("openstack", "b-old", DeploymentSpec::default());
        old.status
            .conditions
            .mark_true(DEPLOYMENT_READY, "done");
        let mut ready = old.status.conditions.get(DEPLOYMENT_READY).unwrap().clone();
        ready.last_transition_time = now - Duration::minutes(10);
        old.status.conditions.set(ready);

        let mut new = Deployment::new("openstack", "a-new", DeploymentSpec::default());
        new.status.conditions.mark_true(DEPLOYMENT_READY, "done");

        let mut absent_early = Deployment::new("openstack", "z", DeploymentSpec::default());
        absent_early.meta.created_at = Some(now - Duration::hours(1));
        let mut absent_late = Deployment::new("openstack", "y", DeploymentSpec::default());
        absent_late.meta.created_at = Some(now);

        let mut list = vec![
            absent_late.clone(),
            new.clone(),
            absent_early.clone(),
            old.clone(),
        ];
        list.sort_by(oldest_first);
        let names: Vec<&str> = list.iter().map(|d| d.meta.name.as_str()).collect();
        assert_eq!(names, vec!["b-old", "a-new", "z", "y"]);
    }

    #[test]
    fn test_reference_keys() {
        let mut ns = make_nodeset();
        ns.spec.node_template.ansible.ansible_vars_from = vec![pkg_types::nodeset::DataSource {
            prefix: String::new(),
            config_map_ref: Some(pkg_types::nodeset::SourceRef {
                name: "vars".into(),
                optional: false,
            }),
            secret_ref: None,
        }];
        let keys = reference_keys(&ns);
        assert_eq!(
            keys,
            vec![
                "/registry/secrets/openstack/dataplane-ssh".to_string(),
                "/registry/configmaps/openstack/vars".to_string(),
            ]
        );
    }
}
