use pkg_constants::state::SHORT_REQUEUE_SECS;
use pkg_types::condition::{
    self, Conditions, DEPLOYMENT_READY, INPUT_READY, NODESET_DEPLOYMENT_READY, SETUP_READY,
    Severity, message, reason,
};
use pkg_types::deployment::{Deployment, DeploymentStatus};
use pkg_types::meta::{Resource, registry_key};
use pkg_types::nodeset::NodeSet;
use pkg_types::service::Service;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::certs::ensure_tls_certs;
use crate::context::{Context, ReconcileResult};
use crate::datasource;
use crate::deployer::{DeployOutcome, Deployer};
use crate::hashes::InputHashes;
use crate::services::dedupe_services;
use crate::version::{container_images, get_version, target_version};

/// Controller that rolls Deployments out across their NodeSets.
///
/// A pass is a pure function of the store: it never blocks on a run, it
/// dispatches what it can, records conditions, and lets the manager come
/// back on the next event or resync. Deployed records are terminal.
pub struct DeploymentController {
    ctx: Context,
}

impl DeploymentController {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    pub async fn reconcile(&self, namespace: &str, name: &str) -> anyhow::Result<ReconcileResult> {
        let registry = &self.ctx.registry;
        let key = registry_key(Deployment::KIND, namespace, name);
        let Some(deployment) = registry.get::<Deployment>(namespace, name).await? else {
            debug!("Deployment {}/{} is gone", namespace, name);
            self.ctx.index.remove_dependent(&key).await;
            return Ok(ReconcileResult::Done);
        };
        if deployment.status.deployed {
            debug!("Deployment {} already deployed", name);
            return Ok(ReconcileResult::Done);
        }

        let previous = deployment.status.clone();
        let mut status = init_status(&deployment);
        let result = self.rollout(&deployment, &mut status).await;

        status.conditions.summarize_ready(message::DEPLOYMENT_READY);
        status
            .conditions
            .restore_last_transition_times(&previous.conditions);
        for (node_set, conditions) in status.node_set_conditions.iter_mut() {
            if let Some(prev) = previous.node_set_conditions.get(node_set) {
                conditions.restore_last_transition_times(prev);
            }
        }

        if status != previous {
            self.ctx.write_status(&deployment, status).await?;
        }
        result
    }

    async fn rollout(
        &self,
        deployment: &Deployment,
        status: &mut DeploymentStatus,
    ) -> anyhow::Result<ReconcileResult> {
        let registry = &self.ctx.registry;
        let namespace = deployment.meta.namespace.as_str();
        let name = deployment.meta.name.as_str();
        let requeue = ReconcileResult::requeue_secs(deployment.spec.deployment_requeue_time);

        // Every NodeSet must exist and be set up before anything is dispatched
        let mut node_sets = Vec::new();
        for ns_name in &deployment.spec.node_sets {
            match registry.get::<NodeSet>(namespace, ns_name).await? {
                Some(ns) => node_sets.push(ns),
                None => {
                    self.register_references(deployment, &node_sets).await?;
                    info!("Deployment {}: NodeSet {} not found, requeueing", name, ns_name);
                    return Ok(requeue);
                }
            }
        }
        self.register_references(deployment, &node_sets).await?;
        for ns in &node_sets {
            if !ns.status.conditions.is_true(SETUP_READY) {
                info!(
                    "Deployment {}: NodeSet {} SetupReady is not true, requeueing",
                    name, ns.meta.name
                );
                return Ok(requeue);
            }
        }

        // Certs first, so runs mount the current bundles
        let mut certs_changed = false;
        for ns in node_sets.iter().filter(|n| n.spec.tls_enabled) {
            for svc_name in self.services_of(deployment, ns) {
                let service = match registry.get_required::<Service>(namespace, svc_name).await {
                    Ok(s) => s,
                    Err(e) => {
                        let msg = format!("Service error occurred {}", e);
                        fail_input(status, &ns.meta.name, &msg);
                        return Err(e);
                    }
                };
                for cert_key in service.spec.tls_certs.keys() {
                    match ensure_tls_certs(registry, ns, &service, cert_key).await {
                        Ok(changed) => certs_changed |= changed,
                        Err(e) => {
                            let msg = format!(
                                "TLS input error occurred {} for service {} on NodeSet {}",
                                e, svc_name, ns.meta.name
                            );
                            fail_input(status, &ns.meta.name, &msg);
                            return Err(e);
                        }
                    }
                }
            }
        }
        if certs_changed {
            info!("Deployment {}: certificates changed, requeueing", name);
            return Ok(ReconcileResult::requeue_secs(SHORT_REQUEUE_SECS));
        }
        status.conditions.mark_true(INPUT_READY, message::INPUT_READY);

        let ssh_keys: BTreeMap<String, String> = node_sets
            .iter()
            .map(|ns| {
                (
                    ns.meta.name.clone(),
                    ns.spec.node_template.ansible_ssh_private_key_secret.clone(),
                )
            })
            .collect();
        let inventories: BTreeMap<String, String> = node_sets
            .iter()
            .map(|ns| (ns.meta.name.clone(), ns.inventory_secret_name()))
            .collect();

        let effective = if deployment.spec.services_override.is_empty() {
            match dedupe_services(registry, namespace, &node_sets).await {
                Ok(lists) => lists,
                Err(e) => {
                    status.conditions.mark_false(
                        DEPLOYMENT_READY,
                        reason::ERROR,
                        Severity::Error,
                        e.to_string(),
                    );
                    return Err(e);
                }
            }
        } else {
            node_sets
                .iter()
                .map(|ns| (ns.meta.name.clone(), deployment.spec.services_override.clone()))
                .collect()
        };

        let version = get_version(registry, namespace).await?;
        let images = container_images(&self.ctx.config, version.as_ref());

        let mut have_error = false;
        let mut backoff_exceeded = false;
        let mut in_progress = false;
        let mut errors = Vec::new();
        for ns in &node_sets {
            status.conditions.mark_false(
                DEPLOYMENT_READY,
                reason::REQUESTED,
                Severity::Info,
                message::DEPLOYMENT_WAITING,
            );
            let services = effective.get(&ns.meta.name).cloned().unwrap_or_default();
            let deployer = Deployer {
                ctx: &self.ctx,
                deployment,
                node_set: ns,
                ssh_keys: &ssh_keys,
                inventories: &inventories,
                images: &images,
            };
            let conditions = status
                .node_set_conditions
                .entry(ns.meta.name.clone())
                .or_insert_with(node_set_conditions);
            let outcome = deployer
                .deploy(&services, conditions, &mut status.container_images)
                .await;
            let mirrored = conditions.mirror(NODESET_DEPLOYMENT_READY);

            match outcome {
                Ok(DeployOutcome::Complete) => {
                    conditions.mark_true(NODESET_DEPLOYMENT_READY, message::NODESET_DEPLOYMENT_READY);
                    status
                        .node_set_hashes
                        .insert(ns.meta.name.clone(), ns.status.config_hash.clone());
                }
                Ok(DeployOutcome::InProgress) => {
                    conditions.set(mirrored);
                    in_progress = true;
                }
                Ok(DeployOutcome::Failed { reason, message }) => {
                    backoff_exceeded |= reason == reason::BACKOFF_LIMIT_EXCEEDED;
                    conditions.set(mirrored);
                    have_error = true;
                    errors.push(format!("nodeSet: {} error: {}", ns.meta.name, message));
                }
                Err(e) => {
                    backoff_exceeded |= mirrored.reason == reason::BACKOFF_LIMIT_EXCEEDED;
                    conditions.set(mirrored);
                    have_error = true;
                    errors.push(format!("nodeSet: {} error: {}", ns.meta.name, e));
                }
            }
        }

        if have_error {
            let joined = errors.join(" & ");
            warn!("Deployment {} failed: {}", name, joined);
            if backoff_exceeded {
                status.conditions.mark_false(
                    DEPLOYMENT_READY,
                    reason::BACKOFF_LIMIT_EXCEEDED,
                    Severity::Error,
                    joined,
                );
            } else {
                status.conditions.mark_false(
                    DEPLOYMENT_READY,
                    reason::ERROR,
                    Severity::Warning,
                    joined,
                );
            }
            return Ok(ReconcileResult::Done);
        }
        if in_progress {
            info!("Deployment {} not yet complete", name);
            return Ok(ReconcileResult::Done);
        }

        info!("Deployment {} complete", name);
        status.conditions.mark_true(DEPLOYMENT_READY, message::DEPLOYMENT_READY);
        status.deployed = true;
        status.deployed_version = target_version(version.as_ref());

        let mut hashes = InputHashes::default();
        for svc_name in self.all_services(deployment, &node_sets) {
            if let Some(service) = registry.get::<Service>(namespace, &svc_name).await? {
                hashes.add_service(registry, &service, &node_sets).await?;
            }
        }
        status.config_map_hashes = hashes.config_maps;
        status.secret_hashes = hashes.secrets;
        Ok(ReconcileResult::Done)
    }

    fn services_of<'a>(&self, deployment: &'a Deployment, node_set: &'a NodeSet) -> &'a [String] {
        if deployment.spec.services_override.is_empty() {
            &node_set.spec.services
        } else {
            &deployment.spec.services_override
        }
    }

    /// Override list, else the sorted union of the NodeSets' lists.
    fn all_services(&self, deployment: &Deployment, node_sets: &[NodeSet]) -> Vec<String> {
        if !deployment.spec.services_override.is_empty() {
            return deployment.spec.services_override.clone();
        }
        let union: BTreeSet<&String> = node_sets.iter().flat_map(|n| &n.spec.services).collect();
        union.into_iter().cloned().collect()
    }

    /// Point the dependency index at the NodeSets and at every data source
    /// of the services this Deployment would run.
    async fn register_references(
        &self,
        deployment: &Deployment,
        node_sets: &[NodeSet],
    ) -> anyhow::Result<()> {
        let namespace = &deployment.meta.namespace;
        let mut keys: Vec<String> = deployment
            .spec
            .node_sets
            .iter()
            .map(|n| registry_key(NodeSet::KIND, namespace, n))
            .collect();
        for svc_name in self.all_services(deployment, node_sets) {
            if let Some(service) = self.ctx.registry.get::<Service>(namespace, &svc_name).await? {
                keys.extend(datasource::reference_keys(namespace, &service.spec.data_sources));
            }
        }
        self.ctx.index.set_references(&deployment.key(), keys).await;
        Ok(())
    }
}

fn node_set_conditions() -> Conditions {
    let mut conditions = Conditions::new();
    conditions.mark_unknown(NODESET_DEPLOYMENT_READY, reason::INIT, message::INIT);
    conditions
}

/// Status a pass starts from: conditions reset, results carried over.
fn init_status(deployment: &Deployment) -> DeploymentStatus {
    let mut status = deployment.status.clone();
    status.conditions = Conditions::init(&[DEPLOYMENT_READY, INPUT_READY]);
    status.node_set_conditions = deployment
        .spec
        .node_sets
        .iter()
        .map(|n| (n.clone(), node_set_conditions()))
        .collect();
    status.deployed = false;
    status.observed_generation = deployment.meta.generation;
    status
}

fn fail_input(status: &mut DeploymentStatus, node_set: &str, msg: &str) {
    status
        .conditions
        .mark_false(INPUT_READY, reason::ERROR, Severity::Error, msg);
    status
        .node_set_conditions
        .entry(node_set.to_string())
        .or_insert_with(node_set_conditions)
        .mark_false(NODESET_DEPLOYMENT_READY, reason::ERROR, Severity::Error, msg);
}

/// Whether `conditions` of one NodeSet show a rollout under way: started,
/// not finished, not failed for good.
pub fn is_running(conditions: &Conditions) -> bool {
    conditions.is_false(NODESET_DEPLOYMENT_READY) && !conditions.is_error(NODESET_DEPLOYMENT_READY)
}

/// Condition type that blocks a NodeSet's rollout: the first service
/// condition that is not True, else the NodeSet condition itself.
pub fn blocking_condition(conditions: &Conditions) -> String {
    conditions
        .iter()
        .find(|c| {
            c.type_ != NODESET_DEPLOYMENT_READY
                && c.type_ != condition::READY
                && !conditions.is_true(&c.type_)
        })
        .map(|c| c.type_.clone())
        .unwrap_or_else(|| NODESET_DEPLOYMENT_READY.to_string())
}
