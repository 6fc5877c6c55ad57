//! Rollout of one NodeSet's services on behalf of a Deployment.

use pkg_constants::images::RUNNER_IMAGE_FIELD;
use pkg_types::condition::{self, Conditions, Severity, reason};
use pkg_types::deployment::Deployment;
use pkg_types::job::{AutomationRun, AutomationRunSpec};
use pkg_types::meta::ObjectMeta;
use pkg_types::nodeset::NodeSet;
use pkg_types::service::Service;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::context::Context;
use crate::job::{RunFacade, RunOutcome, judge, run_labels, run_name};
use crate::mounts::{self, RunMounts};

/// Where one NodeSet's rollout stands after a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum DeployOutcome {
    /// Every service succeeded
    Complete,
    /// A service is still running; later services were not looked at
    InProgress,
    /// A service failed for good
    Failed { reason: String, message: String },
}

fn ready_message(service: &str) -> String {
    format!("Deployment ready for {} service", service)
}

fn waiting_message(service: &str) -> String {
    format!("Deployment not yet ready for {} service", service)
}

fn error_message(service: &str, err: &str) -> String {
    format!("Deployment error occurred in {} service error {}", service, err)
}

/// Dispatches and polls the runs of one NodeSet within one Deployment.
pub struct Deployer<'a> {
    pub ctx: &'a Context,
    pub deployment: &'a Deployment,
    pub node_set: &'a NodeSet,
    /// NodeSet name → SSH key secret, for every NodeSet of the Deployment
    pub ssh_keys: &'a BTreeMap<String, String>,
    /// NodeSet name → inventory secret, for every NodeSet of the Deployment
    pub inventories: &'a BTreeMap<String, String>,
    /// Resolved image map (defaults overlaid with the release version)
    pub images: &'a BTreeMap<String, String>,
}

impl<'a> Deployer<'a> {
    fn runs(&self) -> RunFacade {
        RunFacade::new(self.ctx.registry.clone())
    }

    /// Walk `services` in order, stopping at the first one that has not
    /// succeeded. Service conditions are written into `conditions`; image
    /// fields of succeeded services are copied into `container_images`.
    pub async fn deploy(
        &self,
        services: &[String],
        conditions: &mut Conditions,
        container_images: &mut BTreeMap<String, String>,
    ) -> anyhow::Result<DeployOutcome> {
        let namespace = &self.deployment.meta.namespace;
        for name in services {
            let cond_type = condition::service_deployment_ready(name);
            info!(
                "Deployment {}: deploying service {} on NodeSet {}",
                self.deployment.meta.name, name, self.node_set.meta.name
            );

            let prepared = match self.ctx.registry.get_required::<Service>(namespace, name).await {
                Ok(service) => match self.build_run(&service, services).await {
                    Ok(run) => Ok((service, run)),
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            };
            let (service, run) = match prepared {
                Ok(p) => p,
                Err(e) => {
                    conditions.mark_false(
                        &cond_type,
                        reason::ERROR,
                        Severity::Error,
                        error_message(name, &e.to_string()),
                    );
                    return Err(e);
                }
            };

            match self.conditional_deploy(&cond_type, name, run, conditions).await? {
                RunOutcome::Succeeded => {
                    debug!("Condition {} ready", cond_type);
                    for field in &service.spec.container_image_fields {
                        if let Some(image) = self.images.get(field) {
                            container_images.insert(field.clone(), image.clone());
                        }
                    }
                }
                RunOutcome::Waiting(_) => {
                    info!("Condition {} not ready", cond_type);
                    return Ok(DeployOutcome::InProgress);
                }
                RunOutcome::Failed { reason, message } => {
                    return Ok(DeployOutcome::Failed { reason, message });
                }
            }
        }
        Ok(DeployOutcome::Complete)
    }

    /// Make sure the run exists, then fold its state into `cond_type`.
    pub async fn conditional_deploy(
        &self,
        cond_type: &str,
        service: &str,
        run: AutomationRun,
        conditions: &mut Conditions,
    ) -> anyhow::Result<RunOutcome> {
        let run = match self.runs().ensure(run).await {
            Ok(run) => run,
            Err(e) => {
                conditions.mark_false(
                    cond_type,
                    reason::ERROR,
                    Severity::Error,
                    error_message(service, &e.to_string()),
                );
                return Err(e);
            }
        };

        let outcome = judge(&run);
        match &outcome {
            RunOutcome::Succeeded => conditions.mark_true(cond_type, ready_message(service)),
            RunOutcome::Waiting(detail) => {
                debug!("{}", detail);
                conditions.mark_false(
                    cond_type,
                    reason::REQUESTED,
                    Severity::Info,
                    waiting_message(service),
                );
            }
            RunOutcome::Failed { reason, message } => {
                info!("Condition {} error", cond_type);
                conditions.mark_false(
                    cond_type,
                    reason,
                    Severity::Error,
                    error_message(service, message),
                );
            }
        }
        Ok(outcome)
    }

    /// The run dispatching `service` for this NodeSet (or for every NodeSet
    /// when the service is global). `services` is the NodeSet's whole list,
    /// used for cert mounts.
    pub async fn build_run(&self, service: &Service, services: &[String]) -> anyhow::Result<AutomationRun> {
        let registry = &self.ctx.registry;
        let global = service.is_global();
        let target = if global {
            None
        } else {
            Some(self.node_set.meta.name.as_str())
        };
        let spec = &self.deployment.spec;

        let mut mounts = mounts::access_mounts(
            &self.node_set.meta.name,
            global,
            self.ssh_keys,
            self.inventories,
        );
        mounts.extend(mounts::data_source_mounts(registry, service).await?);
        if service.spec.add_cert_mounts {
            mounts.extend(mounts::cert_mounts(registry, self.node_set, services).await?);
        } else if !service.spec.ca_certs.is_empty() {
            mounts.extend(mounts::ca_cert_mount(registry, service).await?);
        }
        let RunMounts { volumes, mounts } = mounts;

        let mut extra_vars: BTreeMap<String, Value> = spec.ansible_extra_vars.clone();
        extra_vars.insert(
            "edpm_override_hosts".into(),
            json!(target.unwrap_or("all")),
        );
        extra_vars.insert("edpm_service_type".into(), json!(service.service_type()));
        if !spec.services_override.is_empty() {
            extra_vars.insert(
                "edpm_services_override".into(),
                json!(spec.services_override),
            );
        }

        let name = run_name(&service.meta.name, &self.deployment.meta.name, target);
        let labels = run_labels(&service.meta.name, &self.deployment.meta.name, target);
        Ok(AutomationRun {
            meta: ObjectMeta::new(&self.deployment.meta.namespace, &name)
                .with_labels(labels)
                .owned_by(self.deployment),
            spec: AutomationRunSpec {
                image: self.runner_image(service),
                playbook: service.spec.playbook.clone(),
                playbook_contents: service.spec.playbook_contents.clone(),
                role: service.spec.role.clone(),
                cmd_line: cmd_line(
                    &spec.ansible_tags,
                    &spec.ansible_limit,
                    &spec.ansible_skip_tags,
                ),
                extra_vars,
                volumes,
                mounts,
                backoff_limit: spec.backoff_limit,
                preserve_jobs: spec.preserve_jobs,
                service_account_name: String::new(),
            },
            status: Default::default(),
        })
    }

    /// Service override, else the resolved runner image.
    fn runner_image(&self, service: &Service) -> String {
        if !service.spec.openstack_ansible_ee_image.is_empty() {
            return service.spec.openstack_ansible_ee_image.clone();
        }
        self.images
            .get(RUNNER_IMAGE_FIELD)
            .cloned()
            .or_else(|| {
                self.ctx
                    .config
                    .default_image(RUNNER_IMAGE_FIELD)
                    .map(str::to_string)
            })
            .unwrap_or_default()
    }
}

/// Runner arguments from the non-empty automation filters.
pub fn cmd_line(tags: &str, limit: &str, skip_tags: &str) -> String {
    let mut parts = Vec::new();
    if !tags.is_empty() {
        parts.push(format!("--tags {}", tags));
    }
    if !limit.is_empty() {
        parts.push(format!("--limit {}", limit));
    }
    if !skip_tags.is_empty() {
        parts.push(format!("--skip-tags {}", skip_tags));
    }
    parts.join(" ")
}
