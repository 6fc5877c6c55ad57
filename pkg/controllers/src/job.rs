//! Automation run lookup, creation and judgement.
//!
//! One run exists per {service, Deployment, NodeSet}, or per
//! {service, Deployment} for services dispatched to every NodeSet.

use anyhow::bail;
use pkg_constants::labels;
use pkg_constants::network::{DNS1123_LABEL_MAX_LENGTH, RUN_NAME_SERVICE_PREFIX_MAX};
use pkg_state::registry::Registry;
use pkg_types::condition::reason;
use pkg_types::job::AutomationRun;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Name of the run. `node_set` is `None` for global services.
pub fn run_name(service: &str, deployment: &str, node_set: Option<&str>) -> String {
    let prefix = truncate(service, RUN_NAME_SERVICE_PREFIX_MAX);
    let mut name = format!("{}-{}", prefix, deployment);
    if let Some(ns) = node_set {
        name = format!("{}-{}", name, ns);
    }
    if name.len() > DNS1123_LABEL_MAX_LENGTH {
        name = truncate(&name, DNS1123_LABEL_MAX_LENGTH)
            .trim_end_matches(&['-', '.'][..])
            .to_string();
    }
    name
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Labels identifying the run. Global runs carry no NodeSet label so one
/// lookup finds them whichever NodeSet dispatches them.
pub fn run_labels(
    service: &str,
    deployment: &str,
    node_set: Option<&str>,
) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    out.insert(labels::RUN_SERVICE.to_string(), service.to_string());
    out.insert(labels::RUN_DEPLOYMENT.to_string(), deployment.to_string());
    if let Some(ns) = node_set {
        out.insert(labels::RUN_NODESET.to_string(), ns.to_string());
    }
    out
}

/// Where a run stands, from the orchestrator's point of view.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Succeeded,
    /// Pending, running, or failed within its retry budget
    Waiting(String),
    Failed { reason: String, message: String },
}

/// Store-backed automation run facade. The runs themselves are executed
/// elsewhere and report back through their status.
#[derive(Clone)]
pub struct RunFacade {
    registry: Registry,
}

impl RunFacade {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// The single run matching `selector`. More than one is an error.
    pub async fn find(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> anyhow::Result<Option<AutomationRun>> {
        let mut runs = self
            .registry
            .list_selected::<AutomationRun>(namespace, selector)
            .await?;
        match runs.len() {
            0 => Ok(None),
            1 => Ok(runs.pop()),
            _ => bail!("multiple AutomationRuns found with label {:?}", selector),
        }
    }

    /// Create `run` unless a run with its labels exists already, in which
    /// case the existing one is returned untouched.
    pub async fn ensure(&self, run: AutomationRun) -> anyhow::Result<AutomationRun> {
        if let Some(existing) = self.find(&run.meta.namespace, &run.meta.labels).await? {
            if existing.is_succeeded() {
                debug!("AutomationRun {} already succeeded", existing.meta.name);
            }
            return Ok(existing);
        }
        info!("Creating AutomationRun {}", run.meta.name);
        self.registry.create(run).await
    }
}

/// Judge a run against its retry budget.
pub fn judge(run: &AutomationRun) -> RunOutcome {
    let name = &run.meta.name;
    let namespace = &run.meta.namespace;
    if run.is_succeeded() {
        return RunOutcome::Succeeded;
    }
    if run.is_exhausted() {
        let reason = if run.status.reason.is_empty()
            && run.status.failed > run.spec.backoff_limit
        {
            reason::BACKOFF_LIMIT_EXCEEDED.to_string()
        } else {
            run.status.reason.clone()
        };
        let message = if reason == reason::BACKOFF_LIMIT_EXCEEDED {
            format!(
                "backoff limit reached for execution.name {} execution.namespace {} execution.condition.message: {}",
                name, namespace, run.status.message
            )
        } else {
            format!(
                "execution.name {} execution.namespace {} failed pods: {}",
                name, namespace, run.status.failed
            )
        };
        return RunOutcome::Failed { reason, message };
    }
    RunOutcome::Waiting(format!(
        "AutomationRun {} is not yet completed: active {}, failed {}",
        name, run.status.active, run.status.failed
    ))
}
