use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::meta::{ObjectMeta, impl_resource};
use crate::volume::{Volume, VolumeMount};

// --- Run status ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum RunCondition {
    #[default]
    Running,
    Complete,
    Failed,
}

impl std::fmt::Display for RunCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunCondition::Running => write!(f, "Running"),
            RunCondition::Complete => write!(f, "Complete"),
            RunCondition::Failed => write!(f, "Failed"),
        }
    }
}

/// Reported by the external executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutomationRunStatus {
    #[serde(default)]
    pub active: u32,
    #[serde(default)]
    pub succeeded: u32,
    #[serde(default)]
    pub failed: u32,
    #[serde(default)]
    pub condition: RunCondition,
    /// Reason of the terminal condition, e.g. `BackoffLimitExceeded`
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completion_time: Option<DateTime<Utc>>,
}

// --- Run spec ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutomationRunSpec {
    pub image: String,
    #[serde(default)]
    pub playbook: String,
    #[serde(default)]
    pub playbook_contents: String,
    #[serde(default)]
    pub role: String,
    /// Extra runner arguments (`--tags`, `--limit`, `--skip-tags`)
    #[serde(default)]
    pub cmd_line: String,
    #[serde(default)]
    pub extra_vars: BTreeMap<String, Value>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default)]
    pub mounts: Vec<VolumeMount>,
    /// Max failures before the run is Failed
    #[serde(default = "default_backoff_limit")]
    pub backoff_limit: u32,
    /// Keep finished runs around for inspection
    #[serde(default)]
    pub preserve_jobs: bool,
    #[serde(default)]
    pub service_account_name: String,
}

fn default_backoff_limit() -> u32 {
    pkg_constants::state::DEFAULT_BACKOFF_LIMIT
}

// --- Automation run ---

/// One execution of a service against a NodeSet, or against every NodeSet
/// of a Deployment for global services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationRun {
    #[serde(rename = "metadata")]
    pub meta: ObjectMeta,
    pub spec: AutomationRunSpec,
    #[serde(default)]
    pub status: AutomationRunStatus,
}

impl_resource!(AutomationRun, "automationruns", AutomationRunStatus);

impl AutomationRun {
    pub fn is_succeeded(&self) -> bool {
        self.status.succeeded > 0 || self.status.condition == RunCondition::Complete
    }

    /// Failed attempts went past the retry budget, or the executor gave up.
    pub fn is_exhausted(&self) -> bool {
        self.status.failed > self.spec.backoff_limit
            || self.status.condition == RunCondition::Failed
    }
}
