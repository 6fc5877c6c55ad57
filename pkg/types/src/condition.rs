//! Condition vocabulary shared by NodeSets and Deployments.
//!
//! A [`Conditions`] set is an ordered map keyed by condition type, so
//! iteration, serialization and readiness summaries are reproducible.
//! The aggregate [`READY`] condition mirrors the worst of the others.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// --- Condition types ---

pub const READY: &str = "Ready";
pub const DEPLOYMENT_READY: &str = "DeploymentReady";
pub const INPUT_READY: &str = "InputReady";
pub const SETUP_READY: &str = "SetupReady";
pub const IP_RESERVATION_READY: &str = "NodeSetIPReservationReady";
pub const DNS_DATA_READY: &str = "NodeSetDNSDataReady";
pub const BAREMETAL_PROVISION_READY: &str = "NodeSetBaremetalProvisionReady";
pub const NODESET_DEPLOYMENT_READY: &str = "NodeSetDeploymentReady";

/// Condition reasons.
pub mod reason {
    pub const INIT: &str = "Init";
    pub const REQUESTED: &str = "Requested";
    pub const READY: &str = "Ready";
    pub const ERROR: &str = "Error";
    pub const BACKOFF_LIMIT_EXCEEDED: &str = "BackoffLimitExceeded";
}

/// Condition messages.
pub mod message {
    pub const INIT: &str = "not started";
    pub const READY_INIT: &str = "Setup started";
    pub const NODESET_READY: &str = "NodeSet Ready";
    pub const DEPLOYMENT_READY: &str = "Deployment completed";
    pub const DEPLOYMENT_WAITING: &str = "Deployment in progress";
    pub const NODESET_DEPLOYMENT_READY: &str = "Deployment ready for NodeSet";
    pub const SETUP_READY: &str = "Setup complete";
    pub const INPUT_READY: &str = "Input data complete";
    pub const IP_RESERVATION_READY: &str = "NodeSetIPReservationReady ready";
    pub const IP_RESERVATION_WAITING: &str = "NodeSetIPReservationReady not yet ready";
    pub const DNS_DATA_READY: &str = "NodeSetDNSDataReady ready";
    pub const DNS_DATA_WAITING: &str = "NodeSetDNSDataReady not yet ready";
    pub const DNS_DATA_MULTIPLE_DNSMASQ: &str =
        "NodeSet DNSData error occurred. Multiple DNSMasq resources exist.";
    pub const BAREMETAL_READY: &str = "NodeSetBaremetalProvisionReady ready";
    pub const BAREMETAL_WAITING: &str = "NodeSetBaremetalProvisionReady not yet ready";
}

/// Condition type tracking one service's rollout, e.g. `ServiceRepoSetupDeploymentReady`.
pub fn service_deployment_ready(service: &str) -> String {
    format!("Service{}DeploymentReady", to_camel(service))
}

fn to_camel(s: &str) -> String {
    s.split(|c: char| c == '-' || c == '_' || c == '.' || c == ' ')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

// --- Condition ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

/// Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(
        type_: &str,
        status: ConditionStatus,
        reason: &str,
        severity: Option<Severity>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.to_string(),
            status,
            reason: reason.to_string(),
            severity,
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == ConditionStatus::False && self.severity == Some(Severity::Error)
    }

    fn same_state(&self, other: &Condition) -> bool {
        self.status == other.status && self.reason == other.reason
    }

    /// Lower ranks are worse.
    fn rank(&self) -> u8 {
        match (self.status, self.severity) {
            (ConditionStatus::False, Some(Severity::Error)) => 0,
            (ConditionStatus::False, Some(Severity::Warning)) => 1,
            (ConditionStatus::False, _) => 2,
            (ConditionStatus::Unknown, _) => 3,
            (ConditionStatus::True, _) => 4,
        }
    }
}

// --- Conditions ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conditions(BTreeMap<String, Condition>);

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh set with `Ready` and every type in `types` reset to Unknown.
    pub fn init(types: &[&str]) -> Self {
        let mut conditions = Self::new();
        conditions.set(Condition::new(
            READY,
            ConditionStatus::Unknown,
            reason::INIT,
            None,
            message::READY_INIT,
        ));
        for t in types {
            conditions.set(Condition::new(
                t,
                ConditionStatus::Unknown,
                reason::INIT,
                None,
                message::INIT,
            ));
        }
        conditions
    }

    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.0.get(type_)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.values()
    }

    /// Insert or replace a condition. The existing transition time is kept
    /// when neither status nor reason changed.
    pub fn set(&mut self, mut condition: Condition) {
        if let Some(existing) = self.0.get(&condition.type_) {
            if existing.same_state(&condition) {
                condition.last_transition_time = existing.last_transition_time;
            }
        }
        self.0.insert(condition.type_.clone(), condition);
    }

    pub fn mark_true(&mut self, type_: &str, message: impl Into<String>) {
        self.set(Condition::new(
            type_,
            ConditionStatus::True,
            reason::READY,
            None,
            message,
        ));
    }

    pub fn mark_false(
        &mut self,
        type_: &str,
        reason: &str,
        severity: Severity,
        message: impl Into<String>,
    ) {
        self.set(Condition::new(
            type_,
            ConditionStatus::False,
            reason,
            Some(severity),
            message,
        ));
    }

    pub fn mark_unknown(&mut self, type_: &str, reason: &str, message: impl Into<String>) {
        self.set(Condition::new(
            type_,
            ConditionStatus::Unknown,
            reason,
            None,
            message,
        ));
    }

    pub fn is_true(&self, type_: &str) -> bool {
        self.status_of(type_) == ConditionStatus::True
    }

    pub fn is_false(&self, type_: &str) -> bool {
        self.status_of(type_) == ConditionStatus::False
    }

    /// Absent conditions count as Unknown.
    pub fn is_unknown(&self, type_: &str) -> bool {
        self.status_of(type_) == ConditionStatus::Unknown
    }

    pub fn is_error(&self, type_: &str) -> bool {
        self.get(type_).map(Condition::is_error).unwrap_or(false)
    }

    fn status_of(&self, type_: &str) -> ConditionStatus {
        self.get(type_)
            .map(|c| c.status)
            .unwrap_or(ConditionStatus::Unknown)
    }

    /// True when every condition except `Ready` is True.
    pub fn all_sub_conditions_true(&self) -> bool {
        self.0
            .values()
            .filter(|c| c.type_ != READY)
            .all(|c| c.status == ConditionStatus::True)
    }

    /// Summarise every condition except `Ready` under `target`: the worst
    /// sub-condition wins, ties going to the first type in sorted order.
    pub fn mirror(&self, target: &str) -> Condition {
        let worst = self
            .0
            .values()
            .filter(|c| c.type_ != READY && c.type_ != target)
            .min_by_key(|c| c.rank());
        match worst {
            Some(c) => Condition {
                type_: target.to_string(),
                ..c.clone()
            },
            None => Condition::new(
                target,
                ConditionStatus::Unknown,
                reason::INIT,
                None,
                message::READY_INIT,
            ),
        }
    }

    /// Set `Ready` from the sub-conditions.
    pub fn summarize_ready(&mut self, ready_message: &str) {
        if self.all_sub_conditions_true() {
            self.mark_true(READY, ready_message);
        } else {
            let mirrored = self.mirror(READY);
            self.set(mirrored);
        }
    }

    /// Copy transition times from `previous` for conditions whose status and
    /// reason did not change.
    pub fn restore_last_transition_times(&mut self, previous: &Conditions) {
        for (type_, condition) in self.0.iter_mut() {
            if let Some(prev) = previous.get(type_) {
                if prev.same_state(condition) {
                    condition.last_transition_time = prev.last_transition_time;
                }
            }
        }
    }
}
