use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::meta::{ObjectMeta, impl_resource};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionSpec {
    #[serde(default)]
    pub target_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionStatus {
    /// Image map key → image for the target version
    #[serde(default)]
    pub container_images: BTreeMap<String, String>,
    #[serde(default)]
    pub deployed_version: String,
}

/// Release version of a namespace. At most one may exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    #[serde(rename = "metadata")]
    pub meta: ObjectMeta,
    #[serde(default)]
    pub spec: VersionSpec,
    #[serde(default)]
    pub status: VersionStatus,
}

impl_resource!(Version, "versions", VersionStatus);
