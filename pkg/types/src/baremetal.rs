use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::meta::{ObjectMeta, impl_resource};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaremetalHost {
    /// `<address>/<prefix>` on the control plane network
    pub ctl_plane_ip: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaremetalSetSpec {
    /// hostName → host parameters
    #[serde(default)]
    pub hosts: BTreeMap<String, BaremetalHost>,
    #[serde(default)]
    pub bmh_namespace: String,
    #[serde(default)]
    pub bmh_label_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub os_image: String,
    #[serde(default)]
    pub ctlplane_interface: String,
    #[serde(default)]
    pub ctlplane_gateway: String,
    #[serde(default)]
    pub domain_name: String,
    #[serde(default)]
    pub cloud_user_name: String,
    /// Secret holding the `authorized_keys` pushed to new hosts
    #[serde(default)]
    pub deployment_ssh_secret: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaremetalSetStatus {
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub message: String,
}

/// Hardware provisioning request for the nodes of one NodeSet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaremetalSet {
    #[serde(rename = "metadata")]
    pub meta: ObjectMeta,
    pub spec: BaremetalSetSpec,
    #[serde(default)]
    pub status: BaremetalSetStatus,
}

impl_resource!(BaremetalSet, "baremetalsets", BaremetalSetStatus);
