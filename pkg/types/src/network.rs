//! Address and name reservation records.
//!
//! `NetConfig` and `DNSMasq` are declared by the cluster admin. `IPSet` and
//! `DNSData` are written by the address/name facade on behalf of a NodeSet.

use serde::{Deserialize, Serialize};

use crate::condition::Conditions;
use crate::meta::{ObjectMeta, impl_resource};
use crate::nodeset::NetworkRef;

// --- NetConfig ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocationRange {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub destination: String,
    pub nexthop: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubnetDef {
    pub name: String,
    pub cidr: String,
    #[serde(default)]
    pub vlan: Option<u16>,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub allocation_ranges: Vec<AllocationRange>,
    #[serde(default)]
    pub exclude_addresses: Vec<String>,
    #[serde(default)]
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkDef {
    pub name: String,
    #[serde(default)]
    pub dns_domain: String,
    #[serde(default = "default_mtu")]
    pub mtu: u32,
    #[serde(default)]
    pub subnets: Vec<SubnetDef>,
}

fn default_mtu() -> u32 {
    1500
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetConfigSpec {
    #[serde(default)]
    pub networks: Vec<NetworkDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetConfig {
    #[serde(rename = "metadata")]
    pub meta: ObjectMeta,
    pub spec: NetConfigSpec,
}

impl_resource!(NetConfig, "netconfigs");

impl NetConfig {
    pub fn network(&self, name: &str) -> Option<&NetworkDef> {
        self.spec
            .networks
            .iter()
            .find(|n| n.name.eq_ignore_ascii_case(name))
    }
}

// --- IPSet ---

/// One address reserved on one network for one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IPReservation {
    pub network: String,
    pub subnet: String,
    pub address: String,
    pub cidr: String,
    #[serde(default)]
    pub vlan: Option<u16>,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub mtu: u32,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub dns_domain: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IPSetSpec {
    #[serde(default)]
    pub networks: Vec<NetworkRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IPSetStatus {
    #[serde(default)]
    pub reservations: Vec<IPReservation>,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub conditions: Conditions,
}

/// Address reservations of one node, named after its host name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IPSet {
    #[serde(rename = "metadata")]
    pub meta: ObjectMeta,
    pub spec: IPSetSpec,
    #[serde(default)]
    pub status: IPSetStatus,
}

impl_resource!(IPSet, "ipsets", IPSetStatus);

// --- DNSMasq ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DNSMasqStatus {
    #[serde(default)]
    pub ready: bool,
    /// Addresses handed to nodes as name servers
    #[serde(default)]
    pub dns_addresses: Vec<String>,
    #[serde(default)]
    pub dns_cluster_addresses: Vec<String>,
}

/// The name-resolution service of a namespace. Exactly one may exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DNSMasq {
    #[serde(rename = "metadata")]
    pub meta: ObjectMeta,
    #[serde(default)]
    pub status: DNSMasqStatus,
}

impl_resource!(DNSMasq, "dnsmasqs", DNSMasqStatus);

// --- DNSData ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DNSHost {
    pub ip: String,
    pub hostnames: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DNSDataSpec {
    #[serde(default)]
    pub hosts: Vec<DNSHost>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DNSDataStatus {
    #[serde(default)]
    pub ready: bool,
}

/// Name records published for one NodeSet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DNSData {
    #[serde(rename = "metadata")]
    pub meta: ObjectMeta,
    pub spec: DNSDataSpec,
    #[serde(default)]
    pub status: DNSDataStatus,
}

impl_resource!(DNSData, "dnsdata", DNSDataStatus);
