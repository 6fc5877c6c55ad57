//! Reconcilers for NodeSets and Deployments plus the pieces they share:
//! service catalog, certificates, inventories, automation runs and the
//! control-loop manager that drives them.

pub mod admission;
pub mod apply;
pub mod baremetal;
pub mod certs;
pub mod context;
pub mod datasource;
pub mod deployer;
pub mod deployment;
pub mod hashes;
pub mod inventory;
pub mod job;
pub mod manager;
pub mod mounts;
pub mod nodeset;
pub mod services;
pub mod version;
