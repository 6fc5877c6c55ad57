pub mod baremetal;
pub mod condition;
pub mod config;
pub mod configmap;
pub mod deployment;
pub mod issuer;
pub mod job;
pub mod manifest;
pub mod meta;
pub mod network;
pub mod nodeset;
pub mod secret;
pub mod service;
pub mod validate;
pub mod version;
pub mod volume;
