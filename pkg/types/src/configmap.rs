use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::meta::{ObjectMeta, impl_resource};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMap {
    #[serde(rename = "metadata")]
    pub meta: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl_resource!(ConfigMap, "configmaps");

impl ConfigMap {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            meta: ObjectMeta::new(namespace, name),
            data: BTreeMap::new(),
        }
    }
}
