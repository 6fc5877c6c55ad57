use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::meta::{ObjectMeta, impl_resource};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    #[serde(rename = "metadata")]
    pub meta: ObjectMeta,
    /// Secret payload: PEM blocks, keys, inventory documents.
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl_resource!(Secret, "secrets");

impl Secret {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            meta: ObjectMeta::new(namespace, name),
            data: BTreeMap::new(),
        }
    }
}
