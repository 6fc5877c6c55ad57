use serde::{Deserialize, Serialize};

use crate::meta::{ObjectMeta, impl_resource};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssuerSpec {
    /// Secret holding the CA's `tls.crt` and `tls.key`
    pub ca_secret_name: String,
}

/// Certificate issuer, selected by its labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issuer {
    #[serde(rename = "metadata")]
    pub meta: ObjectMeta,
    pub spec: IssuerSpec,
}

impl_resource!(Issuer, "issuers");
