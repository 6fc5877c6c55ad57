use serde::{Deserialize, Serialize};

/// Volume mount inside an automation runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Name of the volume (must match a Volume in the run spec)
    pub name: String,
    /// Path inside the runner to mount the volume
    pub mount_path: String,
    /// Single key of the volume mounted at `mount_path`
    #[serde(default)]
    pub sub_path: Option<String>,
}

/// One key of a ConfigMap or Secret projected as a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyToPath {
    pub key: String,
    pub path: String,
}

/// Volume source — where the files come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum VolumeSource {
    /// A configmap projected as files
    ConfigMap {
        name: String,
        #[serde(default)]
        items: Vec<KeyToPath>,
    },
    /// A secret projected as files
    Secret {
        secret_name: String,
        #[serde(default)]
        items: Vec<KeyToPath>,
    },
    /// Several secrets merged into one directory
    Projected { secret_names: Vec<String> },
}

/// Named volume in a run spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub source: VolumeSource,
}
