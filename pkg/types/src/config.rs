use pkg_constants::images::DEFAULT_IMAGES;
use pkg_constants::{paths, state};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Operator configuration file (YAML).
///
/// Example `config.yaml`:
/// ```yaml
/// data-dir: /var/lib/dataplane-operator
/// namespace: openstack
/// services-dir: /etc/dataplane-operator/services
/// manifests-dir: /etc/dataplane-operator/manifests
/// resync-secs: 30
/// workers: 4
/// images:
///   ansibleeeImage: registry.example.com/ansibleee-runner:stable
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperatorConfigFile {
    #[serde(default, alias = "data-dir")]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default, alias = "services-dir")]
    pub services_dir: Option<String>,
    #[serde(default, alias = "manifests-dir")]
    pub manifests_dir: Option<String>,
    #[serde(default, alias = "resync-secs")]
    pub resync_secs: Option<u64>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default, alias = "status-update-attempts")]
    pub status_update_attempts: Option<u32>,
    /// Image map key → image, overriding environment and built-in defaults
    #[serde(default)]
    pub images: BTreeMap<String, String>,
}

/// Immutable operator configuration, built once at startup and shared by
/// every controller.
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    pub data_dir: String,
    pub namespace: String,
    pub services_dir: String,
    pub manifests_dir: Option<String>,
    pub resync_interval: Duration,
    pub workers: usize,
    pub status_update_attempts: u32,
    /// Image map key → default image
    pub default_images: BTreeMap<String, String>,
}

impl OperatorConfig {
    /// Resolve every setting: config file > environment > built-in default.
    pub fn from_sources(file: OperatorConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let mut default_images = BTreeMap::new();
        for image in DEFAULT_IMAGES {
            let value = env(image.env).unwrap_or_else(|| image.image.to_string());
            default_images.insert(image.field.to_string(), value);
        }
        default_images.extend(file.images);

        Self {
            data_dir: file
                .data_dir
                .unwrap_or_else(|| paths::DEFAULT_DATA_DIR.to_string()),
            namespace: file.namespace.unwrap_or_else(|| "openstack".to_string()),
            services_dir: file
                .services_dir
                .or_else(|| env(paths::SERVICES_DIR_ENV))
                .unwrap_or_else(|| paths::DEFAULT_SERVICES_DIR.to_string()),
            manifests_dir: file.manifests_dir,
            resync_interval: Duration::from_secs(
                file.resync_secs.unwrap_or(state::DEFAULT_RESYNC_SECS).max(1),
            ),
            workers: file.workers.unwrap_or(state::DEFAULT_WORKERS).max(1),
            status_update_attempts: file
                .status_update_attempts
                .unwrap_or(state::STATUS_UPDATE_ATTEMPTS)
                .max(1),
            default_images,
        }
    }

    pub fn default_image(&self, field: &str) -> Option<&str> {
        self.default_images.get(field).map(String::as_str)
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self::from_sources(OperatorConfigFile::default(), |_| None)
    }
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_constants::images::RUNNER_IMAGE_FIELD;

    #[test]
    fn defaults_without_file_or_env() {
        let cfg = OperatorConfig::default();
        assert_eq!(cfg.services_dir, "config/services");
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.status_update_attempts, 5);
        assert_eq!(
            cfg.default_image(RUNNER_IMAGE_FIELD),
            Some("quay.io/openstack-k8s-operators/openstack-ansibleee-runner:latest")
        );
    }

    #[test]
    fn env_overrides_builtin_and_file_overrides_env() {
        let env = |key: &str| match key {
            "RELATED_IMAGE_ANSIBLEEE_IMAGE_URL_DEFAULT" => Some("env/runner:1".to_string()),
            "RELATED_IMAGE_EDPM_FRR_IMAGE_URL_DEFAULT" => Some("env/frr:1".to_string()),
            "OPERATOR_SERVICES" => Some("/opt/services".to_string()),
            _ => None,
        };
        let mut file = OperatorConfigFile::default();
        file.images
            .insert("edpmFrrImage".to_string(), "file/frr:2".to_string());

        let cfg = OperatorConfig::from_sources(file, env);
        assert_eq!(cfg.default_image(RUNNER_IMAGE_FIELD), Some("env/runner:1"));
        assert_eq!(cfg.default_image("edpmFrrImage"), Some("file/frr:2"));
        assert_eq!(cfg.services_dir, "/opt/services");
    }

    #[test]
    fn file_uses_dashed_aliases() {
        let file: OperatorConfigFile =
            serde_yaml::from_str("data-dir: /data\nresync-secs: 5\nworkers: 0\n").unwrap();
        let cfg = OperatorConfig::from_sources(file, |_| None);
        assert_eq!(cfg.data_dir, "/data");
        assert_eq!(cfg.resync_interval, Duration::from_secs(5));
        assert_eq!(cfg.workers, 1);
    }

    #[test]
    fn missing_file_yields_default() {
        let cfg: OperatorConfigFile =
            load_config_file("/nonexistent/dataplane-operator/config.yaml").unwrap();
        assert!(cfg.data_dir.is_none());
    }
}
