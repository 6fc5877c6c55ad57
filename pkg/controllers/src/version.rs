use anyhow::bail;
use pkg_state::registry::Registry;
use pkg_types::config::OperatorConfig;
use pkg_types::version::Version;
use std::collections::BTreeMap;

/// The namespace's release version record, if any. More than one is an error.
pub async fn get_version(registry: &Registry, namespace: &str) -> anyhow::Result<Option<Version>> {
    let mut versions = registry.list::<Version>(namespace).await?;
    if versions.len() > 1 {
        bail!(
            "found {} Version resources in namespace {}, expected at most one",
            versions.len(),
            namespace
        );
    }
    Ok(versions.pop())
}

/// Configured defaults overlaid with the images of `version`.
pub fn container_images(
    config: &OperatorConfig,
    version: Option<&Version>,
) -> BTreeMap<String, String> {
    let mut images = config.default_images.clone();
    if let Some(v) = version {
        for (field, image) in &v.status.container_images {
            if !image.is_empty() {
                images.insert(field.clone(), image.clone());
            }
        }
    }
    images
}

/// Version a Deployment rolls out: the record's target, else its deployed one.
pub fn target_version(version: Option<&Version>) -> String {
    version
        .map(|v| {
            if v.spec.target_version.is_empty() {
                v.status.deployed_version.clone()
            } else {
                v.spec.target_version.clone()
            }
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_constants::images::RUNNER_IMAGE_FIELD;
    use pkg_types::meta::ObjectMeta;
    use pkg_types::version::{VersionSpec, VersionStatus};

    fn make_version(name: &str) -> Version {
        let mut status = VersionStatus::default();
        status
            .container_images
            .insert(RUNNER_IMAGE_FIELD.into(), "registry/runner:1.0".into());
        Version {
            meta: ObjectMeta::new("openstack", name),
            spec: VersionSpec {
                target_version: "1.0".into(),
            },
            status,
        }
    }

    #[test]
    fn test_version_images_override_defaults() {
        let config = OperatorConfig::default();
        let v = make_version("release");
        let images = container_images(&config, Some(&v));
        assert_eq!(images[RUNNER_IMAGE_FIELD], "registry/runner:1.0");
        assert_eq!(images["edpmFrrImage"], config.default_images["edpmFrrImage"]);
        assert_eq!(target_version(Some(&v)), "1.0");
        assert_eq!(target_version(None), "");
    }

    #[tokio::test]
    async fn test_more_than_one_version_is_an_error() {
        let registry = Registry::in_memory().await.unwrap();
        assert!(get_version(&registry, "openstack").await.unwrap().is_none());
        registry.create(make_version("a")).await.unwrap();
        assert!(get_version(&registry, "openstack").await.unwrap().is_some());
        registry.create(make_version("b")).await.unwrap();
        assert!(get_version(&registry, "openstack").await.is_err());
    }
}
