use pkg_state::registry::Registry;
use pkg_types::configmap::ConfigMap;
use pkg_types::meta::{Resource, registry_key};
use pkg_types::nodeset::DataSource;
use pkg_types::secret::Secret;
use std::collections::BTreeMap;

/// The ConfigMap and/or Secret a data source points at.
///
/// A missing optional reference resolves to `None`; a missing required one
/// is an error.
pub async fn resolve(
    registry: &Registry,
    namespace: &str,
    source: &DataSource,
) -> anyhow::Result<(Option<ConfigMap>, Option<Secret>)> {
    let mut config_map = None;
    let mut secret = None;

    if let Some(r) = &source.config_map_ref {
        config_map = registry.get::<ConfigMap>(namespace, &r.name).await?;
        if config_map.is_none() && !r.optional {
            anyhow::bail!("configmap {} not found in namespace {}", r.name, namespace);
        }
    }
    if let Some(r) = &source.secret_ref {
        secret = registry.get::<Secret>(namespace, &r.name).await?;
        if secret.is_none() && !r.optional {
            anyhow::bail!("secret {} not found in namespace {}", r.name, namespace);
        }
    }
    Ok((config_map, secret))
}

/// Flatten data sources into one variable map, each key carrying its
/// source's prefix. Later sources win.
pub async fn collect_vars(
    registry: &Registry,
    namespace: &str,
    sources: &[DataSource],
) -> anyhow::Result<BTreeMap<String, String>> {
    let mut vars = BTreeMap::new();
    for source in sources {
        let (config_map, secret) = resolve(registry, namespace, source).await?;
        let data = config_map
            .into_iter()
            .flat_map(|cm| cm.data)
            .chain(secret.into_iter().flat_map(|s| s.data));
        for (key, value) in data {
            vars.insert(format!("{}{}", source.prefix, key), value);
        }
    }
    Ok(vars)
}

/// Registry keys of the objects a list of data sources references.
pub fn reference_keys(namespace: &str, sources: &[DataSource]) -> Vec<String> {
    let mut keys = Vec::new();
    for source in sources {
        if let Some(r) = &source.config_map_ref {
            keys.push(registry_key(ConfigMap::KIND, namespace, &r.name));
        }
        if let Some(r) = &source.secret_ref {
            keys.push(registry_key(Secret::KIND, namespace, &r.name));
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::nodeset::SourceRef;

    fn source(prefix: &str, cm: Option<(&str, bool)>, secret: Option<(&str, bool)>) -> DataSource {
        DataSource {
            prefix: prefix.to_string(),
            config_map_ref: cm.map(|(name, optional)| SourceRef {
                name: name.into(),
                optional,
            }),
            secret_ref: secret.map(|(name, optional)| SourceRef {
                name: name.into(),
                optional,
            }),
        }
    }

    #[tokio::test]
    async fn test_optional_missing_is_skipped_required_missing_fails() {
        let registry = Registry::in_memory().await.unwrap();
        let (cm, sec) = resolve(&registry, "openstack", &source("", Some(("absent", true)), None))
            .await
            .unwrap();
        assert!(cm.is_none() && sec.is_none());

        let err = resolve(&registry, "openstack", &source("", None, Some(("absent", false))))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("secret absent not found"));
    }

    #[tokio::test]
    async fn test_collect_vars_applies_prefixes() {
        let registry = Registry::in_memory().await.unwrap();
        let mut cm = ConfigMap::new("openstack", "vars");
        cm.data.insert("timezone".into(), "UTC".into());
        registry.create(cm).await.unwrap();
        let mut secret = Secret::new("openstack", "creds");
        secret.data.insert("password".into(), "hunter2".into());
        registry.create(secret).await.unwrap();

        let vars = collect_vars(
            &registry,
            "openstack",
            &[
                source("", Some(("vars", false)), None),
                source("edpm_", None, Some(("creds", false))),
            ],
        )
        .await
        .unwrap();
        assert_eq!(vars["timezone"], "UTC");
        assert_eq!(vars["edpm_password"], "hunter2");
    }
}
