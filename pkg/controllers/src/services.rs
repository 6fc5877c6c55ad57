//! Service catalog and per-NodeSet service list resolution.

use anyhow::Context as _;
use pkg_state::error::InvalidConfig;
use pkg_state::registry::Registry;
use pkg_types::manifest::{Manifest, parse_manifests};
use pkg_types::meta::ObjectMeta;
use pkg_types::nodeset::NodeSet;
use pkg_types::service::Service;
use pkg_types::validate::validate_name;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Read every `kind: Service` document from the `*.yaml` files in `dir`,
/// in file name order. A missing directory yields an empty catalog.
pub fn load_catalog(dir: &str) -> anyhow::Result<Vec<Service>> {
    let path = Path::new(dir);
    if !path.is_dir() {
        warn!("Service catalog directory {} not found, catalog is empty", dir);
        return Ok(Vec::new());
    }

    let mut catalog = Vec::new();
    for file in yaml_files(path)? {
        let content = std::fs::read_to_string(&file)
            .with_context(|| format!("reading {}", file.display()))?;
        for manifest in
            parse_manifests(&content).with_context(|| format!("parsing {}", file.display()))?
        {
            if let Manifest::Service(svc) = manifest {
                validate_name(&svc.meta.name)?;
                catalog.push(svc);
            }
        }
    }
    info!("Loaded {} catalog service(s) from {}", catalog.len(), dir);
    Ok(catalog)
}

/// The `*.yaml` and `*.yml` files directly under `dir`, in file name
/// order. An entry that cannot be read fails the listing.
pub fn yaml_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let path = entry
            .with_context(|| format!("reading an entry of {}", dir.display()))?
            .path();
        if path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml")
        {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Create or refresh every catalog service in `namespace`.
pub async fn ensure_services(
    registry: &Registry,
    namespace: &str,
    catalog: &[Service],
) -> anyhow::Result<()> {
    for entry in catalog {
        let seed = Service {
            meta: ObjectMeta::new(namespace, &entry.meta.name),
            spec: entry.spec.clone(),
        };
        let spec = entry.spec.clone();
        let labels = entry.meta.labels.clone();
        let (_, op) = registry
            .create_or_patch(seed, |svc| {
                svc.spec = spec;
                svc.meta.labels.extend(labels);
            })
            .await?;
        debug!("Service {}/{}: {:?}", namespace, entry.meta.name, op);
    }
    Ok(())
}

/// Effective service list of each NodeSet when no override is given.
///
/// Within one NodeSet a repeated name or service type is dropped. A global
/// service listed by more than one NodeSet is rejected. Services that do not
/// exist are kept so the rollout can report them.
pub async fn dedupe_services(
    registry: &Registry,
    namespace: &str,
    node_sets: &[NodeSet],
) -> anyhow::Result<BTreeMap<String, Vec<String>>> {
    let mut global_owner: BTreeMap<String, String> = BTreeMap::new();
    let mut result = BTreeMap::new();

    for node_set in node_sets {
        let mut names = BTreeSet::new();
        let mut types = BTreeSet::new();
        let mut list = Vec::new();

        for name in &node_set.spec.services {
            let Some(service) = registry.get::<Service>(namespace, name).await? else {
                info!(
                    "NodeSet {}: service {} not found, keeping it in the list",
                    node_set.meta.name, name
                );
                list.push(name.clone());
                continue;
            };
            if !names.insert(name.clone()) || !types.insert(service.service_type().to_string()) {
                debug!(
                    "NodeSet {}: skipping duplicate service {}",
                    node_set.meta.name, name
                );
                continue;
            }
            if service.is_global() {
                if let Some(owner) = global_owner.get(name) {
                    return Err(InvalidConfig(format!(
                        "service {} with deployOnAllNodeSets is defined multiple times, in NodeSets {} and {}",
                        name, owner, node_set.meta.name
                    ))
                    .into());
                }
                global_owner.insert(name.clone(), node_set.meta.name.clone());
            }
            list.push(name.clone());
        }
        result.insert(node_set.meta.name.clone(), list);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::nodeset::NodeSetSpec;
    use pkg_types::service::ServiceSpec;

    #[test]
    fn test_shipped_catalog_loads() {
        let dir = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/services");
        let catalog = load_catalog(dir).unwrap();
        let names: Vec<&str> = catalog.iter().map(|s| s.meta.name.as_str()).collect();
        assert_eq!(names.first(), Some(&"bootstrap"));
        assert!(names.contains(&"install-certs"));

        let ovn = catalog.iter().find(|s| s.meta.name == "ovn").unwrap();
        assert_eq!(ovn.spec.tls_certs["default"].networks, vec!["ctlplane"]);
        let update = catalog.iter().find(|s| s.meta.name == "update").unwrap();
        assert_eq!(update.service_type(), "update");
        assert!(
            catalog
                .iter()
                .any(|s| s.meta.name == "ssh-known-hosts" && s.spec.deploy_on_all_node_sets)
        );
    }

    fn make_service(name: &str, service_type: &str, global: bool) -> Service {
        Service::new(
            "openstack",
            name,
            ServiceSpec {
                edpm_service_type: service_type.into(),
                deploy_on_all_node_sets: global,
                ..Default::default()
            },
        )
    }

    fn make_nodeset(name: &str, services: &[&str]) -> NodeSet {
        NodeSet::new(
            "openstack",
            name,
            NodeSetSpec {
                services: services.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
        )
    }

    async fn registry_with(services: Vec<Service>) -> Registry {
        let registry = Registry::in_memory().await.unwrap();
        for svc in services {
            registry.create(svc).await.unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn test_drops_repeated_names_and_types() {
        let registry = registry_with(vec![
            make_service("nova", "nova", false),
            make_service("nova-custom", "nova", false),
            make_service("ovn", "", false),
        ])
        .await;
        let lists = dedupe_services(
            &registry,
            "openstack",
            &[make_nodeset("compute", &["nova", "ovn", "nova-custom", "ovn"])],
        )
        .await
        .unwrap();
        assert_eq!(lists["compute"], vec!["nova", "ovn"]);
    }

    #[tokio::test]
    async fn test_missing_service_is_kept() {
        let registry = registry_with(vec![]).await;
        let lists = dedupe_services(&registry, "openstack", &[make_nodeset("compute", &["ghost"])])
            .await
            .unwrap();
        assert_eq!(lists["compute"], vec!["ghost"]);
    }

    #[tokio::test]
    async fn test_global_service_in_two_nodesets_fails() {
        let registry = registry_with(vec![
            make_service("update", "", true),
            make_service("bootstrap", "", false),
        ])
        .await;
        let err = dedupe_services(
            &registry,
            "openstack",
            &[
                make_nodeset("compute-a", &["bootstrap", "update"]),
                make_nodeset("compute-b", &["bootstrap", "update"]),
            ],
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("defined multiple times"), "{}", err);
        assert!(pkg_state::error::is_invalid_config(&err));
    }

    #[tokio::test]
    async fn test_ensure_services_is_idempotent() {
        let registry = registry_with(vec![]).await;
        let catalog = vec![make_service("bootstrap", "", false)];
        ensure_services(&registry, "openstack", &catalog).await.unwrap();
        ensure_services(&registry, "openstack", &catalog).await.unwrap();
        let stored = registry
            .get_required::<Service>("openstack", "bootstrap")
            .await
            .unwrap();
        assert_eq!(stored.meta.generation, 1);
    }

    #[test]
    fn test_load_catalog_reads_yaml_files() {
        let dir = std::env::temp_dir().join(format!("catalog-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("bootstrap.yaml"),
            "kind: Service\nmetadata:\n  name: bootstrap\nspec:\n  playbook: osp.edpm.bootstrap\n",
        )
        .unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let catalog = load_catalog(dir.to_str().unwrap()).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].spec.playbook, "osp.edpm.bootstrap");
        std::fs::remove_dir_all(&dir).unwrap();

        assert!(load_catalog("/nonexistent/catalog").unwrap().is_empty());
    }

    #[test]
    fn test_yaml_files_reports_unreadable_dirs() {
        let err = yaml_files(Path::new("/nonexistent/manifests")).unwrap_err();
        assert!(
            format!("{:#}", err).contains("listing /nonexistent/manifests"),
            "{:#}",
            err
        );

        let dir = std::env::temp_dir().join(format!("yaml-files-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        for name in ["b.yml", "a.yaml", "c.json"] {
            std::fs::write(dir.join(name), "").unwrap();
        }
        let names: Vec<String> = yaml_files(&dir)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.yaml", "b.yml"]);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
