//! Loading user manifests from disk into the store.

use anyhow::Context as _;
use pkg_state::registry::{OperationResult, Registry};
use pkg_types::manifest::{Manifest, parse_manifests};
use std::path::Path;
use tracing::{debug, info};

use crate::admission::Admission;
use crate::services::yaml_files;

/// Applies manifests through the admission gate.
pub struct Applier {
    registry: Registry,
    admission: Admission,
    /// Used for manifests that name no namespace
    default_namespace: String,
}

impl Applier {
    pub fn new(registry: Registry, default_namespace: &str) -> Self {
        Self {
            admission: Admission::new(registry.clone()),
            registry,
            default_namespace: default_namespace.to_string(),
        }
    }

    /// Apply every `*.yaml`/`*.yml` file of `dir` in file name order.
    /// Returns how many objects were created or changed.
    pub async fn apply_dir(&self, dir: &str) -> anyhow::Result<usize> {
        let mut changed = 0;
        for file in yaml_files(Path::new(dir))? {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            changed += self
                .apply_str(&content)
                .await
                .with_context(|| format!("applying {}", file.display()))?;
        }
        info!("Applied manifests from {} ({} changed)", dir, changed);
        Ok(changed)
    }

    /// Apply a multi-document YAML stream.
    pub async fn apply_str(&self, content: &str) -> anyhow::Result<usize> {
        let mut changed = 0;
        for manifest in parse_manifests(content)? {
            let name = manifest.name().to_string();
            let op = self.apply(manifest).await?;
            debug!("Applied {}: {:?}", name, op);
            if op != OperationResult::Unchanged {
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Create or patch one object. Spec and data are replaced; labels are
    /// merged. Status is only taken from manifests of externally managed
    /// kinds.
    pub async fn apply(&self, manifest: Manifest) -> anyhow::Result<OperationResult> {
        let registry = &self.registry;
        let op = match manifest {
            Manifest::NodeSet(mut obj) => {
                self.fill_namespace(&mut obj.meta);
                let obj = self.admission.admit_node_set(obj).await?;
                let (spec, labels) = (obj.spec.clone(), obj.meta.labels.clone());
                registry
                    .create_or_patch(obj, |n| {
                        n.spec = spec;
                        n.meta.labels.extend(labels);
                    })
                    .await?
                    .1
            }
            Manifest::Deployment(mut obj) => {
                self.fill_namespace(&mut obj.meta);
                let obj = self.admission.admit_deployment(obj).await?;
                let labels = obj.meta.labels.clone();
                registry
                    .create_or_patch(obj, |d| d.meta.labels.extend(labels))
                    .await?
                    .1
            }
            Manifest::Service(mut obj) => {
                self.fill_namespace(&mut obj.meta);
                pkg_types::validate::validate_name(&obj.meta.name)?;
                let (spec, labels) = (obj.spec.clone(), obj.meta.labels.clone());
                registry
                    .create_or_patch(obj, |s| {
                        s.spec = spec;
                        s.meta.labels.extend(labels);
                    })
                    .await?
                    .1
            }
            Manifest::Secret(mut obj) => {
                self.fill_namespace(&mut obj.meta);
                let (data, labels) = (obj.data.clone(), obj.meta.labels.clone());
                registry
                    .create_or_patch(obj, |s| {
                        s.data = data;
                        s.meta.labels.extend(labels);
                    })
                    .await?
                    .1
            }
            Manifest::ConfigMap(mut obj) => {
                self.fill_namespace(&mut obj.meta);
                let (data, labels) = (obj.data.clone(), obj.meta.labels.clone());
                registry
                    .create_or_patch(obj, |c| {
                        c.data = data;
                        c.meta.labels.extend(labels);
                    })
                    .await?
                    .1
            }
            Manifest::NetConfig(mut obj) => {
                self.fill_namespace(&mut obj.meta);
                let spec = obj.spec.clone();
                registry.create_or_patch(obj, |n| n.spec = spec).await?.1
            }
            Manifest::DNSMasq(mut obj) => {
                self.fill_namespace(&mut obj.meta);
                let status = obj.status.clone();
                registry.create_or_patch(obj, |d| d.status = status).await?.1
            }
            Manifest::Version(mut obj) => {
                self.fill_namespace(&mut obj.meta);
                let (spec, status) = (obj.spec.clone(), obj.status.clone());
                registry
                    .create_or_patch(obj, |v| {
                        v.spec = spec;
                        v.status = status;
                    })
                    .await?
                    .1
            }
            Manifest::Issuer(mut obj) => {
                self.fill_namespace(&mut obj.meta);
                let (spec, labels) = (obj.spec.clone(), obj.meta.labels.clone());
                registry
                    .create_or_patch(obj, |i| {
                        i.spec = spec;
                        i.meta.labels.extend(labels);
                    })
                    .await?
                    .1
            }
        };
        Ok(op)
    }

    fn fill_namespace(&self, meta: &mut pkg_types::meta::ObjectMeta) {
        if meta.namespace.is_empty() {
            meta.namespace = self.default_namespace.clone();
        }
    }
}
