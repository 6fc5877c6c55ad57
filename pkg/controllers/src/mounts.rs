//! Volumes and mounts attached to automation runs.

use pkg_constants::network::DNS1123_LABEL_MAX_LENGTH;
use pkg_constants::paths::{CA_CERT_PATHS, CERT_PATHS, CONFIG_PATHS, INVENTORY_DIR, SSH_KEY_DIR};
use pkg_pki::bundle::bundle_secret_name;
use pkg_state::registry::Registry;
use pkg_types::nodeset::NodeSet;
use pkg_types::secret::Secret;
use pkg_types::service::Service;
use pkg_types::volume::{KeyToPath, Volume, VolumeMount, VolumeSource};
use sha2::{Digest, Sha224};
use std::collections::BTreeMap;
use tracing::debug;

use crate::datasource;
use crate::hashes::bundle_count;

const SSH_PRIVATE_KEY: &str = "ssh-privatekey";
const INVENTORY_KEY: &str = "inventory";

/// Volumes of a run paired with where they are mounted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunMounts {
    pub volumes: Vec<Volume>,
    pub mounts: Vec<VolumeMount>,
}

impl RunMounts {
    fn push(&mut self, volume: Volume, mount: VolumeMount) {
        self.volumes.push(volume);
        self.mounts.push(mount);
    }

    pub fn extend(&mut self, other: RunMounts) {
        self.volumes.extend(other.volumes);
        self.mounts.extend(other.mounts);
    }
}

/// `candidate` if it is a valid label length, else `prefix` plus its SHA-224.
pub fn volume_name(candidate: &str, prefix: &str) -> String {
    if candidate.len() > DNS1123_LABEL_MAX_LENGTH {
        format!("{}{}", prefix, hex::encode(Sha224::digest(candidate.as_bytes())))
    } else {
        candidate.to_string()
    }
}

fn secret_item(
    volume: &str,
    secret_name: &str,
    key: &str,
    path: &str,
    mount_path: String,
) -> (Volume, VolumeMount) {
    (
        Volume {
            name: volume.to_string(),
            source: VolumeSource::Secret {
                secret_name: secret_name.to_string(),
                items: vec![KeyToPath {
                    key: key.to_string(),
                    path: path.to_string(),
                }],
            },
        },
        VolumeMount {
            name: volume.to_string(),
            mount_path,
            sub_path: Some(path.to_string()),
        },
    )
}

/// SSH key and inventory mounts.
///
/// `ssh_keys` and `inventories` map NodeSet names to secret names. A global
/// run mounts every NodeSet's pair; otherwise only `node_set`'s is mounted.
pub fn access_mounts(
    node_set: &str,
    global: bool,
    ssh_keys: &BTreeMap<String, String>,
    inventories: &BTreeMap<String, String>,
) -> RunMounts {
    let mut out = RunMounts::default();

    for (name, secret) in ssh_keys {
        let (volume, sub_path, mount_path) = if global {
            let sub_path = format!("ssh_key_{}", name);
            (
                volume_name(&format!("ssh-key-{}", name), "sshkey"),
                sub_path.clone(),
                format!("{}/{}", SSH_KEY_DIR, sub_path),
            )
        } else if name == node_set {
            ("ssh-key".to_string(), "ssh_key".to_string(), SSH_KEY_DIR.to_string())
        } else {
            continue;
        };
        let (v, m) = secret_item(&volume, secret, SSH_PRIVATE_KEY, &sub_path, mount_path);
        out.push(v, m);
    }

    for (index, (name, secret)) in inventories.iter().enumerate() {
        let (volume, mount_path) = if global {
            let volume = format!("inventory-{}", index);
            let mount_path = format!("{}/{}", INVENTORY_DIR, volume);
            (volume, mount_path)
        } else if name == node_set {
            ("inventory".to_string(), format!("{}/hosts", INVENTORY_DIR))
        } else {
            continue;
        };
        let (v, m) = secret_item(&volume, secret, INVENTORY_KEY, &volume, mount_path);
        out.push(v, m);
    }
    out
}

/// One volume per key of each ConfigMap/Secret the service's data sources
/// reference, mounted under the service type's config directory.
pub async fn data_source_mounts(registry: &Registry, service: &Service) -> anyhow::Result<RunMounts> {
    let base = format!("{}/{}", CONFIG_PATHS, service.service_type());
    let mut config_maps = Vec::new();
    let mut secrets = Vec::new();
    for source in &service.spec.data_sources {
        let (cm, secret) = datasource::resolve(registry, &service.meta.namespace, source).await?;
        config_maps.extend(cm);
        secrets.extend(secret);
    }

    let mut out = RunMounts::default();
    for cm in config_maps {
        for (idx, key) in cm.data.keys().enumerate() {
            let name = volume_name(&format!("{}-{}", cm.meta.name, idx), "cm");
            out.push(
                Volume {
                    name: name.clone(),
                    source: VolumeSource::ConfigMap {
                        name: cm.meta.name.clone(),
                        items: vec![KeyToPath {
                            key: key.clone(),
                            path: key.clone(),
                        }],
                    },
                },
                VolumeMount {
                    name,
                    mount_path: format!("{}/{}", base, key),
                    sub_path: Some(key.clone()),
                },
            );
        }
    }
    for secret in secrets {
        for (idx, key) in secret.data.keys().enumerate() {
            let name = volume_name(&format!("{}-{}", secret.meta.name, idx), "sec");
            let (v, m) = secret_item(&name, &secret.meta.name, key, key, format!("{}/{}", base, key));
            out.push(v, m);
        }
    }
    Ok(out)
}

/// Cert bundle mounts for every service in `services`, plus their CA
/// bundles. Used by the service that installs certificates on the nodes.
pub async fn cert_mounts(
    registry: &Registry,
    node_set: &NodeSet,
    services: &[String],
) -> anyhow::Result<RunMounts> {
    let namespace = &node_set.meta.namespace;
    let mut out = RunMounts::default();

    for name in services {
        let mut service = registry.get_required::<Service>(namespace, name).await?;

        if !service.spec.certs_from.is_empty()
            && service.spec.tls_certs.is_empty()
            && service.spec.ca_certs.is_empty()
        {
            if services.contains(&service.spec.certs_from) {
                continue;
            }
            service = registry
                .get_required::<Service>(namespace, &service.spec.certs_from)
                .await?;
        }
        if service.service_type() != service.meta.name && service.spec.tls_certs.is_empty() {
            let service_type = service.service_type().to_string();
            if services.contains(&service_type) {
                continue;
            }
            service = registry.get_required::<Service>(namespace, &service_type).await?;
        }

        if !service.spec.tls_certs.is_empty() && node_set.spec.tls_enabled {
            for (cert_key, cert) in &service.spec.tls_certs {
                debug!("Mounting TLS cert {} of service {}", cert_key, name);
                let first = bundle_secret_name(&node_set.meta.name, &service.meta.name, cert_key, 0);
                let bundle = registry.get_required::<Secret>(namespace, &first).await?;
                let secret_names = (0..bundle_count(&bundle))
                    .map(|i| bundle_secret_name(&node_set.meta.name, &service.meta.name, cert_key, i))
                    .collect();
                let volume = volume_name(&first, "cert");
                let dir = if cert.edpm_role_service_name.is_empty() {
                    service.service_type()
                } else {
                    cert.edpm_role_service_name.as_str()
                };
                out.push(
                    Volume {
                        name: volume.clone(),
                        source: VolumeSource::Projected { secret_names },
                    },
                    VolumeMount {
                        name: volume,
                        mount_path: format!("{}/{}/{}", CERT_PATHS, dir, cert_key),
                        sub_path: None,
                    },
                );
            }
        }

        if !service.spec.ca_certs.is_empty() {
            out.extend(ca_cert_mount(registry, &service).await?);
        }
    }
    Ok(out)
}

/// Mount of the CA bundle secret named by the service.
pub async fn ca_cert_mount(registry: &Registry, service: &Service) -> anyhow::Result<RunMounts> {
    let ca_certs = &service.spec.ca_certs;
    registry
        .get_required::<Secret>(&service.meta.namespace, ca_certs)
        .await?;
    let volume = volume_name(&format!("{}-{}", service.meta.name, ca_certs), "cacert");
    let mut out = RunMounts::default();
    out.push(
        Volume {
            name: volume.clone(),
            source: VolumeSource::Secret {
                secret_name: ca_certs.clone(),
                items: Vec::new(),
            },
        },
        VolumeMount {
            name: volume,
            mount_path: format!("{}/{}", CA_CERT_PATHS, service.service_type()),
            sub_path: None,
        },
    );
    Ok(out)
}
