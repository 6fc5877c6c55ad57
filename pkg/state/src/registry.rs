use chrono::Utc;
use pkg_constants::state::{EVENT_LOG_CAPACITY, REGISTRY_PREFIX};
use pkg_types::meta::{HasStatus, ObjectMeta, Resource, registry_key};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::client::StateStore;
use crate::error::{StoreError, is_conflict};
use crate::owners::OwnerRegistry;
use crate::watch::{EventLog, EventType};

/// Outcome of an idempotent upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    Created,
    Updated,
    Unchanged,
}

#[derive(Deserialize)]
struct MetaOnly {
    metadata: ObjectMeta,
}

/// Typed object access over the raw [`StateStore`].
///
/// Every write bumps `resource_version`, emits a watch event and keeps the
/// owner registry current. Check-then-write sequences run under one lock so
/// version comparisons are atomic.
#[derive(Clone)]
pub struct Registry {
    store: StateStore,
    events: EventLog,
    owners: OwnerRegistry,
    write_lock: Arc<Mutex<()>>,
}

impl Registry {
    /// Wrap a store, rebuilding the owner registry from persisted objects.
    pub async fn open(store: StateStore, events: EventLog) -> anyhow::Result<Self> {
        let owners = OwnerRegistry::new();
        let mut tracked = 0usize;
        for (key, value) in store.list_prefix(REGISTRY_PREFIX).await? {
            let Ok(obj) = serde_json::from_slice::<MetaOnly>(&value) else {
                continue;
            };
            let parents = parent_keys(&obj.metadata);
            if !parents.is_empty() {
                owners.track(&key, parents).await;
                tracked += 1;
            }
        }
        info!("Registry opened ({} owned objects tracked)", tracked);
        Ok(Self {
            store,
            events,
            owners,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// A registry over an in-memory store. Used by tests.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let store = StateStore::in_memory().await?;
        Self::open(store, EventLog::new(EVENT_LOG_CAPACITY)).await
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub async fn close(self) -> anyhow::Result<()> {
        self.store.close().await
    }

    // --- Reads ---

    pub async fn get<T: Resource>(&self, namespace: &str, name: &str) -> anyhow::Result<Option<T>> {
        let key = registry_key(T::KIND, namespace, name);
        match self.store.get(&key).await? {
            Some(bytes) => {
                let obj = serde_json::from_slice(&bytes)
                    .map_err(|e| anyhow::anyhow!("Failed to decode {}: {}", key, e))?;
                Ok(Some(obj))
            }
            None => Ok(None),
        }
    }

    /// Like [`Registry::get`], failing with [`StoreError::NotFound`].
    pub async fn get_required<T: Resource>(&self, namespace: &str, name: &str) -> anyhow::Result<T> {
        self.get(namespace, name).await?.ok_or_else(|| {
            StoreError::NotFound {
                key: registry_key(T::KIND, namespace, name),
            }
            .into()
        })
    }

    /// Every object of kind `T` in `namespace`, in name order.
    pub async fn list<T: Resource>(&self, namespace: &str) -> anyhow::Result<Vec<T>> {
        let prefix = format!("{}{}/{}/", REGISTRY_PREFIX, T::KIND, namespace);
        self.decode_all(&prefix).await
    }

    /// Every object of kind `T` across namespaces.
    pub async fn list_all<T: Resource>(&self) -> anyhow::Result<Vec<T>> {
        let prefix = format!("{}{}/", REGISTRY_PREFIX, T::KIND);
        self.decode_all(&prefix).await
    }

    /// Objects in `namespace` carrying every label in `selector`.
    pub async fn list_selected<T: Resource>(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> anyhow::Result<Vec<T>> {
        Ok(self
            .list::<T>(namespace)
            .await?
            .into_iter()
            .filter(|o| o.meta().matches(selector))
            .collect())
    }

    async fn decode_all<T: Resource>(&self, prefix: &str) -> anyhow::Result<Vec<T>> {
        let mut out = Vec::new();
        for (key, value) in self.store.list_prefix(prefix).await? {
            let obj = serde_json::from_slice(&value)
                .map_err(|e| anyhow::anyhow!("Failed to decode {}: {}", key, e))?;
            out.push(obj);
        }
        Ok(out)
    }

    // --- Writes ---

    /// Insert a new object, failing with [`StoreError::AlreadyExists`].
    pub async fn create<T: Resource>(&self, mut obj: T) -> anyhow::Result<T> {
        let _guard = self.write_lock.lock().await;
        let key = obj.key();
        if self.store.get(&key).await?.is_some() {
            return Err(StoreError::AlreadyExists { key }.into());
        }
        stamp_new(obj.meta_mut());
        self.write(&key, &obj).await?;
        Ok(obj)
    }

    /// Idempotent upsert. `seed` is used when the object does not exist yet;
    /// `mutate` is applied to the stored (or seeded) object. Writes only
    /// happen when the result differs from what is stored.
    pub async fn create_or_patch<T, F>(
        &self,
        seed: T,
        mutate: F,
    ) -> anyhow::Result<(T, OperationResult)>
    where
        T: Resource,
        F: FnOnce(&mut T),
    {
        let _guard = self.write_lock.lock().await;
        let key = seed.key();
        match self.store.get(&key).await? {
            None => {
                let mut obj = seed;
                mutate(&mut obj);
                stamp_new(obj.meta_mut());
                self.write(&key, &obj).await?;
                debug!("Created {}", key);
                Ok((obj, OperationResult::Created))
            }
            Some(bytes) => {
                let existing: T = serde_json::from_slice(&bytes)
                    .map_err(|e| anyhow::anyhow!("Failed to decode {}: {}", key, e))?;
                let before = serde_json::to_value(&existing)?;
                let mut obj = existing;
                mutate(&mut obj);
                if serde_json::to_value(&obj)? == before {
                    return Ok((obj, OperationResult::Unchanged));
                }
                let meta = obj.meta_mut();
                meta.resource_version += 1;
                meta.generation += 1;
                self.write(&key, &obj).await?;
                debug!("Patched {}", key);
                Ok((obj, OperationResult::Updated))
            }
        }
    }

    /// Write only the status of `obj`. The caller's `resource_version` must still be current.
    pub async fn update_status<T: HasStatus>(&self, obj: &T) -> anyhow::Result<T> {
        let _guard = self.write_lock.lock().await;
        let key = obj.key();
        let mut current: T = self.read_current(&key).await?;
        check_version(&key, obj.meta(), current.meta())?;

        *current.status_mut() = obj.status().clone();
        current.meta_mut().resource_version += 1;
        self.write(&key, &current).await?;
        Ok(current)
    }

    /// Reread, mutate and write a status, retrying on version conflicts up
    /// to `attempts` times. Returns `None` when the object is gone. Nothing
    /// is written when the status is unchanged.
    pub async fn patch_status<T, F>(
        &self,
        namespace: &str,
        name: &str,
        attempts: u32,
        mutate: F,
    ) -> anyhow::Result<Option<T>>
    where
        T: HasStatus,
        F: Fn(&mut T::Status),
    {
        let mut last_err = None;
        for attempt in 0..attempts.max(1) {
            let Some(latest) = self.get::<T>(namespace, name).await? else {
                return Ok(None);
            };
            let mut next = latest.clone();
            mutate(next.status_mut());
            if next.status() == latest.status() {
                return Ok(Some(latest));
            }
            match self.update_status(&next).await {
                Ok(written) => return Ok(Some(written)),
                Err(e) if is_conflict(&e) => {
                    debug!(
                        "Status write for {} conflicted (attempt {}): {}",
                        latest.key(),
                        attempt + 1,
                        e
                    );
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("status update gave up")))
    }

    /// Delete an object and, first, everything it owns. Returns whether it
    /// existed.
    pub async fn delete<T: Resource>(&self, namespace: &str, name: &str) -> anyhow::Result<bool> {
        let key = registry_key(T::KIND, namespace, name);
        let _guard = self.write_lock.lock().await;
        let existed = self.store.get(&key).await?.is_some();
        for victim in self.owners.teardown_order(&key).await {
            if self.store.get(&victim).await?.is_none() {
                self.owners.forget(&victim).await;
                continue;
            }
            self.store.delete(&victim).await?;
            self.owners.forget(&victim).await;
            self.events.emit(EventType::Delete, victim.clone(), None);
            if victim != key {
                info!("Cascade deleted {} (owner {})", victim, key);
            }
        }
        Ok(existed)
    }

    async fn read_current<T: Resource>(&self, key: &str) -> anyhow::Result<T> {
        let bytes = self
            .store
            .get(key)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })?;
        serde_json::from_slice(&bytes).map_err(|e| anyhow::anyhow!("Failed to decode {}: {}", key, e))
    }

    async fn write<T: Resource>(&self, key: &str, obj: &T) -> anyhow::Result<()> {
        let data = serde_json::to_vec(obj)?;
        self.store.put(key, &data).await?;
        self.owners.track(key, parent_keys(obj.meta())).await;
        self.events.emit(EventType::Put, key.to_string(), Some(data));
        Ok(())
    }
}

fn stamp_new(meta: &mut ObjectMeta) {
    if meta.uid.is_empty() {
        meta.uid = Uuid::new_v4().to_string();
    }
    if meta.created_at.is_none() {
        meta.created_at = Some(Utc::now());
    }
    meta.resource_version = 1;
    meta.generation = 1;
}

fn check_version(key: &str, submitted: &ObjectMeta, current: &ObjectMeta) -> anyhow::Result<()> {
    if submitted.resource_version != current.resource_version {
        return Err(StoreError::Conflict {
            key: key.to_string(),
            expected: submitted.resource_version,
            found: current.resource_version,
        }
        .into());
    }
    Ok(())
}

fn parent_keys(meta: &ObjectMeta) -> Vec<String> {
    meta.owner_references
        .iter()
        .map(|r| r.key(&meta.namespace))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::nodeset::{NodeSet, NodeSetSpec, NodeSetStatus};
    use pkg_types::secret::Secret;

    fn make_secret(name: &str) -> Secret {
        Secret::new("openstack", name)
    }

    #[tokio::test]
    async fn create_stamps_metadata_and_rejects_duplicates() {
        let registry = Registry::in_memory().await.unwrap();
        let created = registry.create(make_secret("ssh")).await.unwrap();
        assert_eq!(created.meta.resource_version, 1);
        assert!(!created.meta.uid.is_empty());
        assert!(created.meta.created_at.is_some());

        let err = registry.create(make_secret("ssh")).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn create_or_patch_is_idempotent() {
        let registry = Registry::in_memory().await.unwrap();
        let (_, op) = registry
            .create_or_patch(make_secret("inv"), |s| {
                s.data.insert("inventory".into(), "all: {}".into());
            })
            .await
            .unwrap();
        assert_eq!(op, OperationResult::Created);

        let (_, op) = registry
            .create_or_patch(make_secret("inv"), |s| {
                s.data.insert("inventory".into(), "all: {}".into());
            })
            .await
            .unwrap();
        assert_eq!(op, OperationResult::Unchanged);

        let (obj, op) = registry
            .create_or_patch(make_secret("inv"), |s| {
                s.data.insert("inventory".into(), "all: {hosts: {}}".into());
            })
            .await
            .unwrap();
        assert_eq!(op, OperationResult::Updated);
        assert_eq!(obj.meta.resource_version, 2);
    }

    #[tokio::test]
    async fn stale_status_writes_conflict() {
        let registry = Registry::in_memory().await.unwrap();
        let ns = registry
            .create(NodeSet::new("openstack", "compute", NodeSetSpec::default()))
            .await
            .unwrap();

        let mut first = ns.clone();
        first.status.config_hash = "aaa".into();
        registry.update_status(&first).await.unwrap();

        let mut stale = ns.clone();
        stale.status.config_hash = "bbb".into();
        let err = registry.update_status(&stale).await.unwrap_err();
        assert!(is_conflict(&err));

        let stored: NodeSet = registry
            .get_required("openstack", "compute")
            .await
            .unwrap();
        assert_eq!(stored.status.config_hash, "aaa");
        assert_eq!(stored.meta.resource_version, 2);
    }

    #[tokio::test]
    async fn patch_status_rereads_and_skips_noop_writes() {
        let registry = Registry::in_memory().await.unwrap();
        registry
            .create(NodeSet::new("openstack", "compute", NodeSetSpec::default()))
            .await
            .unwrap();

        let written: NodeSet = registry
            .patch_status("openstack", "compute", 3, |s: &mut NodeSetStatus| {
                s.config_hash = "abc".into();
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(written.meta.resource_version, 2);

        let again: NodeSet = registry
            .patch_status("openstack", "compute", 3, |s: &mut NodeSetStatus| {
                s.config_hash = "abc".into();
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.meta.resource_version, 2);

        let missing: Option<NodeSet> = registry
            .patch_status("openstack", "absent", 3, |_| {})
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn delete_cascades_to_owned_objects() {
        let registry = Registry::in_memory().await.unwrap();
        let owner = registry
            .create(NodeSet::new("openstack", "compute", NodeSetSpec::default()))
            .await
            .unwrap();
        let mut child = make_secret("dataplanenodeset-compute");
        child.meta = child.meta.owned_by(&owner);
        registry.create(child).await.unwrap();
        registry.create(make_secret("unrelated")).await.unwrap();

        assert!(registry.delete::<NodeSet>("openstack", "compute").await.unwrap());
        assert!(
            registry
                .get::<Secret>("openstack", "dataplanenodeset-compute")
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            registry
                .get::<Secret>("openstack", "unrelated")
                .await
                .unwrap()
                .is_some()
        );
        let err = registry
            .get_required::<NodeSet>("openstack", "compute")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn selectors_and_events() {
        let registry = Registry::in_memory().await.unwrap();
        let mut rx = registry.events().subscribe();
        let mut labeled = make_secret("cert-a");
        labeled.meta.labels.insert("osdpns".into(), "compute".into());
        registry.create(labeled).await.unwrap();
        registry.create(make_secret("cert-b")).await.unwrap();

        let mut selector = BTreeMap::new();
        selector.insert("osdpns".to_string(), "compute".to_string());
        let found: Vec<Secret> = registry
            .list_selected("openstack", &selector)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].meta.name, "cert-a");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.key, "/registry/secrets/openstack/cert-a");
        assert_eq!(event.event_type, EventType::Put);
    }
}
