use pkg_network::dns::NameFacade;
use pkg_network::ipam::AddressFacade;
use pkg_state::index::DependencyIndex;
use pkg_state::registry::Registry;
use pkg_types::config::OperatorConfig;
use pkg_types::meta::{HasStatus, Resource};
use pkg_types::service::Service;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Handles shared by every controller. Cloning is cheap.
#[derive(Clone)]
pub struct Context {
    pub registry: Registry,
    pub config: Arc<OperatorConfig>,
    pub index: DependencyIndex,
    pub addresses: AddressFacade,
    pub names: NameFacade,
    /// Services every NodeSet namespace gets before its first pass
    pub catalog: Arc<Vec<Service>>,
}

impl Context {
    pub fn new(registry: Registry, config: Arc<OperatorConfig>, catalog: Vec<Service>) -> Self {
        let attempts = config.status_update_attempts;
        Self {
            addresses: AddressFacade::new(registry.clone()).with_attempts(attempts),
            names: NameFacade::new(registry.clone()).with_attempts(attempts),
            index: DependencyIndex::new(),
            catalog: Arc::new(catalog),
            registry,
            config,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.config.status_update_attempts
    }

    /// Put `status` on the latest stored copy of `obj`. Writes made to the
    /// object since it was read are kept; version conflicts are retried.
    pub async fn write_status<T: HasStatus>(&self, obj: &T, status: T::Status) -> anyhow::Result<()> {
        let meta = obj.meta();
        let written = self
            .registry
            .patch_status::<T, _>(&meta.namespace, &meta.name, self.attempts(), |s| {
                *s = status.clone()
            })
            .await?;
        if written.is_none() {
            debug!("{} was deleted before its status was written", obj.key());
        }
        Ok(())
    }
}

/// What a reconcile pass asks of the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileResult {
    Done,
    RequeueAfter(Duration),
}

impl ReconcileResult {
    pub fn requeue_secs(secs: u64) -> Self {
        ReconcileResult::RequeueAfter(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::deployment::{Deployment, DeploymentSpec};
    use pkg_types::nodeset::{NodeSet, NodeSetSpec};

    async fn make_context() -> Context {
        let registry = Registry::in_memory().await.unwrap();
        Context::new(registry, Arc::new(OperatorConfig::default()), Vec::new())
    }

    #[tokio::test]
    async fn test_status_lands_after_concurrent_write() {
        let ctx = make_context().await;
        let read = ctx
            .registry
            .create(NodeSet::new("openstack", "compute", NodeSetSpec::default()))
            .await
            .unwrap();

        // another writer bumps the version after the pass read the object
        ctx.registry
            .create_or_patch(read.clone(), |n: &mut NodeSet| {
                n.meta.labels.insert("tier".into(), "edge".into());
            })
            .await
            .unwrap();
        let mut stale = read.clone();
        stale.status.config_hash = "abc".into();
        assert!(ctx.registry.update_status(&stale).await.is_err());

        ctx.write_status(&read, stale.status.clone()).await.unwrap();
        let stored = ctx
            .registry
            .get_required::<NodeSet>("openstack", "compute")
            .await
            .unwrap();
        assert_eq!(stored.status.config_hash, "abc");
        assert_eq!(stored.meta.labels["tier"], "edge");
        assert_eq!(stored.meta.resource_version, 3);
    }

    #[tokio::test]
    async fn test_status_of_deleted_object_is_dropped() {
        let ctx = make_context().await;
        let read = ctx
            .registry
            .create(Deployment::new("openstack", "edpm", DeploymentSpec::default()))
            .await
            .unwrap();
        ctx.registry
            .delete::<Deployment>("openstack", "edpm")
            .await
            .unwrap();

        let mut status = read.status.clone();
        status.deployed = true;
        ctx.write_status(&read, status).await.unwrap();
        assert!(
            ctx.registry
                .get::<Deployment>("openstack", "edpm")
                .await
                .unwrap()
                .is_none()
        );
    }
}
