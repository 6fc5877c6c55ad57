//! Control-loop manager: turns store events into reconcile passes.
//!
//! Work items are `(kind, namespace, name)` keys held in a de-duplicating
//! queue. A key is never handed to two workers at once, and a key added
//! while it is being processed is queued again once that pass ends.

use pkg_constants::labels;
use pkg_state::watch::WatchEvent;
use pkg_types::deployment::Deployment;
use pkg_types::meta::{ObjectMeta, Resource, parse_registry_key, registry_key};
use pkg_state::error::is_invalid_config;
use pkg_types::network::{DNSMasq, NetConfig};
use pkg_types::nodeset::NodeSet;
use pkg_types::version::Version;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::{Context, ReconcileResult};
use crate::deployment::DeploymentController;
use crate::nodeset::NodeSetController;

const MAX_ERROR_BACKOFF_SECS: u64 = 60;

/// Kinds that have a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkKind {
    NodeSet,
    Deployment,
}

impl WorkKind {
    fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            k if k == NodeSet::KIND => Some(WorkKind::NodeSet),
            k if k == Deployment::KIND => Some(WorkKind::Deployment),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkItem {
    pub kind: WorkKind,
    pub namespace: String,
    pub name: String,
}

impl WorkItem {
    pub fn node_set(namespace: &str, name: &str) -> Self {
        Self {
            kind: WorkKind::NodeSet,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn deployment(namespace: &str, name: &str) -> Self {
        Self {
            kind: WorkKind::Deployment,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// The work item for a store key, if its kind has a controller.
    pub fn from_key(key: &str) -> Option<Self> {
        let (kind, namespace, name) = parse_registry_key(key)?;
        Some(Self {
            kind: WorkKind::from_kind(kind)?,
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }
}

impl std::fmt::Display for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} {}/{}", self.kind, self.namespace, self.name)
    }
}

#[derive(Default)]
struct QueueInner {
    queue: VecDeque<WorkItem>,
    /// Items waiting to be processed
    dirty: HashSet<WorkItem>,
    processing: HashSet<WorkItem>,
    failures: HashMap<WorkItem, u32>,
    shutting_down: bool,
}

/// De-duplicating work queue shared by the watch task, the resync task and
/// the workers.
#[derive(Clone, Default)]
pub struct WorkQueue {
    inner: Arc<Mutex<QueueInner>>,
    notify: Arc<Notify>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add(&self, item: WorkItem) {
        let mut inner = self.lock();
        if inner.shutting_down || inner.dirty.contains(&item) {
            return;
        }
        inner.dirty.insert(item.clone());
        if inner.processing.contains(&item) {
            return;
        }
        inner.queue.push_back(item);
        drop(inner);
        self.notify.notify_one();
    }

    /// Add `item` once `delay` has passed.
    pub fn add_after(&self, item: WorkItem, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item);
        });
    }

    /// Wait for the next item. `None` once the queue is shut down.
    pub async fn get(&self) -> Option<WorkItem> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.lock();
                if let Some(item) = inner.queue.pop_front() {
                    inner.dirty.remove(&item);
                    inner.processing.insert(item.clone());
                    return Some(item);
                }
                if inner.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Mark a pass over `item` finished, queueing it again if it was added
    /// in the meantime.
    pub fn done(&self, item: &WorkItem) {
        let mut inner = self.lock();
        inner.processing.remove(item);
        if inner.dirty.contains(item) && !inner.shutting_down {
            inner.queue.push_back(item.clone());
            drop(inner);
            self.notify.notify_one();
        }
    }

    /// Record a failed pass and return how long to wait before the next
    /// one. Doubles per consecutive failure.
    pub fn backoff(&self, item: &WorkItem) -> Duration {
        let mut inner = self.lock();
        let failures = inner.failures.entry(item.clone()).or_insert(0);
        let secs = 1u64
            .checked_shl(*failures)
            .unwrap_or(MAX_ERROR_BACKOFF_SECS)
            .min(MAX_ERROR_BACKOFF_SECS);
        *failures = failures.saturating_add(1);
        Duration::from_secs(secs)
    }

    /// Clear the failure count of `item`.
    pub fn forget(&self, item: &WorkItem) {
        self.lock().failures.remove(item);
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shutdown(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
    }
}

#[derive(Deserialize)]
struct Envelope {
    metadata: ObjectMeta,
}

/// Kinds whose changes concern every NodeSet of their namespace.
const NAMESPACE_WIDE: [&str; 4] = [
    Deployment::KIND,
    DNSMasq::KIND,
    NetConfig::KIND,
    Version::KIND,
];

/// Work items a store event should trigger: the object itself, whatever
/// references or owns it, what its labels name, and for namespace-wide
/// kinds every NodeSet.
pub async fn items_for_event(ctx: &Context, event: &WatchEvent) -> anyhow::Result<Vec<WorkItem>> {
    let mut items = BTreeSet::new();
    let Some((kind, namespace, _)) = event.resource() else {
        return Ok(Vec::new());
    };

    let mut referenced = vec![event.key.clone()];
    if let Some(Envelope { metadata }) = event.decode::<Envelope>() {
        for owner in &metadata.owner_references {
            items.extend(WorkItem::from_key(&owner.key(namespace)));
        }
        if let Some(deployment) = metadata.labels.get(labels::RUN_DEPLOYMENT) {
            items.insert(WorkItem::deployment(namespace, deployment));
        }
        if let Some(node_set) = metadata.labels.get(labels::RUN_NODESET) {
            items.insert(WorkItem::node_set(namespace, node_set));
        }
        // certificates issued for a NodeSet concern the Deployments using it
        if let Some(node_set) = metadata.labels.get(labels::NODESET) {
            referenced.push(registry_key(NodeSet::KIND, namespace, node_set));
        }
    }
    items.extend(WorkItem::from_key(&event.key));
    for key in &referenced {
        for dependent in ctx.index.dependents_of(key).await {
            items.extend(WorkItem::from_key(&dependent));
        }
    }

    if NAMESPACE_WIDE.iter().any(|k| *k == kind) {
        for node_set in ctx.registry.list::<NodeSet>(namespace).await? {
            items.insert(WorkItem::node_set(namespace, &node_set.meta.name));
        }
    }
    if kind == Version::KIND {
        for deployment in ctx.registry.list::<Deployment>(namespace).await? {
            items.insert(WorkItem::deployment(namespace, &deployment.meta.name));
        }
    }
    Ok(items.into_iter().collect())
}

/// Runs the NodeSet and Deployment controllers over a shared work queue.
pub struct Manager {
    ctx: Context,
    queue: WorkQueue,
    node_sets: NodeSetController,
    deployments: DeploymentController,
}

/// Handle to a started manager.
pub struct ManagerHandle {
    queue: WorkQueue,
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ManagerHandle {
    /// Stop accepting work, let in-flight passes finish and wait for every
    /// task.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        self.queue.shutdown();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Manager task ended abnormally: {}", e);
            }
        }
        info!("Manager stopped");
    }
}

impl Manager {
    pub fn new(ctx: Context) -> Self {
        Self {
            node_sets: NodeSetController::new(ctx.clone()),
            deployments: DeploymentController::new(ctx.clone()),
            queue: WorkQueue::new(),
            ctx,
        }
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Start the watch task, the resync task and the workers.
    pub fn start(self) -> ManagerHandle {
        let workers = self.ctx.config.workers;
        let resync = self.ctx.config.resync_interval;
        let (stop, stop_rx) = watch::channel(false);
        let queue = self.queue.clone();
        // subscribe before the first resync so no write falls in between
        let events = self.ctx.registry.events().subscribe();
        let manager = Arc::new(self);

        info!(
            "Manager started (workers={}, resync={}s)",
            workers,
            resync.as_secs()
        );

        let mut tasks = vec![
            tokio::spawn(manager.clone().watch_loop(events, stop_rx.clone())),
            tokio::spawn(manager.clone().resync_loop(resync, stop_rx)),
        ];
        for id in 0..workers {
            tasks.push(tokio::spawn(manager.clone().worker(id)));
        }
        ManagerHandle { queue, stop, tasks }
    }

    async fn watch_loop(
        self: Arc<Self>,
        mut events: broadcast::Receiver<WatchEvent>,
        mut stop: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = stop.changed() => break,
                received = events.recv() => match received {
                    Ok(event) => match items_for_event(&self.ctx, &event).await {
                        Ok(items) => {
                            for item in items {
                                self.queue.add(item);
                            }
                        }
                        Err(e) => warn!("Failed to map event for {}: {}", event.key, e),
                    },
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Watch lagged by {} events, resyncing", missed);
                        if let Err(e) = self.resync().await {
                            warn!("Resync error: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!("Watch loop stopped");
    }

    async fn resync_loop(self: Arc<Self>, every: Duration, mut stop: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = stop.changed() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.resync().await {
                        warn!("Resync error: {}", e);
                    }
                }
            }
        }
        debug!("Resync loop stopped");
    }

    /// Queue every NodeSet and Deployment.
    pub async fn resync(&self) -> anyhow::Result<()> {
        let registry = &self.ctx.registry;
        for node_set in registry.list_all::<NodeSet>().await? {
            self.queue
                .add(WorkItem::node_set(&node_set.meta.namespace, &node_set.meta.name));
        }
        for deployment in registry.list_all::<Deployment>().await? {
            self.queue.add(WorkItem::deployment(
                &deployment.meta.namespace,
                &deployment.meta.name,
            ));
        }
        Ok(())
    }

    async fn worker(self: Arc<Self>, id: usize) {
        debug!("Worker {} started", id);
        while let Some(item) = self.queue.get().await {
            let result = self.reconcile(&item).await;
            if let Some(delay) = self.retry_delay(&item, &result) {
                self.queue.add_after(item.clone(), delay);
            }
            self.queue.done(&item);
        }
        debug!("Worker {} stopped", id);
    }

    /// When to look at `item` again after a pass, `None` to wait for an
    /// event. Invalid configuration is held: retrying cannot fix it.
    fn retry_delay(
        &self,
        item: &WorkItem,
        result: &anyhow::Result<ReconcileResult>,
    ) -> Option<Duration> {
        match result {
            Ok(ReconcileResult::Done) => {
                self.queue.forget(item);
                None
            }
            Ok(ReconcileResult::RequeueAfter(delay)) => {
                self.queue.forget(item);
                debug!("{} requeued in {}s", item, delay.as_secs());
                Some(*delay)
            }
            Err(e) if is_invalid_config(e) => {
                self.queue.forget(item);
                warn!(
                    "{:?}Controller holding {}/{} until its inputs change: {:#}",
                    item.kind, item.namespace, item.name, e
                );
                None
            }
            Err(e) => {
                warn!(
                    "{:?}Controller reconcile error for {}/{}: {:#}",
                    item.kind, item.namespace, item.name, e
                );
                Some(self.queue.backoff(item))
            }
        }
    }

    /// One pass of the controller owning `item`.
    pub async fn reconcile(&self, item: &WorkItem) -> anyhow::Result<ReconcileResult> {
        match item.kind {
            WorkKind::NodeSet => self.node_sets.reconcile(&item.namespace, &item.name).await,
            WorkKind::Deployment => {
                self.deployments
                    .reconcile(&item.namespace, &item.name)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_state::registry::Registry;
    use pkg_types::config::OperatorConfig;
    use pkg_types::condition::{DEPLOYMENT_READY, SETUP_READY, message};
    use pkg_types::deployment::DeploymentSpec;
    use pkg_types::job::AutomationRun;
    use pkg_types::nodeset::NodeSetSpec;
    use pkg_types::secret::Secret;
    use pkg_types::service::{Service, ServiceSpec};
    use std::collections::BTreeMap;

    async fn make_ctx() -> Context {
        let registry = Registry::in_memory().await.unwrap();
        Context::new(registry, Arc::new(OperatorConfig::default()), Vec::new())
    }

    fn make_nodeset(name: &str) -> NodeSet {
        let mut spec = NodeSetSpec::default();
        spec.pre_provisioned = true;
        spec.node_template.ansible_ssh_private_key_secret = "dataplane-ssh".into();
        NodeSet::new("openstack", name, spec)
    }

    #[tokio::test]
    async fn test_queue_dedups_and_requeues_after_processing() {
        let queue = WorkQueue::new();
        let item = WorkItem::node_set("openstack", "compute");
        queue.add(item.clone());
        queue.add(item.clone());
        assert_eq!(queue.len(), 1);

        let got = queue.get().await.unwrap();
        assert_eq!(got, item);
        assert!(queue.is_empty());

        // added while processing: held back until done
        queue.add(item.clone());
        assert!(queue.is_empty());
        queue.done(&got);
        assert_eq!(queue.len(), 1);

        let again = queue.get().await.unwrap();
        queue.done(&again);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_queue_shutdown_releases_waiters() {
        let queue = WorkQueue::new();
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.shutdown();
        assert_eq!(waiter.await.unwrap(), None);
        queue.add(WorkItem::node_set("openstack", "compute"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let queue = WorkQueue::new();
        let item = WorkItem::deployment("openstack", "edpm");
        let delays: Vec<u64> = (0..8).map(|_| queue.backoff(&item).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
        queue.forget(&item);
        assert_eq!(queue.backoff(&item).as_secs(), 1);
    }

    #[tokio::test]
    async fn test_event_mapping() {
        let ctx = make_ctx().await;
        let mut events = ctx.registry.events().subscribe();

        ctx.registry.create(make_nodeset("compute")).await.unwrap();
        ctx.registry.create(make_nodeset("networker")).await.unwrap();
        let nodeset_event = events.recv().await.unwrap();
        let _ = events.recv().await.unwrap();
        assert_eq!(
            items_for_event(&ctx, &nodeset_event).await.unwrap(),
            vec![WorkItem::node_set("openstack", "compute")]
        );

        ctx.registry
            .create(Deployment::new(
                "openstack",
                "edpm",
                DeploymentSpec {
                    node_sets: vec!["compute".into()],
                    ..Default::default()
                },
            ))
            .await
            .unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(
            items_for_event(&ctx, &event).await.unwrap(),
            vec![
                WorkItem::node_set("openstack", "compute"),
                WorkItem::node_set("openstack", "networker"),
                WorkItem::deployment("openstack", "edpm"),
            ]
        );

        let mut run_labels = BTreeMap::new();
        run_labels.insert(labels::RUN_DEPLOYMENT.to_string(), "edpm".to_string());
        ctx.registry
            .create(AutomationRun {
                meta: ObjectMeta::new("openstack", "bootstrap-edpm-compute")
                    .with_labels(run_labels),
                spec: Default::default(),
                status: Default::default(),
            })
            .await
            .unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(
            items_for_event(&ctx, &event).await.unwrap(),
            vec![WorkItem::deployment("openstack", "edpm")]
        );

        ctx.index
            .set_references(
                &registry_key(NodeSet::KIND, "openstack", "compute"),
                vec![registry_key(Secret::KIND, "openstack", "dataplane-ssh")],
            )
            .await;
        ctx.registry
            .create(Secret::new("openstack", "dataplane-ssh"))
            .await
            .unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(
            items_for_event(&ctx, &event).await.unwrap(),
            vec![WorkItem::node_set("openstack", "compute")]
        );

        ctx.registry
            .create(DNSMasq {
                meta: ObjectMeta::new("openstack", "dns"),
                status: Default::default(),
            })
            .await
            .unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(
            items_for_event(&ctx, &event).await.unwrap(),
            vec![
                WorkItem::node_set("openstack", "compute"),
                WorkItem::node_set("openstack", "networker"),
            ]
        );
    }

    #[tokio::test]
    async fn test_owned_objects_map_to_owner() {
        let ctx = make_ctx().await;
        let node_set = ctx.registry.create(make_nodeset("compute")).await.unwrap();
        let mut events = ctx.registry.events().subscribe();
        ctx.registry
            .create(Secret {
                meta: ObjectMeta::new("openstack", "dataplanenodeset-compute")
                    .owned_by(&node_set),
                data: BTreeMap::new(),
            })
            .await
            .unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(
            items_for_event(&ctx, &event).await.unwrap(),
            vec![WorkItem::node_set("openstack", "compute")]
        );
    }

    #[tokio::test]
    async fn test_manager_reconciles_new_nodesets() {
        let ctx = make_ctx().await;
        let registry = ctx.registry.clone();
        let handle = Manager::new(ctx).start();

        registry.create(make_nodeset("compute")).await.unwrap();
        let reconciled = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let ns = registry
                    .get_required::<NodeSet>("openstack", "compute")
                    .await
                    .unwrap();
                if ns.status.conditions.iter().count() > 0 {
                    return ns;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        assert!(!reconciled.status.conditions.is_true(pkg_types::condition::READY));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_config_is_held() {
        let ctx = make_ctx().await;
        ctx.registry
            .create(Service::new(
                "openstack",
                "update",
                ServiceSpec {
                    deploy_on_all_node_sets: true,
                    ..Default::default()
                },
            ))
            .await
            .unwrap();
        for name in ["compute", "networker"] {
            let mut node_set = make_nodeset(name);
            node_set.spec.services = vec!["update".into()];
            ctx.registry.create(node_set).await.unwrap();
            ctx.registry
                .patch_status::<NodeSet, _>("openstack", name, 3, |s| {
                    s.conditions.mark_true(SETUP_READY, message::SETUP_READY);
                })
                .await
                .unwrap();
        }
        ctx.registry
            .create(Deployment::new(
                "openstack",
                "edpm",
                DeploymentSpec {
                    node_sets: vec!["compute".into(), "networker".into()],
                    ..Default::default()
                },
            ))
            .await
            .unwrap();

        let registry = ctx.registry.clone();
        let manager = Manager::new(ctx);
        let item = WorkItem::deployment("openstack", "edpm");
        let result = manager.reconcile(&item).await;
        assert!(is_invalid_config(result.as_ref().unwrap_err()));
        assert_eq!(manager.retry_delay(&item, &result), None);
        assert!(manager.queue().is_empty());
        // no failure was counted against the item
        assert_eq!(manager.queue().backoff(&item).as_secs(), 1);

        let deployment = registry
            .get_required::<Deployment>("openstack", "edpm")
            .await
            .unwrap();
        assert!(deployment.status.conditions.is_error(DEPLOYMENT_READY));

        // other failures are retried with backoff
        manager.queue().forget(&item);
        let transient = Err(anyhow::anyhow!("store unavailable"));
        assert_eq!(
            manager.retry_delay(&item, &transient),
            Some(Duration::from_secs(1))
        );
        assert_eq!(
            manager.retry_delay(&item, &transient),
            Some(Duration::from_secs(2))
        );
    }
}
