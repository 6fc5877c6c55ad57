use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Parent → children registry built from owner references.
/// Drives cascading deletes in a deterministic order.
#[derive(Clone, Default)]
pub struct OwnerRegistry {
    inner: Arc<RwLock<OwnerInner>>,
}

#[derive(Default)]
struct OwnerInner {
    children: BTreeMap<String, BTreeSet<String>>,
    parents: BTreeMap<String, BTreeSet<String>>,
}

impl OwnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the recorded parents of `child`.
    pub async fn track(&self, child: &str, parents: impl IntoIterator<Item = String>) {
        let mut inner = self.inner.write().await;
        inner.unlink(child);
        let parents: BTreeSet<String> = parents.into_iter().collect();
        for parent in &parents {
            inner
                .children
                .entry(parent.clone())
                .or_default()
                .insert(child.to_string());
        }
        if !parents.is_empty() {
            inner.parents.insert(child.to_string(), parents);
        }
    }

    /// Drop every edge touching `key`.
    pub async fn forget(&self, key: &str) {
        let mut inner = self.inner.write().await;
        inner.unlink(key);
        inner.children.remove(key);
    }

    pub async fn children(&self, parent: &str) -> Vec<String> {
        let inner = self.inner.read().await;
        inner
            .children
            .get(parent)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Keys to delete when `root` goes away: descendants depth-first in
    /// sorted order, each before its parent, `root` last.
    pub async fn teardown_order(&self, root: &str) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut order = Vec::new();
        let mut visited = BTreeSet::new();
        inner.post_order(root, &mut visited, &mut order);
        order
    }
}

impl OwnerInner {
    fn unlink(&mut self, child: &str) {
        if let Some(parents) = self.parents.remove(child) {
            for parent in parents {
                if let Some(set) = self.children.get_mut(&parent) {
                    set.remove(child);
                    if set.is_empty() {
                        self.children.remove(&parent);
                    }
                }
            }
        }
    }

    fn post_order(&self, key: &str, visited: &mut BTreeSet<String>, order: &mut Vec<String>) {
        if !visited.insert(key.to_string()) {
            return;
        }
        if let Some(children) = self.children.get(key) {
            for child in children {
                self.post_order(child, visited, order);
            }
        }
        order.push(key.to_string());
    }
}
