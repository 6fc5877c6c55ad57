use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Reverse index from a referenced object key to the keys of the objects
/// that depend on it. Dependents replace their own edge set on every
/// reconcile, so the index stays current without full scans.
#[derive(Clone, Default)]
pub struct DependencyIndex {
    inner: Arc<RwLock<IndexInner>>,
}

#[derive(Default)]
struct IndexInner {
    dependents: BTreeMap<String, BTreeSet<String>>,
    references: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `dependent` references exactly `referenced`.
    pub async fn set_references(
        &self,
        dependent: &str,
        referenced: impl IntoIterator<Item = String>,
    ) {
        let mut inner = self.inner.write().await;
        inner.unlink(dependent);
        let referenced: BTreeSet<String> = referenced.into_iter().collect();
        for key in &referenced {
            inner
                .dependents
                .entry(key.clone())
                .or_default()
                .insert(dependent.to_string());
        }
        if !referenced.is_empty() {
            inner.references.insert(dependent.to_string(), referenced);
        }
    }

    pub async fn remove_dependent(&self, dependent: &str) {
        self.inner.write().await.unlink(dependent);
    }

    /// Sorted keys of every object depending on `referenced`.
    pub async fn dependents_of(&self, referenced: &str) -> Vec<String> {
        let inner = self.inner.read().await;
        inner
            .dependents
            .get(referenced)
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl IndexInner {
    fn unlink(&mut self, dependent: &str) {
        if let Some(refs) = self.references.remove(dependent) {
            for key in refs {
                if let Some(set) = self.dependents.get_mut(&key) {
                    set.remove(dependent);
                    if set.is_empty() {
                        self.dependents.remove(&key);
                    }
                }
            }
        }
    }
}
