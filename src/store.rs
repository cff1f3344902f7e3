//! In-memory resource collections.
//!
//! Each [`Collection`] owns its own reader/writer lock. Callers never hold two
//! collection locks at once, and no method awaits anything while holding one.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

/// A record that can live in a [`Collection`].
pub trait Resource: Clone + Send + Sync + 'static {
    fn id(&self) -> Uuid;

    /// Used to give listings a stable order.
    fn created_at(&self) -> DateTime<Utc>;
}

/// Process-lifetime map of resources keyed by id.
#[derive(Debug)]
pub struct Collection<T> {
    items: RwLock<HashMap<Uuid, T>>,
}

impl<T: Resource> Collection<T> {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a resource, replacing any previous one with the same id.
    pub async fn insert(&self, item: T) {
        self.items.write().await.insert(item.id(), item);
    }

    pub async fn get(&self, id: Uuid) -> Option<T> {
        self.items.read().await.get(&id).cloned()
    }

    /// Snapshot of all resources matching `predicate`, oldest first.
    pub async fn list_where<F>(&self, predicate: F) -> Vec<T>
    where
        F: Fn(&T) -> bool,
    {
        let mut items: Vec<T> = self
            .items
            .read()
            .await
            .values()
            .filter(|item| predicate(*item))
            .cloned()
            .collect();

        items.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().cmp(&b.id()))
        });
        items
    }

    /// Apply `mutate` to the resource with `id` and return the updated copy.
    ///
    /// Returns `None` when no such resource exists.
    pub async fn update<F>(&self, id: Uuid, mutate: F) -> Option<T>
    where
        F: FnOnce(&mut T),
    {
        let mut items = self.items.write().await;
        let item = items.get_mut(&id)?;
        mutate(item);
        Some(item.clone())
    }

    pub async fn remove(&self, id: Uuid) -> Option<T> {
        self.items.write().await.remove(&id)
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<T: Resource> Default for Collection<T> {
    fn default() -> Self {
        Self::new()
    }
}
