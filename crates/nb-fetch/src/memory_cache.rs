//! Process-wide keyed resource store with recency and dead-entry sweeps.
//!
//! The cache is an explicit, constructor-injected instance; nothing here
//! is a singleton, so tests run independent caches side by side.

use crate::resource::ResourceHandle;
use log::debug;
use std::collections::HashMap;
use std::rc::Rc;

/// Cache key: normalized URL scoped by an opaque partition identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub url: String,
    pub partition: String,
}

impl CacheKey {
    pub fn new(url: &str, partition: &str) -> Self {
        Self {
            url: url.to_owned(),
            partition: partition.to_owned(),
        }
    }
}

/// `(url, partition) → Resource` store. At most one entry per key;
/// membership is orthogonal to active-load tracking, so evicting a
/// loading resource cancels nothing by itself.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: HashMap<CacheKey, ResourceHandle>,
    // Most recently used at the back.
    access_order: Vec<CacheKey>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key_for(resource: &ResourceHandle) -> CacheKey {
        let inner = resource.borrow();
        CacheKey::new(inner.url().as_str(), inner.cache_partition())
    }

    /// Inserts a resource, evicting any previous entry under the same
    /// key. Non-cacheable resources are refused.
    pub fn add(&mut self, resource: ResourceHandle) -> bool {
        if !resource.borrow().is_cacheable() {
            debug!(
                "memory cache refused non-cacheable entry `{}`",
                resource.borrow().url().as_str()
            );
            return false;
        }

        let key = Self::key_for(&resource);
        if self.entries.insert(key.clone(), resource).is_some() {
            self.access_order.retain(|existing| *existing != key);
        }
        self.access_order.push(key);
        true
    }

    pub fn remove(&mut self, resource: &ResourceHandle) -> bool {
        let key = Self::key_for(resource);
        let removed = match self.entries.get(&key) {
            Some(existing) if Rc::ptr_eq(existing, resource) => self.entries.remove(&key),
            _ => None,
        };

        if removed.is_some() {
            self.access_order.retain(|existing| *existing != key);
            return true;
        }

        false
    }

    pub fn resource_for_url(&self, url: &str, partition: &str) -> Option<ResourceHandle> {
        self.entries.get(&CacheKey::new(url, partition)).cloned()
    }

    pub fn contains(&self, resource: &ResourceHandle) -> bool {
        let key = Self::key_for(resource);
        self.entries
            .get(&key)
            .is_some_and(|existing| Rc::ptr_eq(existing, resource))
    }

    /// Recency bump for a `Use` decision.
    pub fn update_for_access(&mut self, resource: &ResourceHandle) {
        let key = Self::key_for(resource);
        if self.entries.contains_key(&key) {
            self.access_order.retain(|existing| *existing != key);
            self.access_order.push(key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cache-disabled mode: drop everything at once.
    pub fn evict_all(&mut self) {
        self.entries.clear();
        self.access_order.clear();
    }

    /// Drops entries whose only remaining strong reference is the
    /// cache's own, oldest first. Returns the number evicted.
    pub fn sweep_dead_resources(&mut self) -> usize {
        let dead: Vec<CacheKey> = self
            .access_order
            .iter()
            .filter(|key| {
                self.entries
                    .get(key)
                    .is_some_and(|resource| Rc::strong_count(resource) == 1)
            })
            .cloned()
            .collect();

        for key in &dead {
            self.entries.remove(key);
            self.access_order.retain(|existing| existing != key);
        }

        if !dead.is_empty() {
            debug!("memory cache swept {} dead entries", dead.len());
        }
        dead.len()
    }
}
