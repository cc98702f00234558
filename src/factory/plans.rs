//! Bounded cache of resolved and translated queries.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::resolve::ResolvedQuery;
use crate::translate::Translation;

/// One concrete query of a query text, ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub query: ResolvedQuery,
    pub translation: Translation,
}

/// Query text -> plans, least recently used evicted first.
#[derive(Debug)]
pub struct PlanCache {
    entries: Mutex<IndexMap<String, Arc<[QueryPlan]>>>,
    capacity: usize,
}

impl PlanCache {
    /// Zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(IndexMap::new()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, text: &str) -> Option<Arc<[QueryPlan]>> {
        let mut entries = self.entries.lock();
        let index = entries.get_index_of(text)?;
        let last = entries.len() - 1;
        entries.move_index(index, last);
        tracing::trace!(query = text, "plan cache hit");
        entries.get_index(last).map(|(_, plans)| Arc::clone(plans))
    }

    pub fn insert(&self, text: &str, plans: Arc<[QueryPlan]>) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        entries.shift_remove(text);
        entries.insert(text.to_string(), plans);
        while entries.len() > self.capacity {
            if let Some((evicted, _)) = entries.shift_remove_index(0) {
                tracing::debug!(query = %evicted, capacity = self.capacity, "evicting query plan");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
