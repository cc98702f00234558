//! Memoized root-name imports.
//!
//! Valid imports are bounded by the metamodel itself. Names that matched no
//! entity come from arbitrary query text, so that side is capped and evicts
//! its oldest entry when full.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

/// Outcome of a cached import lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportLookup {
    /// Qualified names of every matching entity, in registration order.
    Valid(Arc<[String]>),
    /// Known not to name an entity; passed through unchanged.
    Invalid,
    Unknown,
}

#[derive(Debug, Default)]
struct InvalidImports {
    names: HashSet<String>,
    order: VecDeque<String>,
}

/// Shared by every session of a factory.
#[derive(Debug)]
pub struct ImportCache {
    valid: DashMap<String, Arc<[String]>>,
    invalid: Mutex<InvalidImports>,
    capacity: usize,
}

impl Default for ImportCache {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl ImportCache {
    /// `capacity` bounds the invalid side; zero disables it.
    pub fn new(capacity: usize) -> Self {
        Self {
            valid: DashMap::new(),
            invalid: Mutex::new(InvalidImports::default()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn lookup(&self, name: &str) -> ImportLookup {
        if let Some(entry) = self.valid.get(name) {
            tracing::trace!(name, "import cache hit");
            return ImportLookup::Valid(Arc::clone(entry.value()));
        }
        if self.invalid.lock().names.contains(name) {
            tracing::trace!(name, "invalid import cache hit");
            return ImportLookup::Invalid;
        }
        ImportLookup::Unknown
    }

    pub fn record_valid(&self, name: &str, qualified: Arc<[String]>) {
        self.valid.insert(name.to_string(), qualified);
    }

    pub fn record_invalid(&self, name: &str) {
        if self.capacity == 0 {
            return;
        }
        let mut invalid = self.invalid.lock();
        if !invalid.names.insert(name.to_string()) {
            return;
        }
        invalid.order.push_back(name.to_string());
        while invalid.order.len() > self.capacity {
            if let Some(evicted) = invalid.order.pop_front() {
                invalid.names.remove(&evicted);
                tracing::warn!(name = %evicted, capacity = self.capacity, "evicting invalid import");
            }
        }
    }

    pub fn valid_len(&self) -> usize {
        self.valid.len()
    }

    pub fn invalid_len(&self) -> usize {
        self.invalid.lock().names.len()
    }

    pub fn clear(&self) {
        self.valid.clear();
        let mut invalid = self.invalid.lock();
        invalid.names.clear();
        invalid.order.clear();
    }
}
