//! Second-level cache contract and an in-memory implementation.
//!
//! The cache outlives sessions and is shared by every session of a
//! factory. It stores snapshots, never live instances, so each session
//! still builds its own object for a cached row.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::engine::KeyValue;
use crate::metamodel::{AssociationKind, EntityDescriptor};

use super::entity::{Entity, EntityState, Link, Slot, Snapshot, Status};
use super::identity::EntityKey;

/// Cached state of one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntity {
    /// Qualified name of the concrete entity.
    pub entity: String,
    pub snapshot: Snapshot,
}

pub trait SecondLevelCache: Send + Sync + fmt::Debug {
    fn get(&self, key: &EntityKey) -> Option<CachedEntity>;

    fn put(&self, key: EntityKey, entry: CachedEntity);

    fn invalidate(&self, key: &EntityKey);

    /// Drop everything, after bulk statements the cache cannot track.
    fn clear(&self);
}

#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: DashMap<EntityKey, CachedEntity>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SecondLevelCache for InMemoryCache {
    fn get(&self, key: &EntityKey) -> Option<CachedEntity> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn put(&self, key: EntityKey, entry: CachedEntity) {
        self.entries.insert(key, entry);
    }

    fn invalidate(&self, key: &EntityKey) {
        self.entries.remove(key);
    }

    fn clear(&self) {
        self.entries.clear();
    }
}

/// A managed instance rebuilt from a cached snapshot.
pub(crate) fn restore(descriptor: &Arc<EntityDescriptor>, id: KeyValue, snapshot: Snapshot) -> Entity {
    let attributes = snapshot
        .attributes
        .iter()
        .map(|value| match value {
            Some(value) => Slot::Loaded(value.clone()),
            None => Slot::Unloaded,
        })
        .collect();
    let links = descriptor
        .associations
        .iter()
        .enumerate()
        .map(|(index, association)| match association.kind {
            AssociationKind::ToOne { .. } => {
                Link::Key(snapshot.foreign_keys.get(index).cloned().flatten())
            }
            AssociationKind::OneToMany { .. } => Link::Collection(None),
            AssociationKind::InverseToOne { .. } => Link::Key(Some(id.clone())),
        })
        .collect();
    Entity::from_state(EntityState {
        descriptor: Arc::clone(descriptor),
        id: Some(id),
        attributes,
        links,
        tables: snapshot.tables.clone(),
        status: Status::Managed,
        snapshot: Some(snapshot),
    })
}
