//! The identity map: one instance per (hierarchy root, identifier).

use std::fmt;

use indexmap::IndexMap;

use crate::engine::KeyValue;
use crate::metamodel::{EntityDescriptor, Metamodel};

use super::entity::Entity;

/// Identity of a row. Subclasses share their root's key space, so a
/// `Manager` and an `Employee` with the same id are the same row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    /// Qualified name of the hierarchy root.
    pub root: String,
    pub id: KeyValue,
}

impl EntityKey {
    pub fn new(root: impl Into<String>, id: impl Into<KeyValue>) -> Self {
        Self {
            root: root.into(),
            id: id.into(),
        }
    }

    pub fn of(metamodel: &Metamodel, entity: &EntityDescriptor, id: KeyValue) -> Self {
        Self {
            root: metamodel.root_of(entity).qualified_name.clone(),
            id,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.root, self.id)
    }
}

/// Managed instances in the order they entered the session.
#[derive(Debug, Default)]
pub struct IdentityMap {
    entries: IndexMap<EntityKey, Entity>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &EntityKey) -> Option<&Entity> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &EntityKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Track `entity` under `key`, returning the instance already there.
    pub fn insert(&mut self, key: EntityKey, entity: Entity) -> Option<Entity> {
        self.entries.insert(key, entity)
    }

    pub fn remove(&mut self, key: &EntityKey) -> Option<Entity> {
        self.entries.shift_remove(key)
    }

    /// Key under which this exact instance is tracked.
    pub fn key_of(&self, entity: &Entity) -> Option<&EntityKey> {
        self.entries
            .iter()
            .find(|(_, e)| e.ptr_eq(entity))
            .map(|(key, _)| key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityKey, &Entity)> {
        self.entries.iter()
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entries.values()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (EntityKey, Entity)> + '_ {
        self.entries.drain(..)
    }
}
