//! Entity instances and their per-session state.
//!
//! An [`Entity`] is a shared handle: every load of the same row within a
//! session returns a clone of one handle, and [`Entity::ptr_eq`] tells two
//! identities apart. Attribute values live in slots that may be unloaded
//! (lazy); the session fills them on demand.

use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

use crate::engine::{KeyValue, Value};
use crate::metamodel::{AssociationKind, EntityDescriptor};

use super::{AccessError, Session, SessionError};

/// Lifecycle status of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Created by the application, not yet persisted.
    Transient,
    /// Being populated from a row.
    Loading,
    Managed,
    /// Removed; deleted from the database at the next flush.
    Deleted,
    /// No longer tracked by its session. Identifier and snapshot stay
    /// readable; the instance can no longer change.
    Detached,
}

/// An attribute value that may not have been fetched yet.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Loaded(Value),
    Unloaded,
}

impl Slot {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Slot::Loaded(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Slot::Loaded(value) => Some(value),
            Slot::Unloaded => None,
        }
    }
}

/// State of one association of an instance.
#[derive(Clone)]
pub(crate) enum Link {
    /// Owning to-one known only by its foreign key.
    Key(Option<KeyValue>),
    /// Owning to-one bound to an instance.
    Target(Option<Entity>),
    /// Inverse collection; `None` until loaded.
    Collection(Option<Vec<Entity>>),
}

/// Column values as last read from or written to the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Per attribute; `None` when the attribute was not loaded.
    pub attributes: Vec<Option<Value>>,
    /// Foreign key per association; always `None` for inverse sides.
    pub foreign_keys: Vec<Option<KeyValue>>,
    /// Row presence per table; `None` when unknown.
    pub tables: Vec<Option<bool>>,
}

pub(crate) struct EntityState {
    pub descriptor: Arc<EntityDescriptor>,
    pub id: Option<KeyValue>,
    pub attributes: Vec<Slot>,
    pub links: Vec<Link>,
    /// Current row presence per table.
    pub tables: Vec<Option<bool>>,
    pub status: Status,
    /// `None` until the instance has a database row.
    pub snapshot: Option<Snapshot>,
}

/// Handle to one entity instance.
#[derive(Clone)]
pub struct Entity(Arc<RwLock<EntityState>>);

impl Entity {
    /// A new transient instance with every attribute null.
    pub fn new(descriptor: &Arc<EntityDescriptor>) -> Self {
        let links = descriptor
            .associations
            .iter()
            .map(|a| match a.kind {
                AssociationKind::ToOne { .. } | AssociationKind::InverseToOne { .. } => {
                    Link::Target(None)
                }
                AssociationKind::OneToMany { .. } => Link::Collection(Some(Vec::new())),
            })
            .collect();
        Self::from_state(EntityState {
            descriptor: Arc::clone(descriptor),
            id: None,
            attributes: vec![Slot::Loaded(Value::Null); descriptor.attributes.len()],
            links,
            tables: vec![None; descriptor.tables.len()],
            status: Status::Transient,
            snapshot: None,
        })
    }

    pub(crate) fn from_state(state: EntityState) -> Self {
        Self(Arc::new(RwLock::new(state)))
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, EntityState> {
        self.0.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, EntityState> {
        self.0.write()
    }

    /// Whether both handles denote the same instance.
    pub fn ptr_eq(&self, other: &Entity) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn descriptor(&self) -> Arc<EntityDescriptor> {
        Arc::clone(&self.read().descriptor)
    }

    pub fn entity_name(&self) -> String {
        self.read().descriptor.qualified_name.clone()
    }

    pub fn id(&self) -> Option<KeyValue> {
        self.read().id.clone()
    }

    pub fn status(&self) -> Status {
        self.read().status
    }

    /// The snapshot taken when the row was last read or written.
    pub fn snapshot(&self) -> Option<Snapshot> {
        self.read().snapshot.clone()
    }

    /// Assign the identifier of a transient instance.
    pub fn set_id(&self, id: impl Into<KeyValue>) -> Result<(), AccessError> {
        let mut state = self.write();
        if state.status != Status::Transient {
            return Err(AccessError::IdentifierChange(
                state.descriptor.qualified_name.clone(),
            ));
        }
        state.id = Some(id.into());
        Ok(())
    }

    /// Whether `name` can be read without a round trip.
    pub fn is_loaded(&self, name: &str) -> Result<bool, AccessError> {
        let state = self.read();
        if name == state.descriptor.identifier.name {
            return Ok(true);
        }
        let (index, _) = attribute_index(&state, name)?;
        Ok(state.attributes[index].is_loaded())
    }

    /// Read an attribute or the identifier. Unloaded lazy attributes fail
    /// with [`AccessError::NotLoaded`]; use [`Entity::load`] for those.
    pub fn get(&self, name: &str) -> Result<Value, AccessError> {
        let state = self.read();
        if name == state.descriptor.identifier.name {
            return Ok(state.id.clone().map_or(Value::Null, Value::from));
        }
        let (index, _) = attribute_index(&state, name)?;
        match &state.attributes[index] {
            Slot::Loaded(value) => Ok(value.clone()),
            Slot::Unloaded => Err(AccessError::NotLoaded {
                entity: state.descriptor.qualified_name.clone(),
                attribute: name.to_string(),
            }),
        }
    }

    /// Read `name`, fetching it through `session` when it is lazy and not
    /// loaded yet.
    pub fn load(&self, name: &str, session: &mut Session) -> Result<Value, SessionError> {
        session.load_attribute(self, name)
    }

    /// Write an attribute. Writing an unloaded lazy attribute marks it
    /// loaded without fetching it.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<(), AccessError> {
        let value = value.into();
        let mut state = self.write();
        check_writable(&state)?;
        if name == state.descriptor.identifier.name {
            if state.status != Status::Transient {
                return Err(AccessError::IdentifierChange(
                    state.descriptor.qualified_name.clone(),
                ));
            }
            state.id = KeyValue::try_from(&value).ok();
            return Ok(());
        }
        let (index, ty) = attribute_index(&state, name)?;
        state.attributes[index] = Slot::Loaded(value.coerce(ty));
        Ok(())
    }

    /// Point a to-one association at `target`, or clear it.
    pub fn set_reference(&self, name: &str, target: Option<&Entity>) -> Result<(), AccessError> {
        let mut state = self.write();
        check_writable(&state)?;
        let index = association_index(&state, name)?;
        if matches!(state.links[index], Link::Collection(_)) {
            return Err(AccessError::NotToOne {
                entity: state.descriptor.qualified_name.clone(),
                association: name.to_string(),
            });
        }
        state.links[index] = Link::Target(target.cloned());
        Ok(())
    }

    /// Foreign key a to-one association currently holds.
    pub fn reference_key(&self, name: &str) -> Result<Option<KeyValue>, AccessError> {
        let link = {
            let state = self.read();
            let index = association_index(&state, name)?;
            state.links[index].clone()
        };
        match link {
            Link::Key(key) => Ok(key),
            Link::Target(target) => Ok(target.and_then(|t| t.id())),
            Link::Collection(_) => Err(AccessError::NotToOne {
                entity: self.entity_name(),
                association: name.to_string(),
            }),
        }
    }

    /// Add `element` to a loaded collection.
    pub fn add(&self, name: &str, element: &Entity) -> Result<(), AccessError> {
        let mut state = self.write();
        check_writable(&state)?;
        let index = association_index(&state, name)?;
        let entity = state.descriptor.qualified_name.clone();
        match &mut state.links[index] {
            Link::Collection(Some(elements)) => {
                if !elements.iter().any(|e| e.ptr_eq(element)) {
                    elements.push(element.clone());
                }
                Ok(())
            }
            Link::Collection(None) => Err(AccessError::NotLoaded {
                entity,
                attribute: name.to_string(),
            }),
            _ => Err(AccessError::NotCollection {
                entity,
                association: name.to_string(),
            }),
        }
    }

    /// Current foreign key per association, resolving bound targets. A
    /// target that has no identifier yet is reported by association index.
    pub(crate) fn foreign_keys(&self) -> Result<Vec<Option<KeyValue>>, usize> {
        let (descriptor, links) = {
            let state = self.read();
            (Arc::clone(&state.descriptor), state.links.clone())
        };
        links
            .into_iter()
            .zip(&descriptor.associations)
            .enumerate()
            .map(|(index, (link, association))| match link {
                _ if association.fk_column().is_none() => Ok(None),
                Link::Key(key) => Ok(key),
                Link::Target(None) | Link::Collection(_) => Ok(None),
                Link::Target(Some(target)) if target.ptr_eq(self) => Ok(self.id()),
                Link::Target(Some(target)) => match (target.status(), target.id()) {
                    (Status::Transient, _) | (_, None) => Err(index),
                    (_, Some(key)) => Ok(Some(key)),
                },
            })
            .collect()
    }

    /// Record the current values as the database state.
    pub(crate) fn refresh_snapshot(&self) {
        let foreign_keys = match self.foreign_keys() {
            Ok(keys) => keys,
            Err(_) => {
                let state = self.read();
                state
                    .links
                    .iter()
                    .map(|link| match link {
                        Link::Key(key) => key.clone(),
                        _ => None,
                    })
                    .collect()
            }
        };
        let mut state = self.write();
        state.snapshot = Some(Snapshot {
            attributes: state
                .attributes
                .iter()
                .map(|slot| slot.value().cloned())
                .collect(),
            foreign_keys,
            tables: state.tables.clone(),
        });
    }

    pub(crate) fn set_status(&self, status: Status) {
        self.write().status = status;
    }

    /// Targets reachable through associations whose cascade flag `pick`
    /// selects: bound to-one targets and loaded collection elements.
    pub(crate) fn cascade_targets(
        &self,
        pick: impl Fn(&crate::metamodel::Cascade) -> bool,
    ) -> Vec<Entity> {
        let state = self.read();
        let mut targets = Vec::new();
        for (association, link) in state.descriptor.associations.iter().zip(&state.links) {
            if !pick(&association.cascade) {
                continue;
            }
            match link {
                Link::Target(Some(target)) => targets.push(target.clone()),
                Link::Collection(Some(elements)) => targets.extend(elements.iter().cloned()),
                _ => {}
            }
        }
        targets
    }
}

fn check_writable(state: &EntityState) -> Result<(), AccessError> {
    match state.status {
        Status::Detached => Err(AccessError::Detached(state.descriptor.qualified_name.clone())),
        Status::Deleted => Err(AccessError::Removed(state.descriptor.qualified_name.clone())),
        _ => Ok(()),
    }
}

fn attribute_index(
    state: &EntityState,
    name: &str,
) -> Result<(usize, crate::metamodel::ValueType), AccessError> {
    state
        .descriptor
        .attribute(name)
        .map(|(index, attribute)| (index, attribute.ty))
        .ok_or_else(|| AccessError::UnknownProperty {
            entity: state.descriptor.qualified_name.clone(),
            property: name.to_string(),
        })
}

pub(crate) fn association_index(state: &EntityState, name: &str) -> Result<usize, AccessError> {
    state
        .descriptor
        .association(name)
        .map(|(index, _)| index)
        .ok_or_else(|| AccessError::UnknownProperty {
            entity: state.descriptor.qualified_name.clone(),
            property: name.to_string(),
        })
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Entity {}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("Entity")
            .field("entity", &state.descriptor.qualified_name)
            .field("id", &state.id)
            .field("status", &state.status)
            .finish()
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        match &state.id {
            Some(id) => write!(f, "{}#{}", state.descriptor.qualified_name, id),
            None => write!(f, "{}#<unsaved>", state.descriptor.qualified_name),
        }
    }
}
