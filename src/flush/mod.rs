//! Flush planning: dirty checking by snapshot diff and dependency-ordered
//! write operations.
//!
//! The planner reads the identity map and emits, in order:
//!
//! 1. inserts of new instances, foreign key targets first, each instance's
//!    tables root first; optional secondary rows only when they hold a value
//! 2. updates of changed columns only, grouped per owning table, with the
//!    version increment on the version column's table
//! 3. deletes of removed instances, referencing instances first, each
//!    instance's tables root last
//!
//! Cascades are applied by the session before planning.

mod operation;
mod order;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::engine::{KeyValue, Value};
use crate::metamodel::{EntityDescriptor, Metamodel};
use crate::session::entity::{Link, Slot};
use crate::session::{Entity, EntityKey, IdentityMap, Snapshot, Status};

pub use operation::{MissingRow, VersionCheck, WriteKind, WriteOperation};

#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    #[error("Cyclic foreign key dependency between {}", .0.join(", "))]
    CyclicDependency(Vec<String>),

    #[error("{entity}.{association} references an unsaved instance")]
    TransientReference { entity: String, association: String },
}

/// Everything the planner needs from one tracked instance.
struct Image {
    entity: Entity,
    key: EntityKey,
    descriptor: Arc<EntityDescriptor>,
    attributes: Vec<Slot>,
    foreign_keys: Vec<Option<KeyValue>>,
    targets: Vec<Option<Entity>>,
    tables: Vec<Option<bool>>,
    snapshot: Option<Snapshot>,
}

impl Image {
    fn capture(key: &EntityKey, entity: &Entity, status: Status) -> Result<Self, FlushError> {
        let (descriptor, attributes, targets, tables, snapshot) = {
            let state = entity.read();
            let targets = state
                .links
                .iter()
                .map(|link| match link {
                    Link::Target(target) => target.clone(),
                    _ => None,
                })
                .collect();
            (
                Arc::clone(&state.descriptor),
                state.attributes.clone(),
                targets,
                state.tables.clone(),
                state.snapshot.clone(),
            )
        };
        let foreign_keys = match entity.foreign_keys() {
            Ok(keys) => keys,
            // removed instances are deleted by key; their references no longer matter
            Err(_) if status == Status::Deleted => snapshot
                .as_ref()
                .map(|s| s.foreign_keys.clone())
                .unwrap_or_default(),
            Err(index) => {
                return Err(FlushError::TransientReference {
                    entity: descriptor.qualified_name.clone(),
                    association: descriptor.associations[index].name.clone(),
                })
            }
        };
        Ok(Self {
            entity: entity.clone(),
            key: key.clone(),
            descriptor,
            attributes,
            foreign_keys,
            targets,
            tables,
            snapshot,
        })
    }

    fn operation(&self, table_index: usize, kind: WriteKind) -> WriteOperation {
        let table = &self.descriptor.tables[table_index];
        WriteOperation {
            entity: self.entity.clone(),
            key: self.key.id.clone(),
            table_index,
            table: table.name.clone(),
            key_column: table.key_column.clone(),
            kind,
        }
    }

    /// Current attribute and foreign key columns stored in `table`.
    fn table_columns(&self, table: usize) -> Vec<(String, Value)> {
        let attributes = self
            .descriptor
            .attributes
            .iter()
            .zip(&self.attributes)
            .filter(|(attribute, _)| attribute.table == table)
            .filter_map(|(attribute, slot)| {
                slot.value().map(|value| (attribute.column.clone(), value.clone()))
            });
        let references = self
            .descriptor
            .associations
            .iter()
            .zip(&self.foreign_keys)
            .filter_map(|(association, key)| match association.fk_column() {
                // a derived identifier's column is written as the key
                Some((column, t)) if t == table && column != self.descriptor.tables[t].key_column => {
                    Some((column.to_string(), key.clone().map_or(Value::Null, Value::from)))
                }
                _ => None,
            });
        attributes.chain(references).collect()
    }

    /// Whether every column of `table` is known to be null.
    fn table_all_null(&self, table: usize) -> bool {
        let attributes_null = self
            .descriptor
            .attributes
            .iter()
            .zip(&self.attributes)
            .filter(|(attribute, _)| attribute.table == table)
            .all(|(_, slot)| slot.value().is_some_and(Value::is_null));
        let references_null = self
            .descriptor
            .associations
            .iter()
            .zip(&self.foreign_keys)
            .filter(|(association, _)| association.fk_column().is_some_and(|(_, t)| t == table))
            .all(|(_, key)| key.is_none());
        attributes_null && references_null
    }

    fn snapshot_version(&self) -> i64 {
        self.descriptor
            .version
            .and_then(|index| {
                self.snapshot
                    .as_ref()
                    .and_then(|s| s.attributes.get(index).cloned().flatten())
            })
            .and_then(|value| value.as_i64())
            .unwrap_or(0)
    }

    fn version_check(&self) -> Option<(usize, VersionCheck)> {
        let attribute = self.descriptor.version_attribute()?;
        Some((
            attribute.table,
            VersionCheck {
                column: attribute.column.clone(),
                expected: self.snapshot_version(),
            },
        ))
    }
}

/// Computes the write operations a flush must run.
#[derive(Debug, Clone, Copy)]
pub struct FlushPlanner<'a> {
    metamodel: &'a Metamodel,
}

impl<'a> FlushPlanner<'a> {
    pub fn new(metamodel: &'a Metamodel) -> Self {
        Self { metamodel }
    }

    pub fn plan(&self, identity: &IdentityMap) -> Result<Vec<WriteOperation>, FlushError> {
        let mut inserts = Vec::new();
        let mut updates = Vec::new();
        let mut deletes = Vec::new();
        for (key, entity) in identity.iter() {
            let status = entity.status();
            let has_row = entity.read().snapshot.is_some();
            match (status, has_row) {
                (Status::Managed, false) => inserts.push(Image::capture(key, entity, status)?),
                (Status::Managed, true) => updates.push(Image::capture(key, entity, status)?),
                (Status::Deleted, true) => deletes.push(Image::capture(key, entity, status)?),
                _ => {}
            }
        }

        let mut operations = Vec::new();
        for index in self.insert_order(&inserts)? {
            operations.extend(self.insert_operations(&inserts[index]));
        }
        for image in &updates {
            operations.extend(self.update_operations(image));
        }
        for index in self.delete_order(&deletes)? {
            operations.extend(self.delete_operations(&deletes[index]));
        }

        tracing::debug!(
            inserts = inserts.len(),
            updates = updates.len(),
            deletes = deletes.len(),
            operations = operations.len(),
            "flush planned"
        );
        Ok(operations)
    }

    /// New instances, referenced instances first.
    fn insert_order(&self, inserts: &[Image]) -> Result<Vec<usize>, FlushError> {
        let position: HashMap<usize, usize> = inserts
            .iter()
            .enumerate()
            .map(|(i, image)| (image.entity.addr(), i))
            .collect();
        let mut edges = Vec::new();
        for (index, image) in inserts.iter().enumerate() {
            for target in image.targets.iter().flatten() {
                if let Some(&target_index) = position.get(&target.addr()) {
                    edges.push((target_index, index));
                }
            }
        }
        order::dependency_order(inserts.len(), &edges).map_err(|cycle| cyclic(inserts, cycle))
    }

    /// Removed instances, referencing instances first.
    fn delete_order(&self, deletes: &[Image]) -> Result<Vec<usize>, FlushError> {
        let position: HashMap<&EntityKey, usize> = deletes
            .iter()
            .enumerate()
            .map(|(i, image)| (&image.key, i))
            .collect();
        let mut edges = Vec::new();
        for (index, image) in deletes.iter().enumerate() {
            for (association, key) in image.descriptor.associations.iter().zip(&image.foreign_keys) {
                let (Some(key), Some(target)) =
                    (key, self.metamodel.by_qualified_name(&association.target))
                else {
                    continue;
                };
                let target_key = EntityKey::of(self.metamodel, target, key.clone());
                if let Some(&target_index) = position.get(&target_key) {
                    edges.push((index, target_index));
                }
            }
        }
        order::dependency_order(deletes.len(), &edges).map_err(|cycle| cyclic(deletes, cycle))
    }

    fn insert_operations(&self, image: &Image) -> Vec<WriteOperation> {
        let mut operations = Vec::with_capacity(image.descriptor.tables.len());
        for (index, table) in image.descriptor.tables.iter().enumerate() {
            let columns = image.table_columns(index);
            if table.is_optional() && image.table_all_null(index) {
                continue;
            }
            operations.push(image.operation(index, WriteKind::Insert { columns }));
        }
        operations
    }

    fn update_operations(&self, image: &Image) -> Vec<WriteOperation> {
        let Some(snapshot) = &image.snapshot else {
            return Vec::new();
        };
        let descriptor = &image.descriptor;
        let mut changes: BTreeMap<usize, Vec<(String, Value)>> = BTreeMap::new();

        for (index, attribute) in descriptor.attributes.iter().enumerate() {
            if descriptor.version == Some(index) {
                continue;
            }
            let Some(current) = image.attributes[index].value() else {
                continue;
            };
            if snapshot.attributes.get(index).and_then(Option::as_ref) == Some(current) {
                continue;
            }
            changes
                .entry(attribute.table)
                .or_default()
                .push((attribute.column.clone(), current.clone()));
        }
        for (index, association) in descriptor.to_one_associations() {
            let Some((column, table)) = association.fk_column() else {
                continue;
            };
            if column == descriptor.tables[table].key_column {
                continue;
            }
            let current = &image.foreign_keys[index];
            if snapshot.foreign_keys.get(index) == Some(current) {
                continue;
            }
            changes
                .entry(table)
                .or_default()
                .push((column.to_string(), current.clone().map_or(Value::Null, Value::from)));
        }
        if changes.is_empty() {
            return Vec::new();
        }

        let version = image.version_check();
        if let Some((table, check)) = &version {
            changes
                .entry(*table)
                .or_default()
                .push((check.column.clone(), Value::Integer(check.expected + 1)));
        }

        let mut operations = Vec::with_capacity(changes.len());
        for (index, columns) in changes {
            let table = &descriptor.tables[index];
            if !table.is_optional() {
                let version = version
                    .as_ref()
                    .filter(|(t, _)| *t == index)
                    .map(|(_, check)| check.clone());
                operations.push(image.operation(
                    index,
                    WriteKind::Update {
                        columns,
                        version,
                        missing: MissingRow::Stale,
                    },
                ));
                continue;
            }

            let all_null = image.table_all_null(index);
            let kind = match (image.tables[index], all_null) {
                (Some(false), true) => continue,
                (Some(false), false) => WriteKind::Insert {
                    columns: image
                        .table_columns(index)
                        .into_iter()
                        .filter(|(_, value)| !value.is_null())
                        .collect(),
                },
                (_, true) => WriteKind::Delete {
                    version: None,
                    missing: MissingRow::Ignore,
                },
                (Some(true), false) => WriteKind::Update {
                    columns,
                    version: None,
                    missing: MissingRow::Stale,
                },
                (None, false) => WriteKind::Update {
                    missing: MissingRow::Insert(columns.clone()),
                    columns,
                    version: None,
                },
            };
            operations.push(image.operation(index, kind));
        }
        operations
    }

    fn delete_operations(&self, image: &Image) -> Vec<WriteOperation> {
        let version = image.version_check();
        let mut operations = Vec::with_capacity(image.descriptor.tables.len());
        for (index, table) in image.descriptor.tables.iter().enumerate().rev() {
            let kind = if table.is_optional() {
                if image.tables[index] == Some(false) {
                    continue;
                }
                WriteKind::Delete {
                    version: None,
                    missing: MissingRow::Ignore,
                }
            } else {
                WriteKind::Delete {
                    version: version
                        .as_ref()
                        .filter(|(t, _)| *t == index)
                        .map(|(_, check)| check.clone()),
                    missing: MissingRow::Stale,
                }
            };
            operations.push(image.operation(index, kind));
        }
        operations
    }
}

fn cyclic(images: &[Image], members: Vec<usize>) -> FlushError {
    FlushError::CyclicDependency(
        members
            .into_iter()
            .map(|index| images[index].key.to_string())
            .collect(),
    )
}
