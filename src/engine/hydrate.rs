//! Turning raw rows into managed instances.
//!
//! Hydration always consults the identity map first: a row whose identity
//! is already tracked yields the tracked instance untouched, so one row
//! never becomes two objects within a session.

use std::sync::Arc;

use crate::metamodel::{AssociationKind, Metamodel, ResolvedResultItem, TableRole};
use crate::session::entity::{EntityState, Link, Slot};
use crate::session::{Entity, EntityKey, IdentityMap, Status};
use crate::translate::EntityRowMapping;

use super::row::Row;
use super::value::{KeyValue, Value};

#[derive(Debug, thiserror::Error)]
pub enum HydrationError {
    #[error("Row has {actual} columns, mapping reads {expected}")]
    RowTooShort { expected: usize, actual: usize },

    #[error("Invalid identifier for {entity}: {value}")]
    InvalidIdentifier { entity: String, value: String },

    #[error("Result has no column {0}")]
    MissingColumn(String),
}

/// An instance produced from a row, and whether this row created it.
#[derive(Debug, Clone)]
pub struct Hydrated {
    pub entity: Entity,
    /// `false` when the identity map already held the instance.
    pub fresh: bool,
}

/// Hydrate the entity `mapping` describes from `row`. Returns `None` when
/// the identifier column is null, as for an unmatched outer join.
pub fn hydrate(
    row: &Row,
    mapping: &EntityRowMapping,
    metamodel: &Metamodel,
    identity: &mut IdentityMap,
) -> Result<Option<Hydrated>, HydrationError> {
    if row.len() < mapping.width() {
        return Err(HydrationError::RowTooShort {
            expected: mapping.width(),
            actual: row.len(),
        });
    }
    let descriptor = &mapping.entity;
    let raw_id = row
        .get(mapping.id_position)
        .cloned()
        .unwrap_or_default()
        .coerce(descriptor.identifier.ty);
    if raw_id.is_null() {
        return Ok(None);
    }
    let id = KeyValue::try_from(&raw_id).map_err(|value| HydrationError::InvalidIdentifier {
        entity: descriptor.qualified_name.clone(),
        value: value.to_string(),
    })?;

    let key = EntityKey::of(metamodel, descriptor, id.clone());
    if let Some(existing) = identity.get(&key) {
        tracing::trace!(%key, "identity map hit");
        return Ok(Some(Hydrated {
            entity: existing.clone(),
            fresh: false,
        }));
    }

    let value_at = |position: Option<usize>| position.and_then(|p| row.get(p)).cloned();

    let attributes = descriptor
        .attributes
        .iter()
        .zip(&mapping.attributes)
        .map(|(attribute, position)| match value_at(*position) {
            Some(value) => Slot::Loaded(value.coerce(attribute.ty)),
            None => Slot::Unloaded,
        })
        .collect();
    let links = descriptor
        .associations
        .iter()
        .zip(&mapping.references)
        .map(|(association, position)| match association.kind {
            AssociationKind::ToOne { .. } => Link::Key(
                value_at(*position)
                    .as_ref()
                    .and_then(|value| KeyValue::try_from(value).ok()),
            ),
            AssociationKind::OneToMany { .. } => Link::Collection(None),
            // looked up by this instance's identifier on first access
            AssociationKind::InverseToOne { .. } => Link::Key(Some(id.clone())),
        })
        .collect();
    let tables = descriptor
        .tables
        .iter()
        .zip(&mapping.table_keys)
        .map(|(table, position)| match table.role {
            TableRole::Secondary { optional: true } => {
                value_at(*position).map(|key| !key.is_null())
            }
            _ => Some(true),
        })
        .collect();

    let entity = Entity::from_state(EntityState {
        descriptor: Arc::clone(descriptor),
        id: Some(id),
        attributes,
        links,
        tables,
        status: Status::Loading,
        snapshot: None,
    });
    identity.insert(key, entity.clone());
    entity.refresh_snapshot();
    entity.set_status(Status::Managed);
    Ok(Some(Hydrated {
        entity,
        fresh: true,
    }))
}

/// Row mapping for an entity item of a named result-set mapping, located by
/// column name in a native query's result. Attributes whose column is
/// absent stay unloaded.
pub fn native_row_mapping(
    item: &ResolvedResultItem,
    columns: &[String],
) -> Result<Option<EntityRowMapping>, HydrationError> {
    let ResolvedResultItem::Entity {
        entity,
        id_column,
        attribute_columns,
        reference_columns,
    } = item
    else {
        return Ok(None);
    };
    let position = |name: &str| columns.iter().position(|c| c.eq_ignore_ascii_case(name));

    let id_position =
        position(id_column).ok_or_else(|| HydrationError::MissingColumn(id_column.clone()))?;
    Ok(Some(EntityRowMapping {
        entity: Arc::clone(entity),
        id_position,
        attributes: attribute_columns.iter().map(|c| position(c)).collect(),
        references: reference_columns
            .iter()
            .map(|c| c.as_deref().and_then(position))
            .collect(),
        table_keys: vec![None; entity.tables.len()],
    }))
}

/// Scalar item of a named result-set mapping.
pub fn native_scalar(row: &Row, item: &ResolvedResultItem) -> Result<Option<Value>, HydrationError> {
    let ResolvedResultItem::Scalar { column, ty } = item else {
        return Ok(None);
    };
    let value = row
        .get_by_name(column)
        .cloned()
        .ok_or_else(|| HydrationError::MissingColumn(column.clone()))?;
    Ok(Some(match ty {
        Some(ty) => value.coerce(*ty),
        None => value,
    }))
}
