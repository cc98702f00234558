//! Immutable entity descriptors.
//!
//! Descriptors are finalized by [`super::MetamodelBuilder`]; inherited
//! attributes, tables and associations are already flattened into each
//! subclass, so consumers never walk the parent chain for column data.

use serde::{Deserialize, Serialize};

use crate::sql::SqlType;

/// Semantic type of an attribute or identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Integer,
    Real,
    Text,
    Boolean,
    Blob,
}

impl ValueType {
    pub fn sql_type(self) -> SqlType {
        match self {
            ValueType::Integer => SqlType::Integer,
            ValueType::Real => SqlType::Real,
            ValueType::Text => SqlType::Text,
            ValueType::Boolean => SqlType::Boolean,
            ValueType::Blob => SqlType::Blob,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    #[default]
    Eager,
    Lazy,
}

/// How a table participates in an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableRole {
    /// The entity's own table; every row of the entity has one.
    Primary,
    /// Additional table joined by key. Optional rows may be absent.
    Secondary { optional: bool },
    /// A joined-subclass ancestor's table.
    Inherited,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    pub name: String,
    /// Column holding the entity identifier in this table.
    pub key_column: String,
    pub role: TableRole,
}

impl TableDescriptor {
    pub fn is_optional(&self) -> bool {
        matches!(self.role, TableRole::Secondary { optional: true })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdGenerator {
    /// The caller sets the identifier before persisting.
    #[default]
    Assigned,
    /// `max(id) + 1`, read once per hierarchy, then counted in memory.
    Increment,
    /// Copied from the target of the to-one association that shares the
    /// identifier's name and column.
    Derived,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierDescriptor {
    pub name: String,
    pub column: String,
    pub ty: ValueType,
    pub generator: IdGenerator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDescriptor {
    pub name: String,
    pub column: String,
    pub ty: ValueType,
    /// Index into [`EntityDescriptor::tables`].
    pub table: usize,
    pub fetch: FetchMode,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssociationKind {
    /// Owning side: a foreign key column in one of the owner's tables.
    ToOne { column: String, table: usize },
    /// Inverse side of a to-one on the target entity.
    OneToMany { mapped_by: String },
    /// Single-valued inverse side of a to-one on the target entity.
    InverseToOne { mapped_by: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cascade {
    #[serde(default)]
    pub persist: bool,
    #[serde(default)]
    pub remove: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationDescriptor {
    pub name: String,
    /// Qualified name of the target entity.
    pub target: String,
    pub kind: AssociationKind,
    pub cascade: Cascade,
    pub fetch: FetchMode,
}

impl AssociationDescriptor {
    pub fn fk_column(&self) -> Option<(&str, usize)> {
        match &self.kind {
            AssociationKind::ToOne { column, table } => Some((column, *table)),
            AssociationKind::OneToMany { .. } | AssociationKind::InverseToOne { .. } => None,
        }
    }

    /// Owning association on the target, for inverse sides.
    pub fn mapped_by(&self) -> Option<&str> {
        match &self.kind {
            AssociationKind::ToOne { .. } => None,
            AssociationKind::OneToMany { mapped_by } | AssociationKind::InverseToOne { mapped_by } => {
                Some(mapped_by)
            }
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self.kind, AssociationKind::OneToMany { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityKind {
    Root,
    JoinedSubclass { parent: String },
    UnionSubclass { parent: String },
}

impl EntityKind {
    pub fn parent(&self) -> Option<&str> {
        match self {
            EntityKind::Root => None,
            EntityKind::JoinedSubclass { parent } | EntityKind::UnionSubclass { parent } => {
                Some(parent)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    /// Short name used in queries.
    pub name: String,
    pub qualified_name: String,
    pub kind: EntityKind,
    /// In insert order: ancestors first, then the primary table, then
    /// secondary tables.
    pub tables: Vec<TableDescriptor>,
    pub identifier: IdentifierDescriptor,
    pub attributes: Vec<AttributeDescriptor>,
    /// Index of the optimistic-lock version attribute.
    pub version: Option<usize>,
    pub associations: Vec<AssociationDescriptor>,
    /// Unmapped supertypes this entity answers to in queries.
    pub implements: Vec<String>,
}

impl EntityDescriptor {
    pub fn attribute(&self, name: &str) -> Option<(usize, &AttributeDescriptor)> {
        self.attributes
            .iter()
            .enumerate()
            .find(|(_, a)| a.name == name)
    }

    pub fn association(&self, name: &str) -> Option<(usize, &AssociationDescriptor)> {
        self.associations
            .iter()
            .enumerate()
            .find(|(_, a)| a.name == name)
    }

    /// Index of the entity's own primary table.
    pub fn primary_table_index(&self) -> usize {
        self.tables
            .iter()
            .position(|t| t.role == TableRole::Primary)
            .unwrap_or(0)
    }

    pub fn primary_table(&self) -> &TableDescriptor {
        &self.tables[self.primary_table_index()]
    }

    /// Table holding the identifier of every row of the hierarchy.
    pub fn root_table_index(&self) -> usize {
        0
    }

    pub fn version_attribute(&self) -> Option<&AttributeDescriptor> {
        self.version.and_then(|i| self.attributes.get(i))
    }

    /// The to-one association whose target supplies the identifier.
    pub fn derived_from(&self) -> Option<(usize, &AssociationDescriptor)> {
        if self.identifier.generator != IdGenerator::Derived {
            return None;
        }
        self.association(&self.identifier.name)
    }

    /// Owning to-one associations, with their index.
    pub fn to_one_associations(&self) -> impl Iterator<Item = (usize, &AssociationDescriptor)> {
        self.associations
            .iter()
            .enumerate()
            .filter(|(_, a)| matches!(a.kind, AssociationKind::ToOne { .. }))
    }
}
