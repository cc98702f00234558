//! Fluent builders that finalize entity mappings into a [`Metamodel`].
//!
//! ```ignore
//! let metamodel = Metamodel::builder()
//!     .entity(
//!         EntityBuilder::new("Employee")
//!             .qualified_name("org.acme.Employee")
//!             .table("tabEmployees")
//!             .id("id", ValueType::Integer)
//!             .attribute(Attribute::new("name", ValueType::Text)),
//!     )
//!     .build()?;
//! ```

use std::collections::HashMap;

use super::descriptor::*;
use super::naming::{NamingStrategy, SnakeCaseNaming};
use super::{Metamodel, MetamodelError};

/// Attribute mapping before finalization.
#[derive(Debug, Clone)]
pub struct Attribute {
    name: String,
    column: Option<String>,
    ty: ValueType,
    table: Option<String>,
    fetch: FetchMode,
    nullable: bool,
}

impl Attribute {
    pub fn new(name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            column: None,
            ty,
            table: None,
            fetch: FetchMode::Eager,
            nullable: true,
        }
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    /// Store the attribute in a secondary table instead of the primary one.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn lazy(mut self) -> Self {
        self.fetch = FetchMode::Lazy;
        self
    }

    pub fn fetch(mut self, fetch: FetchMode) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

#[derive(Debug, Clone)]
enum AssociationSpec {
    ToOne {
        column: Option<String>,
        table: Option<String>,
    },
    OneToMany {
        mapped_by: String,
    },
    InverseToOne {
        mapped_by: String,
    },
}

/// Association mapping before finalization.
#[derive(Debug, Clone)]
pub struct Association {
    name: String,
    target: String,
    spec: AssociationSpec,
    cascade: Cascade,
    fetch: FetchMode,
}

impl Association {
    pub fn to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            spec: AssociationSpec::ToOne {
                column: None,
                table: None,
            },
            cascade: Cascade::default(),
            fetch: FetchMode::Eager,
        }
    }

    pub fn one_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        mapped_by: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            spec: AssociationSpec::OneToMany {
                mapped_by: mapped_by.into(),
            },
            cascade: Cascade::default(),
            fetch: FetchMode::Lazy,
        }
    }

    /// Inverse side of a one-to-one owned by `mapped_by` on the target.
    /// Loaded on first access through [`crate::Session::reference`].
    pub fn one_to_one_inverse(
        name: impl Into<String>,
        target: impl Into<String>,
        mapped_by: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            spec: AssociationSpec::InverseToOne {
                mapped_by: mapped_by.into(),
            },
            cascade: Cascade::default(),
            fetch: FetchMode::Lazy,
        }
    }

    /// Foreign key column; ignored on the inverse side.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        if let AssociationSpec::ToOne { column: c, .. } = &mut self.spec {
            *c = Some(column.into());
        }
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        if let AssociationSpec::ToOne { table: t, .. } = &mut self.spec {
            *t = Some(table.into());
        }
        self
    }

    pub fn lazy(mut self) -> Self {
        self.fetch = FetchMode::Lazy;
        self
    }

    pub fn fetch(mut self, fetch: FetchMode) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn cascade(mut self, cascade: Cascade) -> Self {
        self.cascade = cascade;
        self
    }

    pub fn cascade_persist(mut self) -> Self {
        self.cascade.persist = true;
        self
    }

    pub fn cascade_remove(mut self) -> Self {
        self.cascade.remove = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Inheritance {
    Joined,
    Union,
}

/// Entity mapping before finalization.
#[derive(Debug, Clone)]
pub struct EntityBuilder {
    name: String,
    qualified_name: Option<String>,
    table: Option<String>,
    secondary_tables: Vec<(String, bool)>,
    identifier: Option<(String, Option<String>, ValueType)>,
    derived_id: Option<String>,
    generator: IdGenerator,
    attributes: Vec<Attribute>,
    version: Option<String>,
    associations: Vec<Association>,
    parent: Option<(String, Inheritance)>,
    implements: Vec<String>,
}

impl EntityBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            qualified_name: None,
            table: None,
            secondary_tables: Vec::new(),
            identifier: None,
            derived_id: None,
            generator: IdGenerator::Assigned,
            attributes: Vec::new(),
            version: None,
            associations: Vec::new(),
            parent: None,
            implements: Vec::new(),
        }
    }

    pub fn qualified_name(mut self, name: impl Into<String>) -> Self {
        self.qualified_name = Some(name.into());
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Add a secondary table keyed by the identifier column. Rows of an
    /// optional table may be missing and are LEFT-joined.
    pub fn secondary_table(mut self, table: impl Into<String>, optional: bool) -> Self {
        self.secondary_tables.push((table.into(), optional));
        self
    }

    pub fn id(mut self, name: impl Into<String>, ty: ValueType) -> Self {
        self.identifier = Some((name.into(), None, ty));
        self
    }

    pub fn id_column(mut self, name: impl Into<String>, column: impl Into<String>, ty: ValueType) -> Self {
        self.identifier = Some((name.into(), Some(column.into()), ty));
        self
    }

    /// Use the to-one `association` as the identifier: its foreign key is
    /// the primary key, and the value is taken from the target at persist.
    pub fn derived_id(mut self, association: impl Into<String>) -> Self {
        self.derived_id = Some(association.into());
        self.generator = IdGenerator::Derived;
        self
    }

    pub fn generator(mut self, generator: IdGenerator) -> Self {
        self.generator = generator;
        self
    }

    pub fn attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Optimistic-lock attribute; must be a mapped integer attribute.
    pub fn version(mut self, attribute: impl Into<String>) -> Self {
        self.version = Some(attribute.into());
        self
    }

    pub fn association(mut self, association: Association) -> Self {
        self.associations.push(association);
        self
    }

    /// Subclass stored in its own table keyed by the parent identifier.
    pub fn joined_subclass_of(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some((parent.into(), Inheritance::Joined));
        self
    }

    /// Subclass stored in one self-contained table.
    pub fn union_subclass_of(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some((parent.into(), Inheritance::Union));
        self
    }

    pub fn implements(mut self, supertype: impl Into<String>) -> Self {
        self.implements.push(supertype.into());
        self
    }
}

/// Collects entity mappings and finalizes them in registration order.
#[derive(Debug)]
pub struct MetamodelBuilder {
    entities: Vec<EntityBuilder>,
    naming: Box<dyn NamingStrategy>,
}

impl Default for MetamodelBuilder {
    fn default() -> Self {
        Self {
            entities: Vec::new(),
            naming: Box::new(SnakeCaseNaming),
        }
    }
}

impl MetamodelBuilder {
    pub fn naming(mut self, naming: impl NamingStrategy + 'static) -> Self {
        self.naming = Box::new(naming);
        self
    }

    pub fn entity(mut self, entity: EntityBuilder) -> Self {
        self.entities.push(entity);
        self
    }

    /// Parents must be registered before their subclasses.
    pub fn build(self) -> Result<Metamodel, MetamodelError> {
        let mut built: Vec<EntityDescriptor> = Vec::with_capacity(self.entities.len());
        let mut by_qualified: HashMap<String, usize> = HashMap::new();

        for eb in self.entities {
            let qualified = eb.qualified_name.clone().unwrap_or_else(|| eb.name.clone());
            if by_qualified.contains_key(&qualified) {
                return Err(MetamodelError::DuplicateEntity(qualified));
            }
            let parent = match &eb.parent {
                Some((parent_name, inheritance)) => {
                    let parent = built
                        .iter()
                        .find(|e| &e.qualified_name == parent_name || &e.name == parent_name)
                        .ok_or_else(|| MetamodelError::UnknownParent {
                            entity: qualified.clone(),
                            parent: parent_name.clone(),
                        })?;
                    Some((parent, *inheritance))
                }
                None => None,
            };
            let descriptor = finalize(&eb, qualified.clone(), parent, self.naming.as_ref())?;
            by_qualified.insert(qualified, built.len());
            built.push(descriptor);
        }

        resolve_targets(&mut built)?;
        Ok(Metamodel::from_descriptors(built))
    }
}

fn finalize(
    eb: &EntityBuilder,
    qualified_name: String,
    parent: Option<(&EntityDescriptor, Inheritance)>,
    naming: &dyn NamingStrategy,
) -> Result<EntityDescriptor, MetamodelError> {
    let own_table = eb
        .table
        .clone()
        .unwrap_or_else(|| naming.table_name(&eb.name));

    let (kind, identifier, mut tables, mut attributes, mut associations, mut implements, inherited_version) =
        match parent {
            None => {
                let identifier = match &eb.derived_id {
                    Some(association) => derived_identifier(eb, &qualified_name, association, naming)?,
                    None => {
                        let (id_name, id_column, ty) = eb.identifier.clone().ok_or_else(|| {
                            MetamodelError::MissingIdentifier(qualified_name.clone())
                        })?;
                        IdentifierDescriptor {
                            column: id_column.unwrap_or_else(|| naming.column_name(&id_name)),
                            name: id_name,
                            ty,
                            generator: eb.generator,
                        }
                    }
                };
                (
                    EntityKind::Root,
                    identifier,
                    Vec::new(),
                    Vec::new(),
                    Vec::new(),
                    Vec::new(),
                    None,
                )
            }
            Some((parent, Inheritance::Joined)) => {
                let tables = parent
                    .tables
                    .iter()
                    .map(|t| TableDescriptor {
                        role: match t.role {
                            TableRole::Secondary { optional } => TableRole::Secondary { optional },
                            _ => TableRole::Inherited,
                        },
                        ..t.clone()
                    })
                    .collect();
                (
                    EntityKind::JoinedSubclass {
                        parent: parent.qualified_name.clone(),
                    },
                    parent.identifier.clone(),
                    tables,
                    parent.attributes.clone(),
                    parent.associations.clone(),
                    parent.implements.clone(),
                    parent.version,
                )
            }
            Some((parent, Inheritance::Union)) => {
                // a union subclass repeats every inherited column in its own table
                let attributes = parent
                    .attributes
                    .iter()
                    .map(|a| AttributeDescriptor { table: 0, ..a.clone() })
                    .collect();
                let associations = parent
                    .associations
                    .iter()
                    .map(|a| {
                        let kind = match &a.kind {
                            AssociationKind::ToOne { column, .. } => AssociationKind::ToOne {
                                column: column.clone(),
                                table: 0,
                            },
                            other => other.clone(),
                        };
                        AssociationDescriptor { kind, ..a.clone() }
                    })
                    .collect();
                (
                    EntityKind::UnionSubclass {
                        parent: parent.qualified_name.clone(),
                    },
                    parent.identifier.clone(),
                    Vec::new(),
                    attributes,
                    associations,
                    parent.implements.clone(),
                    parent.version,
                )
            }
        };

    let primary_index = tables.len();
    tables.push(TableDescriptor {
        name: own_table,
        key_column: identifier.column.clone(),
        role: TableRole::Primary,
    });
    for (name, optional) in &eb.secondary_tables {
        tables.push(TableDescriptor {
            name: name.clone(),
            key_column: identifier.column.clone(),
            role: TableRole::Secondary {
                optional: *optional,
            },
        });
    }

    let table_index = |name: &Option<String>| -> Result<usize, MetamodelError> {
        match name {
            None => Ok(primary_index),
            Some(name) => tables
                .iter()
                .position(|t| &t.name == name)
                .ok_or_else(|| MetamodelError::UnknownTable {
                    entity: qualified_name.clone(),
                    table: name.clone(),
                }),
        }
    };

    for attribute in &eb.attributes {
        if attributes.iter().any(|a| a.name == attribute.name)
            || attribute.name == identifier.name
        {
            return Err(MetamodelError::DuplicateAttribute {
                entity: qualified_name.clone(),
                attribute: attribute.name.clone(),
            });
        }
        attributes.push(AttributeDescriptor {
            name: attribute.name.clone(),
            column: attribute
                .column
                .clone()
                .unwrap_or_else(|| naming.column_name(&attribute.name)),
            ty: attribute.ty,
            table: table_index(&attribute.table)?,
            fetch: attribute.fetch,
            nullable: attribute.nullable,
        });
    }

    for association in &eb.associations {
        if associations.iter().any(|a| a.name == association.name)
            || attributes.iter().any(|a| a.name == association.name)
        {
            return Err(MetamodelError::DuplicateAttribute {
                entity: qualified_name.clone(),
                attribute: association.name.clone(),
            });
        }
        let kind = match &association.spec {
            AssociationSpec::ToOne { column, table } => AssociationKind::ToOne {
                column: column
                    .clone()
                    .unwrap_or_else(|| naming.foreign_key_column(&association.name)),
                table: table_index(table)?,
            },
            AssociationSpec::OneToMany { mapped_by } => AssociationKind::OneToMany {
                mapped_by: mapped_by.clone(),
            },
            AssociationSpec::InverseToOne { mapped_by } => AssociationKind::InverseToOne {
                mapped_by: mapped_by.clone(),
            },
        };
        associations.push(AssociationDescriptor {
            name: association.name.clone(),
            target: association.target.clone(),
            kind,
            cascade: association.cascade,
            fetch: association.fetch,
        });
    }

    let version = match &eb.version {
        Some(name) => {
            let (index, attribute) = attributes
                .iter()
                .enumerate()
                .find(|(_, a)| &a.name == name)
                .ok_or_else(|| MetamodelError::UnknownVersion {
                    entity: qualified_name.clone(),
                    attribute: name.clone(),
                })?;
            if attribute.ty != ValueType::Integer {
                return Err(MetamodelError::InvalidVersionType {
                    entity: qualified_name.clone(),
                    attribute: name.clone(),
                });
            }
            Some(index)
        }
        None => inherited_version,
    };

    implements.extend(eb.implements.iter().cloned());

    Ok(EntityDescriptor {
        name: eb.name.clone(),
        qualified_name,
        kind,
        tables,
        identifier,
        attributes,
        version,
        associations,
        implements,
    })
}

/// Identifier sharing the column of a to-one in the primary table. Its type
/// is copied from the target once targets are known.
fn derived_identifier(
    eb: &EntityBuilder,
    qualified_name: &str,
    association: &str,
    naming: &dyn NamingStrategy,
) -> Result<IdentifierDescriptor, MetamodelError> {
    let invalid = || MetamodelError::InvalidDerivedIdentity {
        entity: qualified_name.to_string(),
        association: association.to_string(),
    };
    let spec = eb
        .associations
        .iter()
        .find(|a| a.name == association)
        .map(|a| &a.spec)
        .ok_or_else(invalid)?;
    let AssociationSpec::ToOne { column, table: None } = spec else {
        return Err(invalid());
    };
    Ok(IdentifierDescriptor {
        name: association.to_string(),
        column: column
            .clone()
            .unwrap_or_else(|| naming.foreign_key_column(association)),
        ty: ValueType::Integer,
        generator: IdGenerator::Derived,
    })
}

/// Replace association targets with qualified names and check inverse sides.
fn resolve_targets(entities: &mut [EntityDescriptor]) -> Result<(), MetamodelError> {
    let names: Vec<(String, String)> = entities
        .iter()
        .map(|e| (e.name.clone(), e.qualified_name.clone()))
        .collect();
    let lookup = |target: &str| -> Option<String> {
        if let Some((_, q)) = names.iter().find(|(_, q)| q == target) {
            return Some(q.clone());
        }
        let mut matches = names.iter().filter(|(n, _)| n == target);
        match (matches.next(), matches.next()) {
            (Some((_, q)), None) => Some(q.clone()),
            _ => None,
        }
    };

    for entity in entities.iter_mut() {
        for association in &mut entity.associations {
            association.target =
                lookup(&association.target).ok_or_else(|| MetamodelError::UnknownTarget {
                    entity: entity.qualified_name.clone(),
                    association: association.name.clone(),
                    target: association.target.clone(),
                })?;
        }
    }

    for index in 0..entities.len() {
        let Some((_, association)) = entities[index].derived_from() else {
            continue;
        };
        let ty = entities
            .iter()
            .find(|e| e.qualified_name == association.target)
            .map(|target| target.identifier.ty);
        if let Some(ty) = ty {
            entities[index].identifier.ty = ty;
        }
    }

    for entity in entities.iter() {
        for association in &entity.associations {
            let Some(mapped_by) = association.mapped_by() else {
                continue;
            };
            let valid = entities
                .iter()
                .find(|e| e.qualified_name == association.target)
                .and_then(|target| target.association(mapped_by))
                .is_some_and(|(_, inverse)| {
                    matches!(inverse.kind, AssociationKind::ToOne { .. })
                        && is_same_or_ancestor(entities, &inverse.target, &entity.qualified_name)
                });
            if !valid {
                return Err(MetamodelError::InvalidMappedBy {
                    entity: entity.qualified_name.clone(),
                    association: association.name.clone(),
                    mapped_by: mapped_by.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn is_same_or_ancestor(entities: &[EntityDescriptor], candidate: &str, entity: &str) -> bool {
    let mut current = Some(entity.to_string());
    while let Some(name) = current {
        if name == candidate {
            return true;
        }
        current = entities
            .iter()
            .find(|e| e.qualified_name == name)
            .and_then(|e| e.kind.parent().map(str::to_string));
    }
    false
}
