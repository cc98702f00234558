//! TOML mapping documents, the descriptor-file form of entity mappings.
//!
//! ```toml
//! [[entity]]
//! name = "Employee"
//! qualified_name = "org.acme.Employee"
//! table = "tabEmployees"
//! secondary_tables = [{ name = "employee_details", optional = true }]
//! id = { name = "id", type = "integer", generator = "increment" }
//! version = "version"
//!
//! [[entity.attribute]]
//! name = "name"
//! type = "text"
//!
//! [[entity.association]]
//! name = "department"
//! target = "Department"
//! kind = "to_one"
//! cascade = { persist = true }
//!
//! [[result_mapping]]
//! name = "employee-names"
//! [[result_mapping.item]]
//! kind = "entity"
//! entity = "Employee"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::builder::{Association, Attribute, EntityBuilder};
use super::descriptor::{Cascade, FetchMode, IdGenerator, ValueType};
use super::result_mapping::{ResultSetMapping, ResultSetMappingRegistry};
use super::{Metamodel, MetamodelError};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MappingDocument {
    #[serde(default, rename = "entity")]
    pub entities: Vec<EntityMapping>,

    #[serde(default, rename = "result_mapping")]
    pub result_mappings: Vec<ResultSetMapping>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EntityMapping {
    pub name: String,
    #[serde(default)]
    pub qualified_name: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub secondary_tables: Vec<SecondaryTableMapping>,
    #[serde(default)]
    pub id: Option<IdMapping>,
    /// To-one association whose target supplies the identifier.
    #[serde(default)]
    pub derived_id: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub extends: Option<ExtendsMapping>,
    #[serde(default)]
    pub implements: Vec<String>,
    #[serde(default, rename = "attribute")]
    pub attributes: Vec<AttributeMapping>,
    #[serde(default, rename = "association")]
    pub associations: Vec<AssociationMapping>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecondaryTableMapping {
    pub name: String,
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdMapping {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ValueType,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub generator: IdGenerator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InheritanceStrategy {
    Joined,
    Union,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtendsMapping {
    pub parent: String,
    pub strategy: InheritanceStrategy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AttributeMapping {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ValueType,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub fetch: FetchMode,
    #[serde(default = "default_true")]
    pub nullable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationMappingKind {
    ToOne,
    OneToMany,
    InverseToOne,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssociationMapping {
    pub name: String,
    pub target: String,
    pub kind: AssociationMappingKind,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub mapped_by: Option<String>,
    #[serde(default)]
    pub cascade: Cascade,
    #[serde(default)]
    pub fetch: Option<FetchMode>,
}

fn default_true() -> bool {
    true
}

impl std::str::FromStr for MappingDocument {
    type Err = MetamodelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str(s)?)
    }
}

impl MappingDocument {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MetamodelError> {
        let content = std::fs::read_to_string(path)?;
        content.parse()
    }

    /// Finalize the entities and register the result-set mappings.
    pub fn build(&self) -> Result<(Metamodel, ResultSetMappingRegistry), MetamodelError> {
        let mut builder = Metamodel::builder();
        for entity in &self.entities {
            builder = builder.entity(entity.to_builder()?);
        }
        let metamodel = builder.build()?;

        let registry = ResultSetMappingRegistry::new();
        for mapping in &self.result_mappings {
            registry.register(mapping.clone());
        }
        Ok((metamodel, registry))
    }
}

impl EntityMapping {
    fn to_builder(&self) -> Result<EntityBuilder, MetamodelError> {
        let mut builder = EntityBuilder::new(&self.name);
        if let Some(qualified) = &self.qualified_name {
            builder = builder.qualified_name(qualified);
        }
        if let Some(table) = &self.table {
            builder = builder.table(table);
        }
        for secondary in &self.secondary_tables {
            builder = builder.secondary_table(&secondary.name, secondary.optional);
        }
        if let Some(id) = &self.id {
            builder = match &id.column {
                Some(column) => builder.id_column(&id.name, column, id.ty),
                None => builder.id(&id.name, id.ty),
            }
            .generator(id.generator);
        }
        if let Some(association) = &self.derived_id {
            builder = builder.derived_id(association);
        }
        if let Some(extends) = &self.extends {
            builder = match extends.strategy {
                InheritanceStrategy::Joined => builder.joined_subclass_of(&extends.parent),
                InheritanceStrategy::Union => builder.union_subclass_of(&extends.parent),
            };
        }
        for supertype in &self.implements {
            builder = builder.implements(supertype);
        }
        for attribute in &self.attributes {
            let mut spec = Attribute::new(&attribute.name, attribute.ty).fetch(attribute.fetch);
            if let Some(column) = &attribute.column {
                spec = spec.column(column);
            }
            if let Some(table) = &attribute.table {
                spec = spec.table(table);
            }
            if !attribute.nullable {
                spec = spec.not_null();
            }
            builder = builder.attribute(spec);
        }
        for association in &self.associations {
            let mut spec = match association.kind {
                AssociationMappingKind::ToOne => {
                    Association::to_one(&association.name, &association.target)
                }
                AssociationMappingKind::OneToMany => Association::one_to_many(
                    &association.name,
                    &association.target,
                    self.mapped_by(association)?,
                ),
                AssociationMappingKind::InverseToOne => Association::one_to_one_inverse(
                    &association.name,
                    &association.target,
                    self.mapped_by(association)?,
                ),
            };
            if let Some(column) = &association.column {
                spec = spec.column(column);
            }
            if let Some(table) = &association.table {
                spec = spec.table(table);
            }
            if let Some(fetch) = association.fetch {
                spec = spec.fetch(fetch);
            }
            builder = builder.association(spec.cascade(association.cascade));
        }
        if let Some(version) = &self.version {
            builder = builder.version(version);
        }
        Ok(builder)
    }

    fn mapped_by(&self, association: &AssociationMapping) -> Result<String, MetamodelError> {
        association
            .mapped_by
            .clone()
            .ok_or_else(|| MetamodelError::InvalidMappedBy {
                entity: self.name.clone(),
                association: association.name.clone(),
                mapped_by: String::new(),
            })
    }
}
