//! Domain metamodel: the finalized, immutable description of every mapped
//! entity, shared read-only by all sessions.
//!
//! - [`descriptor`] - entity, table, attribute and association descriptors
//! - [`builder`] - fluent mapping builders
//! - [`mapping`] - TOML mapping documents
//! - [`naming`] - default table and column names
//! - [`result_mapping`] - named result-set mappings for native SQL

pub mod builder;
pub mod descriptor;
pub mod mapping;
pub mod naming;
pub mod result_mapping;

use std::collections::HashMap;
use std::sync::Arc;

pub use builder::{Association, Attribute, EntityBuilder, MetamodelBuilder};
pub use descriptor::*;
pub use mapping::MappingDocument;
pub use naming::{NamingStrategy, SnakeCaseNaming};
pub use result_mapping::{
    ResolvedResultMapping, ResolvedResultItem, ResultItemMapping, ResultSetMapping,
    ResultSetMappingRegistry,
};

#[derive(Debug, thiserror::Error)]
pub enum MetamodelError {
    #[error("Entity mapped twice: {0}")]
    DuplicateEntity(String),

    #[error("Entity {0} has no identifier")]
    MissingIdentifier(String),

    #[error("Entity {entity} extends unknown or later-registered parent {parent}")]
    UnknownParent { entity: String, parent: String },

    #[error("Entity {entity} references unknown table {table}")]
    UnknownTable { entity: String, table: String },

    #[error("Entity {entity} maps {attribute} twice")]
    DuplicateAttribute { entity: String, attribute: String },

    #[error("Entity {entity} declares unknown version attribute {attribute}")]
    UnknownVersion { entity: String, attribute: String },

    #[error("Version attribute {entity}.{attribute} must be an integer")]
    InvalidVersionType { entity: String, attribute: String },

    #[error("Association {entity}.{association} targets unknown entity {target}")]
    UnknownTarget {
        entity: String,
        association: String,
        target: String,
    },

    #[error("Association {entity}.{association} is mapped by {mapped_by}, which is not a to-one back to {entity}")]
    InvalidMappedBy {
        entity: String,
        association: String,
        mapped_by: String,
    },

    #[error("Identifier of {entity} derives from {association}, which is not a to-one in its primary table")]
    InvalidDerivedIdentity { entity: String, association: String },

    #[error("Unknown result set mapping: {0}")]
    UnknownResultMapping(String),

    #[error("Result set mapping {mapping} names unknown entity {entity}")]
    UnknownMappedEntity { mapping: String, entity: String },

    #[error("Result set mapping {mapping} maps unknown property {entity}.{property}")]
    UnknownMappedProperty {
        mapping: String,
        entity: String,
        property: String,
    },

    #[error("Failed to read mapping file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse mapping file: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// All mapped entities in registration order.
#[derive(Debug, Clone, Default)]
pub struct Metamodel {
    entities: Vec<Arc<EntityDescriptor>>,
    by_qualified: HashMap<String, usize>,
    by_name: HashMap<String, Vec<usize>>,
    by_supertype: HashMap<String, Vec<usize>>,
}

impl Metamodel {
    pub fn builder() -> MetamodelBuilder {
        MetamodelBuilder::default()
    }

    fn from_descriptors(descriptors: Vec<EntityDescriptor>) -> Self {
        let mut metamodel = Metamodel::default();
        for (index, descriptor) in descriptors.into_iter().enumerate() {
            metamodel
                .by_qualified
                .insert(descriptor.qualified_name.clone(), index);
            metamodel
                .by_name
                .entry(descriptor.name.clone())
                .or_default()
                .push(index);
            for supertype in &descriptor.implements {
                metamodel
                    .by_supertype
                    .entry(supertype.clone())
                    .or_default()
                    .push(index);
            }
            metamodel.entities.push(Arc::new(descriptor));
        }
        metamodel
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.entities.iter()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn by_qualified_name(&self, qualified: &str) -> Option<&Arc<EntityDescriptor>> {
        self.by_qualified
            .get(qualified)
            .map(|&index| &self.entities[index])
    }

    /// Qualified name, or a short name that only one entity uses.
    pub fn get(&self, name: &str) -> Option<&Arc<EntityDescriptor>> {
        if let Some(entity) = self.by_qualified_name(name) {
            return Some(entity);
        }
        match self.by_name.get(name).map(Vec::as_slice) {
            Some([index]) => Some(&self.entities[*index]),
            _ => None,
        }
    }

    /// Every entity answering to `name` as a short name or an implemented
    /// supertype, in registration order.
    pub fn matching(&self, name: &str) -> Vec<Arc<EntityDescriptor>> {
        let mut indices: Vec<usize> = self
            .by_name
            .get(name)
            .into_iter()
            .chain(self.by_supertype.get(name))
            .flatten()
            .copied()
            .collect();
        indices.sort_unstable();
        indices.dedup();
        indices
            .into_iter()
            .map(|index| Arc::clone(&self.entities[index]))
            .collect()
    }

    pub fn parent_of(&self, entity: &EntityDescriptor) -> Option<&Arc<EntityDescriptor>> {
        entity
            .kind
            .parent()
            .and_then(|parent| self.by_qualified_name(parent))
    }

    /// Top of the inheritance chain; identity is tracked per hierarchy.
    pub fn root_of<'a>(&'a self, entity: &'a EntityDescriptor) -> &'a EntityDescriptor {
        let mut current = entity;
        while let Some(parent) = self.parent_of(current) {
            current = parent;
        }
        current
    }

    /// Whether `entity` is `ancestor` or inherits from it.
    pub fn is_subtype_of(&self, entity: &EntityDescriptor, ancestor: &str) -> bool {
        let mut current = Some(entity);
        while let Some(e) = current {
            if e.qualified_name == ancestor {
                return true;
            }
            current = self.parent_of(e).map(Arc::as_ref);
        }
        false
    }
}
