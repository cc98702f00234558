//! Named result-set mappings: a registration name mapped to the entity and
//! scalar columns a native SQL query returns.
//!
//! Mappings are registered once and resolved by name at query time into a
//! [`ResolvedResultMapping`] bound to the metamodel.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::descriptor::{EntityDescriptor, ValueType};
use super::{Metamodel, MetamodelError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSetMapping {
    pub name: String,
    #[serde(default, rename = "item")]
    pub items: Vec<ResultItemMapping>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultItemMapping {
    /// Property name to result column. Unlisted properties are read from
    /// their mapped column name when the result has it.
    Entity {
        entity: String,
        #[serde(default)]
        columns: HashMap<String, String>,
    },
    Scalar {
        column: String,
        #[serde(default, rename = "type")]
        ty: Option<ValueType>,
    },
}

impl ResultSetMapping {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Vec::new(),
        }
    }

    pub fn entity<'a>(
        mut self,
        entity: impl Into<String>,
        columns: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        self.items.push(ResultItemMapping::Entity {
            entity: entity.into(),
            columns: columns
                .into_iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect(),
        });
        self
    }

    pub fn scalar(mut self, column: impl Into<String>, ty: Option<ValueType>) -> Self {
        self.items.push(ResultItemMapping::Scalar {
            column: column.into(),
            ty,
        });
        self
    }
}

/// A mapping bound to entity descriptors; column names are final.
#[derive(Debug, Clone)]
pub struct ResolvedResultMapping {
    pub name: String,
    pub items: Vec<ResolvedResultItem>,
}

#[derive(Debug, Clone)]
pub enum ResolvedResultItem {
    Entity {
        entity: Arc<EntityDescriptor>,
        id_column: String,
        /// Result column per attribute, in descriptor order.
        attribute_columns: Vec<String>,
        /// Result column per association; `None` for inverse sides.
        reference_columns: Vec<Option<String>>,
    },
    Scalar {
        column: String,
        ty: Option<ValueType>,
    },
}

/// Concurrent name -> mapping repository shared by a session factory.
#[derive(Debug, Default)]
pub struct ResultSetMappingRegistry {
    mappings: DashMap<String, Arc<ResultSetMapping>>,
}

impl ResultSetMappingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a mapping under its name.
    pub fn register(&self, mapping: ResultSetMapping) {
        self.mappings
            .insert(mapping.name.clone(), Arc::new(mapping));
    }

    pub fn get(&self, name: &str) -> Option<Arc<ResultSetMapping>> {
        self.mappings.get(name).map(|m| Arc::clone(m.value()))
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Look up `name` and bind it to the metamodel.
    pub fn resolve(
        &self,
        name: &str,
        metamodel: &Metamodel,
    ) -> Result<ResolvedResultMapping, MetamodelError> {
        let mapping = self
            .get(name)
            .ok_or_else(|| MetamodelError::UnknownResultMapping(name.to_string()))?;

        let mut items = Vec::with_capacity(mapping.items.len());
        for item in &mapping.items {
            items.push(match item {
                ResultItemMapping::Entity { entity, columns } => {
                    resolve_entity(&mapping.name, entity, columns, metamodel)?
                }
                ResultItemMapping::Scalar { column, ty } => ResolvedResultItem::Scalar {
                    column: column.clone(),
                    ty: *ty,
                },
            });
        }
        Ok(ResolvedResultMapping {
            name: mapping.name.clone(),
            items,
        })
    }
}

fn resolve_entity(
    mapping: &str,
    entity_name: &str,
    columns: &HashMap<String, String>,
    metamodel: &Metamodel,
) -> Result<ResolvedResultItem, MetamodelError> {
    let entity = metamodel
        .get(entity_name)
        .ok_or_else(|| MetamodelError::UnknownMappedEntity {
            mapping: mapping.to_string(),
            entity: entity_name.to_string(),
        })?;

    for property in columns.keys() {
        let known = *property == entity.identifier.name
            || entity.attribute(property).is_some()
            || entity.association(property).is_some_and(|(_, a)| a.fk_column().is_some());
        if !known {
            return Err(MetamodelError::UnknownMappedProperty {
                mapping: mapping.to_string(),
                entity: entity.qualified_name.clone(),
                property: property.clone(),
            });
        }
    }

    let column_for = |property: &str, default: &str| {
        columns
            .get(property)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    };

    Ok(ResolvedResultItem::Entity {
        id_column: column_for(&entity.identifier.name, &entity.identifier.column),
        attribute_columns: entity
            .attributes
            .iter()
            .map(|a| column_for(&a.name, &a.column))
            .collect(),
        reference_columns: entity
            .associations
            .iter()
            .map(|a| a.fk_column().map(|(column, _)| column_for(&a.name, column)))
            .collect(),
        entity: Arc::clone(entity),
    })
}
