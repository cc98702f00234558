//! Result column layout of a translated select.

use std::sync::Arc;

use crate::metamodel::EntityDescriptor;

/// Where the columns of one hydrated entity sit in a result row.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRowMapping {
    pub entity: Arc<EntityDescriptor>,
    pub id_position: usize,
    /// Per attribute; `None` for lazy attributes left unselected.
    pub attributes: Vec<Option<usize>>,
    /// Foreign key position per association; `None` for inverse sides.
    pub references: Vec<Option<usize>>,
    /// Per table: position of the table's key column when the table is an
    /// optional secondary table that was joined. A null key means the
    /// entity has no row there.
    pub table_keys: Vec<Option<usize>>,
}

impl EntityRowMapping {
    /// Highest position this mapping reads.
    pub fn width(&self) -> usize {
        std::iter::once(self.id_position)
            .chain(self.attributes.iter().flatten().copied())
            .chain(self.references.iter().flatten().copied())
            .chain(self.table_keys.iter().flatten().copied())
            .max()
            .map_or(0, |max| max + 1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResultItem {
    Entity {
        source: usize,
        mapping: EntityRowMapping,
    },
    Scalar {
        position: usize,
        alias: Option<String>,
    },
    /// `alias.*` of a pass-through table: every column from `start` on.
    Wildcard { start: usize },
}

/// An association populated from the same row as its owner.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedAssociation {
    pub source: usize,
    pub parent: usize,
    pub association: usize,
    pub mapping: EntityRowMapping,
}
