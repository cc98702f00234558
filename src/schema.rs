//! Schema export: CREATE TABLE statements for every mapped table.
//!
//! Meant for bootstrapping empty databases. Existing tables are left alone;
//! there is no diffing or migration.

use std::collections::HashSet;

use crate::metamodel::{EntityDescriptor, EntityKind, Metamodel, TableRole};
use crate::sql::{ColumnDef, CreateTable, Dialect, TableConstraint};

/// One statement per table, in entity registration order. Tables shared by
/// several entities (inherited, or mapped twice) are created once.
pub fn create_statements(metamodel: &Metamodel, dialect: Dialect) -> Vec<String> {
    let mut created = HashSet::new();
    let mut statements = Vec::new();
    for entity in metamodel.entities() {
        for (index, table) in entity.tables.iter().enumerate() {
            if table.role == TableRole::Inherited || !created.insert(table.name.clone()) {
                continue;
            }
            statements.push(create_table(metamodel, entity, index).to_sql(dialect));
        }
    }
    statements
}

fn create_table(metamodel: &Metamodel, entity: &EntityDescriptor, index: usize) -> CreateTable {
    let table = &entity.tables[index];
    let mut create = CreateTable::new(&table.name)
        .if_not_exists()
        .column(ColumnDef::new(&table.key_column, entity.identifier.ty.sql_type()).not_null());

    for attribute in entity.attributes.iter().filter(|a| a.table == index) {
        let column = ColumnDef::new(&attribute.column, attribute.ty.sql_type());
        create = create.column(if attribute.nullable {
            column
        } else {
            column.not_null()
        });
    }

    let mut foreign_keys = Vec::new();
    for association in &entity.associations {
        let Some((column, table_index)) = association.fk_column() else {
            continue;
        };
        let Some(target) = metamodel.by_qualified_name(&association.target) else {
            continue;
        };
        if table_index != index {
            continue;
        }
        if column != table.key_column {
            create = create.column(ColumnDef::new(column, target.identifier.ty.sql_type()));
        }
        let referenced = &target.tables[target.root_table_index()];
        foreign_keys.push(TableConstraint::foreign_key(
            [column],
            &referenced.name,
            [&referenced.key_column],
        ));
    }

    create = create.constraint(TableConstraint::primary_key([&table.key_column]));
    let owner = match (table.role, &entity.kind) {
        (TableRole::Secondary { .. }, _) => Some(entity.primary_table()),
        (TableRole::Primary, EntityKind::JoinedSubclass { .. }) => {
            metamodel.parent_of(entity).map(|parent| parent.primary_table())
        }
        _ => None,
    };
    if let Some(owner) = owner {
        create = create.constraint(TableConstraint::foreign_key(
            [&table.key_column],
            &owner.name,
            [&owner.key_column],
        ));
    }
    for foreign_key in foreign_keys {
        create = create.constraint(foreign_key);
    }
    create
}
