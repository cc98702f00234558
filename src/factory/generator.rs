//! Identifier generation for `increment` identifiers.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::engine::{Connection, KeyValue, Value};
use crate::metamodel::{EntityDescriptor, Metamodel, ValueType};
use crate::session::SessionError;
use crate::sql::{self, Expr, SelectExpr, TableRef};

/// One counter per hierarchy root, seeded from `max(id)` on first use.
#[derive(Debug, Default)]
pub(crate) struct IdentifierGenerators {
    counters: DashMap<String, Arc<AtomicI64>>,
}

impl IdentifierGenerators {
    pub fn next(
        &self,
        metamodel: &Metamodel,
        root: &EntityDescriptor,
        connection: &mut dyn Connection,
    ) -> Result<KeyValue, SessionError> {
        if root.identifier.ty != ValueType::Integer {
            return Err(SessionError::IdentifierGeneration {
                entity: root.qualified_name.clone(),
                reason: "increment needs an integer identifier".into(),
            });
        }
        let existing = self
            .counters
            .get(&root.qualified_name)
            .map(|counter| Arc::clone(counter.value()));
        let counter = match existing {
            Some(counter) => counter,
            None => {
                let max = current_max(metamodel, root, connection)?;
                let entry = self
                    .counters
                    .entry(root.qualified_name.clone())
                    .or_insert_with(|| Arc::new(AtomicI64::new(max)));
                Arc::clone(entry.value())
            }
        };
        Ok(KeyValue::Integer(counter.fetch_add(1, Ordering::SeqCst) + 1))
    }
}

/// Largest identifier stored anywhere in the hierarchy of `root`.
fn current_max(
    metamodel: &Metamodel,
    root: &EntityDescriptor,
    connection: &mut dyn Connection,
) -> Result<i64, SessionError> {
    let tables: BTreeSet<(&str, &str)> = metamodel
        .entities()
        .filter(|entity| metamodel.root_of(entity).qualified_name == root.qualified_name)
        .map(|entity| {
            let table = entity.primary_table();
            (table.name.as_str(), table.key_column.as_str())
        })
        .collect();

    let mut max = 0;
    for (table, key_column) in tables {
        let statement = sql::Query::new()
            .select(vec![SelectExpr::new(Expr::Function {
                name: "MAX".into(),
                args: vec![sql::table_col(table, key_column)],
                distinct: false,
            })])
            .from(TableRef::new(table))
            .to_sql(connection.dialect());
        let found = connection
            .query(&statement, &[])?
            .next()
            .and_then(|row| row.get(0).and_then(Value::as_i64))
            .unwrap_or(0);
        max = max.max(found);
    }
    tracing::debug!(entity = %root.qualified_name, max, "increment generator seeded");
    Ok(max)
}
