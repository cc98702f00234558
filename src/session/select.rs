//! Row-by-row hydration of a translated select.

use std::collections::{HashMap, HashSet};

use crate::engine::{hydrate, Row, Value};
use crate::metamodel::Metamodel;
use crate::translate::{ResultItem, SelectPlan};

use super::entity::Link;
use super::{Entity, IdentityMap, ResultValue, SessionError, Status};

/// Accumulates the results of one select while its rows are stepped.
///
/// Instances already tracked keep their state: a fetch join only fills an
/// association of a parent loaded by this result set, or one still waiting
/// for its first load. Rows whose root instance was removed are skipped.
pub(super) struct SelectLoader<'p> {
    plan: &'p SelectPlan,
    metamodel: &'p Metamodel,
    results: Vec<ResultValue>,
    fresh: Vec<Entity>,
    fresh_addrs: HashSet<usize>,
    fills: HashMap<(usize, usize), bool>,
}

impl<'p> SelectLoader<'p> {
    pub(super) fn new(plan: &'p SelectPlan, metamodel: &'p Metamodel) -> Self {
        Self {
            plan,
            metamodel,
            results: Vec::new(),
            fresh: Vec::new(),
            fresh_addrs: HashSet::new(),
            fills: HashMap::new(),
        }
    }

    pub(super) fn push(&mut self, row: &Row, identity: &mut IdentityMap) -> Result<(), SessionError> {
        let plan = self.plan;
        let mut by_source = HashMap::new();
        let mut values = Vec::with_capacity(plan.items.len());
        for item in &plan.items {
            match item {
                ResultItem::Entity { source, mapping } => {
                    match hydrate(row, mapping, self.metamodel, identity)? {
                        Some(hydrated) if hydrated.entity.status() == Status::Deleted => {
                            tracing::trace!(entity = %hydrated.entity, "skipping row of a removed instance");
                            return Ok(());
                        }
                        Some(hydrated) => {
                            if hydrated.fresh {
                                self.track_fresh(&hydrated.entity);
                            }
                            by_source.insert(*source, hydrated.entity.clone());
                            values.push(ResultValue::Entity(hydrated.entity));
                        }
                        None => values.push(ResultValue::Value(Value::Null)),
                    }
                }
                ResultItem::Scalar { position, .. } => {
                    values.push(ResultValue::Value(row.get(*position).cloned().unwrap_or_default()));
                }
                ResultItem::Wildcard { start } => values.extend(
                    row.values()
                        .get(*start..)
                        .unwrap_or_default()
                        .iter()
                        .cloned()
                        .map(ResultValue::Value),
                ),
            }
        }

        for fetch in &plan.fetches {
            let child = hydrate(row, &fetch.mapping, self.metamodel, identity)?
                .filter(|hydrated| hydrated.entity.status() != Status::Deleted);
            if let Some(hydrated) = &child {
                if hydrated.fresh {
                    self.track_fresh(&hydrated.entity);
                }
                by_source.insert(fetch.source, hydrated.entity.clone());
            }
            if let Some(parent) = by_source.get(&fetch.parent) {
                if self.fills(parent, fetch.association) {
                    attach(parent, fetch.association, child.map(|h| h.entity));
                }
            }
        }
        self.results.push(ResultValue::from_items(values));
        Ok(())
    }

    /// Results in row order, and the instances this select loaded.
    pub(super) fn finish(self) -> (Vec<ResultValue>, Vec<Entity>) {
        (self.results, self.fresh)
    }

    fn track_fresh(&mut self, entity: &Entity) {
        self.fresh_addrs.insert(entity.addr());
        self.fresh.push(entity.clone());
    }

    /// Decided once per parent and association, on the first row that
    /// reaches it.
    fn fills(&mut self, parent: &Entity, association: usize) -> bool {
        let key = (parent.addr(), association);
        if let Some(fill) = self.fills.get(&key) {
            return *fill;
        }
        let fill = self.fresh_addrs.contains(&key.0) || unresolved(parent, association);
        if fill {
            reset(parent, association);
        }
        self.fills.insert(key, fill);
        fill
    }
}

fn unresolved(parent: &Entity, association: usize) -> bool {
    matches!(
        parent.read().links[association],
        Link::Key(_) | Link::Collection(None)
    )
}

fn reset(parent: &Entity, association: usize) {
    let mut state = parent.write();
    match &mut state.links[association] {
        Link::Collection(elements) => *elements = Some(Vec::new()),
        link => *link = Link::Target(None),
    }
}

/// Record a fetch-joined child on its parent.
fn attach(parent: &Entity, association: usize, child: Option<Entity>) {
    let mut state = parent.write();
    match &mut state.links[association] {
        Link::Collection(elements) => {
            if let (Some(elements), Some(child)) = (elements.as_mut(), child) {
                if !elements.iter().any(|e| e.ptr_eq(&child)) {
                    elements.push(child);
                }
            }
        }
        link => {
            if child.is_some() {
                *link = Link::Target(child);
            }
        }
    }
}
