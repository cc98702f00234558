//! Sessions: the unit of work.
//!
//! A [`Session`] owns an identity map of every instance it loaded or
//! persisted, hands out one [`Entity`] handle per row, and writes pending
//! changes back on [`Session::flush`]. A session is used by one thread at
//! a time; the [`SessionFactory`] behind it is shared.
//!
//! ```ignore
//! let mut session = factory.open_session(SqliteConnection::open_in_memory()?);
//! let employee = session.find("Employee", 1)?.unwrap();
//! employee.set("name", "Ada")?;
//! session.flush()?;
//! ```

pub mod cache;
pub mod entity;
mod identity;
mod query;
mod select;

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::engine::{Connection, ConnectionError, HydrationError, KeyValue, Row, Value};
use crate::factory::SessionFactory;
use crate::flush::{FlushError, FlushPlanner, WriteKind, WriteOperation};
use crate::metamodel::{AssociationKind, EntityDescriptor, FetchMode, IdGenerator, MetamodelError};
use crate::resolve::ResolveError;
use crate::sql::{self, ExprExt, SelectExpr, TableRef};
use crate::translate::{SelectPlan, TranslateError};

pub use cache::{CachedEntity, InMemoryCache, SecondLevelCache};
pub use entity::{Entity, Slot, Snapshot, Status};
pub use identity::{EntityKey, IdentityMap};
pub use query::{NativeQuery, Query, ResultValue};

use entity::{association_index, Link};
use select::SelectLoader;

/// A versioned or mandatory row changed underneath the session.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Row was updated or deleted by another transaction: {entity}#{id}")]
pub struct StaleStateError {
    pub entity: String,
    pub id: KeyValue,
}

/// Misuse of an entity handle.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AccessError {
    #[error("{entity} has no property {property}")]
    UnknownProperty { entity: String, property: String },

    #[error("{entity}.{attribute} is not loaded")]
    NotLoaded { entity: String, attribute: String },

    #[error("{entity}.{association} is not a to-one association")]
    NotToOne { entity: String, association: String },

    #[error("{entity}.{association} is not a collection")]
    NotCollection { entity: String, association: String },

    #[error("Identifier of {0} cannot change once it is persistent")]
    IdentifierChange(String),

    #[error("{0} is detached")]
    Detached(String),

    #[error("{0} has been removed")]
    Removed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Hydration(#[from] HydrationError),

    #[error(transparent)]
    Flush(#[from] FlushError),

    #[error(transparent)]
    Stale(#[from] StaleStateError),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Metamodel(#[from] MetamodelError),

    #[error("Session is closed")]
    Closed,

    #[error("A previous flush failed; the session must be discarded")]
    Poisoned,

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("{0} needs an identifier before it can be persisted")]
    MissingIdentifier(String),

    #[error("Another instance is already managed as {0}")]
    NonUniqueObject(String),

    #[error("{0} is not managed by this session")]
    DetachedEntity(String),

    #[error("Query returned {0} results where at most one was expected")]
    NonUniqueResult(usize),

    #[error("No value bound for parameter {0}")]
    UnboundParameter(String),

    #[error("Not a select statement: {0}")]
    NotASelect(String),

    #[error("Not an update or delete statement: {0}")]
    NotAMutation(String),

    #[error("Cannot generate an identifier for {entity}: {reason}")]
    IdentifierGeneration { entity: String, reason: String },
}

/// A unit of work over one connection.
pub struct Session {
    id: Uuid,
    factory: SessionFactory,
    connection: Box<dyn Connection>,
    identity: IdentityMap,
    poisoned: bool,
    closed: bool,
}

impl Session {
    pub(crate) fn new(factory: SessionFactory, connection: Box<dyn Connection>) -> Self {
        let id = Uuid::new_v4();
        info!(session = %id, dialect = %connection.dialect(), "session opened");
        Self {
            id,
            factory,
            connection,
            identity: IdentityMap::new(),
            poisoned: false,
            closed: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn factory(&self) -> &SessionFactory {
        &self.factory
    }

    pub fn identity_map(&self) -> &IdentityMap {
        &self.identity
    }

    /// The underlying connection, for statements outside the mapping.
    pub fn connection(&mut self) -> &mut dyn Connection {
        self.connection.as_mut()
    }

    pub fn is_open(&self) -> bool {
        !self.closed
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    fn check_open(&self) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        Ok(())
    }

    fn key_of(&self, entity: &Entity) -> Option<EntityKey> {
        let id = entity.id()?;
        Some(EntityKey::of(self.factory.metamodel(), &entity.descriptor(), id))
    }

    /// Whether this exact instance is tracked by the session.
    pub fn contains(&self, entity: &Entity) -> bool {
        self.key_of(entity)
            .and_then(|key| self.identity.get(&key))
            .is_some_and(|tracked| tracked.ptr_eq(entity))
    }

    /// Status of `entity` if this session tracks it.
    pub fn status_of(&self, entity: &Entity) -> Option<Status> {
        self.contains(entity).then(|| entity.status())
    }

    /// Make a transient instance managed. It is inserted at the next
    /// flush; associations marked cascade-persist follow it.
    pub fn persist(&mut self, entity: &Entity) -> Result<(), SessionError> {
        self.check_open()?;
        match entity.status() {
            Status::Transient => {}
            Status::Managed | Status::Loading if self.contains(entity) => return Ok(()),
            Status::Deleted if self.contains(entity) => {
                entity.set_status(Status::Managed);
                return Ok(());
            }
            _ => return Err(SessionError::DetachedEntity(entity.to_string())),
        }

        let descriptor = entity.descriptor();
        let id = match entity.id() {
            Some(id) => id,
            None => match descriptor.identifier.generator {
                IdGenerator::Assigned => {
                    return Err(SessionError::MissingIdentifier(
                        descriptor.qualified_name.clone(),
                    ))
                }
                IdGenerator::Increment => {
                    let metamodel = Arc::clone(self.factory.metamodel());
                    let id = self.factory.next_identifier(
                        metamodel.root_of(&descriptor),
                        self.connection.as_mut(),
                    )?;
                    entity.write().id = Some(id.clone());
                    id
                }
                IdGenerator::Derived => {
                    let id = self.derived_identifier(entity, &descriptor)?;
                    entity.write().id = Some(id.clone());
                    id
                }
            },
        };

        let key = EntityKey::of(self.factory.metamodel(), &descriptor, id);
        if self.identity.contains_key(&key) {
            return Err(SessionError::NonUniqueObject(key.to_string()));
        }
        {
            let mut state = entity.write();
            if let Some(version) = descriptor.version {
                if state.attributes[version].value().map_or(true, Value::is_null) {
                    state.attributes[version] = Slot::Loaded(Value::Integer(0));
                }
            }
            state.status = Status::Managed;
        }
        trace!(session = %self.id, %key, "persist");
        self.identity.insert(key, entity.clone());

        for target in entity.cascade_targets(|cascade| cascade.persist) {
            if target.status() == Status::Transient {
                self.persist(&target)?;
            }
        }
        Ok(())
    }

    /// Identifier of the target of the association `entity` derives its
    /// identifier from. A transient target is persisted first when the
    /// association cascades persist.
    fn derived_identifier(
        &mut self,
        entity: &Entity,
        descriptor: &EntityDescriptor,
    ) -> Result<KeyValue, SessionError> {
        let missing = || SessionError::MissingIdentifier(descriptor.qualified_name.clone());
        let (index, association) = descriptor.derived_from().ok_or_else(missing)?;
        let link = entity.read().links[index].clone();
        match link {
            Link::Key(key) => key.ok_or_else(missing),
            Link::Target(Some(target)) => {
                if target.status() == Status::Transient && association.cascade.persist {
                    self.persist(&target)?;
                }
                target.id().ok_or_else(missing)
            }
            Link::Target(None) | Link::Collection(_) => Err(missing()),
        }
    }

    /// Instance of `entity` with identifier `id`: from the identity map,
    /// then the second-level cache, then the database.
    pub fn find(
        &mut self,
        entity: &str,
        id: impl Into<KeyValue>,
    ) -> Result<Option<Entity>, SessionError> {
        self.check_open()?;
        let descriptor = self
            .factory
            .metamodel()
            .get(entity)
            .cloned()
            .ok_or_else(|| SessionError::UnknownEntity(entity.to_string()))?;
        self.find_by_descriptor(&descriptor, id.into())
    }

    fn find_by_descriptor(
        &mut self,
        descriptor: &Arc<EntityDescriptor>,
        id: KeyValue,
    ) -> Result<Option<Entity>, SessionError> {
        let metamodel = Arc::clone(self.factory.metamodel());
        let key = EntityKey::of(&metamodel, descriptor, id.clone());
        if let Some(existing) = self.identity.get(&key) {
            return Ok((existing.status() != Status::Deleted).then(|| existing.clone()));
        }

        if let Some(second_level) = self.factory.second_level_cache().cloned() {
            let cached = second_level.get(&key).and_then(|cached| {
                let concrete = metamodel.by_qualified_name(&cached.entity)?;
                let fits = concrete.qualified_name == descriptor.qualified_name
                    || metamodel.is_subtype_of(concrete, &descriptor.qualified_name);
                fits.then(|| cache::restore(concrete, id.clone(), cached.snapshot))
            });
            if let Some(entity) = cached {
                trace!(session = %self.id, %key, "second-level cache hit");
                self.identity.insert(key, entity.clone());
                self.resolve_eager(std::slice::from_ref(&entity))?;
                return Ok(Some(entity));
            }
        }

        let plan = self.factory.entity_plan(descriptor)?;
        let found = self
            .run_select(&plan, vec![Value::from(id)])?
            .into_iter()
            .find_map(ResultValue::into_entity);
        if let (Some(entity), Some(second_level)) = (&found, self.factory.second_level_cache()) {
            if let Some(snapshot) = entity.snapshot() {
                second_level.put(
                    key,
                    CachedEntity {
                        entity: entity.entity_name(),
                        snapshot,
                    },
                );
            }
        }
        Ok(found)
    }

    /// Schedule a managed instance for deletion. Associations marked
    /// cascade-remove are loaded and removed with it.
    pub fn remove(&mut self, entity: &Entity) -> Result<(), SessionError> {
        self.check_open()?;
        match entity.status() {
            Status::Transient | Status::Deleted => return Ok(()),
            Status::Managed | Status::Loading if self.contains(entity) => {}
            _ => return Err(SessionError::DetachedEntity(entity.to_string())),
        }
        entity.set_status(Status::Deleted);
        trace!(session = %self.id, %entity, "remove");

        let descriptor = entity.descriptor();
        for association in descriptor.associations.iter().filter(|a| a.cascade.remove) {
            let targets = match association.kind {
                AssociationKind::ToOne { .. } | AssociationKind::InverseToOne { .. } => self
                    .reference(entity, &association.name)?
                    .into_iter()
                    .collect(),
                AssociationKind::OneToMany { .. } => self.collection(entity, &association.name)?,
            };
            for target in targets {
                self.remove(&target)?;
            }
        }

        // never written: forget it instead of deleting
        if entity.snapshot().is_none() {
            if let Some(key) = self.key_of(entity) {
                self.identity.remove(&key);
            }
            entity.set_status(Status::Transient);
        }
        Ok(())
    }

    /// Stop tracking `entity`. Pending changes to it are discarded.
    pub fn evict(&mut self, entity: &Entity) {
        if !self.contains(entity) {
            return;
        }
        if let Some(key) = self.key_of(entity) {
            self.identity.remove(&key);
            trace!(session = %self.id, %key, "evict");
        }
        entity.set_status(Status::Detached);
    }

    /// Write pending inserts, updates and deletes.
    ///
    /// Runs inside the active transaction, or in one of its own when none
    /// is active. Any failure poisons the session.
    pub fn flush(&mut self) -> Result<(), SessionError> {
        self.check_open()?;
        if self.poisoned {
            return Err(SessionError::Poisoned);
        }
        self.cascade_persist()?;
        let metamodel = Arc::clone(self.factory.metamodel());
        let operations = FlushPlanner::new(&metamodel).plan(&self.identity)?;
        if operations.is_empty() {
            return Ok(());
        }

        let owns_transaction = !self.connection.in_transaction();
        if owns_transaction {
            self.connection.begin()?;
        }
        let mut outcome = self.execute_operations(&operations);
        if outcome.is_ok() && owns_transaction {
            outcome = self.connection.commit().map_err(SessionError::from);
        }
        if let Err(error) = outcome {
            self.poisoned = true;
            warn!(session = %self.id, %error, "flush failed; session must be discarded");
            if owns_transaction && self.connection.in_transaction() {
                if let Err(rollback) = self.connection.rollback() {
                    warn!(session = %self.id, error = %rollback, "rollback after failed flush failed");
                }
            }
            return Err(error);
        }

        self.after_flush(&operations);
        debug!(session = %self.id, operations = operations.len(), "flushed");
        Ok(())
    }

    fn cascade_persist(&mut self) -> Result<(), SessionError> {
        let managed: Vec<Entity> = self
            .identity
            .entities()
            .filter(|entity| entity.status() == Status::Managed)
            .cloned()
            .collect();
        for entity in managed {
            for target in entity.cascade_targets(|cascade| cascade.persist) {
                if target.status() == Status::Transient {
                    self.persist(&target)?;
                }
            }
        }
        Ok(())
    }

    fn execute_operations(&mut self, operations: &[WriteOperation]) -> Result<(), SessionError> {
        let dialect = self.connection.dialect();
        for operation in operations {
            let (statement, params) = operation.statement(dialect);
            debug!(session = %self.id, %operation, sql = %statement, "write");
            if self.connection.execute(&statement, &params)? > 0 {
                continue;
            }
            if let Some((insert, params)) = operation.fallback_insert(dialect) {
                debug!(session = %self.id, sql = %insert, "optional row missing; inserting");
                self.connection.execute(&insert, &params)?;
            } else if operation.expects_row() {
                return Err(StaleStateError {
                    entity: operation.entity.entity_name(),
                    id: operation.key.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Bring in-memory state in line with what was written.
    fn after_flush(&mut self, operations: &[WriteOperation]) {
        for operation in operations {
            let mut state = operation.entity.write();
            state.tables[operation.table_index] =
                Some(!matches!(operation.kind, WriteKind::Delete { .. }));
            let version = state.descriptor.version;
            if let (
                WriteKind::Update {
                    version: Some(check),
                    ..
                },
                Some(index),
            ) = (&operation.kind, version)
            {
                state.attributes[index] = Slot::Loaded(Value::Integer(check.expected + 1));
            }
        }

        let mut purged = Vec::new();
        for (key, entity) in self.identity.iter() {
            match entity.status() {
                Status::Managed => entity.refresh_snapshot(),
                Status::Deleted => purged.push(key.clone()),
                _ => {}
            }
        }
        if let Some(second_level) = self.factory.second_level_cache() {
            for operation in operations {
                if let Some(key) = self.key_of(&operation.entity) {
                    second_level.invalidate(&key);
                }
            }
        }
        for key in purged {
            self.identity.remove(&key);
        }
    }

    /// Detach every tracked instance.
    pub fn clear(&mut self) {
        let detached = self.identity.len();
        for (_, entity) in self.identity.drain() {
            entity.set_status(Status::Detached);
        }
        debug!(session = %self.id, detached, "cleared");
    }

    /// Roll back an active transaction, detach everything and refuse
    /// further work.
    pub fn close(&mut self) -> Result<(), SessionError> {
        if self.closed {
            return Ok(());
        }
        let mut result = Ok(());
        if self.connection.in_transaction() {
            warn!(session = %self.id, "closing with an active transaction; rolling back");
            result = self.connection.rollback().map_err(SessionError::from);
        }
        self.clear();
        self.closed = true;
        info!(session = %self.id, "session closed");
        result
    }

    pub fn begin(&mut self) -> Result<(), SessionError> {
        self.check_open()?;
        self.connection.begin()?;
        debug!(session = %self.id, "transaction started");
        Ok(())
    }

    /// Flush, then commit the active transaction. A failed flush rolls the
    /// transaction back. Without [`Session::begin`] the flush runs in its
    /// own transaction and there is nothing left to commit.
    pub fn commit(&mut self) -> Result<(), SessionError> {
        self.check_open()?;
        if let Err(error) = self.flush() {
            if self.connection.in_transaction() {
                if let Err(rollback) = self.connection.rollback() {
                    warn!(session = %self.id, error = %rollback, "rollback after failed flush failed");
                }
            }
            return Err(error);
        }
        if !self.connection.in_transaction() {
            debug!(session = %self.id, "no open transaction, flush committed its own");
            return Ok(());
        }
        self.connection.commit()?;
        debug!(session = %self.id, "transaction committed");
        Ok(())
    }

    /// Roll back the active transaction. Tracked instances keep their
    /// in-memory state.
    pub fn rollback(&mut self) -> Result<(), SessionError> {
        self.check_open()?;
        self.connection.rollback()?;
        debug!(session = %self.id, "transaction rolled back");
        Ok(())
    }

    /// An object query to bind and run.
    pub fn create_query(&mut self, text: &str) -> Query<'_> {
        Query::new(self, text)
    }

    /// A native SQL query, optionally hydrated through a named result-set
    /// mapping.
    pub fn native_query(&mut self, sql: &str) -> NativeQuery<'_> {
        NativeQuery::new(self, sql)
    }

    /// Value of attribute `name`, fetching it when it is lazy and not
    /// loaded yet. Loading writes the value into the snapshot too, so it
    /// does not count as a change.
    pub fn load_attribute(&mut self, entity: &Entity, name: &str) -> Result<Value, SessionError> {
        self.check_open()?;
        if entity.is_loaded(name)? {
            return Ok(entity.get(name)?);
        }
        if !self.contains(entity) {
            return Err(AccessError::Detached(entity.to_string()).into());
        }
        let descriptor = entity.descriptor();
        let id = entity
            .id()
            .ok_or_else(|| SessionError::MissingIdentifier(descriptor.qualified_name.clone()))?;
        let Some((index, attribute)) = descriptor.attribute(name) else {
            return Err(AccessError::UnknownProperty {
                entity: descriptor.qualified_name.clone(),
                property: name.to_string(),
            }
            .into());
        };
        let table = &descriptor.tables[attribute.table];
        let statement = sql::Query::new()
            .select(vec![SelectExpr::new(sql::table_col(&table.name, &attribute.column))])
            .from(TableRef::new(&table.name))
            .filter(sql::table_col(&table.name, &table.key_column).eq(sql::param(1)))
            .to_sql(self.connection.dialect());
        debug!(session = %self.id, %entity, attribute = name, sql = %statement, "loading lazy attribute");

        let row = self.connection.query(&statement, &[Value::from(id)])?.next();
        let present = row.is_some();
        let value = row
            .and_then(|row| row.into_values().into_iter().next())
            .unwrap_or_default()
            .coerce(attribute.ty);

        let mut state = entity.write();
        state.attributes[index] = Slot::Loaded(value.clone());
        let unknown_presence = table.is_optional() && state.tables[attribute.table].is_none();
        if unknown_presence {
            state.tables[attribute.table] = Some(present);
        }
        if let Some(snapshot) = state.snapshot.as_mut() {
            snapshot.attributes[index] = Some(value.clone());
            if unknown_presence {
                snapshot.tables[attribute.table] = Some(present);
            }
        }
        Ok(value)
    }

    /// Target of to-one association `name`, loading it if only its key is
    /// known.
    pub fn reference(&mut self, entity: &Entity, name: &str) -> Result<Option<Entity>, SessionError> {
        self.check_open()?;
        let (index, link, target, inverse) = {
            let state = entity.read();
            let index = association_index(&state, name)?;
            let association = &state.descriptor.associations[index];
            (
                index,
                state.links[index].clone(),
                association.target.clone(),
                association.mapped_by().is_some(),
            )
        };
        match link {
            Link::Target(target) => Ok(target),
            Link::Key(None) => Ok(None),
            Link::Key(Some(key)) if inverse => {
                if !self.contains(entity) {
                    return Err(AccessError::Detached(entity.to_string()).into());
                }
                let plan = self.factory.inverse_plan(&entity.descriptor(), index)?;
                let found = self
                    .run_select(&plan, vec![Value::from(key)])?
                    .into_iter()
                    .find_map(ResultValue::into_entity);
                let mut state = entity.write();
                if matches!(state.links[index], Link::Key(_)) {
                    state.links[index] = Link::Target(found.clone());
                }
                Ok(found)
            }
            Link::Key(Some(key)) => {
                if !self.contains(entity) {
                    return Err(AccessError::Detached(entity.to_string()).into());
                }
                let descriptor = self
                    .factory
                    .metamodel()
                    .by_qualified_name(&target)
                    .cloned()
                    .ok_or(SessionError::UnknownEntity(target))?;
                let found = self.find_by_descriptor(&descriptor, key)?;
                if let Some(found) = &found {
                    let mut state = entity.write();
                    if matches!(state.links[index], Link::Key(_)) {
                        state.links[index] = Link::Target(Some(found.clone()));
                    }
                }
                Ok(found)
            }
            Link::Collection(_) => Err(AccessError::NotToOne {
                entity: entity.entity_name(),
                association: name.to_string(),
            }
            .into()),
        }
    }

    /// Elements of collection `name`, loading them on first access.
    pub fn collection(&mut self, entity: &Entity, name: &str) -> Result<Vec<Entity>, SessionError> {
        self.check_open()?;
        let (index, link) = {
            let state = entity.read();
            let index = association_index(&state, name)?;
            (index, state.links[index].clone())
        };
        match link {
            Link::Collection(Some(elements)) => Ok(elements),
            Link::Collection(None) => {
                if !self.contains(entity) {
                    return Err(AccessError::Detached(entity.to_string()).into());
                }
                let descriptor = entity.descriptor();
                let id = entity.id().ok_or_else(|| {
                    SessionError::MissingIdentifier(descriptor.qualified_name.clone())
                })?;
                let plan = self.factory.inverse_plan(&descriptor, index)?;
                let elements: Vec<Entity> = self
                    .run_select(&plan, vec![Value::from(id)])?
                    .into_iter()
                    .filter_map(ResultValue::into_entity)
                    .filter(|element| element.status() != Status::Deleted)
                    .collect();
                entity.write().links[index] = Link::Collection(Some(elements.clone()));
                Ok(elements)
            }
            Link::Key(_) | Link::Target(_) => Err(AccessError::NotCollection {
                entity: entity.entity_name(),
                association: name.to_string(),
            }
            .into()),
        }
    }

    /// Run a translated select and hydrate its rows as the connection
    /// steps through them.
    fn run_select(
        &mut self,
        plan: &SelectPlan,
        params: Vec<Value>,
    ) -> Result<Vec<ResultValue>, SessionError> {
        let metamodel = Arc::clone(self.factory.metamodel());
        let mut loader = SelectLoader::new(plan, &metamodel);
        let mut failure = None;
        let identity = &mut self.identity;
        let visited = self.connection.stream(&plan.statement.sql, &params, &mut |row: Row| {
            match loader.push(&row, identity) {
                Ok(()) => ControlFlow::Continue(()),
                Err(error) => {
                    failure = Some(error);
                    ControlFlow::Break(())
                }
            }
        })?;
        if let Some(error) = failure {
            return Err(error);
        }
        debug!(session = %self.id, sql = %plan.statement.sql, rows = visited, "select");

        let (results, fresh) = loader.finish();
        self.resolve_eager(&fresh)?;
        Ok(results)
    }

    /// Bind eager to-one associations of freshly loaded instances.
    fn resolve_eager(&mut self, entities: &[Entity]) -> Result<(), SessionError> {
        let metamodel = Arc::clone(self.factory.metamodel());
        for entity in entities {
            let mut inverse = Vec::new();
            let pending: Vec<(usize, Arc<EntityDescriptor>, KeyValue)> = {
                let state = entity.read();
                let mut pending = Vec::new();
                for (index, (association, link)) in
                    state.descriptor.associations.iter().zip(&state.links).enumerate()
                {
                    if association.fetch != FetchMode::Eager {
                        continue;
                    }
                    match (link, &association.kind) {
                        (Link::Key(Some(_)), AssociationKind::InverseToOne { .. }) => {
                            inverse.push(association.name.clone());
                        }
                        (Link::Key(Some(key)), AssociationKind::ToOne { .. }) => {
                            if let Some(target) = metamodel.by_qualified_name(&association.target) {
                                pending.push((index, Arc::clone(target), key.clone()));
                            }
                        }
                        _ => {}
                    }
                }
                pending
            };
            for (index, target, key) in pending {
                if let Some(found) = self.find_by_descriptor(&target, key)? {
                    let mut state = entity.write();
                    if matches!(state.links[index], Link::Key(_)) {
                        state.links[index] = Link::Target(Some(found));
                    }
                }
            }
            for name in inverse {
                self.reference(entity, &name)?;
            }
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            warn!(session = %self.id, %error, "closing dropped session failed");
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("entities", &self.identity.len())
            .field("poisoned", &self.poisoned)
            .field("closed", &self.closed)
            .finish()
    }
}
