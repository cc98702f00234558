//! The session factory.
//!
//! Everything sessions share lives here, built once and handed out by
//! reference: the metamodel, the import caches behind the resolver, the
//! query-plan cache, result-set mappings, identifier generators and the
//! optional second-level cache. Cloning a factory is cheap.

mod generator;
mod plans;

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::Settings;
use crate::engine::{Connection, ConnectionError, KeyValue};
use crate::metamodel::{
    EntityDescriptor, MappingDocument, Metamodel, MetamodelError,
    ResultSetMappingRegistry,
};
use crate::oql::{BinaryOp, Parameter};
use crate::resolve::{
    ImportCache, ResolvedExpr, ResolvedQuery, ResolvedSelect, ResolvedSelection, ResolvedSource,
    ResolvedStatement, Resolver, SourceTarget,
};
use crate::schema;
use crate::session::{AccessError, InMemoryCache, SecondLevelCache, Session, SessionError};
use crate::sql::Dialect;
use crate::translate::{SelectPlan, Translation, Translator};

use generator::IdentifierGenerators;
pub use plans::{PlanCache, QueryPlan};

#[derive(Debug, Clone)]
pub struct SessionFactory {
    inner: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    settings: Settings,
    metamodel: Arc<Metamodel>,
    resolver: Resolver,
    translator: Translator,
    plans: PlanCache,
    /// Lookups by identifier and collection loads, keyed by entity or
    /// `entity.association`.
    lookups: DashMap<String, Arc<SelectPlan>>,
    result_mappings: ResultSetMappingRegistry,
    identifiers: IdentifierGenerators,
    second_level: Option<Arc<dyn SecondLevelCache>>,
}

#[derive(Debug)]
pub struct SessionFactoryBuilder {
    metamodel: Metamodel,
    settings: Settings,
    result_mappings: ResultSetMappingRegistry,
    second_level: Option<Arc<dyn SecondLevelCache>>,
}

impl SessionFactoryBuilder {
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn result_mappings(mut self, registry: ResultSetMappingRegistry) -> Self {
        self.result_mappings = registry;
        self
    }

    /// Use `cache` as second-level cache. Without one, an in-memory cache
    /// is created when `[cache] second_level` is set.
    pub fn second_level_cache(mut self, cache: Arc<dyn SecondLevelCache>) -> Self {
        self.second_level = Some(cache);
        self
    }

    pub fn build(self) -> SessionFactory {
        let metamodel = Arc::new(self.metamodel);
        let imports = Arc::new(ImportCache::new(self.settings.query.import_cache_capacity));
        let dialect = self.settings.engine.dialect;
        let second_level = self.second_level.or_else(|| {
            self.settings
                .cache
                .second_level
                .then(|| Arc::new(InMemoryCache::new()) as Arc<dyn SecondLevelCache>)
        });
        tracing::info!(
            entities = metamodel.len(),
            %dialect,
            second_level = second_level.is_some(),
            "session factory built"
        );
        SessionFactory {
            inner: Arc::new(Shared {
                resolver: Resolver::new(Arc::clone(&metamodel), imports),
                translator: Translator::new(dialect),
                plans: PlanCache::new(self.settings.query.plan_cache_capacity),
                lookups: DashMap::new(),
                result_mappings: self.result_mappings,
                identifiers: IdentifierGenerators::default(),
                second_level,
                metamodel,
                settings: self.settings,
            }),
        }
    }
}

impl SessionFactory {
    pub fn builder(metamodel: Metamodel) -> SessionFactoryBuilder {
        SessionFactoryBuilder {
            metamodel,
            settings: Settings::default(),
            result_mappings: ResultSetMappingRegistry::new(),
            second_level: None,
        }
    }

    /// Factory over the entities and result-set mappings of a TOML mapping
    /// document.
    pub fn from_mapping_file(
        path: impl AsRef<Path>,
        settings: Settings,
    ) -> Result<Self, MetamodelError> {
        let (metamodel, result_mappings) = MappingDocument::from_file(path)?.build()?;
        Ok(Self::builder(metamodel)
            .settings(settings)
            .result_mappings(result_mappings)
            .build())
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Dialect query plans are translated for.
    pub fn dialect(&self) -> Dialect {
        self.inner.translator.dialect()
    }

    pub fn metamodel(&self) -> &Arc<Metamodel> {
        &self.inner.metamodel
    }

    pub fn resolver(&self) -> &Resolver {
        &self.inner.resolver
    }

    pub fn translator(&self) -> &Translator {
        &self.inner.translator
    }

    pub fn plan_cache(&self) -> &PlanCache {
        &self.inner.plans
    }

    pub fn result_mappings(&self) -> &ResultSetMappingRegistry {
        &self.inner.result_mappings
    }

    pub fn second_level_cache(&self) -> Option<&Arc<dyn SecondLevelCache>> {
        self.inner.second_level.as_ref()
    }

    /// A new session over `connection`. The connection should speak the
    /// factory's dialect.
    pub fn open_session(&self, connection: impl Connection + 'static) -> Session {
        if connection.dialect() != self.dialect() {
            tracing::warn!(
                factory = %self.dialect(),
                connection = %connection.dialect(),
                "connection dialect differs from the factory dialect"
            );
        }
        Session::new(self.clone(), Box::new(connection))
    }

    /// Create every mapped table that does not exist yet.
    pub fn export_schema(&self, connection: &mut dyn Connection) -> Result<(), ConnectionError> {
        let statements = schema::create_statements(&self.inner.metamodel, connection.dialect());
        for statement in &statements {
            tracing::debug!(sql = %statement, "creating table");
            connection.execute_batch(statement)?;
        }
        tracing::info!(tables = statements.len(), "schema exported");
        Ok(())
    }

    /// Resolved and translated plans of `text`, one per concrete query.
    pub fn plans(&self, text: &str) -> Result<Arc<[QueryPlan]>, SessionError> {
        if let Some(plans) = self.inner.plans.get(text) {
            return Ok(plans);
        }
        let plans = self
            .inner
            .resolver
            .resolve_text(text)?
            .into_iter()
            .map(|query| -> Result<QueryPlan, SessionError> {
                let translation = self.inner.translator.translate(&query)?;
                Ok(QueryPlan { query, translation })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let plans: Arc<[QueryPlan]> = plans.into();
        self.inner.plans.insert(text, Arc::clone(&plans));
        Ok(plans)
    }

    /// Select of one `entity` row by identifier.
    pub(crate) fn entity_plan(
        &self,
        entity: &Arc<EntityDescriptor>,
    ) -> Result<Arc<SelectPlan>, SessionError> {
        self.lookup_plan(entity.qualified_name.clone(), || {
            lookup_query(
                entity,
                ResolvedExpr::Identifier { source: 0 },
                format!(
                    "select e from {} e where e.{} = ?1",
                    entity.qualified_name, entity.identifier.name
                ),
            )
        })
    }

    /// Select of the instances on the inverse side `association` of
    /// `owner`, by the owner's identifier: collection elements or the single
    /// owner of an inverse one-to-one.
    pub(crate) fn inverse_plan(
        &self,
        owner: &EntityDescriptor,
        association: usize,
    ) -> Result<Arc<SelectPlan>, SessionError> {
        let descriptor = &owner.associations[association];
        let Some(mapped_by) = descriptor.mapped_by() else {
            return Err(AccessError::NotCollection {
                entity: owner.qualified_name.clone(),
                association: descriptor.name.clone(),
            }
            .into());
        };
        let target = self
            .inner
            .metamodel
            .by_qualified_name(&descriptor.target)
            .ok_or_else(|| SessionError::UnknownEntity(descriptor.target.clone()))?;
        let (inverse, _) = target.association(mapped_by).ok_or_else(|| {
            SessionError::UnknownEntity(format!("{}.{}", target.qualified_name, mapped_by))
        })?;
        self.lookup_plan(
            format!("{}.{}", owner.qualified_name, descriptor.name),
            || {
                lookup_query(
                    target,
                    ResolvedExpr::ForeignKey {
                        source: 0,
                        association: inverse,
                    },
                    format!(
                        "select e from {} e where e.{} = ?1",
                        target.qualified_name, mapped_by
                    ),
                )
            },
        )
    }

    fn lookup_plan(
        &self,
        key: String,
        build: impl FnOnce() -> ResolvedQuery,
    ) -> Result<Arc<SelectPlan>, SessionError> {
        if let Some(plan) = self.inner.lookups.get(&key) {
            return Ok(Arc::clone(plan.value()));
        }
        let query = build();
        match self.inner.translator.translate(&query)? {
            Translation::Select(plan) => {
                let plan = Arc::new(plan);
                self.inner.lookups.insert(key, Arc::clone(&plan));
                Ok(plan)
            }
            Translation::Mutation(_) => Err(SessionError::NotASelect(query.text)),
        }
    }

    pub(crate) fn next_identifier(
        &self,
        root: &EntityDescriptor,
        connection: &mut dyn Connection,
    ) -> Result<KeyValue, SessionError> {
        self.inner
            .identifiers
            .next(&self.inner.metamodel, root, connection)
    }
}

/// `select e from <entity> e where <key> = ?1`, built without parsing.
fn lookup_query(entity: &Arc<EntityDescriptor>, key: ResolvedExpr, text: String) -> ResolvedQuery {
    ResolvedQuery {
        text,
        sources: vec![ResolvedSource {
            alias: Some("e".into()),
            target: SourceTarget::Entity(Arc::clone(entity)),
            join: None,
        }],
        statement: ResolvedStatement::Select(ResolvedSelect {
            distinct: false,
            selections: vec![ResolvedSelection {
                expr: ResolvedExpr::Entity { source: 0 },
                alias: None,
            }],
            where_clause: Some(ResolvedExpr::Binary {
                left: Box::new(key),
                op: BinaryOp::Eq,
                right: Box::new(ResolvedExpr::Parameter(Parameter::Positional(1))),
            }),
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }),
    }
}
