//! Semantic resolution of parsed queries ("splitting").
//!
//! Every root entity token is imported against the metamodel. A name that
//! several entities answer to fans the query out into one concrete query
//! per entity; several such roots produce the cartesian product. A name that
//! matches nothing is passed through as a plain table reference.
//!
//! ```ignore
//! let resolver = Resolver::new(metamodel, Arc::new(ImportCache::new(1000)));
//! let queries = resolver.resolve_text("from Named n where n.name = 'x'")?;
//! ```

mod binder;
mod cache;
mod query;

use std::sync::Arc;

use crate::metamodel::{EntityDescriptor, Metamodel};
use crate::oql::{self, EntityRef, QueryAst, Span, Statement, SyntaxError};

use binder::Binder;
pub use cache::{ImportCache, ImportLookup};
pub use query::*;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error("Unknown attribute {attribute} on {entity}")]
    UnknownAttribute { entity: String, attribute: String },

    #[error("{attribute} is not an association of {entity}")]
    NotAnAssociation { entity: String, attribute: String },

    #[error("Collection-valued association {entity}.{association} needs an explicit join")]
    CollectionPath { entity: String, association: String },

    #[error("Inverse association {entity}.{association} has no column; navigate or join it")]
    InverseReference { entity: String, association: String },

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Alias declared twice: {0}")]
    DuplicateAlias(String),

    #[error("Cannot assign to {0}")]
    InvalidAssignment(String),

    #[error("Cannot assign to identifier {0}")]
    IdentifierAssignment(String),
}

/// A root entity token of the statement, in binding order.
struct RootToken {
    name: String,
    span: Span,
}

impl RootToken {
    fn from_ref(entity: &EntityRef) -> Self {
        Self {
            name: entity.name.value.clone(),
            span: entity.name.span.clone(),
        }
    }
}

/// Binds queries to a metamodel. Cheap to clone; caches are shared.
#[derive(Debug, Clone)]
pub struct Resolver {
    metamodel: Arc<Metamodel>,
    imports: Arc<ImportCache>,
}

impl Resolver {
    pub fn new(metamodel: Arc<Metamodel>, imports: Arc<ImportCache>) -> Self {
        Self { metamodel, imports }
    }

    pub fn metamodel(&self) -> &Arc<Metamodel> {
        &self.metamodel
    }

    pub fn imports(&self) -> &ImportCache {
        &self.imports
    }

    pub fn resolve_text(&self, text: &str) -> Result<Vec<ResolvedQuery>, ResolveError> {
        self.resolve(&oql::parse(text)?)
    }

    /// One resolved query per combination of concrete root entities; never
    /// empty.
    pub fn resolve(&self, ast: &QueryAst) -> Result<Vec<ResolvedQuery>, ResolveError> {
        let roots = root_tokens(&ast.statement);
        let candidates: Vec<Vec<Option<Arc<EntityDescriptor>>>> = roots
            .iter()
            .map(|root| {
                let imported = self.import(&root.name);
                if imported.is_empty() {
                    vec![None]
                } else {
                    imported.into_iter().map(Some).collect()
                }
            })
            .collect();

        let combinations = cartesian(&candidates);
        if combinations.len() > 1 {
            tracing::debug!(
                query = %ast.source,
                concrete = combinations.len(),
                "expanding query over concrete entities"
            );
        }

        combinations
            .iter()
            .map(|choices| self.bind(ast, &roots, choices))
            .collect()
    }

    fn bind(
        &self,
        ast: &QueryAst,
        roots: &[RootToken],
        choices: &[Option<Arc<EntityDescriptor>>],
    ) -> Result<ResolvedQuery, ResolveError> {
        let mut binder = Binder::new(&self.metamodel, choices);
        let statement = match &ast.statement {
            Statement::Select(select) => binder.bind_select(select)?,
            Statement::Update(update) => binder.bind_update(update)?,
            Statement::Delete(delete) => binder.bind_delete(delete)?,
        };

        let replacements: Vec<(Span, &str)> = roots
            .iter()
            .zip(choices)
            .filter_map(|(root, choice)| {
                choice
                    .as_ref()
                    .map(|entity| (root.span.clone(), entity.qualified_name.as_str()))
            })
            .collect();

        Ok(ResolvedQuery {
            text: splice(&ast.source, &replacements),
            sources: binder.into_sources(),
            statement,
        })
    }

    /// Entities a root name imports to; empty means pass-through.
    fn import(&self, name: &str) -> Vec<Arc<EntityDescriptor>> {
        match self.imports.lookup(name) {
            ImportLookup::Valid(qualified) => {
                return qualified
                    .iter()
                    .filter_map(|q| self.metamodel.by_qualified_name(q).cloned())
                    .collect()
            }
            ImportLookup::Invalid => return Vec::new(),
            ImportLookup::Unknown => {}
        }

        let matched = match self.metamodel.by_qualified_name(name) {
            Some(entity) => vec![Arc::clone(entity)],
            None => self.metamodel.matching(name),
        };
        if matched.is_empty() {
            tracing::debug!(name, "root name matches no entity, passing through");
            self.imports.record_invalid(name);
        } else {
            let qualified: Vec<String> = matched.iter().map(|e| e.qualified_name.clone()).collect();
            self.imports.record_valid(name, Arc::from(qualified));
        }
        matched
    }
}

/// Root tokens in the order [`Binder`] consumes them.
///
/// A join whose path starts at a declared alias (`join e.company`) is an
/// association path, not a root: the binder resolves it against the alias's
/// entity, so an unknown segment fails with `NotAnAssociation` and is never
/// recorded in the import cache. Only unaliased join targets are looked up
/// as entity names.
fn root_tokens(statement: &Statement) -> Vec<RootToken> {
    match statement {
        Statement::Select(select) => {
            let mut aliases: Vec<&str> = select
                .from
                .iter()
                .filter_map(|f| f.alias.as_ref().map(|a| a.value.as_str()))
                .collect();
            let mut roots: Vec<RootToken> = select.from.iter().map(RootToken::from_ref).collect();
            for join in &select.joins {
                if !aliases.contains(&join.target.first()) {
                    roots.push(RootToken {
                        name: join.target.to_string(),
                        span: join.target.span.clone(),
                    });
                }
                if let Some(alias) = &join.alias {
                    aliases.push(alias.value.as_str());
                }
            }
            roots
        }
        Statement::Update(update) => vec![RootToken::from_ref(&update.target)],
        Statement::Delete(delete) => vec![RootToken::from_ref(&delete.target)],
    }
}

fn cartesian(
    candidates: &[Vec<Option<Arc<EntityDescriptor>>>],
) -> Vec<Vec<Option<Arc<EntityDescriptor>>>> {
    let mut combinations = vec![Vec::with_capacity(candidates.len())];
    for options in candidates {
        combinations = combinations
            .into_iter()
            .flat_map(|prefix| {
                options.iter().map(move |option| {
                    let mut next = prefix.clone();
                    next.push(option.clone());
                    next
                })
            })
            .collect();
    }
    combinations
}

/// Replace each span of `source` with its text; everything else is kept
/// byte for byte.
fn splice(source: &str, replacements: &[(Span, &str)]) -> String {
    let mut sorted: Vec<&(Span, &str)> = replacements.iter().collect();
    sorted.sort_by_key(|(span, _)| span.start);

    let mut out = String::with_capacity(source.len());
    let mut cursor = 0;
    for (span, text) in sorted {
        if span.start < cursor || span.end > source.len() {
            continue;
        }
        out.push_str(&source[cursor..span.start]);
        out.push_str(text);
        cursor = span.end;
    }
    out.push_str(&source[cursor..]);
    out
}
