//! Crate-level error aggregating every stage of the pipeline.

use crate::config::SettingsError;
use crate::engine::{ConnectionError, HydrationError};
use crate::flush::FlushError;
use crate::metamodel::MetamodelError;
use crate::oql::SyntaxError;
use crate::resolve::ResolveError;
use crate::session::{SessionError, StaleStateError};
use crate::translate::TranslateError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error(transparent)]
    Metamodel(#[from] MetamodelError),

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
    Session(#[from] SessionError),

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
