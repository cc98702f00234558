//! Configuration module for relata.
//!
//! Handles settings files, named connections and environment variables.

mod settings;

pub use settings::{
    expand_env_vars, CacheSettings, ConnectionSettings, Driver, EngineSettings, LoggingSettings,
    QuerySettings, Settings, SettingsError,
};
