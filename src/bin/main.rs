//! Relata CLI - inspect and run object queries
//!
//! Usage:
//!   relata parse <query>
//!   relata split --mapping <mapping.toml> <query>
//!   relata translate --mapping <mapping.toml> [--dialect <dialect>] <query>
//!   relata ddl --mapping <mapping.toml> [--dialect <dialect>]
//!   relata run --mapping <mapping.toml> --connection <name> <query>
//!
//! Examples:
//!   relata split --mapping hr.toml "from Employee e where e.name like 'A%'"
//!   relata translate --mapping hr.toml --dialect postgres "select e.name from Employee e"
//!   relata run --mapping hr.toml --connection dev "from Employee"

use clap::{Parser, Subcommand, ValueEnum};
use relata::config::{Driver, Settings};
use relata::engine::SqliteConnection;
use relata::oql::{self, Statement};
use relata::session::ResultValue;
use relata::sql::Dialect;
use relata::{schema, Entity, SessionFactory};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relata")]
#[command(about = "Relata - object queries over relational databases")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to RELATA_CONFIG, ./relata.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a query and print its syntax tree
    Parse {
        /// Object query text
        query: String,
    },

    /// Print the concrete queries a query expands to
    Split {
        /// Path to the TOML mapping document
        #[arg(short, long)]
        mapping: PathBuf,

        /// Object query text
        query: String,
    },

    /// Translate a query to SQL
    Translate {
        /// Path to the TOML mapping document
        #[arg(short, long)]
        mapping: PathBuf,

        /// SQL dialect to generate (defaults to the configured engine dialect)
        #[arg(short, long)]
        dialect: Option<DialectArg>,

        /// Object query text
        query: String,
    },

    /// Print CREATE TABLE statements for every mapped table
    Ddl {
        /// Path to the TOML mapping document
        #[arg(short, long)]
        mapping: PathBuf,

        /// SQL dialect to generate (defaults to the configured engine dialect)
        #[arg(short, long)]
        dialect: Option<DialectArg>,
    },

    /// Run a query against a configured connection and print the rows as JSON
    Run {
        /// Path to the TOML mapping document
        #[arg(short, long)]
        mapping: PathBuf,

        /// Name of a connection in the settings file
        #[arg(short, long)]
        connection: String,

        /// Create missing tables before running
        #[arg(long)]
        create_schema: bool,

        /// Object query text
        query: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DialectArg {
    Sqlite,
    Postgres,
    Mysql,
    Tsql,
    Duckdb,
}

impl From<DialectArg> for Dialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Sqlite => Dialect::Sqlite,
            DialectArg::Postgres => Dialect::Postgres,
            DialectArg::Mysql => Dialect::MySql,
            DialectArg::Tsql => Dialect::TSql,
            DialectArg::Duckdb => Dialect::DuckDb,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match load_settings(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error loading settings: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(&settings);

    match cli.command {
        Commands::Parse { query } => cmd_parse(&query),
        Commands::Split { mapping, query } => cmd_split(&mapping, settings, &query),
        Commands::Translate {
            mapping,
            dialect,
            query,
        } => cmd_translate(&mapping, settings, dialect, &query),
        Commands::Ddl { mapping, dialect } => cmd_ddl(&mapping, settings, dialect),
        Commands::Run {
            mapping,
            connection,
            create_schema,
            query,
        } => cmd_run(&mapping, settings, &connection, create_schema, &query),
    }
}

fn load_settings(path: Option<&Path>) -> Result<Settings, relata::Error> {
    Ok(match path {
        Some(path) => Settings::from_file(path)?,
        None => Settings::load()?,
    })
}

fn init_logging(settings: &Settings) {
    let filter = EnvFilter::try_from_env("RELATA_LOG")
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_factory(mapping: &Path, settings: Settings) -> Option<SessionFactory> {
    match SessionFactory::from_mapping_file(mapping, settings) {
        Ok(factory) => Some(factory),
        Err(e) => {
            eprintln!("Error loading mapping '{}': {}", mapping.display(), e);
            None
        }
    }
}

fn cmd_parse(query: &str) -> ExitCode {
    match oql::parse(query) {
        Ok(ast) => {
            println!("{:#?}", ast.statement);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Syntax error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_split(mapping: &Path, settings: Settings, query: &str) -> ExitCode {
    let Some(factory) = load_factory(mapping, settings) else {
        return ExitCode::FAILURE;
    };
    match factory.resolver().resolve_text(query) {
        Ok(queries) => {
            for resolved in queries {
                println!("{}", resolved.text);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_translate(
    mapping: &Path,
    mut settings: Settings,
    dialect: Option<DialectArg>,
    query: &str,
) -> ExitCode {
    if let Some(dialect) = dialect {
        settings.engine.dialect = dialect.into();
    }
    let Some(factory) = load_factory(mapping, settings) else {
        return ExitCode::FAILURE;
    };
    match factory.plans(query) {
        Ok(plans) => {
            for plan in plans.iter() {
                println!("-- {}", plan.query.text);
                println!("{};", plan.translation.to_sql(factory.dialect()));
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_ddl(mapping: &Path, settings: Settings, dialect: Option<DialectArg>) -> ExitCode {
    let dialect = dialect.map(Dialect::from).unwrap_or(settings.engine.dialect);
    let Some(factory) = load_factory(mapping, settings) else {
        return ExitCode::FAILURE;
    };
    for statement in schema::create_statements(factory.metamodel(), dialect) {
        println!("{};", statement);
    }
    ExitCode::SUCCESS
}

fn cmd_run(
    mapping: &Path,
    settings: Settings,
    connection_name: &str,
    create_schema: bool,
    query: &str,
) -> ExitCode {
    match run(mapping, settings, connection_name, create_schema, query) {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(
    mapping: &Path,
    settings: Settings,
    connection_name: &str,
    create_schema: bool,
    query: &str,
) -> relata::Result<String> {
    let connection_settings = settings.get_connection(connection_name)?.clone();
    let mut connection = match connection_settings.driver_type()? {
        Driver::Sqlite => {
            SqliteConnection::open_url(&connection_settings.resolved_connection_string()?)?
        }
    };
    let is_select = matches!(oql::parse(query)?.statement, Statement::Select(_));

    let factory = SessionFactory::from_mapping_file(mapping, settings)?;
    if create_schema {
        factory.export_schema(&mut connection)?;
    }
    let mut session = factory.open_session(connection);

    let output = if is_select {
        let rows = session.create_query(query).list()?;
        serde_json::Value::Array(rows.iter().map(result_json).collect())
    } else {
        let affected = session.create_query(query).execute_update()?;
        json!({ "affected": affected })
    };
    session.close()?;
    Ok(serde_json::to_string_pretty(&output).unwrap_or_default())
}

fn result_json(value: &ResultValue) -> serde_json::Value {
    match value {
        ResultValue::Entity(entity) => entity_json(entity),
        ResultValue::Value(value) => serde_json::to_value(value).unwrap_or_default(),
        ResultValue::Tuple(items) => items.iter().map(result_json).collect(),
    }
}

fn entity_json(entity: &Entity) -> serde_json::Value {
    let descriptor = entity.descriptor();
    let mut attributes = serde_json::Map::new();
    for attribute in &descriptor.attributes {
        if let Ok(value) = entity.get(&attribute.name) {
            attributes.insert(
                attribute.name.clone(),
                serde_json::to_value(value).unwrap_or_default(),
            );
        }
    }
    json!({
        "entity": descriptor.qualified_name,
        "id": entity.id(),
        "attributes": attributes,
    })
}
