//! SeaORM-based database access
//!
//! This module provides database-agnostic access using SeaORM with support
//! for SQLite, PostgreSQL and MySQL. Both the source and the target side of
//! a migration connect through [`Database`]; all dynamic SQL elsewhere in
//! the crate is built with `sea_query` and rendered for the connection's
//! backend via [`Database::build`].

use sea_orm::{
    ConnectOptions, ConnectionTrait, Database as SeaOrmDatabase, DatabaseBackend,
    DatabaseConnection, DbErr, ExecResult, FromQueryResult, JsonValue, QueryResult, Statement,
    StatementBuilder,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Database connection manager with multi-database support
#[derive(Clone)]
pub struct Database {
    connection: Arc<DatabaseConnection>,
    backend: DatabaseBackend,
    database_type: DatabaseType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    SQLite,
    PostgreSQL,
    MySQL,
}

impl Database {
    /// Connect to a database identified by URL.
    ///
    /// SQLite URLs pointing at a missing file are rewritten to enable
    /// auto-creation and any missing parent directories are created.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, DbErr> {
        let database_type = Self::detect_database_type(url)?;
        let backend = match database_type {
            DatabaseType::SQLite => DatabaseBackend::Sqlite,
            DatabaseType::PostgreSQL => DatabaseBackend::Postgres,
            DatabaseType::MySQL => DatabaseBackend::MySql,
        };

        info!("Connecting to {} database", database_type.as_str());

        let connection_url = match database_type {
            DatabaseType::SQLite => Self::ensure_sqlite_auto_creation(url)?,
            _ => url.to_string(),
        };

        let mut connect_options = ConnectOptions::new(&connection_url);
        connect_options
            .max_connections(max_connections)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(5))
            .acquire_timeout(Duration::from_secs(3))
            .idle_timeout(Duration::from_secs(600))
            .sqlx_logging_level(tracing::log::LevelFilter::Debug);

        let connection = SeaOrmDatabase::connect(connect_options).await?;
        debug!("Database connection established successfully");

        Ok(Self {
            connection: Arc::new(connection),
            backend,
            database_type,
        })
    }

    /// Detect the database type from the URL
    fn detect_database_type(url: &str) -> Result<DatabaseType, DbErr> {
        if url.starts_with("sqlite:") {
            Ok(DatabaseType::SQLite)
        } else if url.starts_with("postgres:") || url.starts_with("postgresql:") {
            Ok(DatabaseType::PostgreSQL)
        } else if url.starts_with("mysql:") {
            Ok(DatabaseType::MySQL)
        } else {
            Err(DbErr::Custom(format!(
                "Unsupported database URL format: {url}"
            )))
        }
    }

    /// Ensure SQLite URL includes auto-creation mode if needed
    fn ensure_sqlite_auto_creation(url: &str) -> Result<String, DbErr> {
        if url.contains("mode=") || url.contains(":memory:") {
            return Ok(url.to_string());
        }

        let file_path = if let Some(path) = url.strip_prefix("sqlite://") {
            path
        } else if let Some(path) = url.strip_prefix("sqlite:") {
            path
        } else {
            return Err(DbErr::Custom(format!("Invalid SQLite URL format: {url}")));
        };

        let path = std::path::Path::new(file_path);
        if path.exists() {
            return Ok(url.to_string());
        }

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DbErr::Custom(format!(
                    "Failed to create directory for SQLite database '{}': {e}",
                    parent.display()
                ))
            })?;
            info!("Created directory for SQLite database: {}", parent.display());
        }

        let auto_create_url = if url.contains('?') {
            format!("{url}&mode=rwc")
        } else {
            format!("{url}?mode=rwc")
        };
        debug!("Enabled SQLite auto-creation: {url} -> {auto_create_url}");
        Ok(auto_create_url)
    }

    /// Get the underlying connection
    pub fn connection(&self) -> Arc<DatabaseConnection> {
        self.connection.clone()
    }

    /// Get the database backend type
    pub fn backend(&self) -> DatabaseBackend {
        self.backend
    }

    /// Get the database type
    pub fn database_type(&self) -> DatabaseType {
        self.database_type
    }

    /// Render a `sea_query` statement for this connection's backend.
    pub fn build<S: StatementBuilder>(&self, statement: &S) -> Statement {
        self.backend.build(statement)
    }

    /// Execute a prepared statement.
    pub async fn execute(&self, statement: Statement) -> Result<ExecResult, DbErr> {
        self.connection.execute(statement).await
    }

    /// Execute a raw SQL string (DDL, pragmas).
    pub async fn execute_sql(&self, sql: &str) -> Result<ExecResult, DbErr> {
        self.connection
            .execute(Statement::from_string(self.backend, sql))
            .await
    }

    /// Run a query and return raw rows for typed column access.
    ///
    /// JSON row reads drop columns whose type SQLite cannot infer (PRAGMA
    /// output, bare expressions like COUNT(*)); such queries must go
    /// through here and `try_get` their columns explicitly.
    pub async fn query_all(&self, statement: Statement) -> Result<Vec<QueryResult>, DbErr> {
        self.connection.query_all(statement).await
    }

    /// Run a query expected to return at most one raw row.
    pub async fn query_one(&self, statement: Statement) -> Result<Option<QueryResult>, DbErr> {
        self.connection.query_one(statement).await
    }

    /// Run a query and return every row as a JSON object.
    ///
    /// Dynamic tables make typed models impossible here; JSON rows keep the
    /// fetch side untyped until the resolver coerces values.
    pub async fn query_json(&self, statement: Statement) -> Result<Vec<JsonValue>, DbErr> {
        JsonValue::find_by_statement(statement)
            .all(&*self.connection)
            .await
    }

    /// Run a query expected to return at most one JSON row.
    pub async fn query_json_one(&self, statement: Statement) -> Result<Option<JsonValue>, DbErr> {
        JsonValue::find_by_statement(statement)
            .one(&*self.connection)
            .await
    }
}

impl DatabaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseType::SQLite => "SQLite",
            DatabaseType::PostgreSQL => "PostgreSQL",
            DatabaseType::MySQL => "MySQL",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Mask the password component of a connection URL for logs and errors.
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host)) = rest.split_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => url.to_string(),
    }
}
