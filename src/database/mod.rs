//! Function and execution persistence
//!
//! SQLite-backed storage for registered functions and their execution
//! history. The metric store lives in its own database file (see
//! [`crate::metrics`]); the two stores stay separable.

mod executions;
mod functions;

pub use executions::{Execution, ExecutionStatus, ExecutionStore};
pub use functions::{Function, FunctionStore, FunctionUpdate, Language, NewFunction};

use std::path::Path;

use rusqlite::{Connection, Result as SqliteResult};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

/// Database errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Function with this name or route already exists: {0}")]
    Duplicate(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Map a UNIQUE-constraint violation to [`DatabaseError::Duplicate`].
pub(crate) fn map_constraint(err: rusqlite::Error, what: &str) -> DatabaseError {
    if let rusqlite::Error::SqliteFailure(code, _) = &err {
        if code.code == rusqlite::ErrorCode::ConstraintViolation {
            return DatabaseError::Duplicate(what.to_string());
        }
    }
    DatabaseError::Sqlite(err)
}

/// Main database wrapper for the function/execution store
pub struct Database {
    conn: Mutex<Connection>,
    functions: FunctionStore,
    executions: ExecutionStore,
}

impl Database {
    /// Open or create the database
    pub fn open(path: impl AsRef<Path>) -> DatabaseResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent access
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        Self::init_tables(&conn)?;

        info!("Function database opened at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
            functions: FunctionStore::new(),
            executions: ExecutionStore::new(),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> DatabaseResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_tables(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            functions: FunctionStore::new(),
            executions: ExecutionStore::new(),
        })
    }

    /// Initialize database tables
    fn init_tables(conn: &Connection) -> SqliteResult<()> {
        conn.execute_batch(
            r#"
            -- Registered functions
            CREATE TABLE IF NOT EXISTS functions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                route TEXT NOT NULL UNIQUE,
                language TEXT NOT NULL,
                code TEXT NOT NULL,
                timeout INTEGER NOT NULL DEFAULT 30,
                memory INTEGER NOT NULL DEFAULT 128,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            -- Execution history
            CREATE TABLE IF NOT EXISTS executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                function_id INTEGER NOT NULL,
                status TEXT NOT NULL,
                backend TEXT NOT NULL,
                start_time INTEGER NOT NULL,
                end_time INTEGER,
                duration_ms REAL,
                error_message TEXT,
                memory_used_mb REAL,
                cpu_percent REAL
            );

            CREATE INDEX IF NOT EXISTS idx_functions_route
                ON functions(route);

            CREATE INDEX IF NOT EXISTS idx_executions_function
                ON executions(function_id);
            "#,
        )?;

        Ok(())
    }

    /// Get the function store with an active connection
    pub async fn function_store(&self) -> FunctionStoreWithConn<'_> {
        FunctionStoreWithConn {
            conn: self.conn.lock().await,
            store: &self.functions,
        }
    }

    /// Get the execution store with an active connection
    pub async fn execution_store(&self) -> ExecutionStoreWithConn<'_> {
        ExecutionStoreWithConn {
            conn: self.conn.lock().await,
            store: &self.executions,
        }
    }
}

/// Function store with active connection
pub struct FunctionStoreWithConn<'a> {
    conn: tokio::sync::MutexGuard<'a, Connection>,
    store: &'a FunctionStore,
}

impl<'a> FunctionStoreWithConn<'a> {
    pub fn insert(&self, function: &NewFunction) -> DatabaseResult<Function> {
        self.store.insert(&self.conn, function)
    }

    pub fn get(&self, id: i64) -> DatabaseResult<Option<Function>> {
        self.store.get(&self.conn, id)
    }

    pub fn get_by_route(&self, route: &str) -> DatabaseResult<Option<Function>> {
        self.store.get_by_route(&self.conn, route)
    }

    pub fn list(&self, skip: usize, limit: usize) -> DatabaseResult<Vec<Function>> {
        self.store.list(&self.conn, skip, limit)
    }

    pub fn update(&self, id: i64, update: &FunctionUpdate) -> DatabaseResult<Function> {
        self.store.update(&self.conn, id, update)
    }

    pub fn delete(&self, id: i64) -> DatabaseResult<bool> {
        self.store.delete(&self.conn, id)
    }
}

/// Execution store with active connection
pub struct ExecutionStoreWithConn<'a> {
    conn: tokio::sync::MutexGuard<'a, Connection>,
    store: &'a ExecutionStore,
}

impl<'a> ExecutionStoreWithConn<'a> {
    pub fn insert_running(
        &self,
        function_id: i64,
        backend: &str,
        start_time_ms: i64,
    ) -> DatabaseResult<i64> {
        self.store
            .insert_running(&self.conn, function_id, backend, start_time_ms)
    }

    pub fn finalize(
        &self,
        id: i64,
        status: ExecutionStatus,
        duration_ms: f64,
        error_message: Option<&str>,
        memory_used_mb: Option<f64>,
        cpu_percent: Option<f64>,
    ) -> DatabaseResult<bool> {
        self.store.finalize(
            &self.conn,
            id,
            status,
            duration_ms,
            error_message,
            memory_used_mb,
            cpu_percent,
        )
    }

    pub fn get(&self, id: i64) -> DatabaseResult<Option<Execution>> {
        self.store.get(&self.conn, id)
    }

    pub fn list(&self, skip: usize, limit: usize) -> DatabaseResult<Vec<Execution>> {
        self.store.list(&self.conn, skip, limit)
    }

    pub fn list_for_function(
        &self,
        function_id: i64,
        skip: usize,
        limit: usize,
    ) -> DatabaseResult<Vec<Execution>> {
        self.store
            .list_for_function(&self.conn, function_id, skip, limit)
    }
}
