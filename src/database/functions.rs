//! Registered function persistence

use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{map_constraint, DatabaseError, DatabaseResult};

/// Languages the platform can build images for. Closed set; registration
/// with any other tag is rejected before anything is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Javascript => "javascript",
        }
    }

    /// Parse a language tag. Returns `None` for unsupported languages.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "python" => Some(Language::Python),
            "javascript" => Some(Language::Javascript),
            _ => None,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A registered function
#[derive(Debug, Clone, Serialize)]
pub struct Function {
    pub id: i64,
    pub name: String,
    pub route: String,
    pub language: Language,
    pub code: String,
    /// Timeout in seconds
    pub timeout: u32,
    /// Memory limit in MB
    pub memory: u32,
    /// Unix milliseconds
    pub created_at: i64,
    /// Unix milliseconds, bumped on every update
    pub updated_at: i64,
}

/// Fields required to register a function
#[derive(Debug, Clone)]
pub struct NewFunction {
    pub name: String,
    pub route: String,
    pub language: Language,
    pub code: String,
    pub timeout: u32,
    pub memory: u32,
}

/// Partial update; `None` fields are left untouched
#[derive(Debug, Clone, Default)]
pub struct FunctionUpdate {
    pub name: Option<String>,
    pub route: Option<String>,
    pub language: Option<Language>,
    pub code: Option<String>,
    pub timeout: Option<u32>,
    pub memory: Option<u32>,
}

/// Function store for CRUD operations
pub struct FunctionStore;

impl FunctionStore {
    pub fn new() -> Self {
        Self
    }

    /// Insert a new function. Name and route collisions surface as
    /// [`DatabaseError::Duplicate`].
    pub fn insert(&self, conn: &Connection, function: &NewFunction) -> DatabaseResult<Function> {
        let now = chrono::Utc::now().timestamp_millis();

        conn.execute(
            r#"
            INSERT INTO functions (name, route, language, code, timeout, memory, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            "#,
            rusqlite::params![
                function.name,
                function.route,
                function.language.as_str(),
                function.code,
                function.timeout,
                function.memory,
                now,
            ],
        )
        .map_err(|e| map_constraint(e, &function.name))?;

        let id = conn.last_insert_rowid();

        self.get(conn, id)?
            .ok_or_else(|| DatabaseError::NotFound(format!("function {}", id)))
    }

    /// Get a function by id
    pub fn get(&self, conn: &Connection, id: i64) -> DatabaseResult<Option<Function>> {
        let function = conn
            .query_row(
                "SELECT id, name, route, language, code, timeout, memory, created_at, updated_at
                 FROM functions WHERE id = ?1",
                [id],
                row_to_function,
            )
            .optional()?;

        Ok(function)
    }

    /// Get a function by its registered route
    pub fn get_by_route(&self, conn: &Connection, route: &str) -> DatabaseResult<Option<Function>> {
        let function = conn
            .query_row(
                "SELECT id, name, route, language, code, timeout, memory, created_at, updated_at
                 FROM functions WHERE route = ?1",
                [route],
                row_to_function,
            )
            .optional()?;

        Ok(function)
    }

    /// List functions with pagination
    pub fn list(&self, conn: &Connection, skip: usize, limit: usize) -> DatabaseResult<Vec<Function>> {
        let mut stmt = conn.prepare(
            "SELECT id, name, route, language, code, timeout, memory, created_at, updated_at
             FROM functions ORDER BY id ASC LIMIT ?1 OFFSET ?2",
        )?;

        let functions = stmt
            .query_map(rusqlite::params![limit as i64, skip as i64], row_to_function)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(functions)
    }

    /// Apply a partial update and bump `updated_at`
    pub fn update(
        &self,
        conn: &Connection,
        id: i64,
        update: &FunctionUpdate,
    ) -> DatabaseResult<Function> {
        let existing = self
            .get(conn, id)?
            .ok_or_else(|| DatabaseError::NotFound(format!("function {}", id)))?;

        let now = chrono::Utc::now().timestamp_millis();

        conn.execute(
            r#"
            UPDATE functions
            SET name = ?1, route = ?2, language = ?3, code = ?4,
                timeout = ?5, memory = ?6, updated_at = ?7
            WHERE id = ?8
            "#,
            rusqlite::params![
                update.name.as_ref().unwrap_or(&existing.name),
                update.route.as_ref().unwrap_or(&existing.route),
                update.language.unwrap_or(existing.language).as_str(),
                update.code.as_ref().unwrap_or(&existing.code),
                update.timeout.unwrap_or(existing.timeout),
                update.memory.unwrap_or(existing.memory),
                now,
                id,
            ],
        )
        .map_err(|e| map_constraint(e, update.name.as_deref().unwrap_or(&existing.name)))?;

        self.get(conn, id)?
            .ok_or_else(|| DatabaseError::NotFound(format!("function {}", id)))
    }

    /// Delete a function; returns whether a row was removed
    pub fn delete(&self, conn: &Connection, id: i64) -> DatabaseResult<bool> {
        let deleted = conn.execute("DELETE FROM functions WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }
}

impl Default for FunctionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn row_to_function(row: &Row<'_>) -> rusqlite::Result<Function> {
    let language_tag: String = row.get(3)?;

    Ok(Function {
        id: row.get(0)?,
        name: row.get(1)?,
        route: row.get(2)?,
        // Rows are only ever written from the enum, so an unknown tag here
        // means external tampering; fall back to python rather than panic.
        language: Language::parse(&language_tag).unwrap_or(Language::Python),
        code: row.get(4)?,
        timeout: row.get::<_, i64>(5)? as u32,
        memory: row.get::<_, i64>(6)? as u32,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE functions (
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
            "#,
        )
        .unwrap();
        conn
    }

    fn sample() -> NewFunction {
        NewFunction {
            name: "hello".into(),
            route: "/hello".into(),
            language: Language::Python,
            code: "def handler(e): return e".into(),
            timeout: 10,
            memory: 128,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let conn = setup_db();
        let store = FunctionStore::new();

        let function = store.insert(&conn, &sample()).unwrap();
        assert_eq!(function.name, "hello");
        assert_eq!(function.language, Language::Python);
        assert_eq!(function.created_at, function.updated_at);

        let by_route = store.get_by_route(&conn, "/hello").unwrap().unwrap();
        assert_eq!(by_route.id, function.id);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let conn = setup_db();
        let store = FunctionStore::new();

        store.insert(&conn, &sample()).unwrap();

        let mut dup = sample();
        dup.route = "/other".into();
        let err = store.insert(&conn, &dup).unwrap_err();
        assert!(matches!(err, DatabaseError::Duplicate(_)));
    }

    #[test]
    fn test_duplicate_route_rejected() {
        let conn = setup_db();
        let store = FunctionStore::new();

        store.insert(&conn, &sample()).unwrap();

        let mut dup = sample();
        dup.name = "other".into();
        let err = store.insert(&conn, &dup).unwrap_err();
        assert!(matches!(err, DatabaseError::Duplicate(_)));
    }

    #[test]
    fn test_update_bumps_updated_at() {
        let conn = setup_db();
        let store = FunctionStore::new();

        let function = store.insert(&conn, &sample()).unwrap();

        // Force a visible gap without sleeping
        conn.execute(
            "UPDATE functions SET updated_at = updated_at - 1000, created_at = created_at - 1000 WHERE id = ?1",
            [function.id],
        )
        .unwrap();

        let updated = store
            .update(
                &conn,
                function.id,
                &FunctionUpdate {
                    code: Some("def handler(e): return {}".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(updated.updated_at > updated.created_at);
        assert_eq!(updated.name, "hello");
        assert_eq!(updated.code, "def handler(e): return {}");
    }

    #[test]
    fn test_delete() {
        let conn = setup_db();
        let store = FunctionStore::new();

        let function = store.insert(&conn, &sample()).unwrap();
        assert!(store.delete(&conn, function.id).unwrap());
        assert!(!store.delete(&conn, function.id).unwrap());
        assert!(store.get(&conn, function.id).unwrap().is_none());
    }

    #[test]
    fn test_language_parse() {
        assert_eq!(Language::parse("python"), Some(Language::Python));
        assert_eq!(Language::parse("javascript"), Some(Language::Javascript));
        assert_eq!(Language::parse("ruby"), None);
        assert_eq!(Language::parse("Python"), None);
    }
}
