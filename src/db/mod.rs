pub mod migration;
pub mod query;
pub mod schema;
pub mod schema_editor;
pub mod state;

use std::path::Path;

use log::{error, info};
use rusqlite::Connection;

use crate::error::SeqrError;

pub use migration::MigrationProgress;
pub use schema_editor::SchemaEditor;

/// Ledger of applied migrations. Created on open, never migrated itself.
const CREATE_LEDGER_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS seqr_migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    app TEXT NOT NULL,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL,          -- RFC 3339 timestamp (UTC)
    UNIQUE (app, name)
);
"#;

/// Emit an operator-facing progress line for the running migration.
pub fn migration_info(msg: &str) {
    info!("{}", msg);
    MigrationProgress::send(msg);
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, SeqrError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!(
                        "Database folder '{}' does not exist or is not a directory",
                        parent.display()
                    ),
                )
                .into());
            }
        }

        let conn = Connection::open(path)?;
        info!("Database opened at: {}", path.display());
        Self::from_connection(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, SeqrError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, SeqrError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(CREATE_LEDGER_SQL)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside `BEGIN IMMEDIATE` / `COMMIT`, rolling back if it fails.
    pub fn immediate_transaction<T, F>(conn: &Connection, f: F) -> Result<T, SeqrError>
    where
        F: FnOnce(&Connection) -> Result<T, SeqrError>,
    {
        conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(conn) {
            Ok(value) => {
                conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                    error!("Rollback failed after '{}': {}", err, rollback_err);
                }
                Err(err)
            }
        }
    }

    /// Names of user tables, excluding SQLite internals.
    #[cfg(test)]
    pub fn table_names(&self) -> Result<Vec<String>, SeqrError> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }
}
