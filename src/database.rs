use log::{error, info, warn};
use rusqlite::{Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::PassPulseError;
use crate::schema::{CREATE_SCHEMA_SQL, DROP_SCHEMA_SQL, REQUIRED_COLUMNS};

pub const DB_FILENAME: &str = "image_metadata.db";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// The single logical writer for the pass store. Ingestion and thumbnail
/// derivation share one `Database` per run and never use it concurrently.
pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    /// Opens (creating if needed) `<data_dir>/image_metadata.db` and brings the
    /// schema up to date.
    pub fn open(data_dir: &Path) -> Result<Self, PassPulseError> {
        fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join(DB_FILENAME);

        let conn = Connection::open(&db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;

        info!("Database opened at: {}", db_path.display());

        let db = Database {
            conn,
            path: db_path,
        };
        db.ensure_schema()?;

        Ok(db)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, PassPulseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Database {
            conn,
            path: PathBuf::from(":memory:"),
        };
        db.ensure_schema()?;
        Ok(db)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the tables if missing. A store written by an older release
    /// (missing one of the required columns) is dropped and recreated; its
    /// contents are derived data and are rebuilt by the next ingest.
    fn ensure_schema(&self) -> Result<(), PassPulseError> {
        let mut legacy = false;

        for (table, column) in REQUIRED_COLUMNS {
            if self.table_exists(table)? && !self.table_has_column(table, column)? {
                warn!(
                    "Table '{}' is missing column '{}' - dropping and recreating the schema",
                    table, column
                );
                legacy = true;
            }
        }

        if legacy {
            self.conn.execute_batch(DROP_SCHEMA_SQL)?;
        }

        self.conn.execute_batch(CREATE_SCHEMA_SQL)?;
        Ok(())
    }

    /// Drops both tables and creates them again, empty.
    pub fn recreate_schema(&self) -> Result<(), PassPulseError> {
        self.conn.execute_batch(DROP_SCHEMA_SQL)?;
        self.conn.execute_batch(CREATE_SCHEMA_SQL)?;
        Ok(())
    }

    /// Removes every image and pass row, images first to respect the foreign key.
    pub fn clear_tables(&self) -> Result<(), PassPulseError> {
        Database::immediate_transaction(&self.conn, |c| {
            c.execute("DELETE FROM images", [])?;
            c.execute("DELETE FROM passes", [])?;
            Ok(())
        })
    }

    fn table_exists(&self, table: &str) -> Result<bool, PassPulseError> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
                [table],
                |row| row.get(0),
            )
            .optional()?;

        Ok(found.is_some())
    }

    fn table_has_column(&self, table: &str, column: &str) -> Result<bool, PassPulseError> {
        // PRAGMA arguments cannot be bound; table names come from REQUIRED_COLUMNS only
        let mut stmt = self.conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let names = stmt.query_map([], |row| row.get::<_, String>(1))?;

        for name in names {
            if name? == column {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Runs `f` inside a `BEGIN IMMEDIATE` transaction, committing on success
    /// and rolling back on error.
    pub fn immediate_transaction<F, T>(conn: &Connection, f: F) -> Result<T, PassPulseError>
    where
        F: FnOnce(&Connection) -> Result<T, PassPulseError>,
    {
        conn.execute_batch("BEGIN IMMEDIATE")?;

        match f(conn) {
            Ok(value) => {
                conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                    error!("Rollback failed after error '{}': {}", e, rollback_err);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn column_names(db: &Database, table: &str) -> Vec<String> {
        let mut stmt = db
            .conn()
            .prepare(&format!("PRAGMA table_info({})", table))
            .unwrap();
        stmt.query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn test_open_creates_schema() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path()).unwrap();

        assert!(db.path().ends_with(DB_FILENAME));
        assert!(column_names(&db, "passes").contains(&"downlink".to_string()));
        assert!(column_names(&db, "images").contains(&"needsThumb".to_string()));
    }

    #[test]
    fn test_legacy_schema_is_dropped_and_recreated() {
        let dir = TempDir::new().unwrap();
        {
            let conn = Connection::open(dir.path().join(DB_FILENAME)).unwrap();
            conn.execute_batch(
                "CREATE TABLE passes (id INTEGER PRIMARY KEY, name TEXT UNIQUE, satellite TEXT,
                                      timestamp INTEGER, rawDataPath TEXT);
                 CREATE TABLE images (id INTEGER PRIMARY KEY, path TEXT, composite TEXT,
                                      mapOverlay INTEGER, corrected INTEGER, filled INTEGER,
                                      vPixels INTEGER, passId INTEGER);
                 INSERT INTO passes (name, satellite) VALUES ('old', 'NOAA-18');",
            )
            .unwrap();
        }

        let db = Database::open(dir.path()).unwrap();

        assert!(column_names(&db, "passes").contains(&"downlink".to_string()));
        assert!(column_names(&db, "images").contains(&"sensor".to_string()));
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM passes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_current_schema_is_kept() {
        let dir = TempDir::new().unwrap();
        {
            let db = Database::open(dir.path()).unwrap();
            db.conn()
                .execute("INSERT INTO passes (name, satellite) VALUES ('keep', 'METOP-B')", [])
                .unwrap();
        }

        let db = Database::open(dir.path()).unwrap();
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM passes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_immediate_transaction_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();

        let result: Result<(), PassPulseError> = Database::immediate_transaction(db.conn(), |c| {
            c.execute("INSERT INTO passes (name) VALUES ('rolled-back')", [])?;
            Err(PassPulseError::Error("boom".into()))
        });

        assert!(result.is_err());
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM passes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_clear_and_recreate() {
        let db = Database::open_in_memory().unwrap();
        db.conn()
            .execute("INSERT INTO passes (name) VALUES ('a')", [])
            .unwrap();

        db.clear_tables().unwrap();
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM passes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);

        db.recreate_schema().unwrap();
        assert!(column_names(&db, "images").contains(&"needsThumb".to_string()));
    }
}
