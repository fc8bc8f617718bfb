//! SQLite store for briefings and everything they own.
//!
//! The database lives at `~/.daybrief/daybrief.db` unless the config points
//! elsewhere. Briefings, alerts, calendar events and analyses are scoped to
//! one orchestration run; relationships are upserted by email across runs.

use std::path::PathBuf;

use rusqlite::Connection;

pub mod alerts;
pub mod analyses;
pub mod briefings;
pub mod calendar;
pub mod relationships;
pub mod store;
pub mod types;

pub use store::*;
pub use types::*;

/// Rows per transaction for batch inserts.
pub const ALERT_BATCH_SIZE: usize = 100;
pub const CALENDAR_EVENT_BATCH_SIZE: usize = 100;
pub const RELATIONSHIP_BATCH_SIZE: usize = 50;

pub struct BriefingDb {
    conn: Connection,
}

impl BriefingDb {
    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Self) -> Result<T, DbError>,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(val) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Open (or create) the database and apply the schema.
    ///
    /// `override_path` comes from `databasePath` in the config.
    pub fn open(override_path: Option<&str>) -> Result<Self, DbError> {
        let path = match override_path {
            Some(p) if !p.trim().is_empty() => PathBuf::from(p),
            _ => Self::db_path()?,
        };
        Self::open_at(path)
    }

    /// Open a database at an explicit path. Useful for testing.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL lets the services layer read while a run is writing
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        log::debug!("Opened briefing database at {}", path.display());
        Ok(Self { conn })
    }

    /// Default database path: `~/.daybrief/daybrief.db`.
    fn db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".daybrief").join("daybrief.db"))
    }
}

// =============================================================================
// Shared test utilities
// =============================================================================
