use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::*;
use crate::types::Briefing;

const BRIEFING_COLUMNS: &str = "id, date, executive_summary, generated_at, updated_at";

impl BriefingDb {
    // =========================================================================
    // Briefings
    // =========================================================================

    fn map_briefing_row(row: &Row<'_>) -> rusqlite::Result<Briefing> {
        Ok(Briefing {
            id: row.get(0)?,
            date: get_time(row, 1)?,
            executive_summary: row.get(2)?,
            generated_at: get_time(row, 3)?,
            updated_at: get_time(row, 4)?,
        })
    }

    /// Insert a briefing row and return its id.
    pub fn create_briefing(
        &self,
        date: &DateTime<Utc>,
        executive_summary: &str,
    ) -> Result<i64, DbError> {
        let now = to_db_time(&Utc::now());
        self.conn.execute(
            "INSERT INTO briefings (date, executive_summary, generated_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![to_db_time(date), executive_summary, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_briefing(&self, id: i64) -> Result<Option<Briefing>, DbError> {
        let briefing = self
            .conn
            .query_row(
                &format!("SELECT {BRIEFING_COLUMNS} FROM briefings WHERE id = ?1"),
                params![id],
                Self::map_briefing_row,
            )
            .optional()?;
        Ok(briefing)
    }

    /// Most recently generated briefing.
    pub fn get_latest_briefing(&self) -> Result<Option<Briefing>, DbError> {
        let briefing = self
            .conn
            .query_row(
                &format!(
                    "SELECT {BRIEFING_COLUMNS} FROM briefings
                     ORDER BY generated_at DESC, id DESC LIMIT 1"
                ),
                [],
                Self::map_briefing_row,
            )
            .optional()?;
        Ok(briefing)
    }

    /// Remove a briefing and everything it owns. Used when a run fails after
    /// the placeholder row was written. Returns false if nothing matched.
    pub fn delete_briefing(&self, id: i64) -> Result<bool, DbError> {
        self.with_transaction(|db| {
            for table in ["alerts", "calendar_events", "llm_analyses"] {
                db.conn.execute(
                    &format!("DELETE FROM {table} WHERE briefing_id = ?1"),
                    params![id],
                )?;
            }
            let removed = db
                .conn
                .execute("DELETE FROM briefings WHERE id = ?1", params![id])?;
            Ok(removed > 0)
        })
    }

    /// Replace the placeholder summary once it has been computed.
    pub fn update_executive_summary(&self, id: i64, summary: &str) -> Result<(), DbError> {
        let changed = self.conn.execute(
            "UPDATE briefings SET executive_summary = ?1, updated_at = ?2 WHERE id = ?3",
            params![summary, to_db_time(&Utc::now()), id],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("briefing {id}")));
        }
        Ok(())
    }
}
