use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::*;
use crate::types::{Alert, AlertCandidate};

const ALERT_COLUMNS: &str = "id, briefing_id, type, category, title, description, contact_name,
     organization, action_required, deadline, completed, completed_at, created_at";

impl BriefingDb {
    // =========================================================================
    // Alerts
    // =========================================================================

    fn map_alert_row(row: &Row<'_>) -> rusqlite::Result<Alert> {
        Ok(Alert {
            id: row.get(0)?,
            alert: AlertCandidate {
                briefing_id: row.get(1)?,
                alert_type: get_enum(row, 2)?,
                category: get_enum(row, 3)?,
                title: row.get(4)?,
                description: row.get(5)?,
                contact_name: row.get(6)?,
                organization: row.get(7)?,
                action_required: row.get(8)?,
                deadline: get_time_opt(row, 9)?,
                completed: row.get::<_, i32>(10)? != 0,
                completed_at: get_time_opt(row, 11)?,
                contact_email: None,
            },
            created_at: get_time(row, 12)?,
        })
    }

    pub fn create_alert(&self, alert: &AlertCandidate) -> Result<i64, DbError> {
        // Keep completed_at consistent with completed regardless of the input.
        let completed_at = if alert.completed {
            Some(to_db_time(&alert.completed_at.unwrap_or_else(Utc::now)))
        } else {
            None
        };
        self.conn.execute(
            "INSERT INTO alerts (briefing_id, type, category, title, description, contact_name,
                                 organization, action_required, deadline, completed,
                                 completed_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                alert.briefing_id,
                alert.alert_type.as_str(),
                alert.category.as_str(),
                alert.title,
                alert.description,
                alert.contact_name,
                alert.organization,
                alert.action_required,
                to_db_time_opt(&alert.deadline),
                alert.completed as i32,
                completed_at,
                to_db_time(&Utc::now()),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Insert alerts in transactions of [`ALERT_BATCH_SIZE`] rows.
    pub fn create_alerts_batch(&self, alerts: &[AlertCandidate]) -> Result<Vec<i64>, DbError> {
        let mut ids = Vec::with_capacity(alerts.len());
        for chunk in alerts.chunks(ALERT_BATCH_SIZE) {
            let chunk_ids: Vec<i64> = self.with_transaction(|db| {
                chunk
                    .iter()
                    .map(|alert| db.create_alert(alert))
                    .collect::<Result<Vec<_>, _>>()
            })?;
            ids.extend(chunk_ids);
        }
        Ok(ids)
    }

    pub fn get_alert(&self, id: i64) -> Result<Option<Alert>, DbError> {
        let alert = self
            .conn
            .query_row(
                &format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?1"),
                params![id],
                Self::map_alert_row,
            )
            .optional()?;
        Ok(alert)
    }

    /// Alerts of one briefing in insertion order.
    pub fn get_alerts_for_briefing(&self, briefing_id: i64) -> Result<Vec<Alert>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts WHERE briefing_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![briefing_id], Self::map_alert_row)?;
        let mut alerts = Vec::new();
        for row in rows {
            alerts.push(row?);
        }
        Ok(alerts)
    }

    /// Set `completed` and `completed_at` together in one statement.
    pub fn set_alert_completion(&self, id: i64, completed: bool) -> Result<Alert, DbError> {
        let completed_at = completed.then(|| to_db_time(&Utc::now()));
        let changed = self.conn.execute(
            "UPDATE alerts SET completed = ?1, completed_at = ?2 WHERE id = ?3",
            params![completed as i32, completed_at, id],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("alert {id}")));
        }
        self.get_alert(id)?
            .ok_or_else(|| DbError::NotFound(format!("alert {id}")))
    }
}
