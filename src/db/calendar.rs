use chrono::Utc;
use rusqlite::{params, Row};

use super::*;
use crate::types::CalendarEventRecord;

impl BriefingDb {
    // =========================================================================
    // Calendar events
    // =========================================================================

    fn map_calendar_event_row(row: &Row<'_>) -> rusqlite::Result<CalendarEventRecord> {
        Ok(CalendarEventRecord {
            id: Some(row.get(0)?),
            briefing_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            start_time: get_time(row, 4)?,
            end_time: get_time(row, 5)?,
            location: row.get(6)?,
            attendees: get_string_list(row, 7)?,
            event_type: row.get(8)?,
            strategic_value: row.get(9)?,
            preparation_needed: row.get(10)?,
            talking_points: get_string_list(row, 11)?,
        })
    }

    pub fn create_calendar_event(&self, event: &CalendarEventRecord) -> Result<i64, DbError> {
        self.conn.execute(
            "INSERT INTO calendar_events
                (briefing_id, title, description, start_time, end_time, location,
                 attendees_json, event_type, strategic_value, preparation_needed,
                 talking_points_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                event.briefing_id,
                event.title,
                event.description,
                to_db_time(&event.start_time),
                to_db_time(&event.end_time),
                event.location,
                serde_json::to_string(&event.attendees)?,
                event.event_type,
                event.strategic_value,
                event.preparation_needed,
                serde_json::to_string(&event.talking_points)?,
                to_db_time(&Utc::now()),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Insert in transactions of [`CALENDAR_EVENT_BATCH_SIZE`] rows.
    pub fn create_calendar_events_batch(
        &self,
        events: &[CalendarEventRecord],
    ) -> Result<Vec<i64>, DbError> {
        let mut ids = Vec::with_capacity(events.len());
        for chunk in events.chunks(CALENDAR_EVENT_BATCH_SIZE) {
            let chunk_ids: Vec<i64> = self.with_transaction(|db| {
                chunk
                    .iter()
                    .map(|event| db.create_calendar_event(event))
                    .collect::<Result<Vec<_>, _>>()
            })?;
            ids.extend(chunk_ids);
        }
        Ok(ids)
    }

    /// Events of one briefing ordered by start time.
    pub fn get_calendar_events_for_briefing(
        &self,
        briefing_id: i64,
    ) -> Result<Vec<CalendarEventRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, briefing_id, title, description, start_time, end_time, location,
                    attendees_json, event_type, strategic_value, preparation_needed,
                    talking_points_json
             FROM calendar_events WHERE briefing_id = ?1
             ORDER BY start_time, id",
        )?;
        let rows = stmt.query_map(params![briefing_id], Self::map_calendar_event_row)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::test_utils::test_db;
    use super::*;

    #[test]
    fn test_event_round_trip_keeps_lists() {
        let db = test_db();
        let briefing_id = db.create_briefing(&Utc::now(), "x").expect("briefing");
        let start = Utc::now() + chrono::Duration::hours(3);
        let event = CalendarEventRecord {
            id: None,
            briefing_id,
            title: "Partnership sync".to_string(),
            description: None,
            start_time: start,
            end_time: start + chrono::Duration::hours(1),
            location: Some("Zoom".to_string()),
            attendees: vec!["alice@acme.com".to_string(), "bob@acme.com".to_string()],
            event_type: None,
            strategic_value: Some("High: renewal decision".to_string()),
            preparation_needed: Some("Review the proposal".to_string()),
            talking_points: vec!["Budget".to_string(), "Timeline".to_string()],
        };
        let ids = db.create_calendar_events_batch(&[event]).expect("insert");
        assert_eq!(ids.len(), 1);

        let stored = db.get_calendar_events_for_briefing(briefing_id).expect("fetch");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, Some(ids[0]));
        assert_eq!(stored[0].attendees.len(), 2);
        assert_eq!(stored[0].talking_points, vec!["Budget", "Timeline"]);
        assert_eq!(stored[0].strategic_value.as_deref(), Some("High: renewal decision"));
    }
}
