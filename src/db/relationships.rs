use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::*;
use crate::types::Relationship;

const RELATIONSHIP_COLUMNS: &str = "contact_name, organization, email, health_score, trend,
     last_interaction, last_interaction_type, notes";

impl BriefingDb {
    // =========================================================================
    // Relationships
    // =========================================================================

    fn map_relationship_row(row: &Row<'_>) -> rusqlite::Result<Relationship> {
        Ok(Relationship {
            contact_name: row.get(0)?,
            organization: row.get(1)?,
            email: row.get(2)?,
            health_score: row.get::<_, i64>(3)?.clamp(0, 100) as u8,
            trend: get_enum(row, 4)?,
            last_interaction: get_time(row, 5)?,
            last_interaction_type: row.get(6)?,
            notes: row.get(7)?,
        })
    }

    /// Insert or refresh a relationship keyed by email.
    ///
    /// Score, trend and last interaction are replaced, not merged. Existing
    /// notes survive when the incoming row has none.
    pub fn upsert_relationship(&self, relationship: &Relationship) -> Result<(), DbError> {
        let now = to_db_time(&Utc::now());
        self.conn.execute(
            "INSERT INTO relationships
                (contact_name, organization, email, health_score, trend, last_interaction,
                 last_interaction_type, notes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
             ON CONFLICT(email) DO UPDATE SET
                contact_name = excluded.contact_name,
                organization = excluded.organization,
                health_score = excluded.health_score,
                trend = excluded.trend,
                last_interaction = excluded.last_interaction,
                last_interaction_type = excluded.last_interaction_type,
                notes = COALESCE(excluded.notes, relationships.notes),
                updated_at = excluded.updated_at",
            params![
                relationship.contact_name,
                relationship.organization,
                relationship.email,
                relationship.health_score as i64,
                relationship.trend.as_str(),
                to_db_time(&relationship.last_interaction),
                relationship.last_interaction_type,
                relationship.notes,
                now,
            ],
        )?;
        Ok(())
    }

    /// Upsert in transactions of [`RELATIONSHIP_BATCH_SIZE`] rows.
    pub fn upsert_relationships_batch(
        &self,
        relationships: &[Relationship],
    ) -> Result<usize, DbError> {
        for chunk in relationships.chunks(RELATIONSHIP_BATCH_SIZE) {
            self.with_transaction(|db| {
                for relationship in chunk {
                    db.upsert_relationship(relationship)?;
                }
                Ok(())
            })?;
        }
        Ok(relationships.len())
    }

    pub fn get_relationship(&self, email: &str) -> Result<Option<Relationship>, DbError> {
        let relationship = self
            .conn
            .query_row(
                &format!("SELECT {RELATIONSHIP_COLUMNS} FROM relationships WHERE email = ?1"),
                params![email],
                Self::map_relationship_row,
            )
            .optional()?;
        Ok(relationship)
    }

    /// All relationships, healthiest first.
    pub fn list_relationships(&self) -> Result<Vec<Relationship>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM relationships
             ORDER BY health_score DESC, contact_name"
        ))?;
        let rows = stmt.query_map([], Self::map_relationship_row)?;
        let mut relationships = Vec::new();
        for row in rows {
            relationships.push(row?);
        }
        Ok(relationships)
    }
}
