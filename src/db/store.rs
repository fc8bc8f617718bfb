//! Repository traits over the briefing store.
//!
//! The orchestrator and services only see these traits. `SqliteStore` is the
//! production implementation; tests can swap in anything that implements
//! [`BriefingStore`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{BriefingDb, DbError};
use crate::types::{
    Alert, AlertCandidate, Briefing, CalendarEventRecord, LlmAnalysis, Relationship,
};

#[async_trait]
pub trait BriefingRepository: Send + Sync {
    async fn create_briefing(&self, date: DateTime<Utc>, summary: &str) -> Result<i64, DbError>;
    async fn get_briefing(&self, id: i64) -> Result<Option<Briefing>, DbError>;
    async fn get_latest_briefing(&self) -> Result<Option<Briefing>, DbError>;
    async fn update_executive_summary(&self, id: i64, summary: &str) -> Result<(), DbError>;
    /// Remove a briefing with its alerts, calendar events and analyses.
    async fn delete_briefing(&self, id: i64) -> Result<bool, DbError>;
}

#[async_trait]
pub trait AlertRepository: Send + Sync {
    async fn create_alerts_batch(&self, alerts: &[AlertCandidate]) -> Result<Vec<i64>, DbError>;
    async fn get_alerts_for_briefing(&self, briefing_id: i64) -> Result<Vec<Alert>, DbError>;
    async fn get_alert(&self, id: i64) -> Result<Option<Alert>, DbError>;
    async fn set_alert_completion(&self, id: i64, completed: bool) -> Result<Alert, DbError>;
}

#[async_trait]
pub trait RelationshipRepository: Send + Sync {
    async fn upsert_relationships_batch(
        &self,
        relationships: &[Relationship],
    ) -> Result<usize, DbError>;
    async fn get_relationship(&self, email: &str) -> Result<Option<Relationship>, DbError>;
    async fn list_relationships(&self) -> Result<Vec<Relationship>, DbError>;
}

#[async_trait]
pub trait CalendarEventRepository: Send + Sync {
    async fn create_calendar_events_batch(
        &self,
        events: &[CalendarEventRecord],
    ) -> Result<Vec<i64>, DbError>;
    async fn get_calendar_events_for_briefing(
        &self,
        briefing_id: i64,
    ) -> Result<Vec<CalendarEventRecord>, DbError>;
}

#[async_trait]
pub trait LlmAnalysisRepository: Send + Sync {
    async fn create_llm_analysis(&self, analysis: &LlmAnalysis) -> Result<i64, DbError>;
    async fn get_analyses_for_briefing(&self, briefing_id: i64)
        -> Result<Vec<LlmAnalysis>, DbError>;
}

/// Everything the orchestrator persists through.
pub trait BriefingStore:
    BriefingRepository
    + AlertRepository
    + RelationshipRepository
    + CalendarEventRepository
    + LlmAnalysisRepository
{
}

impl<T> BriefingStore for T where
    T: BriefingRepository
        + AlertRepository
        + RelationshipRepository
        + CalendarEventRepository
        + LlmAnalysisRepository
{
}

/// SQLite-backed store. One connection behind a mutex; every call takes the
/// lock on the blocking pool so rusqlite never stalls a runtime worker.
pub struct SqliteStore {
    db: Arc<Mutex<BriefingDb>>,
}

impl SqliteStore {
    pub fn new(db: BriefingDb) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Open the configured database (or the default path).
    pub fn open(override_path: Option<&str>) -> Result<Self, DbError> {
        Ok(Self::new(BriefingDb::open(override_path)?))
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, DbError>
    where
        T: Send + 'static,
        F: FnOnce(&BriefingDb) -> Result<T, DbError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db.lock()))
            .await
            .map_err(|e| DbError::Task(e.to_string()))?
    }
}

#[async_trait]
impl BriefingRepository for SqliteStore {
    async fn create_briefing(&self, date: DateTime<Utc>, summary: &str) -> Result<i64, DbError> {
        let summary = summary.to_string();
        self.blocking(move |db| db.create_briefing(&date, &summary))
            .await
    }

    async fn get_briefing(&self, id: i64) -> Result<Option<Briefing>, DbError> {
        self.blocking(move |db| db.get_briefing(id)).await
    }

    async fn get_latest_briefing(&self) -> Result<Option<Briefing>, DbError> {
        self.blocking(|db| db.get_latest_briefing()).await
    }

    async fn update_executive_summary(&self, id: i64, summary: &str) -> Result<(), DbError> {
        let summary = summary.to_string();
        self.blocking(move |db| db.update_executive_summary(id, &summary))
            .await
    }

    async fn delete_briefing(&self, id: i64) -> Result<bool, DbError> {
        self.blocking(move |db| db.delete_briefing(id)).await
    }
}

#[async_trait]
impl AlertRepository for SqliteStore {
    async fn create_alerts_batch(&self, alerts: &[AlertCandidate]) -> Result<Vec<i64>, DbError> {
        let alerts = alerts.to_vec();
        self.blocking(move |db| db.create_alerts_batch(&alerts)).await
    }

    async fn get_alerts_for_briefing(&self, briefing_id: i64) -> Result<Vec<Alert>, DbError> {
        self.blocking(move |db| db.get_alerts_for_briefing(briefing_id))
            .await
    }

    async fn get_alert(&self, id: i64) -> Result<Option<Alert>, DbError> {
        self.blocking(move |db| db.get_alert(id)).await
    }

    async fn set_alert_completion(&self, id: i64, completed: bool) -> Result<Alert, DbError> {
        self.blocking(move |db| db.set_alert_completion(id, completed))
            .await
    }
}

#[async_trait]
impl RelationshipRepository for SqliteStore {
    async fn upsert_relationships_batch(
        &self,
        relationships: &[Relationship],
    ) -> Result<usize, DbError> {
        let relationships = relationships.to_vec();
        self.blocking(move |db| db.upsert_relationships_batch(&relationships))
            .await
    }

    async fn get_relationship(&self, email: &str) -> Result<Option<Relationship>, DbError> {
        let email = email.to_string();
        self.blocking(move |db| db.get_relationship(&email)).await
    }

    async fn list_relationships(&self) -> Result<Vec<Relationship>, DbError> {
        self.blocking(|db| db.list_relationships()).await
    }
}

#[async_trait]
impl CalendarEventRepository for SqliteStore {
    async fn create_calendar_events_batch(
        &self,
        events: &[CalendarEventRecord],
    ) -> Result<Vec<i64>, DbError> {
        let events = events.to_vec();
        self.blocking(move |db| db.create_calendar_events_batch(&events))
            .await
    }

    async fn get_calendar_events_for_briefing(
        &self,
        briefing_id: i64,
    ) -> Result<Vec<CalendarEventRecord>, DbError> {
        self.blocking(move |db| db.get_calendar_events_for_briefing(briefing_id))
            .await
    }
}

#[async_trait]
impl LlmAnalysisRepository for SqliteStore {
    async fn create_llm_analysis(&self, analysis: &LlmAnalysis) -> Result<i64, DbError> {
        let analysis = analysis.clone();
        self.blocking(move |db| db.create_llm_analysis(&analysis)).await
    }

    async fn get_analyses_for_briefing(
        &self,
        briefing_id: i64,
    ) -> Result<Vec<LlmAnalysis>, DbError> {
        self.blocking(move |db| db.get_analyses_for_briefing(briefing_id))
            .await
    }
}
