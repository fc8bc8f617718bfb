//! End-to-end briefing run.
//!
//! started → fetching → data-fetched → generating-alerts → alerts-generated
//! → processing-relationships → generating-summary → completed | failed
//!
//! Every run creates a new briefing. Source and model failures degrade to
//! empty data or fallback text; only store failures fail the run, and a
//! failed run removes the briefing it started.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;

use super::{
    alerts, calendar_intel, commitments, connections, dedup, patterns, scoring,
    insights::InsightGenerator, relationships::RelationshipManager,
};
use crate::db::{
    AlertRepository, BriefingRepository, BriefingStore, CalendarEventRepository,
    RelationshipRepository,
};
use crate::error::ExecutionError;
use crate::llm::Models;
use crate::metrics::MetricsRecorder;
use crate::progress::{ProgressStep, ProgressTracker};
use crate::sources::{SourceConnectors, SourceData};
use crate::types::AlertCandidate;

pub const PLACEHOLDER_SUMMARY: &str = "Generating...";
/// Commitments due within this many days become alerts.
const COMMITMENT_WINDOW_DAYS: i64 = 7;

// Stage budgets (ms)
const ALERTS_BUDGET_MS: u128 = 60_000;
const RELATIONSHIPS_BUDGET_MS: u128 = 5_000;
const CALENDAR_BUDGET_MS: u128 = 120_000;
const INSIGHTS_BUDGET_MS: u128 = 180_000;
const SUMMARY_BUDGET_MS: u128 = 30_000;
const RUN_BUDGET_MS: u128 = 300_000;

pub struct BriefingOrchestrator {
    store: Arc<dyn BriefingStore>,
    sources: SourceConnectors,
    models: Models,
    insights: InsightGenerator,
    relationships: RelationshipManager,
    progress: Arc<ProgressTracker>,
    metrics: Arc<MetricsRecorder>,
    timezone: Tz,
}

impl BriefingOrchestrator {
    pub fn new(
        store: Arc<dyn BriefingStore>,
        sources: SourceConnectors,
        models: Models,
        relationships: RelationshipManager,
        progress: Arc<ProgressTracker>,
        metrics: Arc<MetricsRecorder>,
        timezone: Tz,
    ) -> Self {
        Self {
            store,
            sources,
            insights: InsightGenerator::new(models.clone()),
            models,
            relationships,
            progress,
            metrics,
            timezone,
        }
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    /// Run the whole pipeline and return the new briefing id. Progress is
    /// published under `session_id`, or `briefing-<millis>` when none is given.
    pub async fn generate(&self, session_id: Option<String>) -> Result<i64, ExecutionError> {
        let session =
            session_id.unwrap_or_else(|| format!("briefing-{}", Utc::now().timestamp_millis()));
        self.progress.start_session(&session);
        let started = Instant::now();

        let outcome = self.run(&session).await;
        self.metrics
            .record_stage("run", started.elapsed().as_millis(), RUN_BUDGET_MS);
        self.metrics.record_outcome("run", outcome.is_ok());

        match &outcome {
            Ok(id) => {
                log::info!(
                    "Briefing {} generated in {}ms",
                    id,
                    started.elapsed().as_millis()
                );
                self.progress
                    .complete(&session, true, "Briefing generated successfully!");
            }
            Err(e) => {
                log::error!("Briefing generation failed: {}", e);
                self.progress.fail(&session, e);
            }
        }
        outcome
    }

    fn briefing_date(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local_day = now.with_timezone(&self.timezone).date_naive();
        local_day
            .and_hms_opt(6, 0, 0)
            .and_then(|six| self.timezone.from_local_datetime(&six).earliest())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(now)
    }

    async fn run(&self, session: &str) -> Result<i64, ExecutionError> {
        let now = Utc::now();
        let config = self.sources.config();

        self.progress.update(
            session,
            ProgressStep::Fetching,
            10,
            "Fetching data from mail, calendar and recordings...",
        );
        let data = self
            .sources
            .fetch_all(config.days_back, config.days_ahead)
            .await;
        self.progress.update(
            session,
            ProgressStep::DataFetched,
            30,
            &format!(
                "Fetched {} emails, {} events, {} recordings",
                data.messages.len(),
                data.events.len(),
                data.recordings.len()
            ),
        );

        let briefing_id = self
            .store
            .create_briefing(self.briefing_date(now), PLACEHOLDER_SUMMARY)
            .await
            .map_err(|e| ExecutionError::BriefingCreation(e.to_string()))?;
        if briefing_id <= 0 {
            return Err(ExecutionError::BriefingCreation(format!(
                "store returned invalid id {briefing_id}"
            )));
        }
        log::info!("Created briefing {}", briefing_id);

        if let Err(e) = self.populate(session, briefing_id, &data, now).await {
            match self.store.delete_briefing(briefing_id).await {
                Ok(_) => log::info!("Removed unfinished briefing {}", briefing_id),
                Err(cleanup) => log::warn!(
                    "Failed to remove unfinished briefing {}: {}",
                    briefing_id,
                    cleanup
                ),
            }
            return Err(e);
        }
        Ok(briefing_id)
    }

    /// Everything after the placeholder row exists.
    async fn populate(
        &self,
        session: &str,
        briefing_id: i64,
        data: &SourceData,
        now: DateTime<Utc>,
    ) -> Result<(), ExecutionError> {
        // Alerts
        self.progress.update(
            session,
            ProgressStep::GeneratingAlerts,
            40,
            "Analyzing emails and generating alerts...",
        );
        let stage = Instant::now();
        let extracted =
            commitments::extract_from_recordings(self.models.primary.as_ref(), &data.recordings)
                .await;
        let upcoming = commitments::filter_upcoming(extracted, COMMITMENT_WINDOW_DAYS, now);

        let mut candidates: Vec<AlertCandidate> = Vec::new();
        candidates.extend(alerts::response_urgency_alerts(&data.messages, briefing_id, now));
        candidates.extend(alerts::relationship_cooling_alerts(&data.messages, briefing_id, now));
        candidates.extend(alerts::calendar_preparation_alerts(&data.events, briefing_id, now));
        candidates.extend(alerts::strategic_opportunity_alerts(&data.messages, briefing_id));
        candidates.extend(alerts::commitment_alerts(&upcoming, briefing_id));
        let generated = candidates.len();
        let deduplicated = dedup::deduplicate(candidates);

        let relationships = self.relationships.process(&data.messages, now);
        let health: HashMap<String, u8> = relationships
            .iter()
            .map(|r| (r.email.clone(), r.health_score))
            .collect();
        let ranked: Vec<AlertCandidate> =
            scoring::sort_by_score(deduplicated, &health, &data.messages, now)
                .into_iter()
                .map(|scored| scored.alert)
                .collect();

        self.store.create_alerts_batch(&ranked).await?;
        log::info!(
            "Generated {} alerts for briefing {} ({} before deduplication)",
            ranked.len(),
            briefing_id,
            generated
        );
        self.metrics
            .record_stage("alerts", stage.elapsed().as_millis(), ALERTS_BUDGET_MS);
        self.progress.update(
            session,
            ProgressStep::AlertsGenerated,
            50,
            &format!("Generated {} alerts", ranked.len()),
        );

        // Relationships
        self.progress.update(
            session,
            ProgressStep::ProcessingRelationships,
            60,
            "Processing relationships...",
        );
        let stage = Instant::now();
        let upserted = self
            .store
            .upsert_relationships_batch(&relationships)
            .await?;
        log::debug!("Upserted {} relationships", upserted);
        self.metrics.record_stage(
            "relationships",
            stage.elapsed().as_millis(),
            RELATIONSHIPS_BUDGET_MS,
        );

        // Calendar and patterns
        let stage = Instant::now();
        let events = calendar_intel::enhance_events(
            self.models.primary.as_ref(),
            &data.events,
            &relationships,
            briefing_id,
            now,
        )
        .await;
        self.store.create_calendar_events_batch(&events).await?;
        self.metrics
            .record_stage("calendar", stage.elapsed().as_millis(), CALENDAR_BUDGET_MS);

        let activity = patterns::analyze_email_activity(&data.messages);
        let activity_summary = patterns::email_activity_summary(&activity);
        let clusters = patterns::cluster_topics(&data.messages);
        let links = connections::find_all_connections(&data.messages);
        log::debug!(
            "{} topic clusters, {} contact connections",
            clusters.len(),
            links.len()
        );

        // Multi-model analysis
        let stage = Instant::now();
        let analyzed = self
            .insights
            .analyze_and_store(briefing_id, &ranked, self.store.as_ref())
            .await;
        log::info!("Stored {} opportunity analyses", analyzed);
        self.metrics
            .record_stage("insights", stage.elapsed().as_millis(), INSIGHTS_BUDGET_MS);

        // Summary
        self.progress.update(
            session,
            ProgressStep::GeneratingSummary,
            90,
            "Generating executive summary...",
        );
        let stage = Instant::now();
        let summary = self
            .insights
            .executive_summary(&ranked, &activity_summary)
            .await;
        self.store
            .update_executive_summary(briefing_id, &summary)
            .await
            .map_err(|e| ExecutionError::SummaryUpdate(e.to_string()))?;
        self.metrics
            .record_stage("summary", stage.elapsed().as_millis(), SUMMARY_BUDGET_MS);

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    use super::*;
    use crate::db::test_utils::test_store;
    use crate::db::{DbError, LlmAnalysisRepository};
    use crate::llm::tests::ScriptedModel;
    use crate::llm::LanguageModel;
    use crate::resilience::TtlCache;
    use crate::sources::tests::{connectors, ScriptedTransport};
    use crate::types::{Alert, Briefing, CalendarEventRecord, LlmAnalysis, Relationship};

    pub(crate) fn scripted_models(model: Arc<dyn LanguageModel>) -> Models {
        Models {
            primary: model.clone(),
            advisor: model.clone(),
            analyst: model.clone(),
            contrarian: model.clone(),
            researcher: model,
        }
    }

    pub(crate) fn orchestrator(
        store: Arc<dyn BriefingStore>,
        transport: Arc<ScriptedTransport>,
        model: Arc<dyn LanguageModel>,
    ) -> BriefingOrchestrator {
        BriefingOrchestrator::new(
            store,
            connectors(transport),
            scripted_models(model),
            RelationshipManager::new(Arc::new(TtlCache::new(Duration::from_secs(60)))),
            Arc::new(ProgressTracker::new(Duration::from_secs(60))),
            Arc::new(MetricsRecorder::new()),
            chrono_tz::America::New_York,
        )
    }

    fn mail(from: &str, subject: &str, hours_ago: i64) -> serde_json::Value {
        json!({
            "id": format!("{from}-{hours_ago}"),
            "threadId": format!("t-{from}-{hours_ago}"),
            "internalDate": (Utc::now() - ChronoDuration::hours(hours_ago))
                .timestamp_millis()
                .to_string(),
            "pickedHeaders": { "from": from, "to": "me@hti.org", "subject": subject },
            "pickedPlainContent": subject
        })
    }

    #[tokio::test]
    async fn test_empty_sources_still_complete_with_fallback_summary() {
        let store = test_store();
        let transport = Arc::new(ScriptedTransport::default());
        let orch = orchestrator(
            store.clone(),
            transport,
            Arc::new(ScriptedModel::failing()),
        );

        let id = orch
            .generate(Some("empty".to_string()))
            .await
            .expect("run completes");

        let briefing = store.get_briefing(id).await.expect("read").expect("exists");
        assert!(briefing
            .executive_summary
            .starts_with("Today's briefing includes 0 urgent actions"));
        assert!(store.get_alerts_for_briefing(id).await.expect("alerts").is_empty());

        let history = orch.progress().history("empty");
        assert_eq!(history.last().map(|u| u.step), Some(ProgressStep::Completed));
        assert!(history
            .iter()
            .any(|u| u.message == "Fetched 0 emails, 0 events, 0 recordings"));
    }

    #[tokio::test]
    async fn test_full_run_persists_every_part() {
        let store = test_store();
        let transport = Arc::new(ScriptedTransport::default());
        transport.respond(
            "gmail",
            json!({ "result": { "threads": [
                { "messages": [mail("Dana <dana@fund.org>", "Grant partnership proposal", 5)] },
                { "messages": [mail("Sam <sam@coop.net>", "Thank you for the meeting today", 10)] }
            ]}}),
        );
        let model = Arc::new(ScriptedModel::replying(
            "CONSENSUS: Worth pursuing.\nDISSENT: None.\nRECOMMENDATION: Call Dana.",
        ));
        let orch = orchestrator(store.clone(), transport, model.clone());

        let id = orch.generate(None).await.expect("run completes");

        let alerts = store.get_alerts_for_briefing(id).await.expect("alerts");
        assert!(alerts.iter().any(|a| a.alert.category.as_str() == "strategic_opportunity"));
        assert!(alerts.iter().any(|a| a.alert.category.as_str() == "response_urgency"));
        assert!(alerts.iter().all(|a| !a.alert.completed));

        let relationships = store.list_relationships().await.expect("relationships");
        assert_eq!(relationships.len(), 2);

        let analyses = store.get_analyses_for_briefing(id).await.expect("analyses");
        assert_eq!(analyses.len(), 1);
        assert_eq!(analyses[0].recommendation, "Call Dana.");

        let briefing = store.get_briefing(id).await.expect("read").expect("exists");
        assert_ne!(briefing.executive_summary, PLACEHOLDER_SUMMARY);
        assert!(model.calls.load(Ordering::SeqCst) >= 6);
    }

    #[tokio::test]
    async fn test_each_run_creates_a_new_briefing() {
        let store = test_store();
        let orch = orchestrator(
            store.clone(),
            Arc::new(ScriptedTransport::default()),
            Arc::new(ScriptedModel::failing()),
        );
        let first = orch.generate(None).await.expect("first");
        let second = orch.generate(None).await.expect("second");
        assert_ne!(first, second);
    }

    /// Store whose summary update always fails.
    pub(crate) struct SummaryFails(pub Arc<dyn BriefingStore>);

    #[async_trait]
    impl BriefingRepository for SummaryFails {
        async fn create_briefing(&self, date: DateTime<Utc>, summary: &str) -> Result<i64, DbError> {
            self.0.create_briefing(date, summary).await
        }
        async fn get_briefing(&self, id: i64) -> Result<Option<Briefing>, DbError> {
            self.0.get_briefing(id).await
        }
        async fn get_latest_briefing(&self) -> Result<Option<Briefing>, DbError> {
            self.0.get_latest_briefing().await
        }
        async fn update_executive_summary(&self, id: i64, _summary: &str) -> Result<(), DbError> {
            Err(DbError::NotFound(format!("briefing {id}")))
        }
        async fn delete_briefing(&self, id: i64) -> Result<bool, DbError> {
            self.0.delete_briefing(id).await
        }
    }

    #[async_trait]
    impl AlertRepository for SummaryFails {
        async fn create_alerts_batch(&self, alerts: &[AlertCandidate]) -> Result<Vec<i64>, DbError> {
            self.0.create_alerts_batch(alerts).await
        }
        async fn get_alerts_for_briefing(&self, briefing_id: i64) -> Result<Vec<Alert>, DbError> {
            self.0.get_alerts_for_briefing(briefing_id).await
        }
        async fn get_alert(&self, id: i64) -> Result<Option<Alert>, DbError> {
            self.0.get_alert(id).await
        }
        async fn set_alert_completion(&self, id: i64, completed: bool) -> Result<Alert, DbError> {
            self.0.set_alert_completion(id, completed).await
        }
    }

    #[async_trait]
    impl RelationshipRepository for SummaryFails {
        async fn upsert_relationships_batch(
            &self,
            relationships: &[Relationship],
        ) -> Result<usize, DbError> {
            self.0.upsert_relationships_batch(relationships).await
        }
        async fn get_relationship(&self, email: &str) -> Result<Option<Relationship>, DbError> {
            self.0.get_relationship(email).await
        }
        async fn list_relationships(&self) -> Result<Vec<Relationship>, DbError> {
            self.0.list_relationships().await
        }
    }

    #[async_trait]
    impl CalendarEventRepository for SummaryFails {
        async fn create_calendar_events_batch(
            &self,
            events: &[CalendarEventRecord],
        ) -> Result<Vec<i64>, DbError> {
            self.0.create_calendar_events_batch(events).await
        }
        async fn get_calendar_events_for_briefing(
            &self,
            briefing_id: i64,
        ) -> Result<Vec<CalendarEventRecord>, DbError> {
            self.0.get_calendar_events_for_briefing(briefing_id).await
        }
    }

    #[async_trait]
    impl LlmAnalysisRepository for SummaryFails {
        async fn create_llm_analysis(&self, analysis: &LlmAnalysis) -> Result<i64, DbError> {
            self.0.create_llm_analysis(analysis).await
        }
        async fn get_analyses_for_briefing(
            &self,
            briefing_id: i64,
        ) -> Result<Vec<LlmAnalysis>, DbError> {
            self.0.get_analyses_for_briefing(briefing_id).await
        }
    }

    #[tokio::test]
    async fn test_summary_failure_fails_the_run() {
        let inner: Arc<dyn BriefingStore> = test_store();
        let orch = orchestrator(
            Arc::new(SummaryFails(inner.clone())),
            Arc::new(ScriptedTransport::default()),
            Arc::new(ScriptedModel::failing()),
        );

        let err = orch
            .generate(Some("doomed".to_string()))
            .await
            .expect_err("summary update fails");
        assert!(matches!(err, ExecutionError::SummaryUpdate(_)));
        assert!(err.is_retryable());

        let last = orch.progress().history("doomed").pop().expect("history");
        assert_eq!(last.step, ProgressStep::Failed);
        assert!(last.message.starts_with("Generation failed:"));
        let error = last.error.expect("classified error");
        assert!(error.can_retry);
        assert_eq!(error.recovery_suggestion, err.recovery_suggestion());
    }

    #[tokio::test]
    async fn test_failed_runs_leave_no_briefing_behind() {
        let inner: Arc<dyn BriefingStore> = test_store();
        let transport = Arc::new(ScriptedTransport::default());
        transport.respond(
            "gmail",
            json!({ "result": { "threads": [
                { "messages": [mail("Dana <dana@fund.org>", "Grant partnership proposal", 5)] }
            ]}}),
        );
        let orch = orchestrator(
            Arc::new(SummaryFails(inner.clone())),
            transport,
            Arc::new(ScriptedModel::failing()),
        );

        for attempt in 0..3 {
            orch.generate(Some(format!("retry-{attempt}")))
                .await
                .expect_err("summary update fails");
        }
        assert!(inner.get_latest_briefing().await.expect("latest").is_none());
        // Contacts are not briefing-scoped and survive the failure
        assert_eq!(inner.list_relationships().await.expect("relationships").len(), 1);
    }

    #[test]
    fn test_briefing_date_is_six_local() {
        let orch = orchestrator(
            test_store(),
            Arc::new(ScriptedTransport::default()),
            Arc::new(ScriptedModel::failing()),
        );
        // 15:00 UTC in June is 11:00 in New York (EDT)
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 15, 0, 0).unwrap();
        assert_eq!(
            orch.briefing_date(now),
            Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap()
        );
    }
}
