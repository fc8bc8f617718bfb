// Briefing service
// Reads of finished briefings, the completion toggle and the manual trigger.

use crate::db::{
    AlertRepository, BriefingRepository, CalendarEventRepository, LlmAnalysisRepository,
    RelationshipRepository,
};
use crate::error::ExecutionError;
use crate::executor::execute_briefing;
use crate::metrics::MetricsSnapshot;
use crate::progress::ProgressStream;
use crate::state::AppState;
use crate::types::{Alert, Briefing, BriefingDetail, ExecutionTrigger, Relationship};

async fn load_detail(state: &AppState, briefing: Briefing) -> Result<BriefingDetail, ExecutionError> {
    let id = briefing.id;
    Ok(BriefingDetail {
        alerts: state.store.get_alerts_for_briefing(id).await?,
        calendar_events: state.store.get_calendar_events_for_briefing(id).await?,
        analyses: state.store.get_analyses_for_briefing(id).await?,
        briefing,
    })
}

/// The most recent briefing with everything it owns. Failed runs remove
/// their briefing, so this is always a finished one.
pub async fn get_latest_briefing_detail(
    state: &AppState,
) -> Result<Option<BriefingDetail>, ExecutionError> {
    match state.store.get_latest_briefing().await? {
        Some(briefing) => Ok(Some(load_detail(state, briefing).await?)),
        None => Ok(None),
    }
}

pub async fn get_briefing_detail(
    state: &AppState,
    id: i64,
) -> Result<BriefingDetail, ExecutionError> {
    let briefing = state
        .store
        .get_briefing(id)
        .await?
        .ok_or_else(|| ExecutionError::NotFound(format!("briefing {id}")))?;
    load_detail(state, briefing).await
}

/// Every known contact, healthiest first.
pub async fn list_relationships(state: &AppState) -> Result<Vec<Relationship>, ExecutionError> {
    Ok(state.store.list_relationships().await?)
}

/// Mark an alert done (or not). `completed_at` follows `completed`.
pub async fn toggle_alert_completion(
    state: &AppState,
    id: i64,
    completed: bool,
) -> Result<Alert, ExecutionError> {
    let alert = state.store.set_alert_completion(id, completed).await?;
    log::info!(
        "Alert {} marked {}",
        id,
        if completed { "completed" } else { "open" }
    );
    Ok(alert)
}

pub fn metrics_snapshot(state: &AppState) -> MetricsSnapshot {
    state.metrics.snapshot()
}

/// Open a progress stream before (or while) a run with this session id.
pub fn subscribe_progress(state: &AppState, session_id: &str) -> ProgressStream {
    state.progress.stream(session_id)
}

/// Manual trigger. Each caller gets a fixed hourly allowance.
pub async fn generate_briefing(
    state: &AppState,
    caller: &str,
    session_id: Option<String>,
) -> Result<i64, ExecutionError> {
    let decision = state.generation_limiter.check(caller);
    if !decision.allowed {
        let retry_after_secs = decision.reset_in.as_secs().max(1);
        log::warn!(
            "Briefing generation limited for {}, retry in {}s",
            caller,
            retry_after_secs
        );
        return Err(ExecutionError::RateLimited { retry_after_secs });
    }
    execute_briefing(state, ExecutionTrigger::Manual, session_id).await
}
