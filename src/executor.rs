//! Briefing execution engine
//!
//! Receives run requests from the scheduler or a manual trigger, runs the
//! orchestrator and keeps the execution history. Scheduled and missed runs
//! get a bounded number of attempts with backoff; manual runs get one.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;

use crate::error::ExecutionError;
use crate::scheduler::SchedulerMessage;
use crate::state::{create_execution_record, AppState};
use crate::types::ExecutionTrigger;

/// Executor manages briefing execution
pub struct Executor {
    state: Arc<AppState>,
}

impl Executor {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Start the executor loop
    ///
    /// Listens for run requests from the scheduler or manual triggers.
    pub async fn run(&self, mut receiver: mpsc::Receiver<SchedulerMessage>) {
        while let Some(msg) = receiver.recv().await {
            log::info!("Executing briefing (trigger: {:?})", msg.trigger);
            if let Err(e) = execute_briefing(&self.state, msg.trigger, None).await {
                log::error!("Briefing run ({:?}) failed: {}", msg.trigger, e);
            }
        }
    }
}

fn attempts_for(state: &AppState, trigger: ExecutionTrigger) -> u32 {
    match trigger {
        ExecutionTrigger::Manual => 1,
        ExecutionTrigger::Scheduled | ExecutionTrigger::Missed => {
            state.config.schedule.max_attempts.max(1)
        }
    }
}

/// Run one briefing with the trigger's retry envelope and record the outcome.
pub async fn execute_briefing(
    state: &AppState,
    trigger: ExecutionTrigger,
    session_id: Option<String>,
) -> Result<i64, ExecutionError> {
    let record = create_execution_record(trigger);
    let execution_id = record.id.clone();
    let started_at = record.started_at;
    state.add_execution_record(record);

    let max_attempts = attempts_for(state, trigger);
    let backoff_secs = state.config.schedule.retry_backoff_secs;
    let mut attempt = 0;
    let result = loop {
        attempt += 1;
        match state.orchestrator.generate(session_id.clone()).await {
            Ok(id) => break Ok(id),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = backoff_secs.saturating_mul(u64::from(attempt));
                log::warn!(
                    "Briefing attempt {}/{} failed: {}. Retrying in {}s",
                    attempt,
                    max_attempts,
                    e,
                    delay
                );
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }
            Err(e) => break Err(e),
        }
    };

    let finished_at = Utc::now();
    let duration_secs = (finished_at - started_at).num_seconds().max(0) as u64;
    state.update_execution_record(&execution_id, |r| {
        r.finished_at = Some(finished_at);
        r.duration_secs = Some(duration_secs);
        r.attempts = attempt;
        match &result {
            Ok(id) => {
                r.success = true;
                r.briefing_id = Some(*id);
            }
            Err(e) => {
                r.success = false;
                r.error_message = Some(e.to_string());
                r.can_retry = Some(e.is_retryable());
            }
        }
    });

    if let Err(e) = &result {
        if trigger != ExecutionTrigger::Manual {
            log::error!(
                "Scheduled briefing failed after {} attempt{}, needs manual attention: {} ({})",
                attempt,
                crate::util::plural(attempt as usize, "", "s"),
                e,
                e.recovery_suggestion()
            );
        }
    }
    result
}
