//! Scheduler for the daily briefing
//!
//! Manages the briefing schedule with support for:
//! - Cron expression parsing
//! - Timezone-aware scheduling
//! - Sleep/wake detection via time-jump polling
//! - Missed run handling (runs if within grace period)

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use tokio::sync::mpsc;

use crate::error::ExecutionError;
use crate::state::AppState;
use crate::types::{ExecutionTrigger, ScheduleEntry};

/// Grace period for missed runs (2 hours)
const MISSED_JOB_GRACE_PERIOD_SECS: i64 = 7200;

/// Time jump threshold to detect sleep/wake (5 minutes)
const TIME_JUMP_THRESHOLD_SECS: i64 = 300;

/// Poll interval for scheduler loop (1 minute)
const POLL_INTERVAL_SECS: u64 = 60;

/// Window around a scheduled time in which a poll counts as "on time"
const DUE_WINDOW_SECS: i64 = 120;

/// Message sent to trigger a briefing run
#[derive(Debug, Clone)]
pub struct SchedulerMessage {
    pub trigger: ExecutionTrigger,
}

pub struct Scheduler {
    state: Arc<AppState>,
    sender: mpsc::Sender<SchedulerMessage>,
}

impl Scheduler {
    pub fn new(state: Arc<AppState>, sender: mpsc::Sender<SchedulerMessage>) -> Self {
        Self { state, sender }
    }

    /// Start the scheduler loop
    ///
    /// This runs indefinitely, checking for a due briefing every minute.
    /// It also handles sleep/wake detection.
    pub async fn run(&self) {
        let entry = &self.state.config.schedule;
        if !entry.enabled {
            log::info!("Briefing schedule disabled, scheduler idle");
            return;
        }
        match get_next_run_time(entry) {
            Ok(next) => log::info!("Next scheduled briefing at {}", next),
            Err(e) => log::warn!("Could not compute next briefing time: {}", e),
        }

        let mut last_check = Utc::now();
        loop {
            tokio::time::sleep(Duration::from_secs(POLL_INTERVAL_SECS)).await;
            let now = Utc::now();

            // Detect sleep: time jumped more than 5 minutes
            let time_jump = (now - last_check).num_seconds();
            if time_jump > TIME_JUMP_THRESHOLD_SECS {
                log::info!(
                    "Detected system wake (time jumped {} seconds), checking for missed briefing",
                    time_jump
                );
                self.check_missed(now).await;
            }

            self.check_due(now).await;
            self.state.purge_expired();
            last_check = now;
        }
    }

    async fn check_due(&self, now: DateTime<Utc>) {
        let last_run = self.state.get_last_scheduled_run();
        match should_run_now(&self.state.config.schedule, last_run, now) {
            Ok(Some(scheduled)) => {
                self.state.set_last_scheduled_run(scheduled);
                self.trigger(ExecutionTrigger::Scheduled).await;
            }
            Ok(None) => {}
            Err(e) => log::warn!("Schedule check failed: {}", e),
        }
    }

    async fn check_missed(&self, now: DateTime<Utc>) {
        let last_run = self.state.get_last_scheduled_run();
        match find_missed_job(&self.state.config.schedule, last_run, now) {
            Ok(Some(scheduled)) => {
                log::info!("Found missed briefing scheduled for {}, running now", scheduled);
                self.state.set_last_scheduled_run(scheduled);
                self.trigger(ExecutionTrigger::Missed).await;
            }
            Ok(None) => {}
            Err(e) => log::warn!("Missed-run check failed: {}", e),
        }
    }

    async fn trigger(&self, trigger: ExecutionTrigger) {
        if self.sender.send(SchedulerMessage { trigger }).await.is_err() {
            log::error!("Failed to send scheduler message for {:?} run", trigger);
        }
    }
}

fn schedule_timezone(entry: &ScheduleEntry) -> Result<Tz, ExecutionError> {
    entry.timezone.parse().map_err(|_| {
        ExecutionError::ConfigurationError(format!("Invalid timezone: {}", entry.timezone))
    })
}

/// The scheduled time that is due at `now`, unless it already ran.
pub fn should_run_now(
    entry: &ScheduleEntry,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ExecutionError> {
    let schedule = parse_cron(&entry.cron)?;
    let tz = schedule_timezone(entry)?;
    let now_local = now.with_timezone(&tz);

    let Some(next_time) = schedule
        .after(&(now_local - chrono::Duration::minutes(2)))
        .next()
    else {
        return Ok(None);
    };
    let next_utc = next_time.with_timezone(&Utc);
    if (now - next_utc).num_seconds().abs() >= DUE_WINDOW_SECS {
        return Ok(None);
    }
    if let Some(last) = last_run {
        if (last - next_utc).num_seconds().abs() < 60 {
            return Ok(None);
        }
    }
    Ok(Some(next_utc))
}

/// Find a missed run within the grace period.
pub fn find_missed_job(
    entry: &ScheduleEntry,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ExecutionError> {
    let schedule = parse_cron(&entry.cron)?;
    let tz = schedule_timezone(entry)?;
    let grace_start =
        now.with_timezone(&tz) - chrono::Duration::seconds(MISSED_JOB_GRACE_PERIOD_SECS);

    for scheduled in schedule.after(&grace_start) {
        let scheduled_utc = scheduled.with_timezone(&Utc);
        if scheduled_utc > now {
            break;
        }
        if let Some(last) = last_run {
            if last >= scheduled_utc {
                continue;
            }
        }
        return Ok(Some(scheduled_utc));
    }
    Ok(None)
}

/// Parse a cron expression
pub fn parse_cron(expr: &str) -> Result<Schedule, ExecutionError> {
    // The cron crate expects 6 fields (with seconds), but we use 5-field format
    let full_expr = format!("0 {}", expr);

    full_expr.parse::<Schedule>().map_err(|e| {
        ExecutionError::ConfigurationError(format!("Invalid cron expression '{}': {}", expr, e))
    })
}

/// Get the next scheduled briefing time
pub fn get_next_run_time(entry: &ScheduleEntry) -> Result<DateTime<Utc>, ExecutionError> {
    let schedule = parse_cron(&entry.cron)?;
    let tz = schedule_timezone(entry)?;
    let next = schedule.upcoming(tz).next().ok_or_else(|| {
        ExecutionError::ConfigurationError("No upcoming scheduled time".to_string())
    })?;
    Ok(next.with_timezone(&Utc))
}
