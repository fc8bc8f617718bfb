//! Lightweight in-memory rollups for briefing runs.
//!
//! Keeps a bounded sample window per pipeline stage (p50/p95/max against a
//! budget) and success/failure counters per external dependency and per run.
//! Nothing is persisted; a snapshot is available through the services layer.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

const MAX_SAMPLES_PER_STAGE: usize = 256;

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRollup {
    pub stage: String,
    pub sample_count: usize,
    pub p50_ms: u128,
    pub p95_ms: u128,
    pub max_ms: u128,
    pub budget_ms: u128,
    pub budget_violations: u64,
    pub last_recorded_at: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRollup {
    pub name: String,
    pub successes: u64,
    pub failures: u64,
    pub last_failure_at: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub generated_at: String,
    pub stages: Vec<StageRollup>,
    pub outcomes: Vec<OutcomeRollup>,
}

#[derive(Debug, Clone, Default)]
struct StageWindow {
    samples_ms: VecDeque<u128>,
    budget_ms: u128,
    budget_violations: u64,
    last_recorded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
struct OutcomeCounter {
    successes: u64,
    failures: u64,
    last_failure_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct MetricsRecorder {
    stages: Mutex<HashMap<String, StageWindow>>,
    outcomes: Mutex<HashMap<String, OutcomeCounter>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_stage(&self, stage: &str, elapsed_ms: u128, budget_ms: u128) {
        let mut stages = self.stages.lock();
        let window = stages.entry(stage.to_string()).or_default();
        window.budget_ms = budget_ms;
        if elapsed_ms > budget_ms {
            window.budget_violations += 1;
            log::debug!(
                "Stage {} took {}ms (budget {}ms)",
                stage,
                elapsed_ms,
                budget_ms
            );
        }
        if window.samples_ms.len() >= MAX_SAMPLES_PER_STAGE {
            window.samples_ms.pop_front();
        }
        window.samples_ms.push_back(elapsed_ms);
        window.last_recorded_at = Some(Utc::now());
    }

    /// Count one call outcome, e.g. `source:mail`, `model:advisor`, `run`.
    pub fn record_outcome(&self, name: &str, success: bool) {
        let mut outcomes = self.outcomes.lock();
        let counter = outcomes.entry(name.to_string()).or_default();
        if success {
            counter.successes += 1;
        } else {
            counter.failures += 1;
            counter.last_failure_at = Some(Utc::now());
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut stages: Vec<StageRollup> = self
            .stages
            .lock()
            .iter()
            .map(|(stage, window)| {
                let mut values: Vec<u128> = window.samples_ms.iter().copied().collect();
                values.sort_unstable();
                StageRollup {
                    stage: stage.clone(),
                    sample_count: values.len(),
                    p50_ms: percentile(&values, 50.0).unwrap_or(0),
                    p95_ms: percentile(&values, 95.0).unwrap_or(0),
                    max_ms: values.last().copied().unwrap_or(0),
                    budget_ms: window.budget_ms,
                    budget_violations: window.budget_violations,
                    last_recorded_at: window.last_recorded_at.map(|dt| dt.to_rfc3339()),
                }
            })
            .collect();
        stages.sort_by(|a, b| b.p95_ms.cmp(&a.p95_ms).then(a.stage.cmp(&b.stage)));

        let mut outcomes: Vec<OutcomeRollup> = self
            .outcomes
            .lock()
            .iter()
            .map(|(name, counter)| OutcomeRollup {
                name: name.clone(),
                successes: counter.successes,
                failures: counter.failures,
                last_failure_at: counter.last_failure_at.map(|dt| dt.to_rfc3339()),
            })
            .collect();
        outcomes.sort_by(|a, b| a.name.cmp(&b.name));

        MetricsSnapshot {
            generated_at: Utc::now().to_rfc3339(),
            stages,
            outcomes,
        }
    }
}

fn percentile(values: &[u128], p: f64) -> Option<u128> {
    if values.is_empty() {
        return None;
    }
    let n = values.len();
    let rank = ((p / 100.0) * n as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(n - 1);
    Some(values[idx])
}
