//! Per-session progress for briefing runs.
//!
//! Each session keeps its update history and a broadcast channel. Publishing
//! never blocks and never fails when nobody listens. A stream opened late
//! replays the history first. Finished sessions, and sessions that were
//! subscribed to but never started, are dropped once the retention window
//! has passed.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::{ExecutionError, WorkflowError};

const CHANNEL_CAPACITY: usize = 64;
/// How long a stream stays open after a terminal update.
const STREAM_LINGER: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressStep {
    Started,
    Fetching,
    DataFetched,
    GeneratingAlerts,
    AlertsGenerated,
    ProcessingRelationships,
    GeneratingSummary,
    Completed,
    Failed,
}

impl ProgressStep {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressStep::Completed | ProgressStep::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub step: ProgressStep,
    pub progress: u8,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Set on a failed update so listeners can decide whether to retry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WorkflowError>,
}

struct Session {
    sender: broadcast::Sender<ProgressUpdate>,
    history: Vec<ProgressUpdate>,
    created_at: Instant,
    finished_at: Option<Instant>,
}

impl Session {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            history: Vec::new(),
            created_at: Instant::now(),
            finished_at: None,
        }
    }

    fn expired(&self, retention: Duration) -> bool {
        match self.finished_at {
            Some(at) => at.elapsed() >= retention,
            // Subscribed to, but no run ever published
            None if self.history.is_empty() => self.created_at.elapsed() >= retention,
            None => false,
        }
    }
}

pub struct ProgressTracker {
    sessions: DashMap<String, Session>,
    retention: Duration,
}

impl ProgressTracker {
    pub fn new(retention: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            retention,
        }
    }

    /// Begin (or restart) a session. Listeners that subscribed before the
    /// run started keep their channel.
    pub fn start_session(&self, session_id: &str) {
        {
            let mut session = self
                .sessions
                .entry(session_id.to_string())
                .or_insert_with(Session::new);
            session.history.clear();
            session.finished_at = None;
        }
        self.update(
            session_id,
            ProgressStep::Started,
            0,
            "Starting briefing generation...",
        );
        self.purge_expired();
    }

    pub fn update(&self, session_id: &str, step: ProgressStep, progress: u8, message: &str) {
        self.publish(
            session_id,
            ProgressUpdate {
                step,
                progress: progress.min(100),
                message: message.to_string(),
                timestamp: Utc::now(),
                error: None,
            },
        );
    }

    fn publish(&self, session_id: &str, update: ProgressUpdate) {
        let step = update.step;
        log::info!("[progress:{}] {}% - {}", session_id, update.progress, update.message);

        let mut session = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(Session::new);
        session.history.push(update.clone());
        if step.is_terminal() {
            session.finished_at = Some(Instant::now());
        }
        // No receivers is fine
        let _ = session.sender.send(update);
    }

    pub fn complete(&self, session_id: &str, success: bool, message: &str) {
        let step = if success {
            ProgressStep::Completed
        } else {
            ProgressStep::Failed
        };
        self.update(session_id, step, 100, message);
    }

    /// Terminal failure carrying the classified error.
    pub fn fail(&self, session_id: &str, err: &ExecutionError) {
        self.publish(
            session_id,
            ProgressUpdate {
                step: ProgressStep::Failed,
                progress: 100,
                message: format!("Generation failed: {err}"),
                timestamp: Utc::now(),
                error: Some(WorkflowError::from(err)),
            },
        );
    }

    pub fn history(&self, session_id: &str) -> Vec<ProgressUpdate> {
        self.sessions
            .get(session_id)
            .map(|s| s.history.clone())
            .unwrap_or_default()
    }

    /// Open an event stream for a session, creating the session if the run
    /// has not started yet. Updates published so far are replayed first.
    pub fn stream(&self, session_id: &str) -> ProgressStream {
        self.purge_expired();
        let (backlog, receiver) = {
            let session = self
                .sessions
                .entry(session_id.to_string())
                .or_insert_with(Session::new);
            // Same guard as publish, so nothing falls between the two
            (
                session.history.iter().cloned().collect(),
                session.sender.subscribe(),
            )
        };
        ProgressStream {
            session_id: session_id.to_string(),
            backlog,
            receiver,
            connected: false,
            finished: false,
        }
    }

    /// Drop sessions past the retention window. Returns how many went.
    pub fn purge_expired(&self) -> usize {
        let before = self.sessions.len();
        let retention = self.retention;
        self.sessions.retain(|_, session| !session.expired(retention));
        before - self.sessions.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum StreamEvent<'a> {
    Connected {
        #[serde(rename = "sessionId")]
        session_id: &'a str,
    },
    Progress(&'a ProgressUpdate),
}

fn frame(event: &StreamEvent<'_>) -> String {
    let json = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    format!("data: {json}\n\n")
}

/// Server-sent-event frames for one session: a `connected` frame, then one
/// `progress` frame per update. Ends shortly after a completed or failed
/// update.
pub struct ProgressStream {
    session_id: String,
    backlog: VecDeque<ProgressUpdate>,
    receiver: broadcast::Receiver<ProgressUpdate>,
    connected: bool,
    finished: bool,
}

impl ProgressStream {
    pub async fn next_frame(&mut self) -> Option<String> {
        if !self.connected {
            self.connected = true;
            return Some(frame(&StreamEvent::Connected {
                session_id: &self.session_id,
            }));
        }
        if self.finished {
            tokio::time::sleep(STREAM_LINGER).await;
            return None;
        }
        if let Some(update) = self.backlog.pop_front() {
            self.finished = update.step.is_terminal();
            return Some(frame(&StreamEvent::Progress(&update)));
        }
        loop {
            match self.receiver.recv().await {
                Ok(update) => {
                    self.finished = update.step.is_terminal();
                    return Some(frame(&StreamEvent::Progress(&update)));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::debug!("Progress stream {} skipped {} updates", self.session_id, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_and_publish_without_listeners() {
        let tracker = ProgressTracker::new(Duration::from_secs(60));
        tracker.start_session("s1");
        tracker.update("s1", ProgressStep::Fetching, 10, "Fetching data...");
        tracker.complete("s1", true, "Briefing generated successfully!");

        let history = tracker.history("s1");
        let steps: Vec<ProgressStep> = history.iter().map(|u| u.step).collect();
        assert_eq!(
            steps,
            vec![ProgressStep::Started, ProgressStep::Fetching, ProgressStep::Completed]
        );
        assert_eq!(history[2].progress, 100);
        assert!(tracker.history("unknown").is_empty());
    }

    #[test]
    fn test_finished_sessions_expire() {
        let tracker = ProgressTracker::new(Duration::ZERO);
        tracker.start_session("done");
        tracker.complete("done", false, "Generation failed: boom");
        tracker.start_session("running");

        // "done" was purged when "running" started
        assert_eq!(tracker.session_count(), 1);
        assert_eq!(tracker.purge_expired(), 0);
        assert_eq!(tracker.history("running").len(), 1);
    }

    #[tokio::test]
    async fn test_stream_frames_end_after_terminal_step() {
        let tracker = ProgressTracker::new(Duration::from_secs(60));
        let mut stream = tracker.stream("s2");

        tracker.start_session("s2");
        tracker.update("s2", ProgressStep::DataFetched, 30, "Fetched 0 emails, 0 events, 0 recordings");
        tracker.complete("s2", true, "Briefing generated successfully!");

        let connected = stream.next_frame().await.expect("connected");
        assert_eq!(connected, "data: {\"type\":\"connected\",\"sessionId\":\"s2\"}\n\n");

        let mut frames = Vec::new();
        while let Some(frame) = stream.next_frame().await {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 3);
        assert!(frames[1].contains("\"step\":\"data-fetched\""));
        assert!(frames[2].contains("\"type\":\"progress\""));
        assert!(frames[2].contains("\"progress\":100"));
    }

    #[tokio::test]
    async fn test_late_stream_replays_history_and_ends() {
        let tracker = ProgressTracker::new(Duration::from_secs(60));
        tracker.start_session("late");
        tracker.update("late", ProgressStep::Fetching, 10, "Fetching data...");
        tracker.fail("late", &ExecutionError::SummaryUpdate("locked".into()));

        let mut stream = tracker.stream("late");
        let mut frames = Vec::new();
        while let Some(frame) = stream.next_frame().await {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 4);
        assert!(frames[0].contains("\"type\":\"connected\""));
        assert!(frames[1].contains("\"step\":\"started\""));
        assert!(frames[3].contains("\"step\":\"failed\""));
        assert!(frames[3].contains("\"errorType\":\"retryable\""));
        assert!(frames[3].contains("\"canRetry\":true"));
    }

    #[test]
    fn test_abandoned_subscriptions_expire() {
        let tracker = ProgressTracker::new(Duration::ZERO);
        for n in 0..100 {
            drop(tracker.stream(&format!("never-started-{n}")));
        }
        // Each new stream swept the ones before it
        assert_eq!(tracker.session_count(), 1);
        assert_eq!(tracker.purge_expired(), 1);
        assert_eq!(tracker.session_count(), 0);
    }

    #[test]
    fn test_running_sessions_are_kept() {
        let tracker = ProgressTracker::new(Duration::ZERO);
        tracker.start_session("running");
        tracker.update("running", ProgressStep::Fetching, 10, "Fetching data...");
        assert_eq!(tracker.purge_expired(), 0);
        assert_eq!(tracker.session_count(), 1);
    }
}
