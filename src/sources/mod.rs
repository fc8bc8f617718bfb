//! Source connectors: mail, calendar and voice recordings over MCP.
//!
//! Every fetch goes through the response cache and then through
//! [`guarded`](crate::resilience::guarded) on the source breaker. Fetches
//! never fail: any transport, decode or shape problem is logged and the
//! provider degrades to an empty collection.

pub mod cli;
pub mod payload;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;

pub use cli::CliTransport;
pub use payload::ProviderPayload;

use crate::metrics::MetricsRecorder;
use crate::resilience::{guarded, CircuitBreaker, GuardError, RetryPolicy, Retryable, TtlCache};
use crate::types::{RawEvent, RawMessage, RawRecording, SourceConfig};

const FETCH_BUDGET_MS: u128 = 10_000;

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("Failed to start MCP command: {0}")]
    Spawn(String),
    #[error("MCP command exited with {code:?}: {stderr}")]
    CommandFailed { code: Option<i32>, stderr: String },
    #[error("MCP command printed no result file for {0}")]
    MissingResultFile(String),
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("MCP call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Circuit open for {0}")]
    CircuitOpen(String),
}

/// stderr fragments that mark a failed MCP call as transient.
const TRANSIENT_MARKERS: &[&str] = &[
    "429",
    "rate limit",
    "too many requests",
    "502",
    "503",
    "504",
    "bad gateway",
    "service unavailable",
    "temporarily unavailable",
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
];

impl Retryable for ConnectorError {
    fn is_retryable(&self) -> bool {
        match self {
            ConnectorError::CommandFailed { stderr, .. } => {
                let stderr = stderr.to_lowercase();
                TRANSIENT_MARKERS.iter().any(|m| stderr.contains(m))
            }
            ConnectorError::Timeout(_) => true,
            _ => false,
        }
    }
}

impl From<GuardError<ConnectorError>> for ConnectorError {
    fn from(err: GuardError<ConnectorError>) -> Self {
        match err {
            GuardError::CircuitOpen(key) => ConnectorError::CircuitOpen(key),
            GuardError::TimedOut(after) => ConnectorError::Timeout(after),
            GuardError::Inner(inner) => inner,
        }
    }
}

/// Calls one tool on one MCP server and returns its JSON result.
#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn call_tool(&self, server: &str, tool: &str, input: &Value)
        -> Result<Value, ConnectorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Mail,
    Calendar,
    Recordings,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Mail => "mail",
            Provider::Calendar => "calendar",
            Provider::Recordings => "recordings",
        }
    }

    fn server(&self) -> &'static str {
        match self {
            Provider::Mail => "gmail",
            Provider::Calendar => "google-calendar",
            Provider::Recordings => "limitless",
        }
    }

    fn tool(&self) -> &'static str {
        match self {
            Provider::Mail => "gmail_search_messages",
            Provider::Calendar => "google_calendar_search_events",
            Provider::Recordings => "searchLifelogsWithTranscripts",
        }
    }
}

/// Everything one run fetched.
#[derive(Debug, Clone, Default)]
pub struct SourceData {
    pub messages: Vec<RawMessage>,
    pub events: Vec<RawEvent>,
    pub recordings: Vec<RawRecording>,
}

pub struct SourceConnectors {
    transport: Arc<dyn McpTransport>,
    config: SourceConfig,
    cache: Arc<TtlCache<Value>>,
    breaker: Arc<CircuitBreaker>,
    policy: RetryPolicy,
    metrics: Arc<MetricsRecorder>,
}

impl SourceConnectors {
    pub fn new(
        transport: Arc<dyn McpTransport>,
        config: SourceConfig,
        cache: Arc<TtlCache<Value>>,
        breaker: Arc<CircuitBreaker>,
        policy: RetryPolicy,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            transport,
            config,
            cache,
            breaker,
            policy,
            metrics,
        }
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Messages received in the last `days_back` days.
    pub async fn fetch_messages(&self, days_back: i64) -> Vec<RawMessage> {
        let after = (Utc::now() - chrono::Duration::days(days_back)).timestamp();
        let input = json!({ "q": format!("after:{after}") });
        match self
            .fetch(Provider::Mail, &format!("daysBack={days_back}"), input)
            .await
        {
            Ok(ProviderPayload::Mail(messages)) => self.succeeded(Provider::Mail, messages),
            outcome => self.degraded(Provider::Mail, outcome),
        }
    }

    /// Events between now and `days_ahead` days from now.
    pub async fn fetch_events(&self, days_ahead: i64) -> Vec<RawEvent> {
        let now = Utc::now();
        let input = json!({
            "time_min": now.to_rfc3339(),
            "time_max": (now + chrono::Duration::days(days_ahead)).to_rfc3339(),
            "max_results": self.config.max_events,
        });
        match self
            .fetch(Provider::Calendar, &format!("daysAhead={days_ahead}"), input)
            .await
        {
            Ok(ProviderPayload::Calendar(events)) => self.succeeded(Provider::Calendar, events),
            outcome => self.degraded(Provider::Calendar, outcome),
        }
    }

    /// Recordings since 06:00 UTC `days_back` days ago.
    pub async fn fetch_recordings(&self, days_back: i64) -> Vec<RawRecording> {
        let now = Utc::now();
        let since = (now - chrono::Duration::days(days_back)).date_naive();
        let start = since
            .and_hms_opt(6, 0, 0)
            .map(|naive| naive.and_utc())
            .unwrap_or(now);
        let input = json!({
            "startTime": start.to_rfc3339(),
            "endTime": now.to_rfc3339(),
            "limit": self.config.max_recordings,
        });
        match self
            .fetch(Provider::Recordings, &format!("daysBack={days_back}"), input)
            .await
        {
            Ok(ProviderPayload::Recordings(recordings)) => {
                self.succeeded(Provider::Recordings, recordings)
            }
            outcome => self.degraded(Provider::Recordings, outcome),
        }
    }

    /// Fetch all three providers concurrently.
    pub async fn fetch_all(&self, days_back: i64, days_ahead: i64) -> SourceData {
        let started = Instant::now();
        let (messages, events, recordings) = tokio::join!(
            self.fetch_messages(days_back),
            self.fetch_events(days_ahead),
            self.fetch_recordings(days_back),
        );
        log::info!(
            "Fetched {} messages, {} events, {} recordings in {}ms",
            messages.len(),
            events.len(),
            recordings.len(),
            started.elapsed().as_millis()
        );
        SourceData {
            messages,
            events,
            recordings,
        }
    }

    async fn fetch(
        &self,
        provider: Provider,
        params: &str,
        input: Value,
    ) -> Result<ProviderPayload, ConnectorError> {
        let key = format!("mcp:{}:{}", provider.as_str(), params);
        if let Some(cached) = self.cache.get(&key) {
            log::debug!("Cache hit for {}", key);
            return Ok(payload::decode(provider, &cached));
        }

        let started = Instant::now();
        let timeout = Duration::from_secs(self.config.timeout_secs.max(1));
        let transport = Arc::clone(&self.transport);
        let value = guarded(&self.policy, &self.breaker, provider.as_str(), timeout, || {
            let transport = Arc::clone(&transport);
            let input = input.clone();
            async move {
                transport
                    .call_tool(provider.server(), provider.tool(), &input)
                    .await
            }
        })
        .await
        .map_err(ConnectorError::from)?;
        self.metrics.record_stage(
            &format!("fetch:{}", provider.as_str()),
            started.elapsed().as_millis(),
            FETCH_BUDGET_MS,
        );

        let decoded = payload::decode(provider, &value);
        if !matches!(decoded, ProviderPayload::Unrecognized { .. }) {
            self.cache.insert(key, value);
        }
        Ok(decoded)
    }

    fn succeeded<T>(&self, provider: Provider, items: Vec<T>) -> Vec<T> {
        self.metrics
            .record_outcome(&format!("source:{}", provider.as_str()), true);
        items
    }

    fn degraded<T>(
        &self,
        provider: Provider,
        outcome: Result<ProviderPayload, ConnectorError>,
    ) -> Vec<T> {
        match outcome {
            Ok(ProviderPayload::Unrecognized { reason, .. }) => {
                log::warn!("{} returned an unrecognized result: {}", provider.as_str(), reason)
            }
            Ok(_) => log::warn!("{} returned another provider's payload", provider.as_str()),
            Err(e) => log::warn!("{} fetch failed, continuing without it: {}", provider.as_str(), e),
        }
        self.metrics
            .record_outcome(&format!("source:{}", provider.as_str()), false);
        Vec::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::resilience::BreakerOptions;

    /// Scripted transport: one canned result per server, with a call counter.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        pub responses: Mutex<HashMap<String, Result<Value, String>>>,
        pub calls: AtomicUsize,
    }

    impl ScriptedTransport {
        pub fn respond(&self, server: &str, value: Value) {
            self.responses.lock().insert(server.to_string(), Ok(value));
        }

        pub fn fail(&self, server: &str, stderr: &str) {
            self.responses
                .lock()
                .insert(server.to_string(), Err(stderr.to_string()));
        }
    }

    #[async_trait]
    impl McpTransport for ScriptedTransport {
        async fn call_tool(
            &self,
            server: &str,
            _tool: &str,
            _input: &Value,
        ) -> Result<Value, ConnectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.responses.lock().get(server) {
                Some(Ok(value)) => Ok(value.clone()),
                Some(Err(stderr)) => Err(ConnectorError::CommandFailed {
                    code: Some(1),
                    stderr: stderr.clone(),
                }),
                None => Err(ConnectorError::MissingResultFile(server.to_string())),
            }
        }
    }

    pub(crate) fn connectors(transport: Arc<ScriptedTransport>) -> SourceConnectors {
        let options = BreakerOptions {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(30),
            half_open_successes: 1,
        };
        SourceConnectors::new(
            transport,
            SourceConfig::default(),
            Arc::new(TtlCache::new(Duration::from_secs(60))),
            Arc::new(CircuitBreaker::new("sources", options)),
            RetryPolicy {
                max_attempts: 1,
                initial_backoff_ms: 1,
                max_backoff_ms: 1,
            },
            Arc::new(MetricsRecorder::new()),
        )
    }

    fn mail_value() -> Value {
        json!({
            "result": { "threads": [{ "messages": [{
                "id": "m1",
                "threadId": "t1",
                "internalDate": Utc::now().timestamp_millis().to_string(),
                "pickedHeaders": { "from": "Alice <alice@acme.org>", "subject": "Hi" },
                "pickedPlainContent": "Hello"
            }]}]}
        })
    }

    #[test]
    fn test_only_transient_command_failures_retry() {
        let failed = |stderr: &str| ConnectorError::CommandFailed {
            code: Some(1),
            stderr: stderr.to_string(),
        };
        assert!(failed("HTTP 429 Too Many Requests").is_retryable());
        assert!(failed("upstream returned 503 Service Unavailable").is_retryable());
        assert!(failed("read: Connection reset by peer").is_retryable());
        assert!(failed("request Timed Out").is_retryable());
        assert!(!failed("unknown tool gmail_search_messages").is_retryable());
        assert!(!failed("401 Unauthorized: token expired").is_retryable());
        assert!(ConnectorError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(!ConnectorError::MissingResultFile("gmail".into()).is_retryable());
    }

    #[tokio::test]
    async fn test_second_fetch_is_served_from_cache() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.respond("gmail", mail_value());
        let sources = connectors(Arc::clone(&transport));

        assert_eq!(sources.fetch_messages(2).await.len(), 1);
        assert_eq!(sources.fetch_messages(2).await.len(), 1);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_degrade_to_empty() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.fail("google-calendar", "boom");
        transport.respond("limitless", json!({ "unexpected": true }));
        let sources = connectors(Arc::clone(&transport));

        let data = sources.fetch_all(2, 7).await;
        assert!(data.messages.is_empty());
        assert!(data.events.is_empty());
        assert!(data.recordings.is_empty());

        let snapshot = sources.metrics.snapshot();
        let failures: u64 = snapshot.outcomes.iter().map(|o| o.failures).sum();
        assert_eq!(failures, 3);
    }

    #[tokio::test]
    async fn test_open_breaker_skips_transport() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.fail("gmail", "503 Service Unavailable");
        let sources = connectors(Arc::clone(&transport));

        for _ in 0..3 {
            assert!(sources.fetch_messages(2).await.is_empty());
        }
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);

        // Fourth call fails fast without reaching the transport
        assert!(sources.fetch_messages(2).await.is_empty());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }
}
