//! Language model backends.
//!
//! Every AI call in the pipeline goes through [`LanguageModel::complete`] and
//! gets back a `Result`; call sites decide what a failure degrades to. The
//! production models are [`HttpModel`]s wrapped in [`GuardedModel`], which
//! adds retry, the model-path circuit breaker and a per-call timeout.

pub mod http;
pub mod sections;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;

pub use http::HttpModel;

use crate::metrics::MetricsRecorder;
use crate::resilience::{guarded, CircuitBreaker, GuardError, RetryPolicy, Retryable};
use crate::types::{ModelEndpoint, ModelsConfig};

const MODEL_CALL_BUDGET_MS: u128 = 30_000;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model not configured: set {0}")]
    NotConfigured(String),
    #[error("Model API error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Model request failed: {0}")]
    Network(String),
    #[error("Model call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Model API rate limit exceeded")]
    RateLimited,
    #[error("Model returned no text")]
    EmptyResponse,
    #[error("Failed to decode model response: {0}")]
    Decode(String),
    #[error("Circuit open for {0}")]
    CircuitOpen(String),
}

impl ModelError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: String) -> Self {
        if status == 429 {
            ModelError::RateLimited
        } else {
            ModelError::Http { status, message }
        }
    }
}

impl Retryable for ModelError {
    fn is_retryable(&self) -> bool {
        match self {
            ModelError::Network(_) | ModelError::Timeout(_) | ModelError::RateLimited => true,
            ModelError::Http { status, .. } => *status == 408 || *status >= 500,
            _ => false,
        }
    }
}

impl From<GuardError<ModelError>> for ModelError {
    fn from(err: GuardError<ModelError>) -> Self {
        match err {
            GuardError::CircuitOpen(key) => ModelError::CircuitOpen(key),
            GuardError::TimedOut(after) => ModelError::Timeout(after),
            GuardError::Inner(inner) => inner,
        }
    }
}

/// `(system prompt, user prompt) -> text`.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, ModelError>;
}

/// Retry + breaker + timeout around another model. The breaker key is the
/// role name, so one failing backend never opens the others.
pub struct GuardedModel {
    role: &'static str,
    inner: Arc<dyn LanguageModel>,
    breaker: Arc<CircuitBreaker>,
    policy: RetryPolicy,
    timeout: Duration,
    metrics: Arc<MetricsRecorder>,
}

impl GuardedModel {
    pub fn new(
        role: &'static str,
        inner: Arc<dyn LanguageModel>,
        breaker: Arc<CircuitBreaker>,
        policy: RetryPolicy,
        timeout: Duration,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            role,
            inner,
            breaker,
            policy,
            timeout,
            metrics,
        }
    }
}

#[async_trait]
impl LanguageModel for GuardedModel {
    async fn complete(&self, system: &str, user: &str) -> Result<String, ModelError> {
        let started = Instant::now();
        let result = guarded(&self.policy, &self.breaker, self.role, self.timeout, || {
            self.inner.complete(system, user)
        })
        .await
        .map_err(ModelError::from);

        let metric = format!("model:{}", self.role);
        self.metrics.record_outcome(&metric, result.is_ok());
        self.metrics
            .record_stage(&metric, started.elapsed().as_millis(), MODEL_CALL_BUDGET_MS);
        if let Err(ref e) = result {
            log::warn!("{} model call failed: {}", self.role, e);
        }
        result
    }
}

/// The primary model plus the four-member analysis panel.
#[derive(Clone)]
pub struct Models {
    pub primary: Arc<dyn LanguageModel>,
    pub advisor: Arc<dyn LanguageModel>,
    pub analyst: Arc<dyn LanguageModel>,
    pub contrarian: Arc<dyn LanguageModel>,
    pub researcher: Arc<dyn LanguageModel>,
}

impl Models {
    /// Build guarded HTTP backends for every configured endpoint.
    pub fn from_config(
        config: &ModelsConfig,
        breaker: Arc<CircuitBreaker>,
        policy: RetryPolicy,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let build = |role: &'static str, endpoint: &ModelEndpoint| -> Arc<dyn LanguageModel> {
            Arc::new(GuardedModel::new(
                role,
                Arc::new(HttpModel::from_endpoint(endpoint, timeout)),
                Arc::clone(&breaker),
                policy.clone(),
                timeout,
                Arc::clone(&metrics),
            ))
        };
        Self {
            primary: build("primary", &config.primary),
            advisor: build("advisor", &config.advisor),
            analyst: build("analyst", &config.analyst),
            contrarian: build("contrarian", &config.contrarian),
            researcher: build("researcher", &config.researcher),
        }
    }
}
