use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::Value;

use crate::briefing::relationships::RelationshipManager;
use crate::briefing::BriefingOrchestrator;
use crate::db::{BriefingStore, SqliteStore};
use crate::error::ExecutionError;
use crate::llm::Models;
use crate::metrics::MetricsRecorder;
use crate::progress::ProgressTracker;
use crate::resilience::{BreakerOptions, CircuitBreaker, RateLimiter, RetryPolicy, TtlCache};
use crate::sources::cli::CliTransport;
use crate::sources::{McpTransport, SourceConnectors};
use crate::types::{Config, ExecutionRecord, ExecutionTrigger, Trend};

/// Maximum number of execution records to keep in memory
const MAX_HISTORY_SIZE: usize = 100;
const HISTORY_FILE: &str = "execution_history.json";

/// Everything a briefing run shares with other runs. Built once by the
/// binary and handed to the scheduler, executor and services.
pub struct AppState {
    pub config: Config,
    pub timezone: Tz,
    pub store: Arc<dyn BriefingStore>,
    pub orchestrator: Arc<BriefingOrchestrator>,
    pub progress: Arc<ProgressTracker>,
    pub metrics: Arc<MetricsRecorder>,
    /// Manual generation limit, keyed by caller
    pub generation_limiter: RateLimiter,
    source_cache: Arc<TtlCache<Value>>,
    relationship_cache: Arc<TtlCache<(u8, Trend)>>,
    execution_history: Mutex<Vec<ExecutionRecord>>,
    last_scheduled_run: Mutex<Option<DateTime<Utc>>>,
    history_path: Option<PathBuf>,
}

impl AppState {
    /// Production wiring: SQLite store, CLI transport and HTTP model backends.
    pub fn new(config: Config) -> Result<Self, ExecutionError> {
        let metrics = Arc::new(MetricsRecorder::new());
        let store: Arc<dyn BriefingStore> =
            Arc::new(SqliteStore::open(config.database_path.as_deref())?);
        let transport: Arc<dyn McpTransport> =
            Arc::new(CliTransport::new(config.sources.command.clone()));
        let model_breaker = Arc::new(CircuitBreaker::new(
            "models",
            BreakerOptions::for_models(&config.resilience),
        ));
        let models = Models::from_config(
            &config.models,
            model_breaker,
            RetryPolicy::from_config(&config.resilience),
            Arc::clone(&metrics),
        );

        let mut state = Self::assemble(config, store, transport, models, metrics)?;
        state.history_path = Some(get_state_dir()?.join(HISTORY_FILE));
        match state.load_execution_history() {
            Ok(history) => {
                if let Ok(mut guard) = state.execution_history.lock() {
                    *guard = history;
                }
            }
            Err(e) => log::warn!("Failed to load execution history: {}", e),
        }
        Ok(state)
    }

    /// Wire the shared objects around the given collaborators. History stays
    /// in memory until a history path is set.
    pub fn assemble(
        config: Config,
        store: Arc<dyn BriefingStore>,
        transport: Arc<dyn McpTransport>,
        models: Models,
        metrics: Arc<MetricsRecorder>,
    ) -> Result<Self, ExecutionError> {
        let timezone: Tz = config.schedule.timezone.parse().map_err(|_| {
            ExecutionError::ConfigurationError(format!(
                "Invalid timezone: {}",
                config.schedule.timezone
            ))
        })?;
        if config.schedule.enabled {
            crate::scheduler::parse_cron(&config.schedule.cron)?;
        }

        let source_cache = Arc::new(TtlCache::new(Duration::from_secs(
            config.sources.cache_ttl_secs,
        )));
        let relationship_cache = Arc::new(TtlCache::new(Duration::from_secs(
            config.limits.relationship_cache_ttl_secs,
        )));
        let source_breaker = Arc::new(CircuitBreaker::new(
            "sources",
            BreakerOptions::for_sources(&config.resilience),
        ));
        let progress = Arc::new(ProgressTracker::new(Duration::from_secs(
            config.limits.progress_retention_secs,
        )));

        let sources = SourceConnectors::new(
            transport,
            config.sources.clone(),
            Arc::clone(&source_cache),
            source_breaker,
            RetryPolicy::from_config(&config.resilience),
            Arc::clone(&metrics),
        );
        let orchestrator = Arc::new(BriefingOrchestrator::new(
            Arc::clone(&store),
            sources,
            models,
            RelationshipManager::new(Arc::clone(&relationship_cache)),
            Arc::clone(&progress),
            Arc::clone(&metrics),
            timezone,
        ));

        Ok(Self {
            generation_limiter: RateLimiter::per_hour(config.limits.generations_per_hour),
            config,
            timezone,
            store,
            orchestrator,
            progress,
            metrics,
            source_cache,
            relationship_cache,
            execution_history: Mutex::new(Vec::new()),
            last_scheduled_run: Mutex::new(None),
            history_path: None,
        })
    }

    /// Drop expired cache entries and finished progress sessions.
    pub fn purge_expired(&self) -> usize {
        let purged = self.source_cache.purge_expired()
            + self.relationship_cache.purge_expired()
            + self.progress.purge_expired();
        if purged > 0 {
            log::debug!("Purged {} expired cache entries and sessions", purged);
        }
        purged
    }

    /// Add an execution record to history
    pub fn add_execution_record(&self, record: ExecutionRecord) {
        if let Ok(mut guard) = self.execution_history.lock() {
            guard.insert(0, record);
            if guard.len() > MAX_HISTORY_SIZE {
                guard.truncate(MAX_HISTORY_SIZE);
            }
        }
        if let Err(e) = self.save_execution_history() {
            log::warn!("Failed to save execution history: {}", e);
        }
    }

    /// Update an existing execution record
    pub fn update_execution_record(&self, id: &str, f: impl FnOnce(&mut ExecutionRecord)) {
        if let Ok(mut guard) = self.execution_history.lock() {
            if let Some(record) = guard.iter_mut().find(|r| r.id == id) {
                f(record);
            }
        }
        if let Err(e) = self.save_execution_history() {
            log::warn!("Failed to save execution history: {}", e);
        }
    }

    pub fn get_execution_history(&self, limit: usize) -> Vec<ExecutionRecord> {
        self.execution_history
            .lock()
            .map(|guard| guard.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Record when a scheduled run last occurred
    pub fn set_last_scheduled_run(&self, time: DateTime<Utc>) {
        if let Ok(mut guard) = self.last_scheduled_run.lock() {
            *guard = Some(time);
        }
    }

    pub fn get_last_scheduled_run(&self) -> Option<DateTime<Utc>> {
        self.last_scheduled_run.lock().ok().and_then(|guard| *guard)
    }

    fn save_execution_history(&self) -> Result<(), ExecutionError> {
        let Some(path) = &self.history_path else {
            return Ok(());
        };
        let history = self
            .execution_history
            .lock()
            .map_err(|_| ExecutionError::IoError("History lock poisoned".to_string()))?
            .clone();
        let content = serde_json::to_string_pretty(&history)
            .map_err(|e| ExecutionError::IoError(format!("Serialize error: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    fn load_execution_history(&self) -> Result<Vec<ExecutionRecord>, ExecutionError> {
        let Some(path) = &self.history_path else {
            return Ok(Vec::new());
        };
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| ExecutionError::IoError(format!("Failed to parse history: {}", e)))
    }
}

/// Get the state directory (~/.daybrief), creating it if needed
fn get_state_dir() -> Result<PathBuf, ExecutionError> {
    let home = dirs::home_dir().ok_or_else(|| {
        ExecutionError::ConfigurationError("Could not find home directory".to_string())
    })?;
    let state_dir = home.join(".daybrief");
    if !state_dir.exists() {
        fs::create_dir_all(&state_dir)?;
    }
    Ok(state_dir)
}

/// Get the canonical config file path (~/.daybrief/config.json)
pub fn config_path() -> Result<PathBuf, ExecutionError> {
    Ok(get_state_dir()?.join("config.json"))
}

/// Load configuration from ~/.daybrief/config.json. A missing file means
/// defaults.
pub fn load_config() -> Result<Config, ExecutionError> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(path: &std::path::Path) -> Result<Config, ExecutionError> {
    if !path.exists() {
        log::info!("No config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let content = fs::read_to_string(path).map_err(|e| {
        ExecutionError::ConfigurationError(format!("Failed to read config: {}", e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        ExecutionError::ConfigurationError(format!("Failed to parse config: {}", e))
    })
}

/// Create a new execution record
pub fn create_execution_record(trigger: ExecutionTrigger) -> ExecutionRecord {
    ExecutionRecord {
        id: uuid::Uuid::new_v4().to_string(),
        trigger,
        started_at: Utc::now(),
        finished_at: None,
        duration_secs: None,
        success: false,
        briefing_id: None,
        attempts: 0,
        error_message: None,
        can_retry: None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::briefing::orchestrate::tests::scripted_models;
    use crate::db::test_utils::test_store;
    use crate::llm::tests::ScriptedModel;
    use crate::llm::LanguageModel;
    use crate::sources::tests::ScriptedTransport;

    /// Config with millisecond retries so failing collaborators stay fast.
    pub(crate) fn test_config() -> Config {
        let mut config = Config::default();
        config.resilience.max_attempts = 1;
        config.resilience.initial_backoff_ms = 1;
        config.resilience.max_backoff_ms = 1;
        config.schedule.retry_backoff_secs = 0;
        config
    }

    pub(crate) fn test_state(
        config: Config,
        transport: Arc<ScriptedTransport>,
        model: Arc<dyn LanguageModel>,
    ) -> AppState {
        test_state_with_store(config, test_store(), transport, model)
    }

    pub(crate) fn test_state_with_store(
        config: Config,
        store: Arc<dyn BriefingStore>,
        transport: Arc<ScriptedTransport>,
        model: Arc<dyn LanguageModel>,
    ) -> AppState {
        AppState::assemble(
            config,
            store,
            transport,
            scripted_models(model),
            Arc::new(MetricsRecorder::new()),
        )
        .expect("assemble state")
    }

    #[test]
    fn test_assemble_rejects_bad_timezone() {
        let mut config = test_config();
        config.schedule.timezone = "Mars/Olympus".to_string();
        let result = AppState::assemble(
            config,
            test_store(),
            Arc::new(ScriptedTransport::default()),
            scripted_models(Arc::new(ScriptedModel::failing())),
            Arc::new(MetricsRecorder::new()),
        );
        assert!(matches!(result, Err(ExecutionError::ConfigurationError(_))));
    }

    #[test]
    fn test_assemble_rejects_bad_cron_only_when_enabled() {
        let mut config = test_config();
        config.schedule.cron = "whenever".to_string();
        let result = AppState::assemble(
            config.clone(),
            test_store(),
            Arc::new(ScriptedTransport::default()),
            scripted_models(Arc::new(ScriptedModel::failing())),
            Arc::new(MetricsRecorder::new()),
        );
        assert!(matches!(result, Err(ExecutionError::ConfigurationError(_))));

        config.schedule.enabled = false;
        let state = test_state(
            config,
            Arc::new(ScriptedTransport::default()),
            Arc::new(ScriptedModel::failing()),
        );
        assert_eq!(state.timezone, chrono_tz::America::New_York);
    }

    #[test]
    fn test_history_is_newest_first_and_bounded() {
        let state = test_state(
            test_config(),
            Arc::new(ScriptedTransport::default()),
            Arc::new(ScriptedModel::failing()),
        );
        for _ in 0..(MAX_HISTORY_SIZE + 5) {
            state.add_execution_record(create_execution_record(ExecutionTrigger::Manual));
        }
        let latest = create_execution_record(ExecutionTrigger::Scheduled);
        let id = latest.id.clone();
        state.add_execution_record(latest);
        state.update_execution_record(&id, |r| {
            r.success = true;
            r.briefing_id = Some(7);
        });

        let history = state.get_execution_history(usize::MAX);
        assert_eq!(history.len(), MAX_HISTORY_SIZE);
        assert_eq!(history[0].id, id);
        assert!(history[0].success);
        assert_eq!(history[0].briefing_id, Some(7));
        assert_eq!(state.get_execution_history(3).len(), 3);
    }

    #[test]
    fn test_load_config_missing_and_invalid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");

        let config = load_config_from(&path).expect("defaults");
        assert_eq!(config.schedule.cron, "0 8 * * Mon-Fri");

        fs::write(&path, r#"{"limits":{"generationsPerHour":2}}"#).expect("write");
        let config = load_config_from(&path).expect("partial config");
        assert_eq!(config.limits.generations_per_hour, 2);
        assert_eq!(config.limits.progress_retention_secs, 60);

        fs::write(&path, "{not json").expect("write");
        assert!(matches!(
            load_config_from(&path),
            Err(ExecutionError::ConfigurationError(_))
        ));
    }
}
