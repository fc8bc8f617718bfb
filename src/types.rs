//! Configuration and the briefing data model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Configuration (~/.daybrief/config.json)
// =============================================================================

/// Top-level configuration. Every section falls back to defaults so an
/// empty `{}` file is a valid config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub schedule: ScheduleEntry,
    #[serde(default)]
    pub sources: SourceConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Override for the database location. Defaults to `~/.daybrief/daybrief.db`.
    #[serde(default)]
    pub database_path: Option<String>,
}

/// When the daily briefing runs, plus the scheduler-level retry envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cron")]
    pub cron: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
}

impl Default for ScheduleEntry {
    fn default() -> Self {
        Self {
            enabled: true,
            cron: default_cron(),
            timezone: default_timezone(),
            max_attempts: default_max_attempts(),
            retry_backoff_secs: default_retry_backoff_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cron() -> String {
    // 8 AM weekdays
    "0 8 * * Mon-Fri".to_string()
}

fn default_timezone() -> String {
    "America/New_York".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_secs() -> u64 {
    60
}

/// MCP source connector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceConfig {
    /// CLI used to call MCP tools.
    pub command: String,
    pub days_back: i64,
    pub days_ahead: i64,
    pub max_events: u32,
    pub max_recordings: u32,
    pub cache_ttl_secs: u64,
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            command: "manus-mcp-cli".to_string(),
            days_back: 2,
            days_ahead: 7,
            max_events: 50,
            max_recordings: 20,
            cache_ttl_secs: 1800,
            timeout_secs: 30,
        }
    }
}

/// Wire protocol spoken by a model backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    /// OpenAI-compatible `/chat/completions`.
    Chat,
    /// Anthropic `/messages`.
    Anthropic,
    /// Google `models/{model}:generateContent`.
    Gemini,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelEndpoint {
    pub provider: ModelProvider,
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

impl ModelEndpoint {
    fn new(provider: ModelProvider, base_url: &str, model: &str, api_key_env: &str) -> Self {
        Self {
            provider,
            base_url: base_url.to_string(),
            model: model.to_string(),
            api_key_env: api_key_env.to_string(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// The primary model (summary, synthesis, extraction, calendar) and the
/// four-member analysis panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelsConfig {
    pub primary: ModelEndpoint,
    pub advisor: ModelEndpoint,
    pub analyst: ModelEndpoint,
    pub contrarian: ModelEndpoint,
    pub researcher: ModelEndpoint,
    pub timeout_secs: u64,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            primary: ModelEndpoint::new(
                ModelProvider::Chat,
                "https://api.openai.com/v1",
                "gpt-4o-mini",
                "DAYBRIEF_LLM_API_KEY",
            ),
            advisor: ModelEndpoint::new(
                ModelProvider::Anthropic,
                "https://api.anthropic.com/v1",
                "claude-sonnet-4-5",
                "ANTHROPIC_API_KEY",
            ),
            analyst: ModelEndpoint::new(
                ModelProvider::Gemini,
                "https://generativelanguage.googleapis.com/v1beta",
                "gemini-2.5-pro",
                "GEMINI_API_KEY",
            ),
            contrarian: ModelEndpoint::new(
                ModelProvider::Chat,
                "https://api.x.ai/v1",
                "grok-4",
                "XAI_API_KEY",
            ),
            researcher: ModelEndpoint::new(
                ModelProvider::Chat,
                "https://api.perplexity.ai",
                "sonar-pro",
                "SONAR_API_KEY",
            ),
            timeout_secs: 30,
        }
    }
}

/// Breaker and retry tuning for the two external dependency paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResilienceConfig {
    pub llm_failure_threshold: u32,
    pub llm_reset_secs: u64,
    pub source_failure_threshold: u32,
    pub source_reset_secs: u64,
    pub half_open_successes: u32,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            llm_failure_threshold: 5,
            llm_reset_secs: 60,
            source_failure_threshold: 3,
            source_reset_secs: 30,
            half_open_successes: 3,
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LimitsConfig {
    pub generations_per_hour: u32,
    pub relationship_cache_ttl_secs: u64,
    pub progress_retention_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            generations_per_hour: 5,
            relationship_cache_ttl_secs: 3600,
            progress_retention_secs: 60,
        }
    }
}

/// What triggered a briefing run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionTrigger {
    Scheduled,
    Manual,
    Missed,
}

/// One briefing run as seen by the scheduler/executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: String,
    pub trigger: ExecutionTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<u64>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub briefing_id: Option<i64>,
    pub attempts: u32,
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_retry: Option<bool>,
}

// =============================================================================
// Source data
// =============================================================================

/// One normalized email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    pub thread_id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub snippet: String,
    pub content: String,
}

/// One calendar event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub location: Option<String>,
    pub attendees: Vec<String>,
}

/// One voice-recording session with its transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecording {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub transcript: String,
    pub participants: Vec<String>,
}

/// Action item pulled out of a transcript. Only ever persisted as an alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commitment {
    pub action: String,
    pub deadline: Option<DateTime<Utc>>,
    pub responsible_party: Option<String>,
    pub context: String,
    /// Recording id the commitment came from.
    pub source: String,
}

// =============================================================================
// Alerts
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Urgent,
    Important,
    Strategic,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Urgent => "urgent",
            AlertType::Important => "important",
            AlertType::Strategic => "strategic",
        }
    }
}

impl FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "urgent" => Ok(AlertType::Urgent),
            "important" => Ok(AlertType::Important),
            "strategic" => Ok(AlertType::Strategic),
            other => Err(format!("unknown alert type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    ResponseUrgency,
    RelationshipCooling,
    MeetingPreparation,
    StrategicOpportunity,
    CommitmentTracking,
}

impl AlertCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCategory::ResponseUrgency => "response_urgency",
            AlertCategory::RelationshipCooling => "relationship_cooling",
            AlertCategory::MeetingPreparation => "meeting_preparation",
            AlertCategory::StrategicOpportunity => "strategic_opportunity",
            AlertCategory::CommitmentTracking => "commitment_tracking",
        }
    }
}

impl FromStr for AlertCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "response_urgency" => Ok(AlertCategory::ResponseUrgency),
            "relationship_cooling" => Ok(AlertCategory::RelationshipCooling),
            "meeting_preparation" => Ok(AlertCategory::MeetingPreparation),
            "strategic_opportunity" => Ok(AlertCategory::StrategicOpportunity),
            "commitment_tracking" => Ok(AlertCategory::CommitmentTracking),
            other => Err(format!("unknown alert category: {other}")),
        }
    }
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An alert produced during one run, before it is persisted.
///
/// `completed_at` is set iff `completed` is true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertCandidate {
    pub briefing_id: i64,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub category: AlertCategory,
    pub title: String,
    pub description: String,
    pub contact_name: Option<String>,
    pub organization: Option<String>,
    pub action_required: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    /// Sender address the alert was derived from. Used for scoring only.
    #[serde(skip)]
    pub contact_email: Option<String>,
}

impl AlertCandidate {
    pub fn new(
        briefing_id: i64,
        alert_type: AlertType,
        category: AlertCategory,
        title: String,
        description: String,
    ) -> Self {
        Self {
            briefing_id,
            alert_type,
            category,
            title,
            description,
            contact_name: None,
            organization: None,
            action_required: None,
            deadline: None,
            completed: false,
            completed_at: None,
            contact_email: None,
        }
    }
}

/// A persisted alert row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: i64,
    #[serde(flatten)]
    pub alert: AlertCandidate,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Relationships
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
    New,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Up => "up",
            Trend::Down => "down",
            Trend::Stable => "stable",
            Trend::New => "new",
        }
    }
}

impl FromStr for Trend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Trend::Up),
            "down" => Ok(Trend::Down),
            "stable" => Ok(Trend::Stable),
            "new" => Ok(Trend::New),
            other => Err(format!("unknown trend: {other}")),
        }
    }
}

/// Per-contact health, keyed by email across all briefings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub contact_name: String,
    pub organization: Option<String>,
    pub email: String,
    pub health_score: u8,
    pub trend: Trend,
    pub last_interaction: DateTime<Utc>,
    pub last_interaction_type: String,
    pub notes: Option<String>,
}

// =============================================================================
// Calendar, analyses, briefings
// =============================================================================

/// A calendar event scoped to one briefing, with optional model enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEventRecord {
    #[serde(default)]
    pub id: Option<i64>,
    pub briefing_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub location: Option<String>,
    pub attendees: Vec<String>,
    pub event_type: Option<String>,
    pub strategic_value: Option<String>,
    pub preparation_needed: Option<String>,
    #[serde(default)]
    pub talking_points: Vec<String>,
}

/// One multi-model analysis of a strategic opportunity. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmAnalysis {
    #[serde(default)]
    pub id: Option<i64>,
    pub briefing_id: i64,
    pub topic: String,
    pub claude_analysis: String,
    pub gemini_analysis: String,
    pub grok_analysis: String,
    pub perplexity_analysis: String,
    pub consensus: String,
    pub dissent: String,
    pub recommendation: String,
    pub confidence_score: Option<u8>,
    pub model_agreement: Option<u8>,
}

/// Aggregate root of one orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Briefing {
    pub id: i64,
    pub date: DateTime<Utc>,
    pub executive_summary: String,
    pub generated_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A briefing together with everything it owns.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BriefingDetail {
    pub briefing: Briefing,
    pub alerts: Vec<Alert>,
    pub calendar_events: Vec<CalendarEventRecord>,
    pub analyses: Vec<LlmAnalysis>,
}
