//! Commitment extraction from recording transcripts.

use std::sync::OnceLock;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use regex::Regex;
use serde::Deserialize;

use crate::llm::LanguageModel;
use crate::types::{Commitment, RawRecording};

const SYSTEM_PROMPT: &str = "You are a commitment extraction assistant. Extract action items \
     and commitments from conversation transcripts. Return only valid JSON arrays.";

fn json_array_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[[\s\S]*\]").expect("static regex"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractedCommitment {
    action: String,
    #[serde(default)]
    deadline: Option<String>,
    #[serde(default)]
    responsible_party: Option<String>,
    #[serde(default)]
    context: Option<String>,
}

fn extraction_prompt(transcript: &str) -> String {
    format!(
        "Extract all commitments, action items, and promises from the following conversation \
         transcript.\n\
         For each commitment, identify:\n\
         1. The specific action or commitment made\n\
         2. Any deadline or timeframe mentioned\n\
         3. Who is responsible (if mentioned)\n\
         4. Relevant context\n\n\
         Return your response as a JSON array of commitments in this format:\n\
         [\n  {{\n    \"action\": \"Specific action item\",\n    \
         \"deadline\": \"YYYY-MM-DD or null if no deadline mentioned\",\n    \
         \"responsibleParty\": \"Name or null\",\n    \
         \"context\": \"Brief context about the commitment\"\n  }}\n]\n\n\
         TRANSCRIPT:\n{transcript}\n\n\
         Return ONLY valid JSON, no additional text."
    )
}

/// `YYYY-MM-DD` as end of day UTC, or a full RFC 3339 timestamp.
fn parse_deadline(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("null") {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()?
        .and_hms_opt(23, 59, 59)
        .map(|naive| naive.and_utc())
}

/// Parse the model's reply. Anything that is not a JSON array of
/// commitments yields an empty list.
pub fn parse_commitments(reply: &str, source: &str) -> Vec<Commitment> {
    let Some(array) = json_array_re().find(reply) else {
        log::warn!("No JSON array in commitment reply for recording {}", source);
        return Vec::new();
    };
    let extracted: Vec<ExtractedCommitment> = match serde_json::from_str(array.as_str()) {
        Ok(items) => items,
        Err(e) => {
            log::warn!("Malformed commitment JSON for recording {}: {}", source, e);
            return Vec::new();
        }
    };

    extracted
        .into_iter()
        .filter(|c| !c.action.trim().is_empty())
        .map(|c| Commitment {
            action: c.action.trim().to_string(),
            deadline: c.deadline.as_deref().and_then(parse_deadline),
            responsible_party: c.responsible_party.filter(|p| !p.trim().is_empty()),
            context: c.context.unwrap_or_default(),
            source: source.to_string(),
        })
        .collect()
}

/// Ask the model for the commitments in one transcript. Never fails: an empty
/// transcript, a failed call or an unparseable reply all give an empty list.
pub async fn extract_commitments(
    model: &dyn LanguageModel,
    transcript: &str,
    source: &str,
) -> Vec<Commitment> {
    if transcript.trim().is_empty() {
        return Vec::new();
    }
    match model.complete(SYSTEM_PROMPT, &extraction_prompt(transcript)).await {
        Ok(reply) => parse_commitments(&reply, source),
        Err(e) => {
            log::warn!("Commitment extraction failed for recording {}: {}", source, e);
            Vec::new()
        }
    }
}

/// Extract from every recording in turn. One recording failing never stops
/// the others.
pub async fn extract_from_recordings(
    model: &dyn LanguageModel,
    recordings: &[RawRecording],
) -> Vec<Commitment> {
    let mut all = Vec::new();
    for recording in recordings {
        all.extend(extract_commitments(model, &recording.transcript, &recording.id).await);
    }
    all
}

/// Commitments due within `[now, now + days_ahead]`. Undated commitments
/// cannot be scheduled and are left out.
pub fn filter_upcoming(
    commitments: Vec<Commitment>,
    days_ahead: i64,
    now: DateTime<Utc>,
) -> Vec<Commitment> {
    let cutoff = now + Duration::days(days_ahead);
    commitments
        .into_iter()
        .filter(|c| matches!(c.deadline, Some(d) if d >= now && d <= cutoff))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::llm::tests::ScriptedModel;
    use crate::llm::ModelError;

    fn recording(id: &str, transcript: &str) -> RawRecording {
        RawRecording {
            id: id.to_string(),
            start_time: Utc::now(),
            end_time: Utc::now(),
            transcript: transcript.to_string(),
            participants: Vec::new(),
        }
    }

    #[test]
    fn test_parse_array_wrapped_in_prose() {
        let reply = "Here you go:\n```json\n[{\"action\":\"Send deck\",\"deadline\":\"2025-06-05\",\
                     \"responsibleParty\":\"Sam\",\"context\":\"Board prep\"},\
                     {\"action\":\"Call Dana\",\"deadline\":null,\"responsibleParty\":null,\
                     \"context\":\"\"}]\n```";
        let commitments = parse_commitments(reply, "rec-1");
        assert_eq!(commitments.len(), 2);
        assert_eq!(commitments[0].responsible_party.as_deref(), Some("Sam"));
        assert_eq!(
            commitments[0].deadline.map(|d| d.date_naive().to_string()),
            Some("2025-06-05".to_string())
        );
        assert!(commitments[1].deadline.is_none());
        assert_eq!(commitments[1].source, "rec-1");
    }

    #[test]
    fn test_malformed_reply_is_empty() {
        assert!(parse_commitments("No commitments found.", "r").is_empty());
        assert!(parse_commitments("[{\"action\": ]", "r").is_empty());
    }

    #[test]
    fn test_filter_upcoming_window() {
        let now = Utc::now();
        let make = |deadline: Option<DateTime<Utc>>| Commitment {
            action: "x".to_string(),
            deadline,
            responsible_party: None,
            context: String::new(),
            source: "r".to_string(),
        };
        let kept = filter_upcoming(
            vec![
                make(Some(now + Duration::days(3))),
                make(Some(now + Duration::days(9))),
                make(Some(now - Duration::days(1))),
                make(None),
            ],
            7,
            now,
        );
        assert_eq!(kept.len(), 1);
    }

    #[tokio::test]
    async fn test_one_failed_recording_does_not_stop_others() {
        let model = ScriptedModel::replying(r#"[{"action":"Share notes","deadline":null}]"#)
            .then(Err(ModelError::Network("reset".into())));
        let recordings = vec![
            recording("r1", "we will send the grant report"),
            recording("r2", ""),
            recording("r3", "I'll share notes tomorrow"),
        ];

        let commitments = extract_from_recordings(&model, &recordings).await;
        assert_eq!(commitments.len(), 1);
        assert_eq!(commitments[0].source, "r3");
        // Empty transcript never reaches the model
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }
}
