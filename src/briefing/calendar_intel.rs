//! Model-assisted preparation notes for near-term meetings.

use chrono::{DateTime, Utc};

use crate::llm::sections::{attendee_lines, bullet_lines, parse_sections};
use crate::llm::LanguageModel;
use crate::types::{CalendarEventRecord, RawEvent, Relationship};

/// Only events starting within this many hours are assessed.
pub const ENRICHMENT_WINDOW_HOURS: f64 = 48.0;

const SYSTEM_PROMPT: &str = "You are a strategic business development advisor. Analyze calendar \
     events and provide actionable intelligence for preparation.";

const LABELS: [&str; 4] = [
    "STRATEGIC_VALUE",
    "PREPARATION_NEEDED",
    "TALKING_POINTS",
    "ATTENDEE_CONTEXT",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventIntelligence {
    pub strategic_value: Option<String>,
    pub preparation_needed: Option<String>,
    pub talking_points: Vec<String>,
    /// `(email, context)` per attendee the model knew something about.
    pub attendee_context: Vec<(String, String)>,
}

fn assessment_prompt(event: &RawEvent, relationships: &[Relationship]) -> String {
    let known: Vec<String> = relationships
        .iter()
        .filter(|r| event.attendees.iter().any(|a| a.eq_ignore_ascii_case(&r.email)))
        .map(|r| {
            format!(
                "- {} ({}): Health score {}/100, trend {}",
                r.email,
                r.organization.as_deref().unwrap_or("Unknown"),
                r.health_score,
                r.trend.as_str()
            )
        })
        .collect();
    let context = if known.is_empty() {
        "- No known relationships".to_string()
    } else {
        known.join("\n")
    };

    format!(
        "Analyze this calendar event and provide strategic intelligence:\n\n\
         EVENT: {}\n\
         DESCRIPTION: {}\n\
         ATTENDEES: {}\n\
         LOCATION: {}\n\
         TIME: {}\n\n\
         RELATIONSHIP CONTEXT:\n{}\n\n\
         Format your response as:\n\
         STRATEGIC_VALUE: [high/medium/low and why]\n\
         PREPARATION_NEEDED: [preparation steps]\n\
         TALKING_POINTS:\n- [point 1]\n- [point 2]\n- [point 3]\n\
         ATTENDEE_CONTEXT:\n- [email]: [context]",
        event.title,
        event.description.as_deref().unwrap_or("No description"),
        event.attendees.join(", "),
        event.location.as_deref().unwrap_or("Not specified"),
        event.start_time.to_rfc3339(),
        context,
    )
}

pub fn parse_intelligence(reply: &str) -> EventIntelligence {
    let mut sections = parse_sections(reply, &LABELS);
    EventIntelligence {
        strategic_value: sections.remove("STRATEGIC_VALUE"),
        preparation_needed: sections.remove("PREPARATION_NEEDED"),
        talking_points: sections
            .get("TALKING_POINTS")
            .map(|s| bullet_lines(s))
            .unwrap_or_default(),
        attendee_context: sections
            .get("ATTENDEE_CONTEXT")
            .map(|s| attendee_lines(s))
            .unwrap_or_default(),
    }
}

/// Assess one event. A failed call leaves every field empty.
pub async fn assess_event(
    model: &dyn LanguageModel,
    event: &RawEvent,
    relationships: &[Relationship],
) -> EventIntelligence {
    match model
        .complete(SYSTEM_PROMPT, &assessment_prompt(event, relationships))
        .await
    {
        Ok(reply) => parse_intelligence(&reply),
        Err(e) => {
            log::warn!("Calendar assessment failed for '{}': {}", event.title, e);
            EventIntelligence::default()
        }
    }
}

fn in_window(event: &RawEvent, now: DateTime<Utc>) -> bool {
    let hours = (event.start_time - now).num_seconds() as f64 / 3600.0;
    hours > 0.0 && hours <= ENRICHMENT_WINDOW_HOURS
}

/// Turn fetched events into briefing rows. Events inside the window are
/// assessed one at a time; the rest carry no enrichment.
pub async fn enhance_events(
    model: &dyn LanguageModel,
    events: &[RawEvent],
    relationships: &[Relationship],
    briefing_id: i64,
    now: DateTime<Utc>,
) -> Vec<CalendarEventRecord> {
    let mut records = Vec::with_capacity(events.len());
    for event in events {
        let intel = if in_window(event, now) {
            assess_event(model, event, relationships).await
        } else {
            EventIntelligence::default()
        };
        records.push(CalendarEventRecord {
            id: None,
            briefing_id,
            title: event.title.clone(),
            description: event.description.clone(),
            start_time: event.start_time,
            end_time: event.end_time,
            location: event.location.clone(),
            attendees: event.attendees.clone(),
            event_type: None,
            strategic_value: intel.strategic_value,
            preparation_needed: intel.preparation_needed,
            talking_points: intel.talking_points,
        });
    }
    records
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use chrono::Duration;

    use super::*;
    use crate::briefing::alerts::tests::event;
    use crate::llm::tests::ScriptedModel;

    const REPLY: &str = "STRATEGIC_VALUE: High. Renewal of the county grant.\n\
                         PREPARATION_NEEDED: Review last quarter's report.\n\
                         TALKING_POINTS:\n- Outcomes to date\n- Budget for next year\n\
                         ATTENDEE_CONTEXT:\n- dana@county.gov: Program officer";

    #[test]
    fn test_parse_full_reply() {
        let intel = parse_intelligence(REPLY);
        assert_eq!(
            intel.strategic_value.as_deref(),
            Some("High. Renewal of the county grant.")
        );
        assert_eq!(intel.talking_points.len(), 2);
        assert_eq!(intel.attendee_context[0].0, "dana@county.gov");
    }

    #[tokio::test]
    async fn test_only_near_events_are_assessed() {
        let now = Utc::now();
        let model = ScriptedModel::replying(REPLY);
        let events = vec![
            event("Grant review", now + Duration::hours(20), &["dana@county.gov"]),
            event("Offsite", now + Duration::hours(72), &[]),
            event("Yesterday", now - Duration::hours(3), &[]),
        ];

        let records = enhance_events(&model, &events, &[], 9, now).await;

        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(records.len(), 3);
        assert!(records[0].strategic_value.is_some());
        assert_eq!(records[0].briefing_id, 9);
        assert!(records[1].strategic_value.is_none());
        assert!(records[1].talking_points.is_empty());
    }

    #[tokio::test]
    async fn test_failed_call_leaves_fields_empty() {
        let now = Utc::now();
        let model = ScriptedModel::failing();
        let events = vec![event("Board sync", now + Duration::hours(2), &[])];
        let records = enhance_events(&model, &events, &[], 1, now).await;
        assert_eq!(records[0].strategic_value, None);
        assert_eq!(records[0].preparation_needed, None);
    }
}
