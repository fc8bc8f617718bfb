//! Per-provider decoding of MCP tool results.
//!
//! Each provider gets its own envelope type. A result that does not match the
//! provider's envelope decodes to [`ProviderPayload::Unrecognized`] instead of
//! being probed against the other shapes.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::Provider;
use crate::types::{RawEvent, RawMessage, RawRecording};

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderPayload {
    Mail(Vec<RawMessage>),
    Calendar(Vec<RawEvent>),
    Recordings(Vec<RawRecording>),
    Unrecognized { provider: Provider, reason: String },
}

// ----------------------------------------------------------------------------
// Mail: { result: { threads: [ { messages: [...] } ] } }
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MailEnvelope {
    result: MailResult,
}

#[derive(Debug, Deserialize)]
struct MailResult {
    threads: Vec<MailThread>,
}

#[derive(Debug, Deserialize)]
struct MailThread {
    #[serde(default)]
    messages: Vec<MailMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MailMessage {
    id: String,
    thread_id: String,
    internal_date: String,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    picked_headers: Option<PickedHeaders>,
    #[serde(default)]
    picked_plain_content: Option<String>,
    #[serde(default)]
    picked_markdown_content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PickedHeaders {
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    subject: Option<String>,
}

// ----------------------------------------------------------------------------
// Calendar: { items: [...] }
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CalendarEnvelope {
    items: Vec<CalendarItem>,
}

#[derive(Debug, Deserialize)]
struct CalendarItem {
    id: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    start: Option<CalendarTime>,
    #[serde(default)]
    end: Option<CalendarTime>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    attendees: Vec<CalendarAttendee>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarTime {
    #[serde(default)]
    date_time: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CalendarAttendee {
    email: String,
}

// ----------------------------------------------------------------------------
// Recordings: { lifelogs: [...] }
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RecordingEnvelope {
    lifelogs: Vec<Lifelog>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Lifelog {
    id: String,
    start_time: String,
    end_time: String,
    #[serde(default)]
    transcript: Option<String>,
    #[serde(default)]
    participants: Vec<String>,
}

/// Decode a tool result against the envelope of the provider that produced it.
pub fn decode(provider: Provider, value: &Value) -> ProviderPayload {
    let decoded = match provider {
        Provider::Mail => MailEnvelope::deserialize(value).map(decode_mail),
        Provider::Calendar => CalendarEnvelope::deserialize(value).map(decode_calendar),
        Provider::Recordings => RecordingEnvelope::deserialize(value).map(decode_recordings),
    };
    decoded.unwrap_or_else(|e| ProviderPayload::Unrecognized {
        provider,
        reason: e.to_string(),
    })
}

fn decode_mail(envelope: MailEnvelope) -> ProviderPayload {
    let mut messages = Vec::new();
    for message in envelope.result.threads.into_iter().flat_map(|t| t.messages) {
        let Some(date) = parse_millis(&message.internal_date) else {
            log::warn!("Skipping message {} with bad internalDate", message.id);
            continue;
        };
        let headers = message.picked_headers.unwrap_or_default();
        let content = message
            .picked_plain_content
            .filter(|c| !c.is_empty())
            .or(message.picked_markdown_content)
            .unwrap_or_default();
        messages.push(RawMessage {
            id: message.id,
            thread_id: message.thread_id,
            from: headers.from.unwrap_or_default(),
            to: headers.to.unwrap_or_default(),
            subject: headers.subject.unwrap_or_default(),
            date,
            snippet: message.snippet.unwrap_or_default(),
            content,
        });
    }
    ProviderPayload::Mail(messages)
}

fn decode_calendar(envelope: CalendarEnvelope) -> ProviderPayload {
    let mut events = Vec::new();
    for item in envelope.items {
        // Untitled events and "home" blocks are not meetings
        let Some(title) = item.summary.filter(|s| !s.trim().is_empty()) else {
            continue;
        };
        if title.to_lowercase().contains("home") {
            continue;
        }
        let (Some(start_time), Some(end_time)) = (
            item.start.as_ref().and_then(parse_calendar_time),
            item.end.as_ref().and_then(parse_calendar_time),
        ) else {
            log::warn!("Skipping event {} without a usable start/end", item.id);
            continue;
        };
        events.push(RawEvent {
            id: item.id,
            title,
            description: item.description.filter(|d| !d.is_empty()),
            start_time,
            end_time,
            location: item.location.filter(|l| !l.is_empty()),
            attendees: item.attendees.into_iter().map(|a| a.email).collect(),
        });
    }
    ProviderPayload::Calendar(events)
}

fn decode_recordings(envelope: RecordingEnvelope) -> ProviderPayload {
    let mut recordings = Vec::new();
    for lifelog in envelope.lifelogs {
        let (Some(start_time), Some(end_time)) = (
            parse_rfc3339(&lifelog.start_time),
            parse_rfc3339(&lifelog.end_time),
        ) else {
            log::warn!("Skipping recording {} with bad timestamps", lifelog.id);
            continue;
        };
        recordings.push(RawRecording {
            id: lifelog.id,
            start_time,
            end_time,
            transcript: lifelog.transcript.unwrap_or_default(),
            participants: lifelog.participants,
        });
    }
    ProviderPayload::Recordings(recordings)
}

fn parse_millis(raw: &str) -> Option<DateTime<Utc>> {
    let millis = raw.trim().parse::<i64>().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

fn parse_rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Timed events carry `dateTime`; all-day events carry a bare `date`,
/// read as midnight UTC.
fn parse_calendar_time(time: &CalendarTime) -> Option<DateTime<Utc>> {
    if let Some(dt) = time.date_time.as_deref().and_then(parse_rfc3339) {
        return Some(dt);
    }
    let date = NaiveDate::parse_from_str(time.date.as_deref()?, "%Y-%m-%d").ok()?;
    date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc())
}
