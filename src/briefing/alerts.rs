//! Alert rules.
//!
//! Each rule is a pure function over the fetched data that returns zero or
//! more alert candidates for one briefing. `now` is passed in so the rules are
//! deterministic under test.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};

use crate::types::{AlertCandidate, AlertCategory, AlertType, Commitment, RawEvent, RawMessage};
use crate::util;

/// Keywords that mark a message as a strategic opportunity, in match order.
pub const STRATEGIC_KEYWORDS: &[&str] = &[
    "partnership",
    "collaboration",
    "funding",
    "grant",
    "donation",
    "sponsor",
    "opportunity",
    "proposal",
    "investment",
    "digital equity",
];

const COOLING_MIN_DAYS: i64 = 12;
const PREP_WINDOW_HOURS: i64 = 48;
const PREP_ALERT_HOURS: i64 = 24;

fn contact_fields(alert: &mut AlertCandidate, from: &str) {
    alert.contact_name = Some(util::contact_name(from));
    alert.organization = util::organization(from);
    alert.contact_email = util::email_address(from);
}

// ---------------------------------------------------------------------------
// Rule 1: Response urgency
// ---------------------------------------------------------------------------

/// A meeting or call that wrapped up in the last 24 hours deserves a same-day
/// follow-up.
pub fn response_urgency_alerts(
    messages: &[RawMessage],
    briefing_id: i64,
    now: DateTime<Utc>,
) -> Vec<AlertCandidate> {
    let since = now - Duration::hours(24);
    messages
        .iter()
        .filter(|m| m.date >= since)
        .filter(|m| {
            let subject = m.subject.to_lowercase();
            let content = m.content.to_lowercase();
            subject.contains("meeting")
                || subject.contains("call")
                || content.contains("thank you for")
                || content.contains("great to meet")
        })
        .map(|m| {
            let contact = util::contact_name(&m.from);
            let mut alert = AlertCandidate::new(
                briefing_id,
                AlertType::Urgent,
                AlertCategory::ResponseUrgency,
                format!("Follow up on recent meeting with {contact}"),
                "Meeting or call happened within the last 24 hours. Following up quickly \
                 demonstrates professionalism and keeps momentum high."
                    .to_string(),
            );
            contact_fields(&mut alert, &m.from);
            alert.action_required = Some(
                "Send a thank-you email by end of day. Recap key discussion points and \
                 confirm next steps."
                    .to_string(),
            );
            alert.deadline = Some(now + Duration::hours(8));
            alert
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Rule 2: Relationship cooling
// ---------------------------------------------------------------------------

/// Contacts with an active history (2+ messages) who have gone quiet for 12+
/// days.
pub fn relationship_cooling_alerts(
    messages: &[RawMessage],
    briefing_id: i64,
    now: DateTime<Utc>,
) -> Vec<AlertCandidate> {
    let mut by_sender: HashMap<String, Vec<&RawMessage>> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for message in messages {
        let Some(email) = util::email_address(&message.from) else {
            continue;
        };
        if util::is_no_reply(&email) {
            continue;
        }
        by_sender
            .entry(email.clone())
            .or_insert_with(|| {
                order.push(email);
                Vec::new()
            })
            .push(message);
    }

    let mut alerts = Vec::new();
    for email in order {
        let Some(mut thread) = by_sender.remove(&email) else {
            continue;
        };
        if thread.len() < 2 {
            continue;
        }
        thread.sort_by(|a, b| b.date.cmp(&a.date));
        let latest = thread[0];
        let days_since = (now - latest.date).num_days();
        if days_since < COOLING_MIN_DAYS {
            continue;
        }

        let description = if engagement_dropped(&thread) {
            format!(
                "Last contact was {days_since} days ago. Response length has decreased \
                 significantly. Threads that go 14+ days without response have a 70% chance \
                 of going dormant."
            )
        } else {
            format!(
                "Last contact was {days_since} days ago. Threads that go 14+ days without \
                 response have a 70% chance of going dormant."
            )
        };

        let contact = util::contact_name(&latest.from);
        let mut alert = AlertCandidate::new(
            briefing_id,
            AlertType::Important,
            AlertCategory::RelationshipCooling,
            format!("{contact} thread is going cold"),
            description,
        );
        contact_fields(&mut alert, &latest.from);
        alert.action_required = Some(
            "Re-engage with a fresh angle or new information. Consider referencing recent \
             news or developments related to their organization."
                .to_string(),
        );
        alert.deadline = Some(now + Duration::hours(48));
        alerts.push(alert);
    }
    alerts
}

/// The two newest messages average under half the length of the two before.
/// `thread` is sorted newest first.
fn engagement_dropped(thread: &[&RawMessage]) -> bool {
    let avg_len = |slice: &[&RawMessage]| -> f64 {
        if slice.is_empty() {
            return 0.0;
        }
        slice.iter().map(|m| m.content.chars().count()).sum::<usize>() as f64 / slice.len() as f64
    };
    let recent = avg_len(&thread[..thread.len().min(2)]);
    let older = if thread.len() > 2 {
        avg_len(&thread[2..thread.len().min(4)])
    } else {
        0.0
    };
    older > 0.0 && recent < older * 0.5
}

// ---------------------------------------------------------------------------
// Rule 3: Meeting preparation
// ---------------------------------------------------------------------------

/// Events starting within 24 hours (of those inside the 48-hour window).
pub fn calendar_preparation_alerts(
    events: &[RawEvent],
    briefing_id: i64,
    now: DateTime<Utc>,
) -> Vec<AlertCandidate> {
    let window_end = now + Duration::hours(PREP_WINDOW_HOURS);
    events
        .iter()
        .filter(|e| e.start_time >= now && e.start_time <= window_end)
        .filter_map(|event| {
            let hours_until = (event.start_time - now).num_hours();
            if hours_until > PREP_ALERT_HOURS {
                return None;
            }

            let mut description = format!("Meeting starts in {hours_until} hours.");
            if !event.attendees.is_empty() {
                let shown = event.attendees.iter().take(3).cloned().collect::<Vec<_>>();
                description.push_str(&format!(" Attendees: {}", shown.join(", ")));
                if event.attendees.len() > 3 {
                    description.push_str("...");
                }
            }

            let mut alert = AlertCandidate::new(
                briefing_id,
                AlertType::Urgent,
                AlertCategory::MeetingPreparation,
                format!("Prepare for: {}", event.title),
                description,
            );
            alert.contact_name = event.attendees.first().cloned();
            alert.contact_email = event.attendees.first().map(|a| a.to_lowercase());
            alert.action_required = Some(
                "Research attendees, prepare talking points, and review any relevant past \
                 conversations or commitments."
                    .to_string(),
            );
            alert.deadline = Some(event.start_time);
            Some(alert)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Rule 4: Strategic opportunity
// ---------------------------------------------------------------------------

/// First strategic keyword found in the subject or body, if any.
pub fn first_strategic_keyword(message: &RawMessage) -> Option<&'static str> {
    let haystack = format!("{} {}", message.subject, message.content).to_lowercase();
    STRATEGIC_KEYWORDS
        .iter()
        .copied()
        .find(|kw| haystack.contains(kw))
}

/// At most one alert per sender, from the first message that mentions a
/// strategic keyword.
pub fn strategic_opportunity_alerts(
    messages: &[RawMessage],
    briefing_id: i64,
) -> Vec<AlertCandidate> {
    let mut seen: HashSet<String> = HashSet::new();
    messages
        .iter()
        .filter_map(|m| {
            let keyword = first_strategic_keyword(m)?;
            let sender = util::email_address(&m.from).unwrap_or_else(|| m.from.to_lowercase());
            if !seen.insert(sender) {
                return None;
            }
            let contact = util::contact_name(&m.from);
            let organization = util::organization(&m.from);
            let mut alert = AlertCandidate::new(
                briefing_id,
                AlertType::Strategic,
                AlertCategory::StrategicOpportunity,
                format!(
                    "Strategic opportunity with {}",
                    organization.as_deref().unwrap_or(&contact)
                ),
                format!(
                    "Email mentions {keyword}. This could be a high-value lead."
                ),
            );
            contact_fields(&mut alert, &m.from);
            alert.action_required = Some(
                "Review the email thread carefully and assess strategic fit. Consider \
                 scheduling a follow-up call."
                    .to_string(),
            );
            Some(alert)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Commitments
// ---------------------------------------------------------------------------

/// Alerts for commitments already filtered to the upcoming window.
pub fn commitment_alerts(commitments: &[Commitment], briefing_id: i64) -> Vec<AlertCandidate> {
    commitments
        .iter()
        .map(|c| {
            let description = if c.context.trim().is_empty() {
                "Action item from conversation".to_string()
            } else {
                c.context.clone()
            };
            let mut alert = AlertCandidate::new(
                briefing_id,
                AlertType::Important,
                AlertCategory::CommitmentTracking,
                format!("Commitment: {}", c.action),
                description,
            );
            alert.contact_name = c.responsible_party.clone();
            alert.action_required = Some(c.action.clone());
            alert.deadline = c.deadline;
            alert
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn message(from: &str, subject: &str, content: &str, date: DateTime<Utc>) -> RawMessage {
        RawMessage {
            id: format!("{from}-{}", date.timestamp()),
            thread_id: format!("t-{from}"),
            from: from.to_string(),
            to: "me@hti.org".to_string(),
            subject: subject.to_string(),
            date,
            snippet: String::new(),
            content: content.to_string(),
        }
    }

    pub(crate) fn event(title: &str, start: DateTime<Utc>, attendees: &[&str]) -> RawEvent {
        RawEvent {
            id: title.to_string(),
            title: title.to_string(),
            description: None,
            start_time: start,
            end_time: start + Duration::hours(1),
            location: None,
            attendees: attendees.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[test]
    fn test_thank_you_message_triggers_response_alert() {
        let now = Utc::now();
        let messages = vec![message(
            "\"Alice Smith\" <alice@acme.org>",
            "Thank you for the meeting today",
            "It was great.",
            now - Duration::hours(10),
        )];

        let alerts = response_urgency_alerts(&messages, 1, now);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::Urgent);
        assert_eq!(alerts[0].category, AlertCategory::ResponseUrgency);
        assert_eq!(alerts[0].title, "Follow up on recent meeting with Alice Smith");
        assert_eq!(alerts[0].organization.as_deref(), Some("Acme"));
        assert_eq!(alerts[0].deadline, Some(now + Duration::hours(8)));
    }

    #[test]
    fn test_old_meeting_message_is_ignored() {
        let now = Utc::now();
        let messages = vec![message(
            "alice@acme.org",
            "Call notes",
            "",
            now - Duration::hours(30),
        )];
        assert!(response_urgency_alerts(&messages, 1, now).is_empty());
    }

    #[test]
    fn test_quiet_contact_triggers_cooling_alert() {
        let now = Utc::now();
        let messages = vec![
            message("alice@example.com", "Re: grant", "short", now - Duration::days(15)),
            message("alice@example.com", "grant", "short", now - Duration::days(20)),
        ];

        let alerts = relationship_cooling_alerts(&messages, 1, now);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::Important);
        assert_eq!(alerts[0].category, AlertCategory::RelationshipCooling);
        assert!(alerts[0].description.starts_with("Last contact was 15 days ago."));
        assert!(!alerts[0].description.contains("decreased"));
    }

    #[test]
    fn test_cooling_flags_engagement_drop_and_skips_noreply() {
        let now = Utc::now();
        let long = "x".repeat(400);
        let messages = vec![
            message("bob@acme.org", "a", "ok", now - Duration::days(13)),
            message("bob@acme.org", "b", "fine", now - Duration::days(14)),
            message("bob@acme.org", "c", &long, now - Duration::days(16)),
            message("bob@acme.org", "d", &long, now - Duration::days(18)),
            message("noreply@acme.org", "x", "", now - Duration::days(20)),
            message("noreply@acme.org", "y", "", now - Duration::days(21)),
        ];

        let alerts = relationship_cooling_alerts(&messages, 1, now);
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].description.contains("Response length has decreased significantly."));
    }

    #[test]
    fn test_preparation_only_within_a_day() {
        let now = Utc::now();
        let soon = now + Duration::hours(12);
        let events = vec![
            event("Board sync", soon, &["a@x.org", "b@x.org", "c@x.org", "d@x.org"]),
            event("Offsite", now + Duration::hours(72), &[]),
            event("Tomorrow evening", now + Duration::hours(36), &[]),
        ];

        let alerts = calendar_preparation_alerts(&events, 1, now);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::Urgent);
        assert_eq!(alerts[0].deadline, Some(soon));
        assert_eq!(alerts[0].contact_name.as_deref(), Some("a@x.org"));
        assert!(alerts[0]
            .description
            .ends_with("Attendees: a@x.org, b@x.org, c@x.org..."));
    }

    #[test]
    fn test_strategic_alerts_capped_per_sender() {
        let now = Utc::now();
        let mut messages = vec![
            message("Dana <dana@fund.org>", "Grant cycle", "", now),
            message("Eve <eve@gmail.com>", "Lunch?", "see you", now),
            message("Sam <sam@coop.net>", "Re", "about the partnership", now),
        ];
        for n in 0..20 {
            messages.push(message("DANA <Dana@Fund.org>", &format!("Grant update {n}"), "", now));
        }

        let alerts = strategic_opportunity_alerts(&messages, 1);
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].title, "Strategic opportunity with Fund");
        assert!(alerts[0].description.contains("grant"));
        assert_eq!(alerts[1].contact_email.as_deref(), Some("sam@coop.net"));
        assert!(alerts[1].description.contains("partnership"));
        assert!(alerts.iter().all(|a| a.deadline.is_none()));
    }

    #[test]
    fn test_commitment_alert_fields() {
        let commitment = Commitment {
            action: "Send the budget draft".to_string(),
            deadline: Some(Utc::now() + Duration::days(2)),
            responsible_party: Some("Sam".to_string()),
            context: String::new(),
            source: "rec-1".to_string(),
        };
        let alerts = commitment_alerts(&[commitment], 4);
        assert_eq!(alerts[0].title, "Commitment: Send the budget draft");
        assert_eq!(alerts[0].description, "Action item from conversation");
        assert_eq!(alerts[0].category, AlertCategory::CommitmentTracking);
        assert_eq!(alerts[0].contact_name.as_deref(), Some("Sam"));
    }
}
