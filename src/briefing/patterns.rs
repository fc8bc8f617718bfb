//! Mail activity statistics: response times, topic clusters and per-contact
//! communication frequency.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::RawMessage;
use crate::util;

/// Replies slower than a week are not counted as response samples.
const MAX_RESPONSE_HOURS: f64 = 168.0;

const SUBJECT_TOPICS: [&str; 7] = [
    "meeting",
    "call",
    "partnership",
    "proposal",
    "follow-up",
    "opportunity",
    "project",
];

/// Checked in order; a message joins the first cluster it matches.
const CLUSTER_KEYWORDS: [&str; 14] = [
    "meeting",
    "call",
    "partnership",
    "collaboration",
    "proposal",
    "funding",
    "grant",
    "opportunity",
    "project",
    "follow-up",
    "deadline",
    "deliverable",
    "contract",
    "agreement",
];

const GENERAL_TOPIC: &str = "general";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseTrend {
    Improving,
    Worsening,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FrequencyTrend {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicCount {
    pub topic: &'static str,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailActivity {
    pub total_emails: usize,
    pub responded_count: usize,
    pub pending_count: usize,
    pub average_response_time_hours: f64,
    pub response_time_trend: ResponseTrend,
    pub top_topics: Vec<TopicCount>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopicCluster<'a> {
    pub topic: &'static str,
    pub messages: Vec<&'a RawMessage>,
}

impl TopicCluster<'_> {
    pub fn count(&self) -> usize {
        self.messages.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationFrequency {
    pub contact_email: String,
    pub contact_name: String,
    pub average_days_between_messages: f64,
    pub trend: FrequencyTrend,
    pub last_contact_days_ago: i64,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Split chronological samples into `(older, recent)`, where recent is the
/// last `min(cap, n / 2)` samples.
fn split_recent(samples: &[f64], cap: usize) -> (&[f64], &[f64]) {
    let recent = cap.min(samples.len() / 2);
    samples.split_at(samples.len() - recent)
}

/// Group messages by thread in first-seen order.
fn threads(messages: &[RawMessage]) -> Vec<Vec<&RawMessage>> {
    let mut threads: Vec<(String, Vec<&RawMessage>)> = Vec::new();
    for message in messages {
        match threads.iter().position(|(id, _)| *id == message.thread_id) {
            Some(i) => threads[i].1.push(message),
            None => threads.push((message.thread_id.clone(), vec![message])),
        }
    }
    threads.into_iter().map(|(_, members)| members).collect()
}

pub fn analyze_email_activity(messages: &[RawMessage]) -> EmailActivity {
    let mut responded_count = 0;
    let mut pending_count = 0;
    let mut samples: Vec<f64> = Vec::new();

    for mut thread in threads(messages) {
        thread.sort_by_key(|m| m.date);
        match thread.as_slice() {
            [first, second, ..] => {
                responded_count += thread.len() - 1;
                let hours = (second.date - first.date).num_seconds() as f64 / 3600.0;
                if hours > 0.0 && hours < MAX_RESPONSE_HOURS {
                    samples.push(hours);
                }
            }
            _ => pending_count += 1,
        }
    }

    let (older, recent) = split_recent(&samples, 10);
    let response_time_trend = if older.is_empty() || recent.is_empty() {
        ResponseTrend::Stable
    } else if mean(recent) < mean(older) * 0.8 {
        ResponseTrend::Improving
    } else if mean(recent) > mean(older) * 1.2 {
        ResponseTrend::Worsening
    } else {
        ResponseTrend::Stable
    };

    let mut top_topics: Vec<TopicCount> = Vec::new();
    for message in messages {
        let subject = message.subject.to_lowercase();
        for topic in SUBJECT_TOPICS {
            if !subject.split_whitespace().any(|word| word.contains(topic)) {
                continue;
            }
            match top_topics.iter_mut().find(|t| t.topic == topic) {
                Some(existing) => existing.count += 1,
                None => top_topics.push(TopicCount { topic, count: 1 }),
            }
        }
    }
    top_topics.sort_by(|a, b| b.count.cmp(&a.count));
    top_topics.truncate(5);

    EmailActivity {
        total_emails: messages.len(),
        responded_count,
        pending_count,
        average_response_time_hours: mean(&samples),
        response_time_trend,
        top_topics,
    }
}

/// One-paragraph activity description for the executive summary.
pub fn email_activity_summary(activity: &EmailActivity) -> String {
    let rate = if activity.total_emails > 0 {
        (activity.responded_count as f64 / activity.total_emails as f64 * 100.0).round()
    } else {
        0.0
    };

    let mut summary = format!(
        "Email activity: {} total emails, {} responded ({}% response rate). ",
        activity.total_emails, activity.responded_count, rate
    );
    if activity.average_response_time_hours > 0.0 {
        summary.push_str(&format!(
            "Average response time: {} hours. ",
            activity.average_response_time_hours.round()
        ));
    }
    match activity.response_time_trend {
        ResponseTrend::Improving => summary.push_str("Response times are improving. "),
        ResponseTrend::Worsening => {
            summary.push_str("Response times are worsening - attention needed. ")
        }
        ResponseTrend::Stable => {}
    }
    if activity.pending_count > 0 {
        summary.push_str(&format!("{} emails pending response. ", activity.pending_count));
    }
    if !activity.top_topics.is_empty() {
        let topics: Vec<&str> = activity.top_topics.iter().take(3).map(|t| t.topic).collect();
        summary.push_str(&format!("Top topics: {}.", topics.join(", ")));
    }
    summary.trim().to_string()
}

/// Single-label clustering, largest cluster first. Equal sizes keep the order
/// in which their topic first appeared.
pub fn cluster_topics(messages: &[RawMessage]) -> Vec<TopicCluster<'_>> {
    let mut clusters: Vec<TopicCluster<'_>> = Vec::new();
    for message in messages {
        let text = format!("{} {}", message.subject, message.content).to_lowercase();
        let topic = CLUSTER_KEYWORDS
            .iter()
            .find(|kw| text.contains(*kw))
            .copied()
            .unwrap_or(GENERAL_TOPIC);
        match clusters.iter_mut().find(|c| c.topic == topic) {
            Some(cluster) => cluster.messages.push(message),
            None => clusters.push(TopicCluster {
                topic,
                messages: vec![message],
            }),
        }
    }
    clusters.sort_by(|a, b| b.count().cmp(&a.count()));
    clusters
}

/// How often a contact writes, and whether that is speeding up. `None` with
/// fewer than two messages.
pub fn detect_communication_frequency(
    messages: &[RawMessage],
    contact_email: &str,
    now: DateTime<Utc>,
) -> Option<CommunicationFrequency> {
    let needle = contact_email.to_lowercase();
    let mut contact: Vec<&RawMessage> = messages
        .iter()
        .filter(|m| m.from.to_lowercase().contains(&needle) || m.to.to_lowercase().contains(&needle))
        .collect();
    if contact.len() < 2 {
        return None;
    }
    contact.sort_by_key(|m| m.date);

    let intervals: Vec<f64> = contact
        .windows(2)
        .map(|pair| (pair[1].date - pair[0].date).num_seconds() as f64 / 86_400.0)
        .collect();

    let (older, recent) = split_recent(&intervals, 5);
    let trend = if older.is_empty() || recent.is_empty() {
        FrequencyTrend::Stable
    } else if mean(recent) < mean(older) * 0.8 {
        FrequencyTrend::Increasing
    } else if mean(recent) > mean(older) * 1.2 {
        FrequencyTrend::Decreasing
    } else {
        FrequencyTrend::Stable
    };

    let last = contact.last()?;
    let contact_name = contact
        .iter()
        .find(|m| util::email_address(&m.from).as_deref() == Some(needle.as_str()))
        .map(|m| util::contact_name(&m.from))
        .unwrap_or_else(|| needle.split('@').next().unwrap_or_default().to_string());

    Some(CommunicationFrequency {
        contact_email: needle.clone(),
        contact_name,
        average_days_between_messages: mean(&intervals),
        trend,
        last_contact_days_ago: (now - last.date).num_days(),
    })
}
