//! Opportunity scoring for strategic alerts.
//!
//! score = 0.30 * relationship health
//!       + 0.25 * keyword density
//!       + 0.25 * timing urgency
//!       + 0.20 * engagement

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{AlertCandidate, AlertType, RawMessage};

const SCORING_KEYWORDS: &[&str] = &[
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
    "strategic",
    "initiative",
    "program",
    "project",
];

/// Health used when the contact has no relationship row.
pub const DEFAULT_HEALTH: u8 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreFactors {
    pub relationship_health: f64,
    pub keyword_density: f64,
    pub timing_urgency: f64,
    pub engagement: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OpportunityScore {
    pub score: u8,
    pub factors: ScoreFactors,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredAlert {
    pub alert: AlertCandidate,
    /// Only strategic alerts are scored.
    pub score: Option<u8>,
}

/// Messages sent by or to the alert's contact.
fn contact_messages<'a>(alert: &AlertCandidate, messages: &'a [RawMessage]) -> Vec<&'a RawMessage> {
    let needle = match (&alert.contact_email, &alert.contact_name) {
        (Some(email), _) if !email.is_empty() => email.to_lowercase(),
        (_, Some(name)) if !name.is_empty() => name.to_lowercase(),
        _ => return Vec::new(),
    };
    messages
        .iter()
        .filter(|m| m.from.to_lowercase().contains(&needle) || m.to.to_lowercase().contains(&needle))
        .collect()
}

fn timing_urgency(deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(deadline) = deadline else {
        return 50.0;
    };
    let days = ((deadline - now).num_seconds() as f64 / 86_400.0).floor();
    let urgency = if days <= 7.0 {
        100.0 - days * 10.0
    } else if days <= 30.0 {
        70.0 - (days - 7.0) * 2.0
    } else {
        30.0
    };
    urgency.clamp(0.0, 100.0)
}

pub fn score_opportunity(
    alert: &AlertCandidate,
    relationship_health: u8,
    messages: &[RawMessage],
    now: DateTime<Utc>,
) -> OpportunityScore {
    let relevant = contact_messages(alert, messages);

    let keyword_hits: usize = relevant
        .iter()
        .map(|m| {
            let text = format!("{} {}", m.subject, m.content).to_lowercase();
            SCORING_KEYWORDS.iter().filter(|kw| text.contains(*kw)).count()
        })
        .sum();
    let keyword_density =
        (keyword_hits as f64 / relevant.len().max(1) as f64 * 20.0).min(100.0);

    let factors = ScoreFactors {
        relationship_health: f64::from(relationship_health),
        keyword_density,
        timing_urgency: timing_urgency(alert.deadline, now),
        engagement: (relevant.len() as f64 * 10.0).min(100.0),
    };

    let total = factors.relationship_health * 0.30
        + factors.keyword_density * 0.25
        + factors.timing_urgency * 0.25
        + factors.engagement * 0.20;

    OpportunityScore {
        score: total.round().clamp(0.0, 100.0) as u8,
        factors,
    }
}

/// Score strategic alerts and reorder them by score, highest first. Other
/// alerts are neither scored nor moved: strategic alerts are re-sorted within
/// the positions they already occupy.
pub fn sort_by_score(
    alerts: Vec<AlertCandidate>,
    health_by_email: &HashMap<String, u8>,
    messages: &[RawMessage],
    now: DateTime<Utc>,
) -> Vec<ScoredAlert> {
    let mut scored: Vec<ScoredAlert> = alerts
        .into_iter()
        .map(|alert| {
            let score = (alert.alert_type == AlertType::Strategic).then(|| {
                let health = alert
                    .contact_email
                    .as_ref()
                    .and_then(|email| health_by_email.get(email))
                    .copied()
                    .unwrap_or(DEFAULT_HEALTH);
                score_opportunity(&alert, health, messages, now).score
            });
            ScoredAlert { alert, score }
        })
        .collect();

    let slots: Vec<usize> = scored
        .iter()
        .enumerate()
        .filter(|(_, s)| s.score.is_some())
        .map(|(i, _)| i)
        .collect();
    let mut strategic: Vec<ScoredAlert> = slots.iter().map(|&i| scored[i].clone()).collect();
    strategic.sort_by(|a, b| b.score.cmp(&a.score));
    for (slot, item) in slots.into_iter().zip(strategic) {
        scored[slot] = item;
    }
    scored
}
