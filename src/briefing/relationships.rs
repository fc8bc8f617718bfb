//! Relationship health and trend per sender.
//!
//! Health starts at 70 and moves with recency, volume and message length.
//! Trend compares the mean gap between the newer half of a contact's messages
//! against the older half.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::resilience::TtlCache;
use crate::types::{RawMessage, Relationship, Trend};
use crate::util;

const BASE_HEALTH: i32 = 70;
const NO_HISTORY_HEALTH: u8 = 50;

fn involves<'a>(email: &str, messages: &'a [RawMessage]) -> Vec<&'a RawMessage> {
    let email = email.to_lowercase();
    messages
        .iter()
        .filter(|m| m.from.to_lowercase().contains(&email) || m.to.to_lowercase().contains(&email))
        .collect()
}

fn recency_adjustment(days_since: i64) -> i32 {
    match days_since {
        d if d <= 2 => 20,
        d if d <= 7 => 10,
        d if d <= 14 => -10,
        d if d <= 30 => -20,
        _ => -30,
    }
}

/// Health in `[0, 100]` over the messages sent by or to `email`. A contact
/// with no messages scores 50.
pub fn health_score(email: &str, messages: &[RawMessage], now: DateTime<Utc>) -> u8 {
    let contact = involves(email, messages);
    let Some(latest) = contact.iter().map(|m| m.date).max() else {
        return NO_HISTORY_HEALTH;
    };

    let mut score = BASE_HEALTH + recency_adjustment((now - latest).num_days());

    score += match contact.len() {
        n if n >= 5 => 10,
        n if n >= 3 => 5,
        _ => 0,
    };

    let total_len: usize = contact.iter().map(|m| m.content.chars().count()).sum();
    if total_len / contact.len() > 500 {
        score += 5;
    }

    score.clamp(0, 100) as u8
}

/// Mean gap in seconds across a newest-first run of dates; 0 when there is
/// no gap to measure.
fn mean_gap(dates: &[DateTime<Utc>]) -> f64 {
    match (dates.first(), dates.last()) {
        (Some(newest), Some(oldest)) if dates.len() > 1 => {
            (*newest - *oldest).num_seconds() as f64 / (dates.len() - 1) as f64
        }
        _ => 0.0,
    }
}

pub fn trend(email: &str, messages: &[RawMessage]) -> Trend {
    let mut dates: Vec<DateTime<Utc>> = involves(email, messages).iter().map(|m| m.date).collect();
    if dates.len() <= 1 {
        return Trend::New;
    }
    dates.sort_unstable_by(|a, b| b.cmp(a));

    let split = dates.len().div_ceil(2);
    let recent = mean_gap(&dates[..split]);
    let older = mean_gap(&dates[split..]);
    if recent == 0.0 || older == 0.0 {
        return Trend::Stable;
    }

    if recent < older * 0.7 {
        Trend::Up
    } else if recent > older * 1.3 {
        Trend::Down
    } else {
        Trend::Stable
    }
}

/// Fingerprint of the message set a contact's score is computed from.
fn fingerprint(contact: &[&RawMessage]) -> String {
    let mut hasher = Sha256::new();
    for m in contact {
        hasher.update(m.id.as_bytes());
        hasher.update(m.date.timestamp().to_be_bytes());
    }
    hex::encode(&hasher.finalize()[..8])
}

/// Builds relationship rows from mail, caching health and trend per contact
/// and message set.
pub struct RelationshipManager {
    cache: Arc<TtlCache<(u8, Trend)>>,
}

impl RelationshipManager {
    pub fn new(cache: Arc<TtlCache<(u8, Trend)>>) -> Self {
        Self { cache }
    }

    fn health_and_trend(&self, email: &str, messages: &[RawMessage], now: DateTime<Utc>) -> (u8, Trend) {
        let key = format!("health:{}:{}", email, fingerprint(&involves(email, messages)));
        if let Some(hit) = self.cache.get(&key) {
            return hit;
        }
        let computed = (health_score(email, messages, now), trend(email, messages));
        self.cache.insert(key, computed);
        computed
    }

    /// One relationship per distinct sender address, in first-seen order.
    /// No-reply senders are skipped.
    pub fn process(&self, messages: &[RawMessage], now: DateTime<Utc>) -> Vec<Relationship> {
        let mut senders: Vec<(String, &RawMessage)> = Vec::new();
        for message in messages {
            let Some(email) = util::email_address(&message.from) else {
                continue;
            };
            if util::is_no_reply(&email) {
                continue;
            }
            match senders.iter().position(|(known, _)| *known == email) {
                Some(i) if message.date > senders[i].1.date => senders[i].1 = message,
                Some(_) => {}
                None => senders.push((email, message)),
            }
        }

        senders
            .into_iter()
            .map(|(email, latest)| {
                let (health_score, trend) = self.health_and_trend(&email, messages, now);
                Relationship {
                    contact_name: util::contact_name(&latest.from),
                    organization: util::organization(&latest.from),
                    health_score,
                    trend,
                    last_interaction: latest.date,
                    last_interaction_type: "email".to_string(),
                    notes: None,
                    email,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use chrono::Duration;
    use proptest::prelude::*;

    use super::*;
    use crate::briefing::alerts::tests::message;

    fn manager() -> RelationshipManager {
        RelationshipManager::new(Arc::new(TtlCache::new(StdDuration::from_secs(3600))))
    }

    #[test]
    fn test_health_buckets() {
        let now = Utc::now();
        assert_eq!(health_score("nobody@x.org", &[], now), 50);

        let fresh = vec![message("a@acme.org", "hi", "short", now - Duration::days(1))];
        assert_eq!(health_score("a@acme.org", &fresh, now), 90);

        let stale: Vec<RawMessage> = (0..5)
            .map(|i| message("b@acme.org", "hi", &"x".repeat(600), now - Duration::days(60 + i)))
            .collect();
        // 70 - 30 + 10 + 5
        assert_eq!(health_score("b@acme.org", &stale, now), 55);
    }

    #[test]
    fn test_trend_from_interval_halves() {
        let now = Utc::now();
        let at = |days: i64| message("c@acme.org", "s", "c", now - Duration::days(days));

        assert_eq!(trend("c@acme.org", &[at(1)]), Trend::New);
        // Newer half every day, older half every ten days
        assert_eq!(trend("c@acme.org", &[at(1), at(2), at(3), at(13), at(23)]), Trend::Up);
        assert_eq!(trend("c@acme.org", &[at(1), at(11), at(21), at(22), at(23)]), Trend::Down);
        assert_eq!(trend("c@acme.org", &[at(1), at(2), at(3), at(4)]), Trend::Stable);
    }

    #[test]
    fn test_process_one_row_per_sender() {
        let now = Utc::now();
        let messages = vec![
            message("Dana Lee <dana@fund.org>", "a", "", now - Duration::days(4)),
            message("noreply@service.com", "b", "", now),
            message("Dana Lee <DANA@fund.org>", "c", "", now - Duration::days(1)),
            message("eve@coop.net", "d", "", now - Duration::days(20)),
        ];
        let rows = manager().process(&messages, now);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].email, "dana@fund.org");
        assert_eq!(rows[0].contact_name, "Dana Lee");
        assert_eq!(rows[0].organization.as_deref(), Some("Fund"));
        assert_eq!(rows[0].last_interaction, now - Duration::days(1));
        assert_eq!(rows[1].trend, Trend::New);
        assert!(rows.iter().all(|r| r.health_score <= 100));
    }

    #[test]
    fn test_scores_are_cached_per_message_set() {
        let now = Utc::now();
        let cache = Arc::new(TtlCache::new(StdDuration::from_secs(3600)));
        let manager = RelationshipManager::new(cache.clone());
        let messages = vec![message("f@acme.org", "s", "c", now)];

        manager.process(&messages, now);
        manager.process(&messages, now);
        assert_eq!(cache.len(), 1);

        let more = vec![
            message("f@acme.org", "s", "c", now),
            message("f@acme.org", "s2", "c", now - Duration::days(2)),
        ];
        manager.process(&more, now);
        assert_eq!(cache.len(), 2);
    }

    proptest! {
        #[test]
        fn prop_health_stays_in_range(
            days_ago in prop::collection::vec(-30i64..100_000, 0..25),
            body_len in 0usize..2_000,
        ) {
            let now = Utc::now();
            let body = "x".repeat(body_len);
            let messages: Vec<RawMessage> = days_ago
                .iter()
                .map(|d| message("z@acme.org", "s", &body, now - Duration::days(*d)))
                .collect();
            let score = health_score("z@acme.org", &messages, now);
            prop_assert!(score <= 100);
            if messages.is_empty() {
                prop_assert_eq!(score, 50);
            } else {
                // Worst case is 70 - 30, best is clamped at 100
                prop_assert!(score >= 40);
            }
        }
    }
}
