//! Links between contacts: shared mail domains and overlapping topics.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::types::RawMessage;
use crate::util;

const SHARED_DOMAIN_STRENGTH: f64 = 80.0;
/// Minimum topic overlap, as a percentage of the union.
const MIN_TOPIC_SIMILARITY: f64 = 20.0;

const TOPIC_KEYWORDS: [&str; 10] = [
    "partnership",
    "collaboration",
    "funding",
    "grant",
    "proposal",
    "meeting",
    "call",
    "project",
    "opportunity",
    "initiative",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    SharedDomain,
    SimilarTopics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub contact1: String,
    pub contact2: String,
    pub connection_type: ConnectionType,
    pub strength: f64,
    pub evidence: Vec<String>,
}

impl Connection {
    /// Unordered pair key.
    fn pair(&self) -> (&str, &str) {
        if self.contact1 <= self.contact2 {
            (self.contact1.as_str(), self.contact2.as_str())
        } else {
            (self.contact2.as_str(), self.contact1.as_str())
        }
    }
}

/// Distinct sender addresses in first-seen order.
fn senders(messages: &[RawMessage]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for message in messages {
        if let Some(email) = util::email_address(&message.from) {
            if !seen.contains(&email) {
                seen.push(email);
            }
        }
    }
    seen
}

pub fn shared_domain_connections(messages: &[RawMessage]) -> Vec<Connection> {
    let mut by_domain: Vec<(String, Vec<String>)> = Vec::new();
    for email in senders(messages) {
        let Some(domain) = util::email_domain(&email).map(str::to_string) else {
            continue;
        };
        match by_domain.iter().position(|(d, _)| *d == domain) {
            Some(i) => by_domain[i].1.push(email),
            None => by_domain.push((domain, vec![email])),
        }
    }

    let mut connections = Vec::new();
    for (domain, emails) in &by_domain {
        for (i, a) in emails.iter().enumerate() {
            for b in &emails[i + 1..] {
                connections.push(Connection {
                    contact1: a.clone(),
                    contact2: b.clone(),
                    connection_type: ConnectionType::SharedDomain,
                    strength: SHARED_DOMAIN_STRENGTH,
                    evidence: vec![format!("Both contacts use {domain} email domain")],
                });
            }
        }
    }
    connections
}

pub fn topic_connections(messages: &[RawMessage]) -> Vec<Connection> {
    let mut topics: Vec<(String, BTreeSet<&'static str>)> = Vec::new();
    for message in messages {
        let Some(email) = util::email_address(&message.from) else {
            continue;
        };
        let text = format!("{} {}", message.subject, message.content).to_lowercase();
        let found = TOPIC_KEYWORDS.iter().copied().filter(|kw| text.contains(kw));
        match topics.iter().position(|(e, _)| *e == email) {
            Some(i) => topics[i].1.extend(found),
            None => topics.push((email, found.collect())),
        }
    }

    let mut connections = Vec::new();
    for (i, (a, a_topics)) in topics.iter().enumerate() {
        for (b, b_topics) in &topics[i + 1..] {
            let shared: Vec<&str> = a_topics.intersection(b_topics).copied().collect();
            if shared.is_empty() {
                continue;
            }
            let union = a_topics.union(b_topics).count();
            let similarity = shared.len() as f64 / union as f64 * 100.0;
            if similarity > MIN_TOPIC_SIMILARITY {
                connections.push(Connection {
                    contact1: a.clone(),
                    contact2: b.clone(),
                    connection_type: ConnectionType::SimilarTopics,
                    strength: (similarity * 1.5).min(100.0),
                    evidence: vec![format!("Shared topics: {}", shared.join(", "))],
                });
            }
        }
    }
    connections
}

/// Every connection, one per unordered pair. The strongest kind wins; equal
/// strengths merge their evidence. Output is sorted by strength, then pair.
pub fn find_all_connections(messages: &[RawMessage]) -> Vec<Connection> {
    let mut merged: Vec<Connection> = Vec::new();
    for conn in shared_domain_connections(messages)
        .into_iter()
        .chain(topic_connections(messages))
    {
        match merged.iter_mut().find(|existing| existing.pair() == conn.pair()) {
            Some(existing) if conn.strength > existing.strength => *existing = conn,
            Some(existing) if conn.strength == existing.strength => {
                existing.evidence.extend(conn.evidence)
            }
            Some(_) => {}
            None => merged.push(conn),
        }
    }

    merged.sort_by(|a, b| {
        b.strength
            .total_cmp(&a.strength)
            .then_with(|| a.pair().cmp(&b.pair()))
    });
    merged
}
