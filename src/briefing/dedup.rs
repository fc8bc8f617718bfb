//! Near-duplicate alert folding.
//!
//! Two candidates are duplicates when type, category and contact match and
//! their titles are more than 70% similar (normalized Levenshtein, case
//! folded). Of a duplicate group the candidate with the earliest deadline is
//! kept; any deadline beats none; on a tie the first seen stays.

use crate::types::AlertCandidate;

pub const TITLE_SIMILARITY_THRESHOLD: f64 = 0.7;

pub fn title_similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&a.to_lowercase(), &b.to_lowercase())
}

pub fn is_duplicate(a: &AlertCandidate, b: &AlertCandidate) -> bool {
    a.alert_type == b.alert_type
        && a.category == b.category
        && a.contact_name == b.contact_name
        && title_similarity(&a.title, &b.title) > TITLE_SIMILARITY_THRESHOLD
}

/// Whether `challenger` should replace `incumbent`.
fn outranks(challenger: &AlertCandidate, incumbent: &AlertCandidate) -> bool {
    match (challenger.deadline, incumbent.deadline) {
        (Some(c), Some(i)) => c < i,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Single pass. Kept alerts are pairwise distinct at every step: when a
/// candidate matches several kept alerts, the whole group collapses into its
/// best member at the position of the earliest match.
pub fn deduplicate(candidates: Vec<AlertCandidate>) -> Vec<AlertCandidate> {
    let mut kept: Vec<AlertCandidate> = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        let matches: Vec<usize> = kept
            .iter()
            .enumerate()
            .filter(|(_, existing)| is_duplicate(existing, &candidate))
            .map(|(i, _)| i)
            .collect();

        let Some(&slot) = matches.first() else {
            kept.push(candidate);
            continue;
        };

        let mut group: Vec<AlertCandidate> = Vec::with_capacity(matches.len() + 1);
        for &i in matches.iter().rev() {
            group.push(kept.remove(i));
        }
        group.reverse();
        group.push(candidate);

        let mut members = group.into_iter();
        let Some(mut best) = members.next() else {
            continue;
        };
        for member in members {
            if outranks(&member, &best) {
                best = member;
            }
        }
        kept.insert(slot, best);
    }

    kept
}
