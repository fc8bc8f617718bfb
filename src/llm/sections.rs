//! Labeled-section parsing for model replies such as
//!
//! ```text
//! CONSENSUS: ...
//! DISSENT: ...
//! RECOMMENDATION: ...
//! ```
//!
//! A label opens a section when it starts a line and is followed by a colon.
//! Markdown markers (`#`, `*`, `-`) and list numbering (`1.`, `2)`) may
//! precede it. The section runs until the next
//! known label or the end of the text.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

fn attendee_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*[-•*]\s*([^\s:]+@[^\s:]+)\s*:\s*(.+)$").expect("static regex")
    })
}

/// Split `text` into the sections named by `labels`. Labels match
/// case-insensitively; the map is keyed by the label as given. Empty sections
/// and labels that never appear are absent. When a label repeats, the first
/// occurrence wins.
pub fn parse_sections(text: &str, labels: &[&str]) -> HashMap<String, String> {
    let mut sections = HashMap::new();
    if labels.is_empty() {
        return sections;
    }

    let alternation = labels
        .iter()
        .map(|label| regex::escape(label))
        .collect::<Vec<_>>()
        .join("|");
    let Ok(header) = Regex::new(&format!(r"(?mi)^[\s#*\-]*(?:\d+[.)]\s*)?\**({alternation})\**\s*:\**")) else {
        return sections;
    };

    let headers: Vec<(usize, usize, String)> = header
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let name = caps.get(1)?.as_str();
            let canonical = labels
                .iter()
                .find(|label| label.eq_ignore_ascii_case(name))?;
            Some((whole.start(), whole.end(), canonical.to_string()))
        })
        .collect();

    for (i, (_, body_start, label)) in headers.iter().enumerate() {
        let body_end = headers
            .get(i + 1)
            .map(|(next_start, _, _)| *next_start)
            .unwrap_or(text.len());
        let body = text[*body_start..body_end].trim();
        if !body.is_empty() && !sections.contains_key(label) {
            sections.insert(label.clone(), body.to_string());
        }
    }
    sections
}

/// Lines of a section that are bullets (`-`, `•` or `*`), with the marker
/// stripped.
pub fn bullet_lines(section: &str) -> Vec<String> {
    section
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            line.strip_prefix('-')
                .or_else(|| line.strip_prefix('•'))
                .or_else(|| line.strip_prefix('*'))
        })
        .map(|rest| rest.trim().to_string())
        .filter(|rest| !rest.is_empty())
        .collect()
}

/// `- email@domain: context` lines as `(email, context)` pairs.
pub fn attendee_lines(section: &str) -> Vec<(String, String)> {
    section
        .lines()
        .filter_map(|line| {
            let caps = attendee_line_re().captures(line)?;
            Some((caps[1].to_lowercase(), caps[2].trim().to_string()))
        })
        .collect()
}
