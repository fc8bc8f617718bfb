//! "From" header helpers shared by the alert rules, relationship scoring and
//! pattern recognition.

use std::sync::OnceLock;

use regex::Regex;

fn display_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.*?)\s*<(.+?)>").expect("static regex"))
}

fn angle_address_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<(.+?)>").expect("static regex"))
}

/// Display name from a "From" header.
///
/// `"Alice Smith" <alice@acme.org>` → `Alice Smith`. Headers without a
/// display name fall back to the local part before `@`.
pub fn contact_name(from: &str) -> String {
    if let Some(caps) = display_name_re().captures(from) {
        let name = caps[1].trim().replace('"', "");
        if !name.is_empty() {
            return name;
        }
        return local_part(caps[2].trim());
    }
    local_part(from.trim())
}

fn local_part(address: &str) -> String {
    address.split('@').next().unwrap_or(address).trim().to_string()
}

/// Address from a "From" header, lowercased. `None` when there is no `@`.
pub fn email_address(from: &str) -> Option<String> {
    if let Some(caps) = angle_address_re().captures(from) {
        let addr = caps[1].trim();
        if addr.contains('@') {
            return Some(addr.to_lowercase());
        }
        return None;
    }
    let trimmed = from.trim();
    if trimmed.contains('@') {
        Some(trimmed.to_lowercase())
    } else {
        None
    }
}

/// Organization derived from the sender's domain.
///
/// `sarah@acme.com` → `Acme`. Missing or empty domains yield `None`.
pub fn organization(from: &str) -> Option<String> {
    let email = email_address(from)?;
    let domain = email.split('@').nth(1).filter(|d| !d.is_empty())?;
    let org_part = domain.split('.').next().filter(|p| !p.is_empty())?;
    let mut chars = org_part.chars();
    chars
        .next()
        .map(|c| c.to_uppercase().to_string() + chars.as_str())
}

/// Domain portion of an address, if any.
pub fn email_domain(email: &str) -> Option<&str> {
    email.split('@').nth(1).filter(|d| !d.is_empty())
}

/// Automated senders never count as relationships.
pub fn is_no_reply(email: &str) -> bool {
    let lower = email.to_lowercase();
    lower.contains("noreply") || lower.contains("no-reply")
}

/// Plural suffix helper for human-readable counts.
pub fn plural(count: usize, singular: &'static str, plural: &'static str) -> &'static str {
    if count == 1 {
        singular
    } else {
        plural
    }
}
