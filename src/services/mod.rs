//! Read and mutation surface over the briefing store.
//!
//! Callers (the binary, or any front end embedding the library) go through
//! these functions instead of touching repositories directly.

pub mod briefings;

pub use briefings::{
    generate_briefing, get_briefing_detail, get_latest_briefing_detail, list_relationships,
    metrics_snapshot, subscribe_progress, toggle_alert_completion,
};
