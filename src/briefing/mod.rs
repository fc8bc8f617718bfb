//! Daily briefing generation.
//!
//! Pure rule and scoring modules sit at the bottom; `orchestrate` sequences
//! them against the sources, the models and the store.

pub mod alerts;
pub mod calendar_intel;
pub mod commitments;
pub mod connections;
pub mod dedup;
pub mod insights;
pub mod orchestrate;
pub mod patterns;
pub mod relationships;
pub mod scoring;

pub use orchestrate::BriefingOrchestrator;
