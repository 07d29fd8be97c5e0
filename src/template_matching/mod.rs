/// Template matching module for item icon identification
///
/// This module provides:
/// - A template store with colour-bucketed lookup and an LRU of resized copies
/// - Per-region candidate matching with training-variant voting
/// - Outcome-driven template ranking that feeds a skip-list back into matching
pub mod matcher;
pub mod ranking;
pub mod store;
pub mod types;

pub use matcher::{CandidateMatcher, RegionVerdict};
pub use ranking::{TemplatePerformance, TemplateRanker, TemplateRanking};
pub use store::TemplateStore;
pub use types::{MatchCandidate, TemplateRecord, TrainingVariant};
