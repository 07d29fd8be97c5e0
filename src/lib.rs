//! Item-icon detection for MegaBonk screenshots
//!
//! Given a screenshot and a catalog of item icons, identifies which items
//! the player holds, where each icon sits, and its stack count.

pub mod args;
pub mod catalog;
pub mod detection;
pub mod error;
pub mod match_image;
pub mod template_matching;

#[cfg(test)]
mod test_utils;

pub use catalog::{GameItem, ItemCatalog, Rarity, TrainingIndex};
pub use detection::{Detection, DetectionMethod, ItemDetector, ProgressEvent, RunStats};
pub use error::{DetectError, DetectResult};
pub use match_image::{DetectionConfig, Roi};
pub use template_matching::TemplateStore;
