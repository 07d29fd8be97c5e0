//! Item catalog and training-sample index consumed by the detector

use crate::error::{DetectError, DetectResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Rarity tier of an item, shown in game as a coloured icon border.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

impl Rarity {
    pub const ALL: [Rarity; 5] = [
        Rarity::Common,
        Rarity::Uncommon,
        Rarity::Rare,
        Rarity::Epic,
        Rarity::Legendary,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Rarity::Common => "common",
            Rarity::Uncommon => "uncommon",
            Rarity::Rare => "rare",
            Rarity::Epic => "epic",
            Rarity::Legendary => "legendary",
        }
    }

    /// Prior adjustment applied during context boosting. Frequent tiers gain a
    /// little, rare tiers need slightly more pixel evidence.
    pub fn context_adjustment(self) -> f32 {
        match self {
            Rarity::Common => 0.02,
            Rarity::Uncommon => 0.01,
            Rarity::Rare => 0.0,
            Rarity::Epic => -0.01,
            Rarity::Legendary => -0.02,
        }
    }

    /// Confidence below which a detection of this tier is queued for human review.
    pub fn review_threshold(self) -> f32 {
        match self {
            Rarity::Common => 0.50,
            Rarity::Uncommon => 0.55,
            Rarity::Rare => 0.60,
            Rarity::Epic => 0.65,
            Rarity::Legendary => 0.70,
        }
    }
}

impl std::fmt::Display for Rarity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry of the game item catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameItem {
    pub id: String,
    pub name: String,
    pub rarity: Rarity,
    pub icon_path: String,
    /// Items that are commonly built together with this one.
    #[serde(default)]
    pub synergies: Vec<String>,
}

impl GameItem {
    pub fn new(id: &str, name: &str, rarity: Rarity, icon_path: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            rarity,
            icon_path: icon_path.to_string(),
            synergies: Vec::new(),
        }
    }

    pub fn with_synergies(mut self, synergies: &[&str]) -> Self {
        self.synergies = synergies.iter().map(|s| s.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemCatalog {
    pub items: Vec<GameItem>,
}

impl ItemCatalog {
    pub fn new(items: Vec<GameItem>) -> Self {
        Self { items }
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn load_from_file(path: &Path) -> DetectResult<Self> {
        let text = read_text(path)?;
        Self::from_json_str(&text).map_err(|source| DetectError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn get(&self, id: &str) -> Option<&GameItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// How a stored training sample was validated by a reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationType {
    /// A reviewer fixed a wrong detection; the strongest evidence.
    Corrected,
    /// A reviewer confirmed a detection as correct.
    Verified,
    /// Captured automatically from a high-confidence run.
    Auto,
    #[serde(other)]
    Unreviewed,
}

impl ValidationType {
    pub fn weight(self) -> f32 {
        let weight: f32 = match self {
            ValidationType::Corrected => 1.5,
            ValidationType::Verified => 1.2,
            ValidationType::Unreviewed => 1.0,
            ValidationType::Auto => 0.8,
        };
        weight.clamp(0.8, 1.5)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSample {
    pub file: String,
    #[serde(default)]
    pub resolution: Option<String>,
    pub validation_type: ValidationType,
    #[serde(default)]
    pub source_image: Option<String>,
}

impl TrainingSample {
    /// Human-readable origin, e.g. `verified@1920x1080 from run_12.png`.
    pub fn provenance(&self) -> String {
        let mut text = format!("{:?}", self.validation_type).to_lowercase();
        if let Some(resolution) = &self.resolution {
            text.push('@');
            text.push_str(resolution);
        }
        if let Some(source) = &self.source_image {
            text.push_str(" from ");
            text.push_str(source);
        }
        text
    }
}

/// Training samples keyed by item id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrainingIndex {
    pub samples: HashMap<String, Vec<TrainingSample>>,
}

impl TrainingIndex {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn load_from_file(path: &Path) -> DetectResult<Self> {
        let text = read_text(path)?;
        Self::from_json_str(&text).map_err(|source| DetectError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn samples_for(&self, item_id: &str) -> &[TrainingSample] {
        self.samples.get(item_id).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn read_text(path: &Path) -> DetectResult<String> {
    std::fs::read_to_string(path).map_err(|source| DetectError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_catalog_with_camel_case_fields() {
        let json = r#"[
            {"id": "ghost", "name": "Ghost", "rarity": "epic", "iconPath": "items/ghost.png"},
            {"id": "battery", "name": "Battery", "rarity": "common", "iconPath": "items/battery.png",
             "synergies": ["ghost"]}
        ]"#;
        let catalog = ItemCatalog::from_json_str(json).unwrap();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("ghost").unwrap().rarity, Rarity::Epic);
        assert_eq!(catalog.get("battery").unwrap().synergies, vec!["ghost"]);
        assert!(catalog.get("ghost").unwrap().synergies.is_empty());
    }

    #[test]
    fn test_parse_training_index_and_weights() {
        let json = r#"{
            "ghost": [
                {"file": "ghost_1.png", "resolution": "1920x1080", "validationType": "corrected", "sourceImage": "run_1.png"},
                {"file": "ghost_2.png", "validationType": "something_new"}
            ]
        }"#;
        let index = TrainingIndex::from_json_str(json).unwrap();
        let samples = index.samples_for("ghost");

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].validation_type.weight(), 1.5);
        assert_eq!(samples[1].validation_type, ValidationType::Unreviewed);
        assert_eq!(samples[0].provenance(), "corrected@1920x1080 from run_1.png");
        assert!(index.samples_for("missing").is_empty());
    }

    #[test]
    fn test_variant_weights_stay_in_range() {
        for validation in [
            ValidationType::Corrected,
            ValidationType::Verified,
            ValidationType::Auto,
            ValidationType::Unreviewed,
        ] {
            let w = validation.weight();
            assert!((0.8..=1.5).contains(&w));
        }
    }

    #[test]
    fn test_rarity_review_thresholds_increase() {
        let thresholds: Vec<f32> = Rarity::ALL.iter().map(|r| r.review_threshold()).collect();
        assert!(thresholds.windows(2).all(|w| w[0] < w[1]));
    }
}
