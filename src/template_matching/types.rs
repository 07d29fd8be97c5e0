/// Template matching data types
use crate::catalog::{GameItem, Rarity};
use crate::match_image::color::{ColorProfile, RegionStats};
use image::RgbaImage;
use serde::Serialize;
use std::sync::Arc;

/// A stored training sample used as an additional template for one item
#[derive(Clone, Debug)]
pub struct TrainingVariant {
    pub image: Arc<RgbaImage>,
    /// Provenance weight in [0.8, 1.5]
    pub weight: f32,
    /// Where the sample came from (e.g. "corrected@1920x1080 from run_3.png")
    pub provenance: String,
}

impl TrainingVariant {
    pub fn new(image: RgbaImage, weight: f32, provenance: &str) -> Self {
        Self {
            image: Arc::new(image),
            weight: weight.clamp(0.8, 1.5),
            provenance: provenance.to_string(),
        }
    }
}

/// Reference icon of one catalog item plus its training variants
#[derive(Clone, Debug)]
pub struct TemplateRecord {
    pub item: GameItem,
    pub image: Arc<RgbaImage>,
    /// Colour bucket used for candidate pre-filtering
    pub profile: ColorProfile,
    pub variants: Vec<TrainingVariant>,
}

impl TemplateRecord {
    pub fn new(item: GameItem, image: RgbaImage) -> Self {
        let profile = RegionStats::compute(&image).profile();
        Self {
            item,
            image: Arc::new(image),
            profile,
            variants: Vec::new(),
        }
    }

    pub fn with_variant(mut self, variant: TrainingVariant) -> Self {
        self.variants.push(variant);
        self
    }

    /// Ranking key of the primary template
    pub fn template_id(&self) -> &str {
        &self.item.id
    }

    /// Ranking key of one training variant
    pub fn variant_id(&self, index: usize) -> String {
        format!("{}#v{}", self.item.id, index)
    }

    /// Get the template name for display
    pub fn display_name(&self) -> String {
        format!(
            "{} [{}] {}x{} +{} variants",
            self.item.name,
            self.item.rarity,
            self.image.width(),
            self.image.height(),
            self.variants.len()
        )
    }
}

/// Best-scoring item for one region
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCandidate {
    pub item_id: String,
    pub item_name: String,
    pub rarity: Rarity,
    /// Template that won the vote (primary id or variant id)
    pub template_id: String,
    /// Final score after voting, clamped to the confidence range
    pub confidence: f32,
    /// Similarity of the winning template before voting adjustments
    pub similarity: f32,
    /// Variant index when a training variant won
    pub variant: Option<usize>,
    /// Variants that scored above the vote threshold
    pub votes: usize,
    /// Threshold the score had to exceed
    pub threshold: f32,
}

impl MatchCandidate {
    /// Format candidate with confidence percentage
    pub fn summary(&self) -> String {
        let source = match self.variant {
            Some(index) => format!("variant {index}"),
            None => "primary".to_string(),
        };
        format!(
            "{} ({}) - {}% via {}, {} votes",
            self.item_name,
            self.item_id,
            (self.confidence * 100.0) as u32,
            source,
            self.votes
        )
    }
}
