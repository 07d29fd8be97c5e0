//! Configuration for the detection pipeline

use super::region::Roi;
use serde::{Deserialize, Serialize};

/// Relative weight of each similarity metric. A zero weight disables the metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricWeights {
    pub ssim: f32,
    pub ncc: f32,
    pub histogram: f32,
    pub edge: f32,
}

impl Default for MetricWeights {
    fn default() -> Self {
        Self {
            ssim: 0.35,
            ncc: 0.25,
            histogram: 0.25,
            edge: 0.15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    pub weights: MetricWeights,
    /// Contrast stretch factor applied around the 128 midpoint
    pub contrast_factor: f32,
    /// Channels with a smaller value range are left unnormalized
    pub min_channel_range: f32,
    /// A metric "agrees" when it reaches this score
    pub agreement_threshold: f32,
    /// Minimum number of agreeing metrics before any bonus is given
    pub agreement_min_metrics: usize,
    /// Upper bound of the agreement bonus
    pub agreement_bonus_cap: f32,
    pub min_confidence: f32,
    pub max_confidence: f32,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            weights: MetricWeights::default(),
            contrast_factor: 1.2,
            min_channel_range: 24.0,
            agreement_threshold: 0.7,
            agreement_min_metrics: 3,
            agreement_bonus_cap: 0.05,
            min_confidence: 0.30,
            max_confidence: 0.99,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Fraction of the raster height where the icon band search starts
    pub band_search_start: f32,
    /// Band height as a fraction of the raster height
    pub band_height_ratio: f32,
    pub min_band_height: u32,
    pub max_band_height: u32,
    /// Fraction of the band height added above and below before edge scanning
    pub band_expand_ratio: f32,
    pub scan_lines: usize,
    pub min_edge_width: u32,
    pub max_edge_width: u32,
    /// Tolerance when clustering edges from different scan lines (px)
    pub edge_cluster_tolerance: f32,
    pub min_line_support: usize,
    /// Tolerance when comparing edge gaps to the dominant spacing (px)
    pub spacing_tolerance: f32,
    pub min_cell_size: u32,
    pub max_cell_size: u32,
    /// Largest multiple of the stride accepted for skipped slots
    pub max_skip_multiple: u32,
    /// Minimum grid confidence before the grid is used for matching
    pub min_confidence: f32,
    /// Minimum number of columns before the grid is used for matching
    pub min_columns: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            band_search_start: 0.35,
            band_height_ratio: 0.15,
            min_band_height: 24,
            max_band_height: 160,
            band_expand_ratio: 0.25,
            scan_lines: 5,
            min_edge_width: 2,
            max_edge_width: 8,
            edge_cluster_tolerance: 3.0,
            min_line_support: 2,
            spacing_tolerance: 3.0,
            min_cell_size: 16,
            max_cell_size: 160,
            max_skip_multiple: 4,
            min_confidence: 0.4,
            min_columns: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Score a candidate must exceed when its template has no ranking history
    pub match_threshold: f32,
    /// Gray variance under which a region counts as empty background
    pub empty_variance: f32,
    /// Gray variance under which a region is too flat to identify
    pub low_variance: f32,
    /// Candidates evaluated when no colour bucket matches
    pub fallback_sample_size: usize,
    /// Multiplier when the primary template beats every training variant
    pub primary_bonus: f32,
    /// Variant score that counts as a vote
    pub vote_threshold: f32,
    pub vote_bonus: f32,
    pub max_vote_bonus: f32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.45,
            empty_variance: 40.0,
            low_variance: 90.0,
            fallback_sample_size: 24,
            primary_bonus: 1.05,
            vote_threshold: 0.75,
            vote_bonus: 0.02,
            max_vote_bonus: 0.06,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlidingWindowConfig {
    pub window_sizes: Vec<u32>,
    /// Step sizes as fractions of the window size, scanned in order
    pub step_ratios: Vec<f32>,
    /// Fraction of the window trimmed on each side before matching; unset
    /// trims the border width expected for that window size
    pub inset_ratio: Option<f32>,
    /// Fixed hotbar region; the inferred icon band is used when unset
    pub hotbar_region: Option<Roi>,
    /// Fixed equipment region; the top-left corner is used when unset
    pub equipment_region: Option<Roi>,
    pub scan_equipment: bool,
}

impl Default for SlidingWindowConfig {
    fn default() -> Self {
        Self {
            window_sizes: vec![40, 48, 56, 64],
            step_ratios: vec![0.5, 0.25],
            inset_ratio: None,
            hotbar_region: None,
            equipment_region: None,
            scan_equipment: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    pub nms_iou_threshold: f32,
    /// Row clustering tolerance as a fraction of the icon size
    pub row_tolerance_ratio: f32,
    pub min_tolerance_ratio: f32,
    pub max_tolerance_ratio: f32,
    pub max_skip_multiple: u32,
    /// The filter is abandoned when it would keep less than this share of the input
    pub min_keep_ratio: f32,
    pub min_detections: usize,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            nms_iou_threshold: 0.3,
            row_tolerance_ratio: 0.5,
            min_tolerance_ratio: 0.15,
            max_tolerance_ratio: 0.35,
            max_skip_multiple: 4,
            min_keep_ratio: 0.5,
            min_detections: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub enable_context_boost: bool,
    pub synergy_bonus: f32,
    pub max_synergy_bonus: f32,
    pub enable_border_validation: bool,
    /// Drop non-common detections whose border shows another rarity
    pub strict_border: bool,
    pub border_match_bonus: f32,
    pub missing_border_penalty: f32,
    pub mismatch_factor: f32,
    /// Share of border pixels a rarity needs to win the vote
    pub min_border_vote_fraction: f32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            enable_context_boost: true,
            synergy_bonus: 0.03,
            max_synergy_bonus: 0.05,
            enable_border_validation: true,
            strict_border: false,
            border_match_bonus: 0.05,
            missing_border_penalty: 0.03,
            mismatch_factor: 0.7,
            min_border_vote_fraction: 0.15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub enabled: bool,
    pub min_confidence: f32,
    /// Below this confidence the count is snapped to a common stack size
    pub snap_below: f32,
    /// Right-hand share of the cell interior searched for digits
    pub region_width_ratio: f32,
    /// Bottom share of the cell interior searched for digits
    pub region_height_ratio: f32,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_confidence: 0.5,
            snap_below: 0.7,
            region_width_ratio: 0.65,
            region_height_ratio: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub result_capacity: usize,
    pub result_ttl_ms: u64,
    pub template_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            result_capacity: 32,
            result_ttl_ms: 300_000,
            template_capacity: 2048,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub min_usage_count: u32,
    pub skip_threshold: f32,
    /// Share of uses confused with another item that forces a skip
    pub confusion_skip_ratio: f32,
    /// Templates below this success rate are never evaluated
    pub min_success_rate: f32,
    pub decay_half_life_secs: u64,
    pub cache_ttl_ms: u64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            min_usage_count: 5,
            skip_threshold: 0.3,
            confusion_skip_ratio: 0.5,
            min_success_rate: 0.15,
            decay_half_life_secs: 7 * 24 * 3600,
            cache_ttl_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub similarity: SimilarityConfig,
    pub grid: GridConfig,
    pub matcher: MatcherConfig,
    pub sliding: SlidingWindowConfig,
    pub geometry: GeometryConfig,
    pub calibration: CalibrationConfig,
    pub stack: StackConfig,
    pub cache: CacheConfig,
    pub ranking: RankingConfig,
    /// Worker threads for candidate scoring; 0 scans on the calling thread
    pub worker_count: usize,
    pub review_queue_capacity: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            similarity: SimilarityConfig::default(),
            grid: GridConfig::default(),
            matcher: MatcherConfig::default(),
            sliding: SlidingWindowConfig::default(),
            geometry: GeometryConfig::default(),
            calibration: CalibrationConfig::default(),
            stack: StackConfig::default(),
            cache: CacheConfig::default(),
            ranking: RankingConfig::default(),
            worker_count: 0,
            review_queue_capacity: 256,
        }
    }
}

impl DetectionConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn min_confidence(&self) -> f32 {
        self.similarity.min_confidence
    }

    pub fn max_confidence(&self) -> f32 {
        self.similarity.max_confidence
    }

    pub fn clamp_confidence(&self, confidence: f32) -> f32 {
        confidence.clamp(self.min_confidence(), self.max_confidence())
    }
}

/// Create a default configuration for screenshot detection
pub fn create_default_config() -> DetectionConfig {
    DetectionConfig::default()
}

/// Configuration preset that trusts rarity borders over pixel similarity
pub fn create_strict_config() -> DetectionConfig {
    let mut config = DetectionConfig::default();
    config.matcher.match_threshold = 0.55;
    config.calibration.strict_border = true;
    config.geometry.max_tolerance_ratio = 0.25;
    config
}

/// Configuration preset for quick previews on large screenshots
pub fn create_fast_config() -> DetectionConfig {
    let mut config = DetectionConfig::default();
    config.sliding.window_sizes = vec![48];
    config.sliding.step_ratios = vec![0.5];
    config.matcher.fallback_sample_size = 12;
    config.stack.enabled = false;
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_sum_to_one() {
        let w = MetricWeights::default();
        assert!((w.ssim + w.ncc + w.histogram + w.edge - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = DetectionConfig::from_json_str(
            r#"{"calibration": {"strict_border": true}, "worker_count": 2}"#,
        )
        .unwrap();
        assert!(config.calibration.strict_border);
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.calibration.mismatch_factor, 0.7);
        assert_eq!(config.similarity.min_confidence, 0.30);
        assert_eq!(config.grid.min_columns, 3);
    }

    #[test]
    fn test_presets() {
        assert!(create_strict_config().calibration.strict_border);
        assert!(!create_default_config().calibration.strict_border);
        assert_eq!(create_fast_config().sliding.window_sizes, vec![48]);
        let config = create_default_config();
        assert_eq!(config.clamp_confidence(1.5), 0.99);
        assert_eq!(config.clamp_confidence(0.0), 0.30);
    }
}
