// Types and enums for the detection pipeline
use crate::catalog::Rarity;
use crate::match_image::region::Roi;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    GridMatch,
    SlidingWindow,
    EquipmentScan,
    Manual,
    /// Empty result for an unusable region
    None,
}

/// One identified item icon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub item_id: String,
    pub item_name: String,
    pub rarity: Option<Rarity>,
    /// Always within the configured confidence range
    pub confidence: f32,
    pub roi: Roi,
    pub method: DetectionMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_confidence: Option<f32>,
}

impl Detection {
    /// Placeholder returned for a region that could not be evaluated.
    pub fn none(roi: Roi, confidence: f32) -> Self {
        Self {
            item_id: String::new(),
            item_name: String::new(),
            rarity: None,
            confidence,
            roi,
            method: DetectionMethod::None,
            template_id: None,
            stack_count: None,
            stack_confidence: None,
        }
    }

    pub fn is_none(&self) -> bool {
        self.method == DetectionMethod::None
    }

    pub fn center(&self) -> (f32, f32) {
        self.roi.center_f32()
    }
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    GridAttempt,
    GridMatch,
    SlidingWindow,
    EquipmentScan,
    Nms,
    GeometricVerify,
    ContextBoost,
    BorderValidate,
    StackAugment,
    CacheReturn,
}

impl PipelineStage {
    pub fn label(self) -> &'static str {
        match self {
            PipelineStage::Idle => "idle",
            PipelineStage::GridAttempt => "inferring grid",
            PipelineStage::GridMatch => "matching grid cells",
            PipelineStage::SlidingWindow => "sliding-window scan",
            PipelineStage::EquipmentScan => "scanning equipment",
            PipelineStage::Nms => "suppressing overlaps",
            PipelineStage::GeometricVerify => "verifying layout",
            PipelineStage::ContextBoost => "applying context",
            PipelineStage::BorderValidate => "validating borders",
            PipelineStage::StackAugment => "reading stack counts",
            PipelineStage::CacheReturn => "done",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    /// 0-100
    pub percent: u8,
    pub stage: PipelineStage,
    pub message: String,
}

/// Aggregate run statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    /// Calls to `detect`, including cache hits
    pub runs: u64,
    /// Full pipeline scans actually executed
    pub scans: u64,
    pub cache_hits: u64,
    pub rejected_concurrent: u64,
    pub grid_runs: u64,
    pub sliding_runs: u64,
    pub regions_evaluated: u64,
    pub detections_emitted: u64,
    pub result_cache_evictions: u64,
    pub template_cache_evictions: u64,
    pub outcomes_recorded: u64,
    pub last_run_ms: u64,
}

/// Low-confidence detection waiting for human review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    pub detection: Detection,
    /// Rarity threshold the confidence fell below
    pub threshold: f32,
}
