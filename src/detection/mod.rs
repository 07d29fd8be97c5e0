// Detection module
// Orchestrates grid inference, template matching and post-processing into
// a list of identified items for one screenshot.

pub mod cache;
pub mod calibration;
pub mod channels;
pub mod detector;
pub mod geometry;
pub mod nms;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export the main types and functions for easy access
pub use cache::ResultCache;
pub use channels::create_progress_channel;
pub use detector::{ItemDetector, spawn_cache_sweeper};
pub use geometry::verify_geometry;
pub use nms::non_max_suppression;
pub use types::{
    Detection, DetectionMethod, PipelineStage, ProgressEvent, ReviewRequest, RunStats,
};
