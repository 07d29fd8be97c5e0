//! Pixel-level image analysis for item icon recognition
//!
//! Region helpers, colour classification, multi-metric similarity, grid
//! inference and stack-count reading. Everything here is pure and works on
//! `image::RgbaImage` rasters; orchestration lives in `detection`.

pub mod color;
pub mod config;
pub mod grid;
pub mod region;
pub mod similarity;
pub mod stack_count;

// Re-export main types and functions
pub use color::{ColorCategory, ColorProfile, RegionStats, classify_color, detect_border_rarity};
pub use config::{
    CacheConfig, CalibrationConfig, DetectionConfig, GeometryConfig, GridConfig, MatcherConfig,
    RankingConfig, SimilarityConfig, SlidingWindowConfig, StackConfig, create_default_config,
    create_fast_config, create_strict_config,
};
pub use grid::{GridInference, GridParameters, IconBand, infer_grid};
pub use region::{RegionManager, Roi, crop_region, raster_from_rgba};
pub use similarity::{SimilarityBreakdown, compare_regions, similarity};
pub use stack_count::{StackReading, read_stack_count};
