//! Confidence calibration after geometric verification
//!
//! Context boost nudges scores by rarity prior and by co-detected synergy
//! partners. Border validation re-reads each cell's border colour and checks it
//! against the matched item's rarity.

use super::types::Detection;
use crate::catalog::Rarity;
use crate::match_image::color::detect_border_rarity;
use crate::match_image::config::{CalibrationConfig, DetectionConfig};
use crate::template_matching::TemplateStore;
use image::RgbaImage;
use std::collections::HashSet;

/// Apply rarity priors and synergy bonuses in place.
pub fn apply_context_boost(
    detections: &mut [Detection],
    store: &TemplateStore,
    config: &DetectionConfig,
) {
    let present: HashSet<String> = detections.iter().map(|d| d.item_id.clone()).collect();
    let calibration = &config.calibration;

    for detection in detections.iter_mut() {
        let Some(rarity) = detection.rarity else {
            continue;
        };
        let partners = store
            .index_of(&detection.item_id)
            .and_then(|index| store.get(index))
            .map(|record| {
                record
                    .item
                    .synergies
                    .iter()
                    .filter(|s| **s != detection.item_id && present.contains(*s))
                    .count()
            })
            .unwrap_or(0);
        let synergy =
            (partners as f32 * calibration.synergy_bonus).min(calibration.max_synergy_bonus);
        detection.confidence =
            config.clamp_confidence(detection.confidence + rarity.context_adjustment() + synergy);
    }
}

/// Border width used when the grid did not provide one.
pub fn estimated_border_width(cell_size: u32) -> u32 {
    ((cell_size as f32 * 0.07).round() as u32).max(2)
}

/// Result of checking one detection's border.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderCheck {
    Match,
    Missing,
    Mismatch { found: Rarity },
}

pub fn check_border(
    raster: &RgbaImage,
    detection: &Detection,
    border_width: u32,
    config: &CalibrationConfig,
) -> Option<BorderCheck> {
    let expected = detection.rarity?;
    Some(
        match detect_border_rarity(
            raster,
            &detection.roi,
            border_width,
            config.min_border_vote_fraction,
        ) {
            None => BorderCheck::Missing,
            Some(found) if found == expected => BorderCheck::Match,
            Some(found) => BorderCheck::Mismatch { found },
        },
    )
}

/// Re-check border colours; may drop detections in strict mode.
pub fn validate_borders(
    raster: &RgbaImage,
    detections: Vec<Detection>,
    border_width: Option<u32>,
    config: &DetectionConfig,
) -> Vec<Detection> {
    let calibration = &config.calibration;
    detections
        .into_iter()
        .filter_map(|mut detection| {
            let width = border_width.unwrap_or_else(|| estimated_border_width(detection.roi.width));
            let adjusted = match check_border(raster, &detection, width, calibration) {
                None => detection.confidence,
                Some(BorderCheck::Match) => detection.confidence + calibration.border_match_bonus,
                Some(BorderCheck::Missing) => {
                    detection.confidence - calibration.missing_border_penalty
                }
                Some(BorderCheck::Mismatch { found }) => {
                    let expected = detection.rarity.unwrap_or(Rarity::Common);
                    if calibration.strict_border && expected != Rarity::Common {
                        log::info!(
                            "❌ Dropping {} at ({},{}): border is {} but item is {}",
                            detection.item_id,
                            detection.roi.x,
                            detection.roi.y,
                            found,
                            expected
                        );
                        return None;
                    }
                    log::debug!(
                        "⚠️ Border mismatch for {}: expected {}, found {}",
                        detection.item_id,
                        expected,
                        found
                    );
                    detection.confidence * calibration.mismatch_factor
                }
            };
            detection.confidence = config.clamp_confidence(adjusted);
            Some(detection)
        })
        .collect()
}
