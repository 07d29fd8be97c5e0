//! Non-maximum suppression over overlapping detections

use super::types::Detection;

/// Keep the most confident detection of every overlapping group.
///
/// Detections are visited by descending confidence (stable for ties); one is
/// kept unless its IoU with an already kept detection exceeds `iou_threshold`.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    if detections.len() <= 1 {
        return detections;
    }
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for detection in detections {
        if kept
            .iter()
            .all(|k| k.roi.iou(&detection.roi) <= iou_threshold)
        {
            kept.push(detection);
        }
    }
    kept
}
