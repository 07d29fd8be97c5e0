//! Geometric verification of detections against a row-wise icon layout
//!
//! Icons in the hotbar and equipment panels sit on regular rows. Detections are
//! grouped into rows by centre Y, each row gets a dominant X spacing, and a
//! detection survives when some row neighbour sits a whole number of spacings
//! away. The tolerance adapts to the observed spacing noise.

use super::types::Detection;
use crate::match_image::config::GeometryConfig;

/// Detections sharing one row, as indices into the input.
#[derive(Debug, Clone)]
struct Row {
    members: Vec<usize>,
    center_y: f32,
}

fn median(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let m = values.len();
    if m % 2 == 1 {
        values[m / 2]
    } else {
        0.5 * (values[m / 2 - 1] + values[m / 2])
    }
}

fn cluster_rows(detections: &[Detection], tolerance: f32) -> Vec<Row> {
    let mut order: Vec<usize> = (0..detections.len()).collect();
    order.sort_by(|&a, &b| {
        detections[a]
            .center()
            .1
            .partial_cmp(&detections[b].center().1)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut rows: Vec<Vec<usize>> = Vec::new();
    for index in order {
        let y = detections[index].center().1;
        match rows.last_mut() {
            Some(row)
                if row
                    .last()
                    .is_some_and(|&last| (y - detections[last].center().1).abs() <= tolerance) =>
            {
                row.push(index)
            }
            _ => rows.push(vec![index]),
        }
    }

    rows.into_iter()
        .map(|mut members| {
            members.sort_by(|&a, &b| {
                detections[a]
                    .center()
                    .0
                    .partial_cmp(&detections[b].center().0)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            let center_y = members
                .iter()
                .map(|&i| detections[i].center().1)
                .sum::<f32>()
                / members.len() as f32;
            Row { members, center_y }
        })
        .collect()
}

/// Mode of `gaps` with bucket width `tolerance`; ties go to the smaller gap.
pub fn dominant_gap(gaps: &[f32], tolerance: f32) -> Option<f32> {
    let mut sorted: Vec<f32> = gaps.iter().copied().filter(|g| *g > 0.0).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mut best: Option<(usize, f32)> = None;
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i;
        while j < sorted.len() && sorted[j] - sorted[i] <= tolerance {
            j += 1;
        }
        let mean = sorted[i..j].iter().sum::<f32>() / (j - i) as f32;
        if best.is_none_or(|(count, _)| j - i > count) {
            best = Some((j - i, mean));
        }
        i = j;
    }
    best.map(|(_, gap)| gap)
}

/// Signed offset of `gap` from the nearest multiple `k * spacing`, `1 <= k <= max_multiple`.
fn multiple_residual(gap: f32, spacing: f32, max_multiple: u32) -> f32 {
    (1..=max_multiple.max(1))
        .map(|k| gap - k as f32 * spacing)
        .fold(f32::INFINITY, |best, r| if r.abs() < best.abs() { r } else { best })
}

fn multiple_deviation(gap: f32, spacing: f32, max_multiple: u32) -> f32 {
    multiple_residual(gap, spacing, max_multiple).abs()
}

/// Adaptive tolerance: two standard deviations of the gap residuals, clamped
/// to a share of the icon size.
fn adaptive_tolerance(residuals: &[f32], icon_size: f32, config: &GeometryConfig) -> f32 {
    let n = residuals.len().max(1) as f32;
    let mean = residuals.iter().sum::<f32>() / n;
    let variance = residuals.iter().map(|r| (r - mean) * (r - mean)).sum::<f32>() / n;
    let spread = 2.0 * variance.sqrt();
    spread.clamp(
        config.min_tolerance_ratio * icon_size,
        config.max_tolerance_ratio * icon_size,
    )
}

/// Indices of row members that have a neighbour on the row's spacing.
fn verify_row(
    detections: &[Detection],
    row: &Row,
    icon_size: f32,
    config: &GeometryConfig,
) -> Vec<usize> {
    if row.members.len() < 2 {
        // Nothing to compare against
        return row.members.clone();
    }
    let xs: Vec<f32> = row.members.iter().map(|&i| detections[i].center().0).collect();
    let gaps: Vec<f32> = xs.windows(2).map(|w| w[1] - w[0]).collect();
    let Some(spacing) = dominant_gap(&gaps, 0.1 * icon_size) else {
        return row.members.clone();
    };

    let residuals: Vec<f32> = gaps
        .iter()
        .map(|g| multiple_residual(*g, spacing, config.max_skip_multiple))
        .collect();
    let tolerance = adaptive_tolerance(&residuals, icon_size, config);

    row.members
        .iter()
        .enumerate()
        .filter(|(a, _)| {
            xs.iter().enumerate().any(|(b, x)| {
                *a != b
                    && multiple_deviation((x - xs[*a]).abs(), spacing, config.max_skip_multiple)
                        <= tolerance
            })
        })
        .map(|(_, &index)| index)
        .collect()
}

/// Drop detections that do not fit the row layout of their neighbours.
///
/// Never returns more detections than it receives. When the filter would
/// discard more than `1 - min_keep_ratio` of the input, the input is returned
/// unchanged.
pub fn verify_geometry(detections: Vec<Detection>, config: &GeometryConfig) -> Vec<Detection> {
    if detections.len() < config.min_detections.max(2) {
        return detections;
    }
    let mut sizes: Vec<f32> = detections
        .iter()
        .map(|d| d.roi.width.max(d.roi.height) as f32)
        .collect();
    let icon_size = median(&mut sizes).max(1.0);
    let rows = cluster_rows(&detections, config.row_tolerance_ratio * icon_size);

    let mut keep = vec![false; detections.len()];
    let mut verified_rows: Vec<&Row> = Vec::new();
    for row in &rows {
        let kept = verify_row(&detections, row, icon_size, config);
        for &index in &kept {
            keep[index] = true;
        }
        if row.members.len() >= 2 {
            verified_rows.push(row);
        }
    }

    // Multi-icon rows inside the panel's vertical span must sit on its row spacing
    if verified_rows.len() >= 3 {
        let centers: Vec<f32> = verified_rows.iter().map(|r| r.center_y).collect();
        let gaps: Vec<f32> = centers.windows(2).map(|w| w[1] - w[0]).collect();
        if let Some(row_spacing) = dominant_gap(&gaps, 0.1 * icon_size) {
            let tolerance = config.max_tolerance_ratio * icon_size;
            let span = row_spacing * config.max_skip_multiple as f32 + tolerance;
            for (r, row) in verified_rows.iter().enumerate() {
                let mut nearby = centers
                    .iter()
                    .enumerate()
                    .filter(|(o, c)| *o != r && (*c - row.center_y).abs() <= span)
                    .peekable();
                if nearby.peek().is_none() {
                    continue;
                }
                let aligned = nearby.any(|(_, c)| {
                    let gap = (c - row.center_y).abs();
                    multiple_deviation(gap, row_spacing, config.max_skip_multiple) <= tolerance
                });
                if !aligned {
                    log::debug!("🔍 Row at y={:.0} is off the row spacing", row.center_y);
                    for &index in &row.members {
                        keep[index] = false;
                    }
                }
            }
        }
    }

    let kept_count = keep.iter().filter(|k| **k).count();
    if (kept_count as f32) < config.min_keep_ratio * detections.len() as f32 {
        log::warn!(
            "⚠️ Geometric verification would keep {}/{} detections, keeping raw set",
            kept_count,
            detections.len()
        );
        return detections;
    }
    if kept_count < detections.len() {
        log::debug!(
            "🔍 Geometric verification removed {} detections",
            detections.len() - kept_count
        );
    }
    detections
        .into_iter()
        .zip(keep)
        .filter_map(|(d, k)| k.then_some(d))
        .collect()
}
