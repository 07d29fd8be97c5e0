//! Multi-metric region similarity
//!
//! Four independent metrics are computed on a contrast-normalized pair of
//! equally sized regions and blended into a single confidence:
//! - normalized cross-correlation of gray levels
//! - windowed structural similarity (8x8 windows, 50% overlap)
//! - joint 8x8x8 RGB histogram intersection
//! - correlation of gradient magnitude fields
//!
//! A small agreement bonus is added when several metrics agree.

use super::config::SimilarityConfig;
use image::RgbaImage;
use image::imageops::FilterType;
use serde::Serialize;

const SSIM_WINDOW: usize = 8;
const SSIM_STEP: usize = SSIM_WINDOW / 2;
const C1: f32 = (0.01 * 255.0) * (0.01 * 255.0);
const C2: f32 = (0.03 * 255.0) * (0.03 * 255.0);
const VARIANCE_EPS: f32 = 1e-3;
const HIST_BINS: usize = 8;

/// Region after contrast stretch and per-channel range normalization.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub width: usize,
    pub height: usize,
    pub rgb: Vec<[f32; 3]>,
    pub gray: Vec<f32>,
}

pub fn preprocess(image: &RgbaImage, config: &SimilarityConfig) -> Prepared {
    let width = image.width() as usize;
    let height = image.height() as usize;
    let factor = config.contrast_factor;

    let mut rgb: Vec<[f32; 3]> = image
        .pixels()
        .map(|p| {
            let stretch = |v: u8| ((v as f32 - 128.0) * factor + 128.0).clamp(0.0, 255.0);
            [stretch(p.0[0]), stretch(p.0[1]), stretch(p.0[2])]
        })
        .collect();

    for c in 0..3 {
        let (min, max) = rgb
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), px| (lo.min(px[c]), hi.max(px[c])));
        let range = max - min;
        // Near-flat channels would only amplify noise
        if range >= config.min_channel_range {
            let scale = 255.0 / range;
            for px in rgb.iter_mut() {
                px[c] = (px[c] - min) * scale;
            }
        }
    }

    let gray = rgb
        .iter()
        .map(|px| 0.299 * px[0] + 0.587 * px[1] + 0.114 * px[2])
        .collect();

    Prepared {
        width,
        height,
        rgb,
        gray,
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

/// Pearson correlation with a guard for flat inputs.
///
/// Two flat inputs count as identical when their levels are close; one flat
/// and one textured input never correlate.
fn guarded_correlation(a: &[f32], b: &[f32], flat_tolerance: f32) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let ma = mean(a);
    let mb = mean(b);
    let mut cov = 0.0f32;
    let mut va = 0.0f32;
    let mut vb = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        let da = x - ma;
        let db = y - mb;
        cov += da * db;
        va += da * da;
        vb += db * db;
    }
    let n = a.len() as f32;
    let flat_a = va / n < VARIANCE_EPS;
    let flat_b = vb / n < VARIANCE_EPS;
    match (flat_a, flat_b) {
        (true, true) => {
            if (ma - mb).abs() <= flat_tolerance {
                1.0
            } else {
                0.0
            }
        }
        (true, false) | (false, true) => 0.0,
        (false, false) => cov / (va.sqrt() * vb.sqrt()),
    }
}

/// Normalized cross-correlation on gray levels, clamped to [0, 1].
pub fn ncc(a: &Prepared, b: &Prepared) -> f32 {
    guarded_correlation(&a.gray, &b.gray, 2.0).clamp(0.0, 1.0)
}

fn ssim_block(a: &Prepared, b: &Prepared, x0: usize, y0: usize, w: usize, h: usize) -> f32 {
    let n = (w * h) as f32;
    let mut sa = 0.0f32;
    let mut sb = 0.0f32;
    for y in y0..y0 + h {
        let row = y * a.width;
        for x in x0..x0 + w {
            sa += a.gray[row + x];
            sb += b.gray[row + x];
        }
    }
    let ma = sa / n;
    let mb = sb / n;
    let mut va = 0.0f32;
    let mut vb = 0.0f32;
    let mut cov = 0.0f32;
    for y in y0..y0 + h {
        let row = y * a.width;
        for x in x0..x0 + w {
            let da = a.gray[row + x] - ma;
            let db = b.gray[row + x] - mb;
            va += da * da;
            vb += db * db;
            cov += da * db;
        }
    }
    va /= n;
    vb /= n;
    cov /= n;
    let numerator = (2.0 * ma * mb + C1) * (2.0 * cov + C2);
    let denominator = (ma * ma + mb * mb + C1) * (va + vb + C2);
    (numerator / denominator).clamp(0.0, 1.0)
}

/// Mean SSIM over 8x8 windows with 50% overlap; whole-region SSIM for tiny regions.
pub fn ssim(a: &Prepared, b: &Prepared) -> f32 {
    if a.width == 0 || a.height == 0 {
        return 0.0;
    }
    if a.width < SSIM_WINDOW || a.height < SSIM_WINDOW {
        return ssim_block(a, b, 0, 0, a.width, a.height);
    }
    let mut total = 0.0f32;
    let mut count = 0usize;
    let mut y = 0;
    while y + SSIM_WINDOW <= a.height {
        let mut x = 0;
        while x + SSIM_WINDOW <= a.width {
            total += ssim_block(a, b, x, y, SSIM_WINDOW, SSIM_WINDOW);
            count += 1;
            x += SSIM_STEP;
        }
        y += SSIM_STEP;
    }
    total / count as f32
}

fn joint_histogram(region: &Prepared) -> Vec<f32> {
    let mut hist = vec![0f32; HIST_BINS * HIST_BINS * HIST_BINS];
    if region.rgb.is_empty() {
        return hist;
    }
    let bin = |v: f32| ((v.clamp(0.0, 255.0) as usize) * HIST_BINS / 256).min(HIST_BINS - 1);
    for px in &region.rgb {
        let idx = (bin(px[0]) * HIST_BINS + bin(px[1])) * HIST_BINS + bin(px[2]);
        hist[idx] += 1.0;
    }
    let n = region.rgb.len() as f32;
    for v in hist.iter_mut() {
        *v /= n;
    }
    hist
}

/// Intersection of normalized 8x8x8 joint RGB histograms.
pub fn histogram_intersection(a: &Prepared, b: &Prepared) -> f32 {
    let ha = joint_histogram(a);
    let hb = joint_histogram(b);
    ha.iter()
        .zip(&hb)
        .map(|(x, y)| x.min(*y))
        .sum::<f32>()
        .clamp(0.0, 1.0)
}

fn gradient_field(region: &Prepared) -> Vec<f32> {
    let w = region.width;
    let h = region.height;
    let mut field = Vec::new();
    if w < 3 || h < 3 {
        return field;
    }
    for y in (1..h - 1).step_by(2) {
        for x in (1..w - 1).step_by(2) {
            let gx = region.gray[y * w + x + 1] - region.gray[y * w + x - 1];
            let gy = region.gray[(y + 1) * w + x] - region.gray[(y - 1) * w + x];
            field.push((gx * gx + gy * gy).sqrt());
        }
    }
    field
}

/// Correlation of gradient magnitudes sampled at every other pixel, clamped to [0, 1].
pub fn edge_correlation(a: &Prepared, b: &Prepared) -> f32 {
    let fa = gradient_field(a);
    let fb = gradient_field(b);
    guarded_correlation(&fa, &fb, 4.0).clamp(0.0, 1.0)
}

/// Individual metric scores and the blended confidence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SimilarityBreakdown {
    pub ncc: f32,
    pub ssim: f32,
    pub histogram: f32,
    pub edge: f32,
    pub agreement_bonus: f32,
    pub confidence: f32,
}

impl SimilarityBreakdown {
    /// Blend the raw metric scores into a clamped confidence.
    pub fn combine(mut self, config: &SimilarityConfig) -> Self {
        let w = &config.weights;
        let metrics = [
            (w.ssim.max(0.0), self.ssim),
            (w.ncc.max(0.0), self.ncc),
            (w.histogram.max(0.0), self.histogram),
            (w.edge.max(0.0), self.edge),
        ];
        let enabled: Vec<(f32, f32)> = metrics.into_iter().filter(|(w, _)| *w > 0.0).collect();
        let weight_sum: f32 = enabled.iter().map(|(w, _)| w).sum();

        let weighted = if weight_sum > 0.0 {
            enabled.iter().map(|(w, s)| w * s).sum::<f32>() / weight_sum
        } else {
            0.0
        };

        let agreeing = enabled
            .iter()
            .filter(|(_, s)| *s >= config.agreement_threshold)
            .count();
        let needed = config.agreement_min_metrics.min(enabled.len()).max(1);
        self.agreement_bonus = if !enabled.is_empty() && agreeing >= needed {
            config.agreement_bonus_cap * agreeing as f32 / enabled.len() as f32
        } else {
            0.0
        };

        let raw = weighted + self.agreement_bonus;
        self.confidence = if raw.is_finite() {
            raw.clamp(config.min_confidence, config.max_confidence)
        } else {
            config.min_confidence
        };
        self
    }
}

/// Compare two regions and return every metric plus the blended confidence.
///
/// The second region is resized to the first when their sizes differ.
pub fn compare_regions(
    region: &RgbaImage,
    template: &RgbaImage,
    config: &SimilarityConfig,
) -> SimilarityBreakdown {
    let empty = |image: &RgbaImage| image.width() == 0 || image.height() == 0;
    if empty(region) || empty(template) {
        return SimilarityBreakdown {
            confidence: config.min_confidence,
            ..SimilarityBreakdown::default()
        };
    }
    let resized;
    let template = if template.dimensions() != region.dimensions() {
        resized = image::imageops::resize(
            template,
            region.width(),
            region.height(),
            FilterType::Triangle,
        );
        &resized
    } else {
        template
    };

    let a = preprocess(region, config);
    let b = preprocess(template, config);
    compare_prepared(&a, &b, config)
}

pub fn compare_prepared(
    a: &Prepared,
    b: &Prepared,
    config: &SimilarityConfig,
) -> SimilarityBreakdown {
    let w = &config.weights;
    // Disabled metrics are skipped entirely in the scan loop
    SimilarityBreakdown {
        ncc: if w.ncc > 0.0 { ncc(a, b) } else { 0.0 },
        ssim: if w.ssim > 0.0 { ssim(a, b) } else { 0.0 },
        histogram: if w.histogram > 0.0 {
            histogram_intersection(a, b)
        } else {
            0.0
        },
        edge: if w.edge > 0.0 { edge_correlation(a, b) } else { 0.0 },
        ..SimilarityBreakdown::default()
    }
    .combine(config)
}

/// Blended similarity confidence in `[min_confidence, max_confidence]`.
pub fn similarity(region: &RgbaImage, template: &RgbaImage, config: &SimilarityConfig) -> f32 {
    compare_regions(region, template, config).confidence
}
