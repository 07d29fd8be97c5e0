//! Coarse colour classification and rarity-border recognition

use super::region::Roi;
use crate::catalog::Rarity;
use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// Convert 8-bit RGB to HSL: hue in degrees [0, 360), saturation and lightness in [0, 1].
pub fn rgb_to_hsl(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let r = r as f32 / 255.0;
    let g = g as f32 / 255.0;
    let b = b as f32 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) / 2.0;
    let d = max - min;
    if d <= f32::EPSILON {
        return (0.0, 0.0, l);
    }
    let s = d / (1.0 - (2.0 * l - 1.0).abs()).max(f32::EPSILON);
    let h = if max == r {
        60.0 * (((g - b) / d).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / d + 2.0)
    } else {
        60.0 * ((r - g) / d + 4.0)
    };
    (h.rem_euclid(360.0), s.min(1.0), l)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorCategory {
    Red,
    Orange,
    Yellow,
    Green,
    Cyan,
    Blue,
    Purple,
    Pink,
    Gray,
    White,
    Black,
}

impl ColorCategory {
    /// Neighbouring categories checked alongside this one during pre-filtering.
    pub fn adjacent(self) -> &'static [ColorCategory] {
        use ColorCategory::*;
        match self {
            Red => &[Orange, Pink],
            Orange => &[Red, Yellow],
            Yellow => &[Orange, Green],
            Green => &[Yellow, Cyan],
            Cyan => &[Green, Blue],
            Blue => &[Cyan, Purple],
            Purple => &[Blue, Pink],
            Pink => &[Purple, Red],
            Gray => &[White, Black],
            White => &[Gray],
            Black => &[Gray],
        }
    }

    fn from_hue(hue: f32) -> ColorCategory {
        match hue {
            h if !(15.0..345.0).contains(&h) => ColorCategory::Red,
            h if h < 45.0 => ColorCategory::Orange,
            h if h < 70.0 => ColorCategory::Yellow,
            h if h < 165.0 => ColorCategory::Green,
            h if h < 195.0 => ColorCategory::Cyan,
            h if h < 255.0 => ColorCategory::Blue,
            h if h < 290.0 => ColorCategory::Purple,
            _ => ColorCategory::Pink,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BrightnessTier {
    Dark,
    Mid,
    Bright,
}

/// Coarse colour description of a region, used only for candidate pre-filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorProfile {
    pub primary: ColorCategory,
    pub brightness: BrightnessTier,
    pub vivid: bool,
}

/// Classify a mean RGB colour.
pub fn classify_color(mean: [f32; 3]) -> ColorProfile {
    let to_u8 = |v: f32| v.round().clamp(0.0, 255.0) as u8;
    let (h, s, l) = rgb_to_hsl(to_u8(mean[0]), to_u8(mean[1]), to_u8(mean[2]));

    let primary = if l < 0.12 {
        ColorCategory::Black
    } else if l > 0.88 {
        ColorCategory::White
    } else if s < 0.18 {
        if l > 0.7 {
            ColorCategory::White
        } else if l < 0.25 {
            ColorCategory::Black
        } else {
            ColorCategory::Gray
        }
    } else {
        ColorCategory::from_hue(h)
    };

    let brightness = if l < 0.33 {
        BrightnessTier::Dark
    } else if l < 0.66 {
        BrightnessTier::Mid
    } else {
        BrightnessTier::Bright
    };

    ColorProfile {
        primary,
        brightness,
        vivid: s >= 0.5,
    }
}

/// Mean colour and gray-level variance of a region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionStats {
    pub mean: [f32; 3],
    pub gray_variance: f32,
    pub pixel_count: usize,
}

impl RegionStats {
    pub fn compute(image: &RgbaImage) -> RegionStats {
        let n = (image.width() as usize) * (image.height() as usize);
        if n == 0 {
            return RegionStats {
                mean: [0.0; 3],
                gray_variance: 0.0,
                pixel_count: 0,
            };
        }
        let mut sum = [0f64; 3];
        let mut gray_sum = 0f64;
        let mut gray_sq = 0f64;
        for p in image.pixels() {
            let [r, g, b, _] = p.0;
            sum[0] += r as f64;
            sum[1] += g as f64;
            sum[2] += b as f64;
            let gray = luma(r, g, b) as f64;
            gray_sum += gray;
            gray_sq += gray * gray;
        }
        let nf = n as f64;
        let gray_mean = gray_sum / nf;
        RegionStats {
            mean: [
                (sum[0] / nf) as f32,
                (sum[1] / nf) as f32,
                (sum[2] / nf) as f32,
            ],
            gray_variance: (gray_sq / nf - gray_mean * gray_mean).max(0.0) as f32,
            pixel_count: n,
        }
    }

    /// Visually uniform region, most likely empty background.
    pub fn is_uniform(&self, variance_threshold: f32) -> bool {
        self.gray_variance < variance_threshold
    }

    pub fn profile(&self) -> ColorProfile {
        classify_color(self.mean)
    }
}

pub fn luma(r: u8, g: u8, b: u8) -> f32 {
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

/// Colour definition of one rarity border: an HSL range plus an RGB bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BorderColorDef {
    /// Hue range in degrees; `hue_min > hue_max` wraps through 0
    pub hue_min: f32,
    pub hue_max: f32,
    pub sat_min: f32,
    pub sat_max: f32,
    pub light_min: f32,
    pub light_max: f32,
    pub rgb_min: [u8; 3],
    pub rgb_max: [u8; 3],
}

impl BorderColorDef {
    pub fn matches(&self, r: u8, g: u8, b: u8) -> bool {
        let rgb = [r, g, b];
        if (0..3).any(|i| rgb[i] < self.rgb_min[i] || rgb[i] > self.rgb_max[i]) {
            return false;
        }
        let (h, s, l) = rgb_to_hsl(r, g, b);
        if s < self.sat_min || s > self.sat_max || l < self.light_min || l > self.light_max {
            return false;
        }
        self.hue_matches(h)
    }

    fn hue_matches(&self, hue: f32) -> bool {
        if self.hue_min <= self.hue_max {
            hue >= self.hue_min && hue <= self.hue_max
        } else {
            hue >= self.hue_min || hue <= self.hue_max
        }
    }
}

pub fn border_definition(rarity: Rarity) -> BorderColorDef {
    match rarity {
        // Light neutral gray; hue is meaningless at this saturation
        Rarity::Common => BorderColorDef {
            hue_min: 0.0,
            hue_max: 360.0,
            sat_min: 0.0,
            sat_max: 0.12,
            light_min: 0.55,
            light_max: 0.85,
            rgb_min: [130, 130, 130],
            rgb_max: [220, 220, 220],
        },
        Rarity::Uncommon => BorderColorDef {
            hue_min: 90.0,
            hue_max: 150.0,
            sat_min: 0.4,
            sat_max: 1.0,
            light_min: 0.25,
            light_max: 0.75,
            rgb_min: [0, 120, 0],
            rgb_max: [120, 255, 140],
        },
        Rarity::Rare => BorderColorDef {
            hue_min: 195.0,
            hue_max: 245.0,
            sat_min: 0.45,
            sat_max: 1.0,
            light_min: 0.3,
            light_max: 0.75,
            rgb_min: [0, 40, 150],
            rgb_max: [120, 200, 255],
        },
        Rarity::Epic => BorderColorDef {
            hue_min: 255.0,
            hue_max: 300.0,
            sat_min: 0.4,
            sat_max: 1.0,
            light_min: 0.3,
            light_max: 0.75,
            rgb_min: [100, 0, 150],
            rgb_max: [230, 120, 255],
        },
        Rarity::Legendary => BorderColorDef {
            hue_min: 350.0,
            hue_max: 50.0,
            sat_min: 0.6,
            sat_max: 1.0,
            light_min: 0.35,
            light_max: 0.7,
            rgb_min: [200, 60, 0],
            rgb_max: [255, 220, 90],
        },
    }
}

/// Which rarity border colour, if any, a single pixel shows.
pub fn classify_border_pixel(r: u8, g: u8, b: u8) -> Option<Rarity> {
    Rarity::ALL
        .into_iter()
        .find(|rarity| border_definition(*rarity).matches(r, g, b))
}

pub fn is_border_pixel(r: u8, g: u8, b: u8) -> bool {
    classify_border_pixel(r, g, b).is_some()
}

/// Vote over the border pixels of a cell and report the winning rarity.
///
/// A rarity only wins when it holds at least `min_vote_fraction` of all
/// border pixels, so isolated noisy pixels never produce a result.
pub fn detect_border_rarity(
    image: &RgbaImage,
    cell: &Roi,
    border_width: u32,
    min_vote_fraction: f32,
) -> Option<Rarity> {
    let cell = cell.clip_to(image.width(), image.height());
    if !cell.is_valid() {
        return None;
    }
    let bw = border_width.max(1).min(cell.width / 2).min(cell.height / 2).max(1);

    let mut votes = [0u32; 5];
    let mut total = 0u32;
    for y in cell.y..cell.y + cell.height {
        for x in cell.x..cell.x + cell.width {
            let dx = (x - cell.x).min(cell.x + cell.width - 1 - x);
            let dy = (y - cell.y).min(cell.y + cell.height - 1 - y);
            if dx >= bw && dy >= bw {
                continue;
            }
            total += 1;
            let [r, g, b, _] = image.get_pixel(x, y).0;
            if let Some(rarity) = classify_border_pixel(r, g, b) {
                votes[rarity as usize] += 1;
            }
        }
    }
    if total == 0 {
        return None;
    }

    let (best, count) = votes
        .iter()
        .enumerate()
        .max_by_key(|(i, count)| (**count, std::cmp::Reverse(*i)))?;
    if *count == 0 || (*count as f32 / total as f32) < min_vote_fraction {
        return None;
    }
    Some(Rarity::ALL[best])
}
