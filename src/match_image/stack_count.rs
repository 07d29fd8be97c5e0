//! Stack count overlay reader
//!
//! Item cells show a small white "×N" overlay in their lower-right corner when
//! the player holds several copies. The overlay is read with 5x7 bitmap digit
//! patterns after connected-component segmentation.

use super::config::StackConfig;
use super::region::Roi;
use image::{GrayImage, ImageBuffer, Luma, RgbaImage};
use imageproc::region_labelling::{Connectivity, connected_components};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const GLYPH_COLS: usize = 5;
const GLYPH_ROWS: usize = 7;

const DIGIT_GLYPHS: [[&str; GLYPH_ROWS]; 10] = [
    [" ### ", "#   #", "#  ##", "# # #", "##  #", "#   #", " ### "],
    ["  #  ", " ##  ", "  #  ", "  #  ", "  #  ", "  #  ", " ### "],
    [" ### ", "#   #", "    #", "   # ", "  #  ", " #   ", "#####"],
    ["#####", "   # ", "  #  ", "   # ", "    #", "#   #", " ### "],
    ["   # ", "  ## ", " # # ", "#  # ", "#####", "   # ", "   # "],
    ["#####", "#    ", "#### ", "    #", "    #", "#   #", " ### "],
    ["  ## ", " #   ", "#    ", "#### ", "#   #", "#   #", " ### "],
    ["#####", "    #", "   # ", "  #  ", " #   ", " #   ", " #   "],
    [" ### ", "#   #", "#   #", " ### ", "#   #", "#   #", " ### "],
    [" ### ", "#   #", "#   #", " ####", "    #", "   # ", " ##  "],
];

/// Stack sizes the game commonly shows; uncertain readings snap to these.
pub const COMMON_STACK_SIZES: [u32; 21] = [
    1, 2, 3, 4, 5, 6, 8, 10, 12, 15, 16, 20, 24, 25, 30, 32, 40, 50, 64, 75, 99,
];

/// Stack count read from one cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StackReading {
    pub value: u32,
    pub confidence: f32,
    /// Value as read before snapping
    pub raw_value: u32,
    pub snapped: bool,
}

#[derive(Debug, Clone, Copy)]
struct Component {
    label: u32,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    pixels: u32,
}

fn is_ink(r: u8, g: u8, b: u8) -> bool {
    let min = r.min(g).min(b);
    let max = r.max(g).max(b);
    min >= 190 && max - min <= 50
}

/// Lower-right sub-region of a cell interior where the overlay is drawn.
pub fn stack_region(interior: &Roi, config: &StackConfig) -> Option<Roi> {
    let width = (interior.width as f32 * config.region_width_ratio).round() as u32;
    let height = (interior.height as f32 * config.region_height_ratio).round() as u32;
    if width == 0 || height == 0 {
        return None;
    }
    Some(Roi::labeled(
        interior.x + interior.width - width.min(interior.width),
        interior.y + interior.height - height.min(interior.height),
        width.min(interior.width),
        height.min(interior.height),
        "stack_count",
    ))
}

/// Nearest common stack size; ties go to the smaller size.
pub fn snap_to_common_size(value: u32) -> u32 {
    COMMON_STACK_SIZES
        .iter()
        .copied()
        .min_by_key(|size| (size.abs_diff(value), *size))
        .unwrap_or(value)
}

type LabelImage = ImageBuffer<Luma<u32>, Vec<u32>>;

fn components(labels: &LabelImage) -> Vec<Component> {
    let mut boxes: HashMap<u32, (u32, u32, u32, u32, u32)> = HashMap::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label.0[0];
        if label == 0 {
            continue;
        }
        let entry = boxes.entry(label).or_insert((x, y, x, y, 0));
        entry.0 = entry.0.min(x);
        entry.1 = entry.1.min(y);
        entry.2 = entry.2.max(x);
        entry.3 = entry.3.max(y);
        entry.4 += 1;
    }
    let mut comps: Vec<Component> = boxes
        .into_iter()
        .map(|(label, (x0, y0, x1, y1, pixels))| Component {
            label,
            x: x0,
            y: y0,
            width: x1 - x0 + 1,
            height: y1 - y0 + 1,
            pixels,
        })
        .collect();
    comps.sort_by_key(|c| (c.x, c.y));
    comps
}

fn label_at(labels: &LabelImage, x: i64, y: i64) -> u32 {
    if x < 0 || y < 0 || x >= labels.width() as i64 || y >= labels.height() as i64 {
        0
    } else {
        labels.get_pixel(x as u32, y as u32).0[0]
    }
}

/// Thin diagonal strokes crossing in a roughly square box.
fn looks_like_multiply_sign(labels: &LabelImage, comp: &Component) -> bool {
    let ratio = comp.width as f32 / comp.height as f32;
    if !(0.8..=1.25).contains(&ratio) || comp.width < 3 {
        return false;
    }
    let mut on_diagonal = 0u32;
    let w = (comp.width - 1).max(1) as f32;
    let h = (comp.height - 1).max(1) as f32;
    for dy in 0..comp.height {
        for dx in 0..comp.width {
            if label_at(labels, (comp.x + dx) as i64, (comp.y + dy) as i64) != comp.label {
                continue;
            }
            let u = dx as f32 / w;
            let v = dy as f32 / h;
            if (u - v).abs() <= 0.2 || (u + v - 1.0).abs() <= 0.2 {
                on_diagonal += 1;
            }
        }
    }
    comp.pixels > 0 && on_diagonal as f32 / comp.pixels as f32 >= 0.8
}

/// Sample a component onto the 5x7 glyph grid, padding narrow glyphs to full width.
fn sample_glyph(labels: &LabelImage, comp: &Component) -> [[bool; GLYPH_COLS]; GLYPH_ROWS] {
    let full_width = (comp.height as f32 * GLYPH_COLS as f32 / GLYPH_ROWS as f32).round() as u32;
    let width = comp.width.max(full_width);
    let x_origin = comp.x as i64 - ((width - comp.width) / 2) as i64;

    let mut grid = [[false; GLYPH_COLS]; GLYPH_ROWS];
    for (row, cells) in grid.iter_mut().enumerate() {
        let y0 = row as u32 * comp.height / GLYPH_ROWS as u32;
        let y1 = ((row as u32 + 1) * comp.height / GLYPH_ROWS as u32).max(y0 + 1);
        for (col, cell) in cells.iter_mut().enumerate() {
            let x0 = col as u32 * width / GLYPH_COLS as u32;
            let x1 = ((col as u32 + 1) * width / GLYPH_COLS as u32).max(x0 + 1);
            let mut ink = 0u32;
            for y in y0..y1 {
                for x in x0..x1 {
                    if label_at(labels, x_origin + x as i64, (comp.y + y) as i64) == comp.label {
                        ink += 1;
                    }
                }
            }
            *cell = ink * 2 >= (x1 - x0) * (y1 - y0);
        }
    }
    grid
}

fn best_digit(grid: &[[bool; GLYPH_COLS]; GLYPH_ROWS]) -> (u32, f32) {
    let mut best = (0u32, -1.0f32);
    for (digit, glyph) in DIGIT_GLYPHS.iter().enumerate() {
        let mut agree = 0;
        for (row, pattern) in glyph.iter().enumerate() {
            for (col, ch) in pattern.bytes().enumerate() {
                if (ch == b'#') == grid[row][col] {
                    agree += 1;
                }
            }
        }
        let score = agree as f32 / (GLYPH_COLS * GLYPH_ROWS) as f32;
        if score > best.1 {
            best = (digit as u32, score);
        }
    }
    best
}

/// Read a stack count from the overlay region of one cell.
///
/// Returns `None` when no digits are found, the reading is below
/// `min_confidence`, or the value falls outside 1..=99.
pub fn read_stack_count(region: &RgbaImage, config: &StackConfig) -> Option<StackReading> {
    if region.width() == 0 || region.height() == 0 {
        return None;
    }
    let mask = GrayImage::from_fn(region.width(), region.height(), |x, y| {
        let [r, g, b, _] = region.get_pixel(x, y).0;
        Luma([if is_ink(r, g, b) { 255 } else { 0 }])
    });
    let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));
    let comps = components(&labels);
    let tallest = comps.iter().map(|c| c.height).max()?;
    let mut glyphs: Vec<&Component> = comps
        .iter()
        .filter(|c| c.height >= 5 && c.height as f32 >= 0.6 * tallest as f32)
        .collect();
    if glyphs.first().is_some_and(|c| looks_like_multiply_sign(&labels, c)) {
        glyphs.remove(0);
    }
    if glyphs.is_empty() || glyphs.len() > 2 {
        return None;
    }

    let mut value = 0u32;
    let mut total = 0f32;
    for comp in &glyphs {
        let (digit, score) = best_digit(&sample_glyph(&labels, comp));
        value = value * 10 + digit;
        total += score;
    }
    let confidence = total / glyphs.len() as f32;
    if confidence < config.min_confidence || !(1..=99).contains(&value) {
        log::debug!("🔍 Stack overlay rejected: value {} conf {:.2}", value, confidence);
        return None;
    }

    let snapped = confidence < config.snap_below;
    Some(StackReading {
        value: if snapped { snap_to_common_size(value) } else { value },
        confidence,
        raw_value: value,
        snapped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    const INK: Rgba<u8> = Rgba([245, 245, 245, 255]);

    fn dark(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([40, 35, 50, 255]))
    }

    fn draw_digit(image: &mut RgbaImage, digit: usize, x: u32, y: u32, scale: u32) {
        for (row, pattern) in DIGIT_GLYPHS[digit].iter().enumerate() {
            for (col, ch) in pattern.bytes().enumerate() {
                if ch != b'#' {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        let px = x + col as u32 * scale + dx;
                        image.put_pixel(px, y + row as u32 * scale + dy, INK);
                    }
                }
            }
        }
    }

    fn draw_multiply(image: &mut RgbaImage, x: u32, y: u32, size: u32) {
        for dy in 0..size {
            for dx in 0..size {
                if dx.abs_diff(dy) <= 1 || (dx + dy).abs_diff(size - 1) <= 1 {
                    image.put_pixel(x + dx, y + dy, INK);
                }
            }
        }
    }

    #[test]
    fn test_reads_prefixed_two_digit_count() {
        let mut image = dark(48, 22);
        draw_multiply(&mut image, 2, 6, 10);
        draw_digit(&mut image, 1, 15, 4, 2);
        draw_digit(&mut image, 2, 27, 4, 2);
        let reading = read_stack_count(&image, &StackConfig::default()).unwrap();
        assert_eq!(reading.value, 12);
        assert!(!reading.snapped);
        assert!((reading.confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_every_digit_reads_back() {
        for digit in 1..10 {
            let mut image = dark(20, 20);
            draw_digit(&mut image, digit, 4, 3, 2);
            let reading = read_stack_count(&image, &StackConfig::default()).unwrap();
            assert_eq!(reading.value, digit as u32, "digit {digit}");
        }
    }

    #[test]
    fn test_zero_is_out_of_range() {
        let mut image = dark(20, 20);
        draw_digit(&mut image, 0, 4, 3, 2);
        assert!(read_stack_count(&image, &StackConfig::default()).is_none());
    }

    #[test]
    fn test_no_ink_returns_none() {
        let image = dark(30, 20);
        assert!(read_stack_count(&image, &StackConfig::default()).is_none());
    }

    #[test]
    fn test_snap_to_common_size() {
        assert_eq!(snap_to_common_size(13), 12);
        assert_eq!(snap_to_common_size(7), 6);
        assert_eq!(snap_to_common_size(97), 99);
        assert_eq!(snap_to_common_size(64), 64);
    }

    #[test]
    fn test_stack_region_is_lower_right() {
        let interior = Roi::new(100, 200, 40, 40);
        let region = stack_region(&interior, &StackConfig::default()).unwrap();
        assert_eq!(region.x + region.width, 140);
        assert_eq!(region.y + region.height, 240);
        assert_eq!(region.width, 26);
        assert_eq!(region.height, 20);
    }
}
