//! Icon grid inference from rarity-coloured cell borders
//!
//! Two stages:
//! 1. locate the icon band by scoring horizontal strips in the lower part of
//!    the screenshot;
//! 2. inside the band, collect short rarity-coloured runs along several scan
//!    lines, keep those seen on at least two lines, sort them into left and
//!    right cell borders, and fit a uniform stride to each side separately.

use super::color::{is_border_pixel, luma, rgb_to_hsl};
use super::config::GridConfig;
use super::region::Roi;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Horizontal band of the screenshot most likely to hold the item hotbar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IconBand {
    pub y: u32,
    pub height: u32,
    pub score: f32,
}

impl IconBand {
    pub fn to_roi(&self, raster_width: u32) -> Roi {
        Roi::labeled(0, self.y, raster_width, self.height, "icon_band")
    }

    /// Band grown by `ratio` of its height above and below, clipped to the raster.
    pub fn expanded(&self, ratio: f32, raster_height: u32) -> IconBand {
        let grow = (self.height as f32 * ratio).round() as u32;
        let y = self.y.saturating_sub(grow);
        let bottom = (self.y + self.height + grow).min(raster_height);
        IconBand {
            y,
            height: bottom.saturating_sub(y),
            score: self.score,
        }
    }
}

/// Which border of a cell a run belongs to, judged by where the background lies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EdgeSide {
    /// Background on the left, icon interior on the right
    Left,
    /// Icon interior on the left, background on the right
    Right,
    #[default]
    Unknown,
}

impl EdgeSide {
    fn may_be_left(self) -> bool {
        self != EdgeSide::Right
    }

    fn may_be_right(self) -> bool {
        self != EdgeSide::Left
    }
}

/// A short rarity-coloured run found on one scan line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeRun {
    pub x: u32,
    pub width: u32,
    pub line_y: u32,
    pub side: EdgeSide,
}

/// Edge runs from several scan lines merged by X position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeCluster {
    pub x: f32,
    pub width: f32,
    /// Number of distinct scan lines that saw this edge
    pub support: usize,
    pub side: EdgeSide,
}

impl EdgeCluster {
    pub fn new(x: f32, width: f32, support: usize) -> Self {
        Self {
            x,
            width,
            support,
            side: EdgeSide::Unknown,
        }
    }

    pub fn with_side(mut self, side: EdgeSide) -> Self {
        self.side = side;
        self
    }
}

/// Uniform icon grid derived from edge evidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridParameters {
    pub start_x: u32,
    pub start_y: u32,
    /// Horizontal stride between cell starts
    pub cell_width: u32,
    /// Vertical stride between row starts
    pub cell_height: u32,
    pub columns: u32,
    pub rows: u32,
    pub confidence: f32,
    /// Outer size of one bordered cell
    pub icon_size: u32,
    pub border_width: u32,
}

impl GridParameters {
    pub fn is_usable(&self, config: &GridConfig) -> bool {
        self.confidence >= config.min_confidence && self.columns >= config.min_columns
    }

    pub fn cell(&self, column: u32, row: u32) -> Roi {
        Roi::labeled(
            self.start_x + column * self.cell_width,
            self.start_y + row * self.cell_height,
            self.icon_size,
            self.icon_size,
            &format!("grid_r{row}_c{column}"),
        )
    }

    /// All cells in row-major order, skipping any that leave the raster.
    pub fn cells(&self, raster_width: u32, raster_height: u32) -> Vec<Roi> {
        let mut cells = Vec::with_capacity((self.rows * self.columns) as usize);
        for row in 0..self.rows {
            for column in 0..self.columns {
                let cell = self.cell(column, row);
                if cell.fits_within(raster_width, raster_height) {
                    cells.push(cell);
                }
            }
        }
        cells
    }
}

/// Outcome of grid inference: the band is kept even when no grid fits.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GridInference {
    pub band: Option<IconBand>,
    pub grid: Option<GridParameters>,
}

fn strip_score(image: &RgbaImage, y0: u32, height: u32) -> f32 {
    let mut count = 0u32;
    let mut luma_sum = 0f64;
    let mut luma_sq = 0f64;
    let mut colorful = 0u32;
    let mut border = 0u32;
    for y in (y0..y0 + height).step_by(2) {
        for x in (0..image.width()).step_by(2) {
            let [r, g, b, _] = image.get_pixel(x, y).0;
            let v = luma(r, g, b) as f64;
            luma_sum += v;
            luma_sq += v * v;
            let (_, s, l) = rgb_to_hsl(r, g, b);
            if s >= 0.35 && (0.15..=0.85).contains(&l) {
                colorful += 1;
            }
            if is_border_pixel(r, g, b) {
                border += 1;
            }
            count += 1;
        }
    }
    if count == 0 {
        return 0.0;
    }
    let n = count as f64;
    let mean = luma_sum / n;
    let variance = (luma_sq / n - mean * mean).max(0.0);

    let brightness_score = if (30.0..=200.0).contains(&mean) { 1.0 } else { 0.0 };
    let variance_score = (variance / (64.0 * 64.0)).min(1.0) as f32;
    let colorful_ratio = colorful as f32 / count as f32;
    let border_ratio = (border as f32 / count as f32 * 5.0).min(1.0);

    0.15 * brightness_score + 0.25 * variance_score + 0.25 * colorful_ratio + 0.35 * border_ratio
}

/// Find the icon band in the lower part of the screenshot.
pub fn locate_icon_band(image: &RgbaImage, config: &GridConfig) -> Option<IconBand> {
    let (_, h) = image.dimensions();
    let search_start = (h as f32 * config.band_search_start) as u32;
    let strip_h = (h / 50).max(4);
    if h <= search_start + strip_h {
        return None;
    }
    let band_h = ((h as f32 * config.band_height_ratio).round() as u32)
        .clamp(config.min_band_height, config.max_band_height)
        .min(h - search_start);

    let mut strips: Vec<(u32, f32)> = Vec::new();
    let mut y = search_start;
    while y + strip_h <= h {
        strips.push((y, strip_score(image, y, strip_h)));
        y += strip_h;
    }
    let window = (band_h.div_ceil(strip_h) as usize).clamp(1, strips.len());

    let span = (h - search_start) as f32;
    let mut best: Option<IconBand> = None;
    for start in 0..=(strips.len() - window) {
        let slice = &strips[start..start + window];
        let mean = slice.iter().map(|(_, s)| s).sum::<f32>() / window as f32;
        let center = slice[0].0 as f32 + (window as u32 * strip_h) as f32 / 2.0;
        let position_weight = 1.0 + 0.5 * ((center - search_start as f32) / span).clamp(0.0, 1.0);
        let score = mean * position_weight;
        if score > best.map_or(0.0, |b| b.score) {
            let height = (window as u32 * strip_h)
                .clamp(config.min_band_height, config.max_band_height)
                .min(h - slice[0].0);
            best = Some(IconBand {
                y: slice[0].0,
                height,
                score,
            });
        }
    }

    match best {
        Some(band) => {
            log::debug!(
                "🔍 Icon band at y={} h={} (score {:.3})",
                band.y,
                band.height,
                band.score
            );
            Some(band)
        }
        None => None,
    }
}

/// Dominant colour of one scan line, from coarse colour buckets.
fn line_background(image: &RgbaImage, y: u32) -> Option<[u8; 3]> {
    let mut buckets: HashMap<[u8; 3], (u32, [u32; 3])> = HashMap::new();
    for x in 0..image.width() {
        let [r, g, b, _] = image.get_pixel(x, y).0;
        let (count, sum) = buckets
            .entry([r >> 4, g >> 4, b >> 4])
            .or_insert((0, [0; 3]));
        *count += 1;
        sum[0] += r as u32;
        sum[1] += g as u32;
        sum[2] += b as u32;
    }
    buckets
        .into_values()
        .max_by_key(|(count, _)| *count)
        .map(|(count, sum)| sum.map(|c| (c / count) as u8))
}

fn is_background(pixel: [u8; 4], background: [u8; 3]) -> bool {
    (0..3).all(|c| pixel[c].abs_diff(background[c]) <= 16)
}

/// Short rarity-coloured runs along one horizontal line.
pub fn scan_line_edges(image: &RgbaImage, y: u32, config: &GridConfig) -> Vec<EdgeRun> {
    let mut runs = Vec::new();
    if y >= image.height() {
        return runs;
    }
    let width = image.width();
    let background = line_background(image, y);
    let side_of = |start: u32, run_width: u32| {
        let Some(bg) = background else {
            return EdgeSide::Unknown;
        };
        let outside = |x: Option<u32>| {
            x.filter(|&x| x < width)
                .is_none_or(|x| is_background(image.get_pixel(x, y).0, bg))
        };
        match (outside(start.checked_sub(1)), outside(Some(start + run_width))) {
            (true, false) => EdgeSide::Left,
            (false, true) => EdgeSide::Right,
            _ => EdgeSide::Unknown,
        }
    };

    let mut run_start: Option<u32> = None;
    for x in 0..=width {
        let colored = x < width && {
            let [r, g, b, _] = image.get_pixel(x, y).0;
            is_border_pixel(r, g, b)
        };
        match (colored, run_start) {
            (true, None) => run_start = Some(x),
            (false, Some(start)) => {
                let run_width = x - start;
                if (config.min_edge_width..=config.max_edge_width).contains(&run_width) {
                    runs.push(EdgeRun {
                        x: start,
                        width: run_width,
                        line_y: y,
                        side: side_of(start, run_width),
                    });
                }
                run_start = None;
            }
            _ => {}
        }
    }
    runs
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

/// Merge runs from all scan lines by X position and keep vertically consistent ones.
pub fn cluster_edges(runs: &[EdgeRun], config: &GridConfig) -> Vec<EdgeCluster> {
    let mut sorted: Vec<EdgeRun> = runs.to_vec();
    sorted.sort_by_key(|r| r.x);

    let mut groups: Vec<Vec<EdgeRun>> = Vec::new();
    for run in sorted {
        match groups.last_mut() {
            Some(group)
                if (run.x as f32 - group[0].x as f32) <= config.edge_cluster_tolerance =>
            {
                group.push(run)
            }
            _ => groups.push(vec![run]),
        }
    }

    groups
        .into_iter()
        .filter_map(|group| {
            let mut lines: Vec<u32> = group.iter().map(|r| r.line_y).collect();
            lines.sort_unstable();
            lines.dedup();
            if lines.len() < config.min_line_support {
                return None;
            }
            let x = group.iter().map(|r| r.x as f32).sum::<f32>() / group.len() as f32;
            let mut widths: Vec<f32> = group.iter().map(|r| r.width as f32).collect();
            let lefts = group.iter().filter(|r| r.side == EdgeSide::Left).count();
            let rights = group.iter().filter(|r| r.side == EdgeSide::Right).count();
            let side = match lefts.cmp(&rights) {
                std::cmp::Ordering::Greater => EdgeSide::Left,
                std::cmp::Ordering::Less => EdgeSide::Right,
                std::cmp::Ordering::Equal => EdgeSide::Unknown,
            };
            Some(EdgeCluster::new(x, median(&mut widths), lines.len()).with_side(side))
        })
        .collect()
}

fn pairwise_gaps(positions: &[f32], config: &GridConfig) -> Vec<f32> {
    let min_gap = config.min_cell_size as f32;
    let max_gap = config.max_cell_size as f32;
    let mut gaps = Vec::new();
    for (i, a) in positions.iter().enumerate() {
        for b in &positions[i + 1..] {
            let gap = (b - a).abs();
            if gap >= min_gap && gap <= max_gap {
                gaps.push(gap);
            }
        }
    }
    gaps
}

/// Most frequent gap, bucketed with the spacing tolerance; ties go to the smaller gap.
fn mode_gap(gaps: &[f32], tolerance: f32) -> Option<f32> {
    let mut gaps = gaps.to_vec();
    gaps.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mut best: Option<(usize, f32)> = None;
    let mut i = 0;
    while i < gaps.len() {
        let first = gaps[i];
        let mut j = i;
        while j < gaps.len() && gaps[j] - first <= tolerance {
            j += 1;
        }
        let count = j - i;
        let mean = gaps[i..j].iter().sum::<f32>() / count as f32;
        if best.is_none_or(|(c, _)| count > c) {
            best = Some((count, mean));
        }
        i = j;
    }
    best.map(|(_, spacing)| spacing)
}

/// Most frequent pairwise gap between positions, within the plausible cell range.
pub fn dominant_spacing(positions: &[f32], config: &GridConfig) -> Option<f32> {
    mode_gap(&pairwise_gaps(positions, config), config.spacing_tolerance)
}

fn is_multiple_of(gap: f32, spacing: f32, max_multiple: u32, tolerance: f32) -> bool {
    (1..=max_multiple).any(|k| (gap - k as f32 * spacing).abs() <= tolerance)
}

/// Outer cell size from each left border to the nearest right border after it.
fn cell_size_from_borders(sorted: &[EdgeCluster], config: &GridConfig) -> Option<f32> {
    let range = config.min_cell_size as f32..=config.max_cell_size as f32;
    let mut spans: Vec<f32> = sorted
        .iter()
        .filter(|e| e.side == EdgeSide::Left)
        .filter_map(|left| {
            sorted
                .iter()
                .find(|e| e.side == EdgeSide::Right && e.x > left.x)
                .map(|right| right.x + right.width - left.x)
        })
        .filter(|span| range.contains(span))
        .collect();
    if spans.is_empty() {
        return None;
    }
    Some(median(&mut spans))
}

/// Smallest whole fraction of `spacing` that still holds one cell.
///
/// Alternate occupied slots make twice the real stride the most frequent gap.
fn base_stride(spacing: f32, cell_size: Option<f32>, config: &GridConfig) -> f32 {
    let Some(cell) = cell_size else {
        return spacing;
    };
    (1..=config.max_skip_multiple.max(1))
        .rev()
        .map(|k| spacing / k as f32)
        .find(|&s| s + config.spacing_tolerance >= cell && s >= config.min_cell_size as f32)
        .unwrap_or(spacing)
}

/// Fit a uniform grid to vertically consistent edges.
///
/// Gaps are only measured between borders of the same side, so the
/// left-to-right span inside a cell never competes with the stride.
/// Returns `None` when fewer than two left borders agree on a common spacing.
pub fn grid_from_edges(
    edges: &[EdgeCluster],
    band: &IconBand,
    config: &GridConfig,
) -> Option<GridParameters> {
    if edges.len() < 2 {
        return None;
    }
    let mut sorted = edges.to_vec();
    sorted.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal));
    let tol = config.spacing_tolerance;

    let lefts: Vec<&EdgeCluster> = sorted.iter().filter(|e| e.side.may_be_left()).collect();
    let left_xs: Vec<f32> = lefts.iter().map(|e| e.x).collect();
    let right_xs: Vec<f32> = sorted
        .iter()
        .filter(|e| e.side.may_be_right())
        .map(|e| e.x)
        .collect();
    let mut gaps = pairwise_gaps(&left_xs, config);
    gaps.extend(pairwise_gaps(&right_xs, config));

    let cell_size = cell_size_from_borders(&sorted, config);
    let stride = base_stride(mode_gap(&gaps, tol)?, cell_size, config);

    // Spacing consistency: every kept edge has a partner a whole number of strides away
    let consistent: Vec<&EdgeCluster> = lefts
        .iter()
        .copied()
        .filter(|e| {
            lefts.iter().any(|other| {
                other.x != e.x
                    && is_multiple_of((other.x - e.x).abs(), stride, config.max_skip_multiple, tol)
            })
        })
        .collect();
    if consistent.len() < 2 {
        return None;
    }

    // The leftmost consistent edge is a left border; keep edges in its phase
    let origin = consistent[0].x;
    let family: Vec<&EdgeCluster> = consistent
        .into_iter()
        .filter(|e| {
            let d = e.x - origin;
            (d - (d / stride).round() * stride).abs() <= tol
        })
        .collect();
    if family.len() < 2 {
        return None;
    }

    let last = family[family.len() - 1].x;
    let columns = ((last - origin) / stride).round() as u32 + 1;
    let confidence = (family.len() as f32 / columns as f32).min(1.0);
    if confidence < 0.25 {
        return None;
    }
    let mut widths: Vec<f32> = family.iter().map(|e| e.width).collect();
    let border_width = median(&mut widths).round().max(1.0) as u32;
    let cell = stride.round() as u32;

    Some(GridParameters {
        start_x: origin.round().max(0.0) as u32,
        start_y: band.y,
        cell_width: cell,
        cell_height: cell,
        columns,
        rows: 1,
        confidence,
        icon_size: cell_size.unwrap_or(stride * 0.92).round() as u32,
        border_width,
    })
}

/// Vertical border runs in one pixel column: `(start_y, length)`.
fn vertical_runs(
    image: &RgbaImage,
    x: u32,
    y_from: u32,
    min_len: u32,
    max_len: u32,
) -> Vec<(u32, u32)> {
    let mut runs = Vec::new();
    if x >= image.width() {
        return runs;
    }
    let height = image.height();
    let mut start: Option<u32> = None;
    for y in y_from..=height {
        let colored = y < height && {
            let [r, g, b, _] = image.get_pixel(x, y).0;
            is_border_pixel(r, g, b)
        };
        match (colored, start) {
            (true, None) => start = Some(y),
            (false, Some(s)) => {
                let len = y - s;
                if (min_len..=max_len).contains(&len) {
                    runs.push((s, len));
                }
                start = None;
            }
            _ => {}
        }
    }
    runs
}

/// Refine row origin, row count and icon size from the vertical extent of left borders.
fn refine_rows(
    image: &RgbaImage,
    mut grid: GridParameters,
    band: &IconBand,
    config: &GridConfig,
) -> GridParameters {
    let search_start = (image.height() as f32 * config.band_search_start) as u32;
    let stride = grid.cell_width;
    let min_len = (grid.icon_size / 2).max(2);
    let max_len = grid.icon_size + grid.icon_size / 2;

    let mut runs: Vec<(u32, u32)> = Vec::new();
    for column in 0..grid.columns {
        let x = grid.start_x + column * grid.cell_width + grid.border_width / 2;
        runs.extend(vertical_runs(image, x, search_start, min_len, max_len));
    }
    if runs.is_empty() {
        return grid;
    }

    let mut lengths: Vec<f32> = runs.iter().map(|(_, len)| *len as f32).collect();
    grid.icon_size = median(&mut lengths).round() as u32;

    // Cluster run starts into row origins
    runs.sort_by_key(|(s, _)| *s);
    let mut row_starts: Vec<f32> = Vec::new();
    let mut group: Vec<u32> = Vec::new();
    for (s, _) in &runs {
        if let Some(&first) = group.first()
            && (*s - first) as f32 > config.spacing_tolerance
        {
            row_starts.push(group.iter().sum::<u32>() as f32 / group.len() as f32);
            group.clear();
        }
        group.push(*s);
    }
    if !group.is_empty() {
        row_starts.push(group.iter().sum::<u32>() as f32 / group.len() as f32);
    }

    // Anchor on the row start closest to the band
    let band_mid = band.y as f32 + band.height as f32 / 2.0;
    let anchor = row_starts
        .iter()
        .copied()
        .min_by(|a, b| {
            let da = (a + grid.icon_size as f32 / 2.0 - band_mid).abs();
            let db = (b + grid.icon_size as f32 / 2.0 - band_mid).abs();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or(band.y as f32);

    let row_stride = if row_starts.len() >= 2 {
        dominant_spacing(&row_starts, config).unwrap_or(stride as f32)
    } else {
        stride as f32
    };
    let tol = config.spacing_tolerance;
    let aligned: Vec<f32> = row_starts
        .iter()
        .copied()
        .filter(|s| {
            let d = s - anchor;
            (d - (d / row_stride).round() * row_stride).abs() <= tol
        })
        .collect();

    let top = aligned.iter().copied().fold(anchor, f32::min);
    let bottom = aligned.iter().copied().fold(anchor, f32::max);
    grid.start_y = top.round() as u32;
    grid.cell_height = row_stride.round() as u32;
    grid.rows = ((bottom - top) / row_stride).round() as u32 + 1;
    grid
}

/// Full grid inference on a screenshot.
pub fn infer_grid(image: &RgbaImage, config: &GridConfig) -> GridInference {
    let Some(band) = locate_icon_band(image, config) else {
        return GridInference::default();
    };
    let scan_band = band.expanded(config.band_expand_ratio, image.height());

    let lines = config.scan_lines.max(1) as u32;
    let mut runs = Vec::new();
    for i in 0..lines {
        let y = scan_band.y + scan_band.height * (i + 1) / (lines + 1);
        runs.extend(scan_line_edges(image, y, config));
    }
    let clusters = cluster_edges(&runs, config);
    log::debug!(
        "🔍 Grid scan: {} runs on {} lines, {} consistent edges",
        runs.len(),
        lines,
        clusters.len()
    );

    let grid = grid_from_edges(&clusters, &band, config)
        .map(|grid| refine_rows(image, grid, &scan_band, config));
    if let Some(g) = &grid {
        log::debug!(
            "✅ Grid {}x{} at ({},{}) stride {}x{} icon {} border {} conf {:.2}",
            g.columns,
            g.rows,
            g.start_x,
            g.start_y,
            g.cell_width,
            g.cell_height,
            g.icon_size,
            g.border_width,
            g.confidence
        );
    }
    GridInference {
        band: Some(band),
        grid,
    }
}

/// Bordered cells found from their top-left border corner inside `region`.
///
/// A corner is a border pixel with no border pixel directly left of or above
/// it. The cell size is the shorter of the border runs going right and down;
/// the border width is measured across the left border at mid height.
/// Returns `(cell, border_width)` pairs.
pub fn border_anchored_cells(
    image: &RgbaImage,
    region: &Roi,
    config: &GridConfig,
) -> Vec<(Roi, u32)> {
    let (width, height) = image.dimensions();
    let region = region.clip_to(width, height);
    let border = |x: u32, y: u32| {
        x < width && y < height && {
            let [r, g, b, _] = image.get_pixel(x, y).0;
            is_border_pixel(r, g, b)
        }
    };
    let sizes = config.min_cell_size..=config.max_cell_size;

    let mut cells = Vec::new();
    for y in region.y..region.y + region.height {
        for x in region.x..region.x + region.width {
            if !border(x, y) || (x > 0 && border(x - 1, y)) || (y > 0 && border(x, y - 1)) {
                continue;
            }
            let run_right = (x..width).take_while(|&cx| border(cx, y)).count() as u32;
            let run_down = (y..height).take_while(|&cy| border(x, cy)).count() as u32;
            let size = run_right.min(run_down);
            if !sizes.contains(&size) {
                continue;
            }
            let mid = y + size / 2;
            let border_width = (x..x + size / 4).take_while(|&cx| border(cx, mid)).count() as u32;
            cells.push((Roi::new(x, y, size, size), border_width.max(1)));
        }
    }
    if !cells.is_empty() {
        log::debug!("🎯 {} border-anchored cells in {:?}", cells.len(), region);
    }
    cells
}
