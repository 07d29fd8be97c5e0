//! Regions of interest and raster helpers for targeted matching

use crate::error::{DetectError, DetectResult};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};

/// Integer pixel rectangle inside a raster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Roi {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            label: None,
        }
    }

    pub fn labeled(x: u32, y: u32, width: u32, height: u32, label: &str) -> Self {
        Self {
            label: Some(label.to_string()),
            ..Self::new(x, y, width, height)
        }
    }

    /// Full-raster region
    pub fn full(width: u32, height: u32) -> Self {
        Self::labeled(0, 0, width, height, "full_screen")
    }

    /// Clip region to raster boundaries
    pub fn clip_to(&self, raster_width: u32, raster_height: u32) -> Roi {
        let mut region = self.clone();
        region.x = region.x.min(raster_width.saturating_sub(1));
        region.y = region.y.min(raster_height.saturating_sub(1));
        region.width = region.width.min(raster_width.saturating_sub(region.x));
        region.height = region.height.min(raster_height.saturating_sub(region.y));
        region
    }

    /// True when the rectangle lies entirely within the raster.
    pub fn fits_within(&self, raster_width: u32, raster_height: u32) -> bool {
        self.is_valid()
            && self.x as u64 + self.width as u64 <= raster_width as u64
            && self.y as u64 + self.height as u64 <= raster_height as u64
    }

    /// Shrink by `inset` pixels on every side. Returns `None` when nothing is left.
    pub fn inset(&self, inset: u32) -> Option<Roi> {
        let width = self.width.checked_sub(inset * 2)?;
        let height = self.height.checked_sub(inset * 2)?;
        if width == 0 || height == 0 {
            return None;
        }
        Some(Roi {
            x: self.x + inset,
            y: self.y + inset,
            width,
            height,
            label: self.label.clone(),
        })
    }

    pub fn contains_point(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < (self.x + self.width) && y >= self.y && y < (self.y + self.height)
    }

    pub fn center(&self) -> (u32, u32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }

    pub fn center_f32(&self) -> (f32, f32) {
        (
            self.x as f32 + self.width as f32 / 2.0,
            self.y as f32 + self.height as f32 / 2.0,
        )
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Intersection-over-union with another rectangle.
    pub fn iou(&self, other: &Roi) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);
        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }
        let intersection = (x2 - x1) as u64 * (y2 - y1) as u64;
        let union = self.area() + other.area() - intersection;
        if union == 0 {
            0.0
        } else {
            intersection as f32 / union as f32
        }
    }
}

/// Copy the pixels under `roi` out of the raster.
///
/// Returns `None` when the region is empty or leaves the raster; callers treat
/// that as a skipped region rather than an error.
pub fn crop_region(image: &RgbaImage, roi: &Roi) -> Option<RgbaImage> {
    if !roi.fits_within(image.width(), image.height()) {
        return None;
    }
    Some(image::imageops::crop_imm(image, roi.x, roi.y, roi.width, roi.height).to_image())
}

/// Wrap a decoded RGBA buffer (origin top-left, 4 bytes per pixel).
pub fn raster_from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> DetectResult<RgbaImage> {
    if width == 0 || height == 0 {
        return Err(DetectError::EmptyRaster { width, height });
    }
    let expected = width as usize * height as usize * 4;
    let actual = pixels.len();
    RgbaImage::from_raw(width, height, pixels).ok_or(DetectError::InvalidRaster {
        width,
        height,
        expected,
        actual,
    })
}

/// Content hash used as the result-cache key.
pub fn raster_hash(image: &RgbaImage) -> u64 {
    let mut hasher = DefaultHasher::new();
    image.width().hash(&mut hasher);
    image.height().hash(&mut hasher);
    image.as_raw().hash(&mut hasher);
    hasher.finish()
}

/// Named screen regions of the game HUD
pub struct RegionManager {
    regions: HashMap<String, Roi>,
    screen_width: u32,
    screen_height: u32,
}

impl RegionManager {
    pub fn new(screen_width: u32, screen_height: u32) -> Self {
        let mut manager = Self {
            regions: HashMap::new(),
            screen_width,
            screen_height,
        };
        manager.add_common_regions();
        manager
    }

    fn add_common_regions(&mut self) {
        let w = self.screen_width;
        let h = self.screen_height;

        // Weapon and tome slots sit in the top-left corner
        self.add_region(
            "equipment",
            Roi::labeled(0, 0, w * 3 / 10, h * 35 / 100, "equipment"),
        );
        // Item hotbar along the bottom of the screen
        self.add_region(
            "hotbar",
            Roi::labeled(0, h * 3 / 4, w, h - h * 3 / 4, "hotbar"),
        );
    }

    pub fn add_region(&mut self, name: &str, region: Roi) {
        let clipped = region.clip_to(self.screen_width, self.screen_height);
        self.regions.insert(name.to_string(), clipped);
    }

    pub fn get_region(&self, name: &str) -> Option<&Roi> {
        self.regions.get(name)
    }

    /// Named region or the full screen when the name is unknown.
    pub fn resolve_region(&self, name: &str) -> Roi {
        self.get_region(name)
            .cloned()
            .unwrap_or_else(|| Roi::full(self.screen_width, self.screen_height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_to_raster_bounds() {
        let region = Roi::new(1000, 2200, 200, 200).clip_to(1080, 2280);
        assert_eq!(region.x, 1000);
        assert_eq!(region.width, 80);
        assert_eq!(region.y, 2200);
        assert_eq!(region.height, 80);
    }

    #[test]
    fn test_iou() {
        let a = Roi::new(0, 0, 10, 10);
        assert_eq!(a.iou(&a), 1.0);
        assert_eq!(a.iou(&Roi::new(20, 20, 10, 10)), 0.0);
        let half = a.iou(&Roi::new(5, 0, 10, 10));
        assert!((half - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_inset_and_fits() {
        let cell = Roi::new(60, 220, 44, 44);
        let inner = cell.inset(3).unwrap();
        assert_eq!((inner.x, inner.y, inner.width, inner.height), (63, 223, 38, 38));
        assert!(Roi::new(0, 0, 4, 4).inset(2).is_none());
        assert!(cell.fits_within(400, 300));
        assert!(!cell.fits_within(100, 300));
        assert!(!Roi::new(0, 0, 0, 5).fits_within(10, 10));
    }

    #[test]
    fn test_crop_rejects_out_of_bounds() {
        let image = RgbaImage::new(20, 20);
        assert!(crop_region(&image, &Roi::new(15, 15, 10, 10)).is_none());
        let crop = crop_region(&image, &Roi::new(5, 5, 10, 10)).unwrap();
        assert_eq!(crop.dimensions(), (10, 10));
    }

    #[test]
    fn test_raster_from_rgba_validates_length() {
        assert!(raster_from_rgba(2, 2, vec![0; 16]).is_ok());
        assert!(matches!(
            raster_from_rgba(2, 2, vec![0; 15]),
            Err(DetectError::InvalidRaster { expected: 16, actual: 15, .. })
        ));
        assert!(matches!(
            raster_from_rgba(0, 2, vec![]),
            Err(DetectError::EmptyRaster { .. })
        ));
    }

    #[test]
    fn test_raster_hash_is_content_based() {
        let a = RgbaImage::new(8, 8);
        let mut b = RgbaImage::new(8, 8);
        assert_eq!(raster_hash(&a), raster_hash(&b));
        b.put_pixel(3, 3, image::Rgba([1, 2, 3, 255]));
        assert_ne!(raster_hash(&a), raster_hash(&b));
    }

    #[test]
    fn test_region_manager_named_regions() {
        let manager = RegionManager::new(1920, 1080);
        let equipment = manager.resolve_region("equipment");
        assert_eq!((equipment.x, equipment.y), (0, 0));
        assert_eq!(equipment.width, 576);
        let unknown = manager.resolve_region("nope");
        assert_eq!(unknown.width, 1920);
    }
}
