//! Shared synthetic-screenshot builders for unit and scenario tests.

use crate::catalog::Rarity;
use image::{Rgba, RgbaImage};

pub(crate) const BACKGROUND: [u8; 3] = [20, 20, 30];

/// Border colour painted for each rarity in synthetic scenes.
pub(crate) fn rarity_rgb(rarity: Rarity) -> [u8; 3] {
    match rarity {
        Rarity::Common => [180, 180, 180],
        Rarity::Uncommon => [40, 200, 60],
        Rarity::Rare => [40, 110, 230],
        Rarity::Epic => [160, 50, 220],
        Rarity::Legendary => [255, 165, 0],
    }
}

/// Deterministic blocky icon art.
///
/// Channels stay within 30..=115 so no art pixel is ever mistaken for a
/// rarity border colour.
pub(crate) fn icon_art(size: u32, seed: u32) -> RgbaImage {
    RgbaImage::from_fn(size, size, |x, y| {
        let h = (x / 3).wrapping_mul(73_856_093)
            ^ (y / 3).wrapping_mul(19_349_663)
            ^ (seed + 1).wrapping_mul(83_492_791);
        let h = h.wrapping_mul(2_654_435_761);
        Rgba([
            30 + (h >> 8) as u8 % 86,
            30 + (h >> 16) as u8 % 86,
            30 + (h >> 24) as u8 % 86,
            255,
        ])
    })
}

pub(crate) fn blank_scene(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_pixel(
        width,
        height,
        Rgba([BACKGROUND[0], BACKGROUND[1], BACKGROUND[2], 255]),
    )
}

/// Paint a bordered icon cell with its top-left corner at `(x, y)`.
pub(crate) fn paint_cell(
    scene: &mut RgbaImage,
    x: u32,
    y: u32,
    border: u32,
    border_rgb: [u8; 3],
    art: &RgbaImage,
) {
    let size = art.width() + border * 2;
    for dy in 0..size {
        for dx in 0..size {
            let px = if dx < border || dy < border || dx >= size - border || dy >= size - border {
                Rgba([border_rgb[0], border_rgb[1], border_rgb[2], 255])
            } else {
                *art.get_pixel(dx - border, dy - border)
            };
            scene.put_pixel(x + dx, y + dy, px);
        }
    }
}

/// Paint borderless art with its top-left corner at `(x, y)`.
pub(crate) fn paint_art(scene: &mut RgbaImage, x: u32, y: u32, art: &RgbaImage) {
    image::imageops::replace(scene, art, x as i64, y as i64);
}
