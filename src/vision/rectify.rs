//! Perspective rectification of detected card regions

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::Projection;
use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};
use crate::vision::geometry::Quadrilateral;

/// Rectification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RectifyConfig {
    /// Fraction of the warped image kept by the centered crop
    pub crop_scale: f64,
    /// Optional height/width ratio to resize the final crop to
    pub aspect_ratio: Option<f32>,
}

impl Default for RectifyConfig {
    fn default() -> Self {
        Self {
            crop_scale: 0.98,
            aspect_ratio: None,
        }
    }
}

/// Map a quadrilateral region onto an upright rectangle
///
/// Output size is the longer of each pair of opposite edges, truncated to
/// whole pixels. Landscape results are rotated a quarter turn clockwise so
/// the output is always portrait or square.
pub fn warp_quad(image: &RgbImage, quad: &Quadrilateral) -> ScanResult<RgbImage> {
    let width_top = quad.tr.distance(&quad.tl);
    let width_bottom = quad.br.distance(&quad.bl);
    let height_right = quad.tr.distance(&quad.br);
    let height_left = quad.tl.distance(&quad.bl);

    let max_w = width_top.max(width_bottom) as u32;
    let max_h = height_right.max(height_left) as u32;
    if max_w < 1 || max_h < 1 {
        return Err(ScanError::DegenerateRegion(format!(
            "warp target {}x{} is empty",
            max_w, max_h
        )));
    }

    let (w, h) = ((max_w - 1) as f32, (max_h - 1) as f32);
    let target = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];
    let projection = Projection::from_control_points(quad.corners_f32(), target).ok_or_else(|| {
        ScanError::DegenerateRegion(format!("no projective transform for {:?}", quad))
    })?;

    let inverse = projection.invert();
    let mut warped = RgbImage::new(max_w, max_h);
    for (x, y, px) in warped.enumerate_pixels_mut() {
        let (sx, sy) = inverse * (x as f32, y as f32);
        *px = sample_bilinear(image, sx, sy);
    }

    if max_w > max_h {
        Ok(imageops::rotate90(&warped))
    } else {
        Ok(warped)
    }
}

/// Bilinear sample with coordinates clamped to the image
///
/// Corners of a region that touch the frame edge land a rounding error
/// outside it, so out-of-range samples take the nearest edge pixel.
fn sample_bilinear(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = image.dimensions();
    let x = x.clamp(0.0, (width - 1) as f32);
    let y = y.clamp(0.0, (height - 1) as f32);

    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(width - 1), (y0 + 1).min(height - 1));
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);

    let tl = image.get_pixel(x0, y0).0;
    let tr = image.get_pixel(x1, y0).0;
    let bl = image.get_pixel(x0, y1).0;
    let br = image.get_pixel(x1, y1).0;

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = tl[c] as f32 * (1.0 - fx) + tr[c] as f32 * fx;
        let bottom = bl[c] as f32 * (1.0 - fx) + br[c] as f32 * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

/// Keep the centered `scale` fraction of an image in each dimension
pub fn center_crop(image: &RgbImage, scale: f64) -> ScanResult<RgbImage> {
    let (width, height) = image.dimensions();
    let (left, right) = crop_bounds(width, scale);
    let (top, bottom) = crop_bounds(height, scale);

    if right <= left || bottom <= top {
        return Err(ScanError::DegenerateRegion(format!(
            "crop of {}x{} at scale {} is empty",
            width, height, scale
        )));
    }

    Ok(imageops::crop_imm(image, left, top, right - left, bottom - top).to_image())
}

/// Half-open `[floor(c - len/2), floor(c + len/2))` around the midpoint
///
/// Bounds within `1e-9` of an integer snap to it, so `200 * 0.98` gives
/// exactly 2..198 rather than 1..198.
fn crop_bounds(size: u32, scale: f64) -> (u32, u32) {
    const SNAP: f64 = 1e-9;
    let center = size as f64 / 2.0;
    let half = size as f64 * scale / 2.0;
    let lo = (center - half + SNAP).floor().max(0.0) as u32;
    let hi = ((center + half + SNAP).floor().max(0.0) as u32).min(size);
    (lo, hi)
}

/// Shrink one dimension so that height / width equals `ratio`
pub fn resize_to_ratio(image: &RgbImage, ratio: f32) -> RgbImage {
    let (width, height) = image.dimensions();
    let current = height as f32 / width as f32;

    let (new_w, new_h) = if current > ratio {
        (width, ((width as f32 * ratio) as u32).max(1))
    } else {
        (((height as f32 / ratio) as u32).max(1), height)
    };

    if (new_w, new_h) == (width, height) {
        return image.clone();
    }
    imageops::resize(image, new_w, new_h, FilterType::Triangle)
}

/// Warp, orient and crop a detected card region
pub fn rectify(image: &RgbImage, quad: &Quadrilateral, config: &RectifyConfig) -> ScanResult<RgbImage> {
    let warped = warp_quad(image, quad)?;
    let cropped = center_crop(&warped, config.crop_scale)?;

    match config.aspect_ratio {
        Some(ratio) if ratio > 0.0 => Ok(resize_to_ratio(&cropped, ratio)),
        _ => Ok(cropped),
    }
}
