//! Image preprocessing for card outline detection
//!
//! Grayscale conversion, denoising, adaptive thresholding and morphology.
//! Numerics follow the usual OpenCV conventions so that outlines found here
//! agree with the offline tooling that produced the reference hashes.

use image::{GrayImage, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::filter::median_filter;
use imageproc::morphology::{dilate, erode};

/// Fixed-point BT.601 luma weights (scaled by 2^14)
const LUMA_R: u32 = 4899;
const LUMA_G: u32 = 9617;
const LUMA_B: u32 = 1868;
const LUMA_SHIFT: u32 = 14;

/// Convert an RGB image to single-channel grayscale
pub fn to_grayscale(image: &RgbImage) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut gray = GrayImage::new(width, height);

    for (src, dst) in image.pixels().zip(gray.pixels_mut()) {
        let [r, g, b] = src.0;
        let y = (r as u32 * LUMA_R + g as u32 * LUMA_G + b as u32 * LUMA_B + (1 << (LUMA_SHIFT - 1)))
            >> LUMA_SHIFT;
        *dst = Luma([y.min(255) as u8]);
    }

    gray
}

/// Median blur with a square `kernel x kernel` window
pub fn median_blur(image: &GrayImage, kernel: u32) -> GrayImage {
    let radius = kernel / 2;
    if radius == 0 {
        return image.clone();
    }
    median_filter(image, radius, radius)
}

/// Inverted adaptive mean threshold
///
/// A pixel becomes foreground (255) when it is at least `offset` below the
/// rounded mean of its `block_size x block_size` neighbourhood. Borders are
/// replicated.
pub fn adaptive_threshold_inv(image: &GrayImage, block_size: u32, offset: i32) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut out = GrayImage::new(width, height);
    if width == 0 || height == 0 {
        return out;
    }

    let radius = (block_size.max(1) / 2) as i64;
    let area = ((2 * radius + 1) * (2 * radius + 1)) as u32;
    let w = width as i64;
    let h = height as i64;
    let src = image.as_raw();

    // Horizontal box sums
    let mut row_sums = vec![0u32; (width * height) as usize];
    for y in 0..h {
        let row = &src[(y * w) as usize..((y + 1) * w) as usize];
        for x in 0..w {
            let mut sum = 0u32;
            for dx in -radius..=radius {
                sum += row[(x + dx).clamp(0, w - 1) as usize] as u32;
            }
            row_sums[(y * w + x) as usize] = sum;
        }
    }

    // Vertical box sums, mean and threshold
    for y in 0..h {
        for x in 0..w {
            let mut sum = 0u32;
            for dy in -radius..=radius {
                sum += row_sums[((y + dy).clamp(0, h - 1) * w + x) as usize];
            }
            let mean = ((sum + area / 2) / area) as i32;
            let value = src[(y * w + x) as usize] as i32;
            if value - mean <= -offset {
                out.put_pixel(x as u32, y as u32, Luma([255]));
            }
        }
    }

    out
}

/// Morphological closing with a 3x3 all-ones kernel (one dilation, one erosion)
pub fn close_3x3(binary: &GrayImage) -> GrayImage {
    let dilated = dilate(binary, Norm::LInf, 1);
    erode(&dilated, Norm::LInf, 1)
}

/// Full preprocessing chain: grayscale -> median blur -> threshold -> closing
pub fn edge_mask(
    image: &RgbImage,
    median_kernel: u32,
    block_size: u32,
    offset: i32,
) -> GrayImage {
    let gray = to_grayscale(image);
    let blurred = median_blur(&gray, median_kernel);
    let edged = adaptive_threshold_inv(&blurred, block_size, offset);
    close_3x3(&edged)
}
