//! DCT perceptual hash of a rectified card image

use image::{GrayImage, Luma, RgbImage};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::dct::dct_2d;
use super::PerceptualHash;
use crate::error::{ScanError, ScanResult};
use crate::vision::preprocess::to_grayscale;

/// Hash parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashConfig {
    /// Side of the kept low-frequency block; the hash has `hash_size²` bits
    pub hash_size: u32,
    /// Oversampling factor: the image is resized to `hash_size * highfreq_factor` square
    pub highfreq_factor: u32,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            hash_size: 16,
            highfreq_factor: 4,
        }
    }
}

impl HashConfig {
    /// Width of the produced hash in bits
    pub fn bit_len(&self) -> u32 {
        self.hash_size * self.hash_size
    }

    /// Side of the square image fed to the DCT
    pub fn image_size(&self) -> u32 {
        self.hash_size * self.highfreq_factor
    }

    pub fn validate(&self) -> ScanResult<()> {
        if self.hash_size < 2 {
            return Err(ScanError::Config(format!(
                "hash_size must be at least 2, got {}",
                self.hash_size
            )));
        }
        if self.highfreq_factor < 1 {
            return Err(ScanError::Config("highfreq_factor must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Perceptual hash of an RGB image
pub fn phash(image: &RgbImage, config: &HashConfig) -> ScanResult<PerceptualHash> {
    phash_gray(&to_grayscale(image), config)
}

/// Perceptual hash of a grayscale image
pub fn phash_gray(gray: &GrayImage, config: &HashConfig) -> ScanResult<PerceptualHash> {
    config.validate()?;
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return Err(ScanError::DegenerateRegion("cannot hash an empty image".to_string()));
    }

    let size = config.image_size();
    let small = resize_area(gray, size, size);
    let pixels = Array2::from_shape_fn((size as usize, size as usize), |(y, x)| {
        small.get_pixel(x as u32, y as u32).0[0] as f64
    });

    let keep = config.hash_size as usize;
    let low = dct_2d(&pixels, keep, keep);
    let coeffs: Vec<f64> = low.iter().copied().collect();
    let median = median(&coeffs);

    let bits: Vec<bool> = coeffs.iter().map(|&c| c > median).collect();
    Ok(PerceptualHash::from_bits(&bits))
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Per destination pixel, the source pixels it covers and their weights
fn area_weights(src: u32, dst: u32) -> Vec<Vec<(usize, f64)>> {
    let scale = src as f64 / dst as f64;

    (0..dst)
        .map(|i| {
            let start = i as f64 * scale;
            let end = start + scale;
            let first = start.floor() as u32;
            let last = (end.ceil() as u32).min(src);

            (first..last)
                .filter_map(|j| {
                    let overlap = end.min(j as f64 + 1.0) - start.max(j as f64);
                    (overlap > 1e-12).then_some((j as usize, overlap / scale))
                })
                .collect()
        })
        .collect()
}

/// Two-tap interpolation per destination pixel for an enlarging axis
///
/// Same coefficients as OpenCV `INTER_AREA` uses when zooming: the output
/// copies source pixels except where a source boundary falls inside the
/// destination pixel, which blends the two neighbours.
fn enlarge_taps(src: u32, dst: u32) -> Vec<(u32, u32, f32)> {
    let scale = src as f64 / dst as f64;
    let inv_scale = dst as f64 / src as f64;
    let last = src as i64 - 1;

    (0..dst as i64)
        .map(|d| {
            let mut s = (d as f64 * scale).floor() as i64;
            let mut f = ((d + 1) as f64 - (s + 1) as f64 * inv_scale) as f32;
            f = if f <= 0.0 { 0.0 } else { f - f.floor() };
            if s < 0 {
                s = 0;
                f = 0.0;
            }
            if s >= last {
                s = last;
                f = 0.0;
            }
            let s = s as u32;
            (s, (s + 1).min(last as u32), f)
        })
        .collect()
}

/// Resize used when the destination is larger than the source on either axis
fn resize_enlarge(gray: &GrayImage, width: u32, height: u32) -> GrayImage {
    let (src_w, src_h) = gray.dimensions();
    let x_taps = enlarge_taps(src_w, width);
    let y_taps = enlarge_taps(src_h, height);

    let mut out = GrayImage::new(width, height);
    for (dy, &(y0, y1, fy)) in y_taps.iter().enumerate() {
        for (dx, &(x0, x1, fx)) in x_taps.iter().enumerate() {
            let p = |x: u32, y: u32| gray.get_pixel(x, y).0[0] as f32;
            let top = p(x0, y0) * (1.0 - fx) + p(x1, y0) * fx;
            let bottom = p(x0, y1) * (1.0 - fx) + p(x1, y1) * fx;
            let v = top * (1.0 - fy) + bottom * fy;
            out.put_pixel(dx as u32, dy as u32, Luma([v.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

/// Area-averaging resize
///
/// When shrinking, every destination pixel is the coverage-weighted mean of
/// the source pixels under it. When either axis grows, both axes switch to
/// the two-tap zoom of [`enlarge_taps`], as OpenCV `INTER_AREA` does.
pub fn resize_area(gray: &GrayImage, width: u32, height: u32) -> GrayImage {
    let (src_w, src_h) = gray.dimensions();
    if width > src_w || height > src_h {
        return resize_enlarge(gray, width, height);
    }

    let x_weights = area_weights(src_w, width);
    let y_weights = area_weights(src_h, height);

    // Horizontal pass into a float buffer, one row per source row
    let mut rows = vec![0f64; src_h as usize * width as usize];
    for y in 0..src_h {
        for (dx, weights) in x_weights.iter().enumerate() {
            rows[y as usize * width as usize + dx] = weights
                .iter()
                .map(|&(sx, w)| gray.get_pixel(sx as u32, y).0[0] as f64 * w)
                .sum();
        }
    }

    let mut out = GrayImage::new(width, height);
    for (dy, weights) in y_weights.iter().enumerate() {
        for dx in 0..width as usize {
            let v: f64 = weights
                .iter()
                .map(|&(sy, w)| rows[sy * width as usize + dx] * w)
                .sum();
            out.put_pixel(dx as u32, dy as u32, Luma([v.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::imageops::{self, FilterType};
    use image::Rgb;

    /// Smooth pseudo-random texture: a coarse noise grid upsampled
    fn texture(seed: u32, width: u32, height: u32) -> RgbImage {
        let mut state = seed;
        let coarse = RgbImage::from_fn(12, 16, |_, _| {
            let mut next = || {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 24) as u8
            };
            Rgb([next(), next(), next()])
        });
        imageops::resize(&coarse, width, height, FilterType::Triangle)
    }

    #[test]
    fn test_hash_is_deterministic() {
        let img = texture(7, 200, 280);
        let config = HashConfig::default();

        let a = phash(&img, &config).unwrap();
        let b = phash(&img, &config).unwrap();

        assert_eq!(a, b);
        assert_eq!(a.bit_len(), 256);
    }

    fn jpeg_round_trip(image: &RgbImage, quality: u8) -> RgbImage {
        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, quality)
            .encode_image(image)
            .unwrap();
        image::load_from_memory(&bytes).unwrap().to_rgb8()
    }

    #[test]
    fn test_resized_and_recompressed_copies_stay_close() {
        let config = HashConfig::default();
        let original = texture(42, 320, 448);

        let smaller = imageops::resize(&original, 160, 224, FilterType::Triangle);
        let compressed = jpeg_round_trip(&original, 70);

        let base = phash(&original, &config).unwrap();
        let resized = base.hamming_distance(&phash(&smaller, &config).unwrap());
        let jpeg = base.hamming_distance(&phash(&compressed, &config).unwrap());

        assert!(resized <= 8, "resized copy differs by {} bits", resized);
        assert!(jpeg <= 8, "jpeg copy differs by {} bits", jpeg);
    }

    #[test]
    fn test_unrelated_images_are_far_apart() {
        let config = HashConfig::default();
        let a = phash(&texture(1, 200, 280), &config).unwrap();
        let b = phash(&texture(99, 200, 280), &config).unwrap();

        assert!(a.hamming_distance(&b) > 60);
    }

    #[test]
    fn test_half_of_bits_are_set() {
        // Threshold is the median, so a textured image splits its coefficients evenly
        let hash = phash(&texture(5, 128, 128), &HashConfig::default()).unwrap();
        let ones: u32 = hash.words().iter().map(|w| w.count_ones()).sum();

        assert!((120..=136).contains(&ones), "{} bits set", ones);
    }

    #[test]
    fn test_hash_size_controls_width() {
        let config = HashConfig {
            hash_size: 8,
            highfreq_factor: 4,
        };
        let hash = phash(&texture(3, 64, 64), &config).unwrap();
        assert_eq!(hash.bit_len(), 64);
        assert_eq!(hash.words().len(), 1);
    }

    #[test]
    fn test_invalid_hash_size_is_config_error() {
        let config = HashConfig {
            hash_size: 1,
            highfreq_factor: 4,
        };
        let img = texture(3, 32, 32);
        assert!(matches!(phash(&img, &config), Err(ScanError::Config(_))));
    }

    #[test]
    fn test_resize_area_averages_blocks() {
        let gray = GrayImage::from_fn(4, 2, |x, _| if x < 2 { Luma([10]) } else { Luma([30]) });
        let small = resize_area(&gray, 2, 1);

        assert_eq!(small.get_pixel(0, 0).0[0], 10);
        assert_eq!(small.get_pixel(1, 0).0[0], 30);

        let one = resize_area(&gray, 1, 1);
        assert_eq!(one.get_pixel(0, 0).0[0], 20);
    }

    #[test]
    fn test_resize_area_fractional_coverage() {
        // 3 -> 2: each output pixel covers 1.5 source pixels
        let gray = GrayImage::from_fn(3, 1, |x, _| Luma([[0, 90, 180][x as usize]]));
        let small = resize_area(&gray, 2, 1);

        // (0 * 1 + 90 * 0.5) / 1.5 = 30, (90 * 0.5 + 180 * 1) / 1.5 = 150
        assert_eq!(small.get_pixel(0, 0).0[0], 30);
        assert_eq!(small.get_pixel(1, 0).0[0], 150);
    }

    #[test]
    fn test_resize_area_integer_zoom_repeats_pixels() {
        let gray = GrayImage::from_fn(2, 1, |x, _| Luma([[10, 50][x as usize]]));
        let wide = resize_area(&gray, 4, 2);

        let row: Vec<u8> = (0..4).map(|x| wide.get_pixel(x, 0).0[0]).collect();
        assert_eq!(row, vec![10, 10, 50, 50]);
        assert_eq!(wide.get_pixel(3, 1).0[0], 50);
    }

    #[test]
    fn test_resize_area_fractional_zoom_blends_boundary() {
        // 2 -> 3: the middle pixel straddles the source boundary
        let gray = GrayImage::from_fn(2, 1, |x, _| Luma([[10, 50][x as usize]]));
        let wide = resize_area(&gray, 3, 1);

        let row: Vec<u8> = (0..3).map(|x| wide.get_pixel(x, 0).0[0]).collect();
        assert_eq!(row, vec![10, 30, 50]);
    }

    #[test]
    fn test_narrow_region_hashes_without_error() {
        let hash = phash(&texture(11, 40, 56), &HashConfig::default()).unwrap();
        assert_eq!(hash.bit_len(), 256);
    }

    #[test]
    fn test_median_even_count_is_midpoint() {
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median(&[5.0, 1.0, 3.0]), 3.0);
    }
}
