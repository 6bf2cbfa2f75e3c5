//! Two-dimensional DCT-II
//!
//! Computed as `A · X · Bᵀ` with precomputed cosine bases. Coefficients are
//! scaled by `1/√2` on each zero-frequency axis and divided by 4, the
//! normalization the reference hash datasets were produced with.

use ndarray::Array2;
use std::f64::consts::{FRAC_1_SQRT_2, PI};

/// Cosine basis: `rows x n` matrix with `basis[k][i] = cos(π/n · (i + 0.5) · k)`
fn cosine_basis(rows: usize, n: usize) -> Array2<f64> {
    Array2::from_shape_fn((rows, n), |(k, i)| {
        (PI / n as f64 * (i as f64 + 0.5) * k as f64).cos()
    })
}

/// Lowest `keep_rows x keep_cols` DCT-II coefficients of `pixels`
///
/// Row index is vertical frequency, column index horizontal frequency.
/// Asking for the full size yields the complete transform.
pub fn dct_2d(pixels: &Array2<f64>, keep_rows: usize, keep_cols: usize) -> Array2<f64> {
    let (height, width) = pixels.dim();
    let keep_rows = keep_rows.min(height);
    let keep_cols = keep_cols.min(width);

    let vertical = cosine_basis(keep_rows, height);
    let horizontal = cosine_basis(keep_cols, width);

    let mut coeffs = vertical.dot(pixels).dot(&horizontal.t());
    coeffs.indexed_iter_mut().for_each(|((r, c), v)| {
        let mut scale = 0.25;
        if r == 0 {
            scale *= FRAC_1_SQRT_2;
        }
        if c == 0 {
            scale *= FRAC_1_SQRT_2;
        }
        *v *= scale;
    });
    coeffs
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Direct quadruple-sum definition for comparison
    fn naive_dct(pixels: &Array2<f64>) -> Array2<f64> {
        let (h, w) = pixels.dim();
        Array2::from_shape_fn((h, w), |(r, c)| {
            let mut sum = 0.0;
            for y in 0..h {
                for x in 0..w {
                    sum += pixels[[y, x]]
                        * (PI / h as f64 * (y as f64 + 0.5) * r as f64).cos()
                        * (PI / w as f64 * (x as f64 + 0.5) * c as f64).cos();
                }
            }
            let cr = if r == 0 { FRAC_1_SQRT_2 } else { 1.0 };
            let cc = if c == 0 { FRAC_1_SQRT_2 } else { 1.0 };
            sum * cr * cc / 4.0
        })
    }

    #[test]
    fn test_constant_image_has_only_dc() {
        let pixels = Array2::from_elem((64, 64), 10.0);
        let coeffs = dct_2d(&pixels, 64, 64);

        // 10 * 4096 / 2 / 4
        assert!((coeffs[[0, 0]] - 5120.0).abs() < 1e-6);
        for ((r, c), v) in coeffs.indexed_iter() {
            if (r, c) != (0, 0) {
                assert!(v.abs() < 1e-6, "coefficient ({}, {}) = {}", r, c, v);
            }
        }
    }

    #[test]
    fn test_matches_direct_definition() {
        let mut seed = 12345u32;
        let pixels = Array2::from_shape_fn((8, 6), |_| {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            ((seed >> 16) % 256) as f64
        });

        let fast = dct_2d(&pixels, 8, 6);
        let slow = naive_dct(&pixels);

        for (a, b) in fast.iter().zip(slow.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_partial_transform_is_top_left_block() {
        let pixels = Array2::from_shape_fn((16, 16), |(y, x)| (x * 3 + y * 7) as f64);
        let full = dct_2d(&pixels, 16, 16);
        let part = dct_2d(&pixels, 4, 4);

        assert_eq!(part.dim(), (4, 4));
        for ((r, c), v) in part.indexed_iter() {
            assert!((v - full[[r, c]]).abs() < 1e-9);
        }
    }
}
