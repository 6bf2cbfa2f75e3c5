//! Card outline detection
//!
//! Finds card-shaped quadrilaterals in a frame: threshold the image into an
//! edge mask, trace contours with their nesting hierarchy, and keep every
//! contour that simplifies to a large enough four-vertex polygon.

use image::{GrayImage, RgbImage};
use imageproc::contours::{find_contours, Contour};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use crate::capture::Frame;
use crate::error::ScanResult;
use crate::vision::geometry::{approx_poly_dp, arc_length, polygon_area, Point, Quadrilateral};
use crate::vision::preprocess::edge_mask;

/// Configuration for outline detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum enclosed area of a candidate in square pixels
    pub min_area: f64,
    /// Median blur kernel size (odd)
    pub median_kernel: u32,
    /// Adaptive threshold neighbourhood size (odd)
    pub threshold_block_size: u32,
    /// Amount a pixel must sit below its local mean to count as edge
    pub threshold_offset: i32,
    /// Polygon approximation tolerance as a fraction of contour perimeter
    pub poly_epsilon_ratio: f64,
    /// Reorder corners to tl/tr/br/bl instead of keeping approximation order
    pub canonical_corner_order: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_area: 10_000.0,
            median_kernel: 5,
            threshold_block_size: 5,
            threshold_offset: 5,
            poly_epsilon_ratio: 0.04,
            canonical_corner_order: true,
        }
    }
}

/// Quadrilateral detector
#[derive(Debug, Clone, Default)]
pub struct QuadDetector {
    config: DetectionConfig,
}

impl QuadDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Find candidate card outlines in an RGB image
    pub fn extract_quadrilaterals(&self, image: &RgbImage) -> Vec<Quadrilateral> {
        let start = Instant::now();
        let mask = edge_mask(
            image,
            self.config.median_kernel,
            self.config.threshold_block_size,
            self.config.threshold_offset,
        );
        let quads = self.quadrilaterals_in_mask(&mask);

        debug!(
            "Outline detection complete in {:?}: {} candidates",
            start.elapsed(),
            quads.len()
        );
        quads
    }

    /// Walk the contour tree of a binary mask
    ///
    /// An accepted contour's descendants are never evaluated. A rejected
    /// contour's children are searched before its next sibling.
    pub fn quadrilaterals_in_mask(&self, mask: &GrayImage) -> Vec<Quadrilateral> {
        let contours: Vec<Contour<i32>> = find_contours(mask);

        let mut children: Vec<Vec<usize>> = vec![Vec::new(); contours.len()];
        let mut roots = Vec::new();
        for (i, contour) in contours.iter().enumerate() {
            match contour.parent {
                Some(parent) => children[parent].push(i),
                None => roots.push(i),
            }
        }

        let mut quads = Vec::new();
        let mut stack: Vec<usize> = roots.into_iter().rev().collect();
        while let Some(i) = stack.pop() {
            let points: Vec<Point> = contours[i]
                .points
                .iter()
                .map(|p| Point::new(p.x, p.y))
                .collect();

            match self.evaluate_contour(&points) {
                Some(quad) => quads.push(quad),
                None => stack.extend(children[i].iter().rev()),
            }
        }

        quads
    }

    /// Accept a contour as a card outline or reject it
    fn evaluate_contour(&self, points: &[Point]) -> Option<Quadrilateral> {
        if polygon_area(points) < self.config.min_area {
            return None;
        }

        let epsilon = self.config.poly_epsilon_ratio * arc_length(points, true);
        let approx = approx_poly_dp(points, epsilon);
        let vertices: [Point; 4] = approx.try_into().ok()?;

        let quad = Quadrilateral::from_vertices(vertices, self.config.canonical_corner_order);
        if !quad.is_simple() || quad.area() < self.config.min_area {
            return None;
        }
        Some(quad)
    }
}

/// Validate a frame and find candidate card outlines in it
pub fn extract_quadrilaterals(frame: &Frame, config: &DetectionConfig) -> ScanResult<Vec<Quadrilateral>> {
    let image = frame.to_rgb_image()?;
    Ok(QuadDetector::new(config.clone()).extract_quadrilaterals(&image))
}
