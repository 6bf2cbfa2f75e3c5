//! Frame Pipeline
//!
//! Runs detection, rectification, hashing and matching for one frame.
//! Candidates are independent, so they are processed in parallel; a
//! candidate that fails is skipped without affecting the others.

use image::RgbImage;
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::capture::Frame;
use crate::error::{ScanError, ScanResult};
use crate::matching::{CardIdentity, Matcher};
use crate::phash::{phash, HashConfig, PerceptualHash};
use crate::vision::{rectify, DetectionConfig, QuadDetector, Quadrilateral, RectifyConfig};

/// Settings for one pipeline instance
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub detection: DetectionConfig,
    pub rectify: RectifyConfig,
    pub hashing: HashConfig,
    /// Process candidates of one frame on the rayon pool
    pub parallel: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detection: DetectionConfig::default(),
            rectify: RectifyConfig::default(),
            hashing: HashConfig::default(),
            parallel: true,
        }
    }
}

/// A recognized card and where it is in the frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    #[serde(rename = "cardData")]
    pub card: CardIdentity,
    #[serde(rename = "coords")]
    pub quad: Quadrilateral,
    pub distance: u32,
    #[serde(skip)]
    pub bits: u32,
}

impl MatchResult {
    /// 1.0 for an exact match, falling linearly with distance
    pub fn similarity(&self) -> f64 {
        if self.bits == 0 {
            return 0.0;
        }
        1.0 - self.distance as f64 / self.bits as f64
    }
}

/// Hash computed for one detected region
#[derive(Debug, Clone)]
pub struct Candidate {
    pub quad: Quadrilateral,
    pub phash: PerceptualHash,
}

pub struct FramePipeline {
    detector: QuadDetector,
    rectify: RectifyConfig,
    hashing: HashConfig,
    parallel: bool,
    matcher: Arc<Matcher>,
}

impl FramePipeline {
    pub fn new(config: PipelineConfig, matcher: Arc<Matcher>) -> ScanResult<Self> {
        config.hashing.validate()?;
        let bits = config.hashing.bit_len();
        if matcher.table().bit_len() != bits {
            return Err(ScanError::Config(format!(
                "reference table holds {}-bit hashes but hashing produces {} bits",
                matcher.table().bit_len(),
                bits
            )));
        }

        Ok(Self {
            detector: QuadDetector::new(config.detection),
            rectify: config.rectify,
            hashing: config.hashing,
            parallel: config.parallel,
            matcher,
        })
    }

    pub fn matcher(&self) -> &Arc<Matcher> {
        &self.matcher
    }

    /// Recognize every card visible in a frame
    ///
    /// Only a malformed frame is an error. Zero candidates, regions that
    /// cannot be rectified and unmatched hashes all just shrink the result.
    pub fn process_frame(&self, frame: &Frame) -> ScanResult<Vec<MatchResult>> {
        let start = Instant::now();
        let image = frame.to_rgb_image()?;
        let quads = self.detector.extract_quadrilaterals(&image);
        let candidate_count = quads.len();

        let results: Vec<MatchResult> = self
            .map_quads(quads, |quad| self.recognize(&image, quad))
            .into_iter()
            .flatten()
            .collect();

        debug!(
            "Frame {}x{}: {} candidates, {} matches in {:?}",
            frame.width,
            frame.height,
            candidate_count,
            results.len(),
            start.elapsed()
        );
        Ok(results)
    }

    /// Detect and hash every candidate without matching
    pub fn hash_candidates(&self, frame: &Frame) -> ScanResult<Vec<Candidate>> {
        let image = frame.to_rgb_image()?;
        let quads = self.detector.extract_quadrilaterals(&image);

        Ok(self
            .map_quads(quads, |quad| {
                self.hash_region(&image, &quad)
                    .map(|phash| Candidate { quad, phash })
            })
            .into_iter()
            .flatten()
            .collect())
    }

    /// Apply `f` to every quad, in parallel when enabled, keeping order
    fn map_quads<T, F>(&self, quads: Vec<Quadrilateral>, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(Quadrilateral) -> T + Sync + Send,
    {
        if self.parallel && quads.len() > 1 {
            quads.into_par_iter().map(f).collect()
        } else {
            quads.into_iter().map(f).collect()
        }
    }

    fn hash_region(&self, image: &RgbImage, quad: &Quadrilateral) -> Option<PerceptualHash> {
        let rectified = match rectify(image, quad, &self.rectify) {
            Ok(img) => img,
            Err(e) => {
                debug!("Skipping candidate: {}", e);
                return None;
            }
        };

        match phash(&rectified, &self.hashing) {
            Ok(hash) => Some(hash),
            Err(e) => {
                debug!("Skipping candidate: {}", e);
                None
            }
        }
    }

    fn recognize(&self, image: &RgbImage, quad: Quadrilateral) -> Option<MatchResult> {
        let hash = self.hash_region(image, &quad)?;

        match self.matcher.find(&hash) {
            Ok(Some(found)) => Some(MatchResult {
                card: found.card,
                quad,
                distance: found.distance,
                bits: hash.bit_len(),
            }),
            Ok(None) => None,
            Err(e) => {
                warn!("Matching failed for candidate: {}", e);
                None
            }
        }
    }
}
