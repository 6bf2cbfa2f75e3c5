//! Frame data structures for video frames submitted to the pipeline

use base64::Engine;
use image::{DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::{ScanError, ScanResult};

/// Channel order of a raw pixel buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelLayout {
    /// Browser `ImageData` order
    #[default]
    Rgba,
    /// Common for native screen/camera captures
    Bgra,
    Rgb,
    Bgr,
    /// Single luminance channel
    Gray,
}

impl PixelLayout {
    /// Bytes per pixel
    pub fn channels(&self) -> usize {
        match self {
            PixelLayout::Rgba | PixelLayout::Bgra => 4,
            PixelLayout::Rgb | PixelLayout::Bgr => 3,
            PixelLayout::Gray => 1,
        }
    }

    /// Byte offsets of the red, green and blue samples within a pixel
    fn rgb_offsets(&self) -> [usize; 3] {
        match self {
            PixelLayout::Rgba | PixelLayout::Rgb => [0, 1, 2],
            PixelLayout::Bgra | PixelLayout::Bgr => [2, 1, 0],
            PixelLayout::Gray => [0, 0, 0],
        }
    }
}

/// A single still frame from the video source
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw pixel data, row-major, no padding
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Channel order of `data`
    pub layout: PixelLayout,
    /// When the frame was received
    pub timestamp: Instant,
}

impl Frame {
    /// Create a new frame
    pub fn new(data: Vec<u8>, width: u32, height: u32, layout: PixelLayout) -> Self {
        Self {
            data,
            width,
            height,
            layout,
            timestamp: Instant::now(),
        }
    }

    /// Create a frame from RGBA data
    pub fn from_rgba(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self::new(data, width, height, PixelLayout::Rgba)
    }

    /// Create a frame from an already decoded image
    pub fn from_image(image: &DynamicImage) -> Self {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        Self::new(rgb.into_raw(), width, height, PixelLayout::Rgb)
    }

    /// Decode an encoded image (PNG, JPEG, ...) into a frame
    pub fn decode(bytes: &[u8]) -> ScanResult<Self> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| ScanError::FrameProcessing(format!("cannot decode image: {}", e)))?;
        Ok(Self::from_image(&image))
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Check that the buffer matches the declared geometry
    pub fn validate(&self) -> ScanResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ScanError::FrameProcessing(format!(
                "frame has zero dimension ({}x{})",
                self.width, self.height
            )));
        }

        let expected = self.width as usize * self.height as usize * self.layout.channels();
        if self.data.len() != expected {
            return Err(ScanError::FrameProcessing(format!(
                "{:?} buffer for {}x{} should hold {} bytes, got {}",
                self.layout,
                self.width,
                self.height,
                expected,
                self.data.len()
            )));
        }

        Ok(())
    }

    /// Normalize the frame to an RGB image regardless of source layout
    pub fn to_rgb_image(&self) -> ScanResult<RgbImage> {
        self.validate()?;

        let channels = self.layout.channels();
        let [r, g, b] = self.layout.rgb_offsets();
        let mut rgb = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for px in self.data.chunks_exact(channels) {
            rgb.extend_from_slice(&[px[r], px[g], px[b]]);
        }

        RgbImage::from_raw(self.width, self.height, rgb)
            .ok_or_else(|| ScanError::FrameProcessing("failed to build RGB image".to_string()))
    }
}

/// Pixel payload of a wire frame
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PixelData {
    /// Plain array of bytes (JSON-serialized typed array)
    Bytes(Vec<u8>),
    /// Base64 of raw pixels, or a `data:image/...;base64,` URL of an encoded image
    Encoded(String),
}

/// Wire representation of a frame (`imageData` in session requests)
#[derive(Debug, Clone, Deserialize)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub layout: PixelLayout,
    pub data: PixelData,
}

impl ImageData {
    /// Convert to a validated frame
    pub fn into_frame(self) -> ScanResult<Frame> {
        let frame = match self.data {
            PixelData::Bytes(bytes) => Frame::new(bytes, self.width, self.height, self.layout),
            PixelData::Encoded(text) => {
                if let Some(rest) = text.strip_prefix("data:") {
                    // Data URL: the payload is an encoded image, its own header wins
                    let payload = rest
                        .split_once(',')
                        .map(|(_, p)| p)
                        .ok_or_else(|| ScanError::FrameProcessing("malformed data URL".to_string()))?;
                    Frame::decode(&decode_base64(payload)?)?
                } else {
                    Frame::new(decode_base64(&text)?, self.width, self.height, self.layout)
                }
            }
        };

        frame.validate()?;
        Ok(frame)
    }
}

fn decode_base64(text: &str) -> ScanResult<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(text.trim())
        .map_err(|e| ScanError::FrameProcessing(format!("invalid base64 pixel data: {}", e)))
}
