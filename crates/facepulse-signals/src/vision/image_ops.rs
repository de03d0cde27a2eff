//! Image buffer operations
//!
//! Minimal RGB8 image container used for frames and face crops:
//! - Construction with size checking
//! - Pixel access
//! - Crop/ROI extraction
//! - Per-channel means

use thiserror::Error;

/// Number of interleaved channels (R, G, B)
pub const CHANNELS: usize = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("data size mismatch: expected {expected} bytes for {width}x{height}, got {actual}")]
    SizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// Row-major interleaved RGB8 image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl Image {
    /// Wrap raw RGB8 data
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self, ImageError> {
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(ImageError::SizeMismatch {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Image filled with a single colour
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * CHANNELS);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self {
            data,
            width,
            height,
        }
    }

    /// Zero-sized image
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            width: 0,
            height: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Get pixel at (x, y) as [R, G, B]
    #[inline]
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * CHANNELS;
        Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
    }

    /// Set pixel at (x, y); out-of-bounds writes are ignored
    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = (y as usize * self.width as usize + x as usize) * CHANNELS;
        self.data[idx..idx + CHANNELS].copy_from_slice(&rgb);
    }

    /// Crop a rectangular region, clamped to the image bounds
    pub fn crop(&self, x: u32, y: u32, crop_w: u32, crop_h: u32) -> Image {
        let x0 = x.min(self.width);
        let y0 = y.min(self.height);
        let x1 = x.saturating_add(crop_w).min(self.width);
        let y1 = y.saturating_add(crop_h).min(self.height);
        let (w, h) = (x1 - x0, y1 - y0);

        let mut data = Vec::with_capacity(w as usize * h as usize * CHANNELS);
        let stride = self.width as usize * CHANNELS;
        for row in y0..y1 {
            let start = row as usize * stride + x0 as usize * CHANNELS;
            data.extend_from_slice(&self.data[start..start + w as usize * CHANNELS]);
        }
        Image {
            data,
            width: w,
            height: h,
        }
    }

    /// Crop using normalized [x_min, y_min, x_max, y_max] coordinates
    pub fn crop_normalized(&self, bbox: [f64; 4]) -> Image {
        let w = self.width as f64;
        let h = self.height as f64;
        let px1 = (bbox[0].clamp(0.0, 1.0) * w) as u32;
        let py1 = (bbox[1].clamp(0.0, 1.0) * h) as u32;
        let px2 = (bbox[2].clamp(0.0, 1.0) * w) as u32;
        let py2 = (bbox[3].clamp(0.0, 1.0) * h) as u32;
        self.crop(px1, py1, px2.saturating_sub(px1), py2.saturating_sub(py1))
    }

    /// Mean of one channel over the whole image, `None` when empty
    pub fn channel_mean(&self, channel: usize) -> Option<f64> {
        if self.is_empty() || channel >= CHANNELS {
            return None;
        }
        let sum: f64 = self
            .data
            .iter()
            .skip(channel)
            .step_by(CHANNELS)
            .map(|&v| v as f64)
            .sum();
        let count = self.width as f64 * self.height as f64;
        Some(sum / count)
    }

    /// Mean RGB values for the entire image
    pub fn mean_rgb(&self) -> Option<[f64; 3]> {
        Some([
            self.channel_mean(0)?,
            self.channel_mean(1)?,
            self.channel_mean(2)?,
        ])
    }
}
