//! Skin ROI selection on face crops
//!
//! The pulse signal is sampled from a band across the upper face
//! (forehead and upper cheeks), away from eyes, hair and the jaw line.

use super::image_ops::Image;

/// Green channel index in interleaved RGB8
pub const GREEN: usize = 1;

/// Fractional rectangle inside a face crop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoiFraction {
    pub top: f64,
    pub bottom: f64,
    pub left: f64,
    pub right: f64,
}

impl Default for RoiFraction {
    fn default() -> Self {
        Self {
            top: 0.2,
            bottom: 0.5,
            left: 0.2,
            right: 0.8,
        }
    }
}

impl RoiFraction {
    /// Pixel rectangle (x, y, w, h) for a crop of the given size
    pub fn to_pixels(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let w = width as f64;
        let h = height as f64;
        let y0 = (h * self.top) as u32;
        let y1 = (h * self.bottom) as u32;
        let x0 = (w * self.left) as u32;
        let x1 = (w * self.right) as u32;
        (x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
    }

    /// Extract the ROI; the result may be empty for tiny crops
    pub fn extract(&self, face: &Image) -> Image {
        let (x, y, w, h) = self.to_pixels(face.width(), face.height());
        face.crop(x, y, w, h)
    }
}

/// Mean green intensity over the skin ROI, `None` if the ROI is empty
pub fn skin_green_mean(face: &Image, roi: &RoiFraction) -> Option<f64> {
    if face.is_empty() {
        return None;
    }
    roi.extract(face).channel_mean(GREEN)
}
