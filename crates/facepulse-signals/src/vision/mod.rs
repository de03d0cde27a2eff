//! Vision primitives for pulse extraction
//!
//! - `Image` - RGB8 buffer used for frames and face crops
//! - `RoiFraction` / `skin_green_mean` - skin region sampling on a face crop
//!
//! Face detection itself lives outside this crate; callers hand in crops.

mod face_roi;
mod image_ops;

pub use face_roi::{skin_green_mean, RoiFraction, GREEN};
pub use image_ops::{Image, ImageError, CHANNELS};
