//! Image loading and tensor-layout conversion helpers.

use std::path::Path;

use anyhow::{Context, Result};
use image::{DynamicImage, RgbImage};
use ndarray::Array3;

/// Load an image from disk into memory.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
    let path = path.as_ref();
    image::open(path).with_context(|| format!("failed to load image from {}", path.display()))
}

/// Convert an RGB image into a planar BGR array of shape `(3, H, W)`.
///
/// Values keep their `[0, 255]` range. The channel swap matches models
/// trained against OpenCV-decoded frames.
pub fn rgb_to_bgr_chw(image: &RgbImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    let mut chw = Array3::<f32>::zeros((3, height as usize, width as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        chw[(0, y, x)] = f32::from(pixel[2]); // Blue
        chw[(1, y, x)] = f32::from(pixel[1]); // Green
        chw[(2, y, x)] = f32::from(pixel[0]); // Red
    }
    chw
}

/// Convert an RGB image into a planar RGB array of shape `(3, H, W)` with
/// values scaled from `[0, 255]` to `[0.0, 1.0]`.
pub fn rgb_to_unit_chw(image: &RgbImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    let mut chw = Array3::<f32>::zeros((3, height as usize, width as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        chw[(0, y, x)] = f32::from(pixel[0]) / 255.0;
        chw[(1, y, x)] = f32::from(pixel[1]) / 255.0;
        chw[(2, y, x)] = f32::from(pixel[2]) / 255.0;
    }
    chw
}
