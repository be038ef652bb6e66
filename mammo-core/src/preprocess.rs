//! Bytes-to-tensor transforms for the two model families.
//!
//! The two pipelines are not interchangeable. Each reproduces the exact
//! transform its model was trained with, so feeding a mammogram tensor to the
//! segmenter (or the reverse) produces plausible but meaningless output.

use image::{DynamicImage, GrayImage, Luma, RgbImage};
use ndarray::Array4;

use crate::config::{ClassifierConfig, SegmenterConfig};
use crate::error::{Error, Result};
use crate::resample::{resize_bicubic, resize_bilinear};

/// Mean and standard deviation of the mammogram normalization layer.
pub const MAMMOGRAM_MEAN: f32 = 0.5;
pub const MAMMOGRAM_STD: f32 = 0.5;

/// Decode raw bytes, rejecting empty payloads before the decoder sees them.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    if bytes.is_empty() {
        return Err(Error::EmptyInput);
    }
    image::load_from_memory(bytes).map_err(Error::Decode)
}

/// Convert RGB to single-channel luma with ITU-R 601-2 fixed-point weights.
///
/// This is `L = R * 299/1000 + G * 587/1000 + B * 114/1000`, rounded the way
/// the training pipeline's image library rounds it. It intentionally differs
/// from [`DynamicImage::to_luma8`], which uses Rec. 709 weights.
pub fn to_luma_itu601(rgb: &RgbImage) -> GrayImage {
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let l = (u32::from(r) * 19595 + u32::from(g) * 38470 + u32::from(b) * 7471 + 0x8000) >> 16;
        Luma([l as u8])
    })
}

/// Preprocess a mammogram into `[1, S, S, 1]` for the ViT classifier.
///
/// Grayscale, Pillow-compatible bicubic resize to `S x S` ignoring aspect
/// ratio, then `(pixel - 0.5) / 0.5` applied to raw `[0, 255]` values. There
/// is no `/ 255` rescale; the weights were trained on exactly this
/// distribution, so the output range is roughly `[-1, 509]`.
pub fn preprocess_mammogram(bytes: &[u8], config: &ClassifierConfig) -> Result<Array4<f32>> {
    let img = decode_image(bytes)?;
    let gray = to_luma_itu601(&img.to_rgb8());

    let size = config.image_size as u32;
    let resized = resize_bicubic(&gray, size, size);

    let data = resized
        .into_raw()
        .into_iter()
        .map(|p| (f32::from(p) - MAMMOGRAM_MEAN) / MAMMOGRAM_STD)
        .collect();
    let tensor = Array4::from_shape_vec((1, config.image_size, config.image_size, 1), data)
        .map_err(|e| Error::Validation(format!("mammogram tensor layout: {e}")))?;

    tracing::debug!(
        width = img.width(),
        height = img.height(),
        shape = ?tensor.shape(),
        "preprocessed mammogram"
    );
    Ok(tensor)
}

/// Preprocess an ultrasound image into `[1, S, S, 3]` for the segmenter.
///
/// RGB, half-pixel bilinear resize to `S x S` without antialiasing, then
/// `pixel / 255` into `[0, 1]`.
pub fn preprocess_ultrasound(bytes: &[u8], config: &SegmenterConfig) -> Result<Array4<f32>> {
    let img = decode_image(bytes)?;
    let rgb = img.to_rgb8();

    let size = config.image_size as u32;
    let resized = resize_bilinear(&rgb, size, size);

    let data = resized
        .into_raw()
        .into_iter()
        .map(|p| f32::from(p) / 255.0)
        .collect();
    let tensor = Array4::from_shape_vec((1, config.image_size, config.image_size, 3), data)
        .map_err(|e| Error::Validation(format!("ultrasound tensor layout: {e}")))?;

    tracing::debug!(
        width = img.width(),
        height = img.height(),
        shape = ?tensor.shape(),
        "preprocessed ultrasound"
    );
    Ok(tensor)
}

/// Fail with [`Error::ShapeMismatch`] unless `tensor` has exactly `expected` shape.
pub fn check_shape(tensor: &Array4<f32>, expected: [usize; 4]) -> Result<()> {
    if tensor.shape() != expected {
        return Err(Error::ShapeMismatch {
            expected: expected.to_vec(),
            actual: tensor.shape().to_vec(),
        });
    }
    Ok(())
}
