//! Preprocessing checked against reference outputs.
//!
//! `data/lcg_noise_300x260_bicubic_224.raw` holds the 224x224 8-bit result of
//! Pillow's `Image.resize((224, 224))` (default bicubic) applied to the
//! 300x260 grayscale noise image produced by [`lcg_noise`].
//!
//! Run with: cargo test --package mammo-core --test integration

use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat};

use mammo_core::preprocess::{preprocess_mammogram, MAMMOGRAM_MEAN, MAMMOGRAM_STD};
use mammo_core::resample::resize_bicubic;
use mammo_core::ClassifierConfig;

const NOISE_WIDTH: u32 = 300;
const NOISE_HEIGHT: u32 = 260;
const BICUBIC_224: &[u8] = include_bytes!("data/lcg_noise_300x260_bicubic_224.raw");

/// Deterministic noise: the top byte of a 32-bit LCG, row-major.
fn lcg_noise(width: u32, height: u32, seed: u32) -> GrayImage {
    let mut state = seed;
    let pixels = (0..width * height)
        .map(|_| {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            (state >> 24) as u8
        })
        .collect();
    GrayImage::from_raw(width, height, pixels).unwrap()
}

fn png_bytes(img: GrayImage) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageLuma8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

#[test]
fn test_bicubic_matches_reference_resize() {
    let src = lcg_noise(NOISE_WIDTH, NOISE_HEIGHT, 0x1234_5678);
    let out = resize_bicubic(&src, 224, 224);
    assert_eq!(BICUBIC_224.len(), 224 * 224);

    let mismatches: Vec<(usize, u8, u8)> = out
        .as_raw()
        .iter()
        .zip(BICUBIC_224)
        .enumerate()
        .filter(|(_, (a, b))| a != b)
        .map(|(i, (&a, &b))| (i, a, b))
        .take(5)
        .collect();
    assert!(mismatches.is_empty(), "first mismatches (index, got, want): {mismatches:?}");
}

#[test]
fn test_mammogram_tensor_matches_reference() {
    let bytes = png_bytes(lcg_noise(NOISE_WIDTH, NOISE_HEIGHT, 0x1234_5678));
    let tensor = preprocess_mammogram(&bytes, &ClassifierConfig::mammogram()).unwrap();
    assert_eq!(tensor.shape(), &[1, 224, 224, 1]);

    for (i, (&got, &pixel)) in tensor.iter().zip(BICUBIC_224).enumerate() {
        let want = (f32::from(pixel) - MAMMOGRAM_MEAN) / MAMMOGRAM_STD;
        assert_eq!(got, want, "pixel {} ({}, {})", i, i / 224, i % 224);
    }
}
