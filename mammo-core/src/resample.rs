//! Fixed-point resampling matched to the libraries the models were trained
//! with.
//!
//! `image::imageops::resize` is close but not equal to either: it runs the
//! vertical pass first, keeps an `f32` intermediate, and widens every filter
//! when downscaling. Both resamplers here follow the reference integer
//! arithmetic pass by pass.

use image::{ImageBuffer, Pixel};

/// 8-bit image with `u8` channels, any channel count.
pub type Image8<P> = ImageBuffer<P, Vec<u8>>;

/// Fractional bits of the bicubic coefficients.
const BICUBIC_PRECISION_BITS: u32 = 32 - 8 - 2;

/// Support radius of the bicubic kernel at scale 1.
const BICUBIC_SUPPORT: f64 = 2.0;

/// Fractional bits of the bilinear coefficients.
const BILINEAR_COEF_BITS: u32 = 11;
const BILINEAR_COEF_SCALE: i32 = 1 << BILINEAR_COEF_BITS;

/// Keys cubic convolution kernel with `a = -0.5`.
fn bicubic_kernel(x: f64) -> f64 {
    const A: f64 = -0.5;
    let x = x.abs();
    if x < 1.0 {
        ((A + 2.0) * x - (A + 3.0)) * x * x + 1.0
    } else if x < 2.0 {
        (((x - 5.0) * x + 8.0) * x - 4.0) * A
    } else {
        0.0
    }
}

/// Input window and fixed-point weights for one output sample.
#[derive(Debug, Clone, PartialEq)]
struct Taps {
    start: usize,
    weights: Vec<i32>,
}

/// Per-output-sample bicubic taps along one axis.
///
/// When downscaling the kernel is stretched by the scale factor, so every
/// input sample contributes (antialiasing).
fn bicubic_taps(in_size: usize, out_size: usize) -> Vec<Taps> {
    let scale = in_size as f64 / out_size as f64;
    let filter_scale = scale.max(1.0);
    let support = BICUBIC_SUPPORT * filter_scale;
    let inv_filter_scale = 1.0 / filter_scale;
    let one = f64::from(1u32 << BICUBIC_PRECISION_BITS);

    (0..out_size)
        .map(|xx| {
            let center = (xx as f64 + 0.5) * scale;
            // Truncating casts are part of the reference window rounding
            let start = ((center - support + 0.5) as i64).max(0) as usize;
            let end = ((center + support + 0.5) as i64).min(in_size as i64) as usize;

            let raw: Vec<f64> = (start..end)
                .map(|x| bicubic_kernel((x as f64 - center + 0.5) * inv_filter_scale))
                .collect();
            let total = raw.iter().fold(0.0, |acc, w| acc + w);

            let weights = raw
                .into_iter()
                .map(|w| {
                    let w = if total != 0.0 { w / total } else { w };
                    if w < 0.0 {
                        (-0.5 + w * one) as i32
                    } else {
                        (0.5 + w * one) as i32
                    }
                })
                .collect();
            Taps { start, weights }
        })
        .collect()
}

fn clip8(acc: i64) -> u8 {
    if acc >= 1i64 << (BICUBIC_PRECISION_BITS + 8) {
        255
    } else if acc <= 0 {
        0
    } else {
        (acc >> BICUBIC_PRECISION_BITS) as u8
    }
}

/// Bicubic resize bit-compatible with Pillow's 8-bit `Image.resize` using
/// the default `BICUBIC` filter.
///
/// Runs the horizontal pass first, rounds and clamps the intermediate to
/// `u8`, then runs the vertical pass. An axis whose size does not change is
/// not resampled.
pub fn resize_bicubic<P>(src: &Image8<P>, width: u32, height: u32) -> Image8<P>
where
    P: Pixel<Subpixel = u8>,
{
    let channels = usize::from(P::CHANNEL_COUNT);
    let (in_w, in_h) = (src.width() as usize, src.height() as usize);
    let (out_w, out_h) = (width as usize, height as usize);
    let half = 1i64 << (BICUBIC_PRECISION_BITS - 1);
    if in_w == 0 || in_h == 0 {
        return ImageBuffer::new(width, height);
    }

    let mut buf: Vec<u8> = src.as_raw().clone();
    let mut cur_w = in_w;

    if out_w != in_w {
        let taps = bicubic_taps(in_w, out_w);
        let mut out = vec![0u8; out_w * in_h * channels];
        for y in 0..in_h {
            let row = &buf[y * in_w * channels..(y + 1) * in_w * channels];
            for (xx, tap) in taps.iter().enumerate() {
                for c in 0..channels {
                    let acc = tap.weights.iter().enumerate().fold(half, |acc, (i, &k)| {
                        acc + i64::from(row[(tap.start + i) * channels + c]) * i64::from(k)
                    });
                    out[(y * out_w + xx) * channels + c] = clip8(acc);
                }
            }
        }
        buf = out;
        cur_w = out_w;
    }

    if out_h != in_h {
        let taps = bicubic_taps(in_h, out_h);
        let stride = cur_w * channels;
        let mut out = vec![0u8; out_h * stride];
        for (yy, tap) in taps.iter().enumerate() {
            for i in 0..stride {
                let acc = tap.weights.iter().enumerate().fold(half, |acc, (j, &k)| {
                    acc + i64::from(buf[(tap.start + j) * stride + i]) * i64::from(k)
                });
                out[yy * stride + i] = clip8(acc);
            }
        }
        buf = out;
    }

    // Sizes are derived from the requested dimensions above
    ImageBuffer::from_raw(width, height, buf).unwrap_or_else(|| ImageBuffer::new(width, height))
}

/// Source index pair and fixed-point weights for one bilinear sample.
#[derive(Debug, Clone, Copy, PartialEq)]
struct LinearTap {
    index: usize,
    next: usize,
    weights: [i32; 2],
}

/// Half-pixel-centred bilinear taps along one axis, without antialiasing.
fn bilinear_taps(in_size: usize, out_size: usize) -> Vec<LinearTap> {
    let scale = in_size as f64 / out_size as f64;
    (0..out_size)
        .map(|dx| {
            let f = ((dx as f64 + 0.5) * scale - 0.5) as f32;
            let mut index = f.floor() as i64;
            let mut frac = f - index as f32;
            if index < 0 {
                index = 0;
                frac = 0.0;
            }
            if index >= in_size as i64 - 1 {
                index = in_size as i64 - 1;
                frac = 0.0;
            }
            let index = index as usize;
            let scale = BILINEAR_COEF_SCALE as f32;
            LinearTap {
                index,
                next: (index + 1).min(in_size - 1),
                weights: [
                    ((1.0 - frac) * scale).round_ties_even() as i32,
                    (frac * scale).round_ties_even() as i32,
                ],
            }
        })
        .collect()
}

/// Bilinear resize following OpenCV's `INTER_LINEAR` for 8-bit images.
///
/// Samples at half-pixel centres with 11-bit coefficients and no filter
/// widening on downscale, so a 3x reduction reads single source pixels
/// rather than averaging a neighbourhood.
pub fn resize_bilinear<P>(src: &Image8<P>, width: u32, height: u32) -> Image8<P>
where
    P: Pixel<Subpixel = u8>,
{
    let channels = usize::from(P::CHANNEL_COUNT);
    let (in_w, in_h) = (src.width() as usize, src.height() as usize);
    let (out_w, out_h) = (width as usize, height as usize);
    let raw = src.as_raw();
    if in_w == 0 || in_h == 0 {
        return ImageBuffer::new(width, height);
    }

    let x_taps = bilinear_taps(in_w, out_w);
    let y_taps = bilinear_taps(in_h, out_h);

    // Horizontal pass into a widened buffer, scaled by BILINEAR_COEF_SCALE
    let horizontal = |y: usize| -> Vec<i32> {
        let row = &raw[y * in_w * channels..(y + 1) * in_w * channels];
        let mut out = Vec::with_capacity(out_w * channels);
        for tap in &x_taps {
            for c in 0..channels {
                let a = i32::from(row[tap.index * channels + c]);
                let b = i32::from(row[tap.next * channels + c]);
                out.push(a * tap.weights[0] + b * tap.weights[1]);
            }
        }
        out
    };

    let shift = 2 * BILINEAR_COEF_BITS;
    let round = 1i64 << (shift - 1);
    let mut out = Vec::with_capacity(out_w * out_h * channels);
    for tap in &y_taps {
        let top = horizontal(tap.index);
        let bottom = horizontal(tap.next);
        for (&t, &b) in top.iter().zip(&bottom) {
            let acc = i64::from(t) * i64::from(tap.weights[0])
                + i64::from(b) * i64::from(tap.weights[1]);
            out.push(((acc + round) >> shift).clamp(0, 255) as u8);
        }
    }

    ImageBuffer::from_raw(width, height, out).unwrap_or_else(|| ImageBuffer::new(width, height))
}
