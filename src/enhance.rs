use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::{DynamicImage, GenericImageView, ImageFormat, RgbImage, RgbaImage};
use std::io::Cursor;
use tracing::debug;

use crate::geometry::AbsoluteBox;

/// Manhattan RGB distance under which a pixel counts as background.
pub const BACKGROUND_THRESHOLD: u32 = 80;
/// Channel multiplier applied to foreground pixels.
pub const DARKEN_FACTOR: f32 = 0.4;
pub const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

// Corner samples sit this far inside the crop to skip anti-aliased borders.
const SAMPLE_INSET: u32 = 2;

pub fn crop(image: &DynamicImage, region: AbsoluteBox) -> Result<DynamicImage> {
    let (width, height) = image.dimensions();
    if region.width == 0 || region.height == 0 {
        return Err(anyhow!("crop region is empty"));
    }
    if region.right() > width || region.bottom() > height {
        return Err(anyhow!(
            "crop region {}x{}+{}+{} exceeds image {}x{}",
            region.width,
            region.height,
            region.left,
            region.top,
            width,
            height
        ));
    }
    Ok(image.crop_imm(region.left, region.top, region.width, region.height))
}

/// Whitens the estimated background and darkens everything else, returning
/// the result as PNG bytes. The input buffer is left untouched.
pub fn separate(image: &DynamicImage) -> Result<Vec<u8>> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(anyhow!("cannot separate an empty image"));
    }

    let separated = if image.color().has_alpha() {
        let rgba = image.to_rgba8();
        let pixels = separate_pixels(rgba.as_raw(), width, height, 4);
        let buffer = RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("separated RGBA buffer has the wrong size"))?;
        DynamicImage::ImageRgba8(buffer)
    } else {
        let rgb = image.to_rgb8();
        let pixels = separate_pixels(rgb.as_raw(), width, height, 3);
        let buffer = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("separated RGB buffer has the wrong size"))?;
        DynamicImage::ImageRgb8(buffer)
    };

    encode_png(&separated)
}

/// Averages six fixed samples: the four inset corners plus the midpoints of
/// the top and left edges.
pub fn sample_background(data: &[u8], width: u32, height: u32, channels: usize) -> [u8; 3] {
    let far_x = width.saturating_sub(SAMPLE_INSET + 1);
    let far_y = height.saturating_sub(SAMPLE_INSET + 1);
    let points = [
        (SAMPLE_INSET, SAMPLE_INSET),
        (far_x, SAMPLE_INSET),
        (SAMPLE_INSET, far_y),
        (far_x, far_y),
        (width / 2, SAMPLE_INSET),
        (SAMPLE_INSET, height / 2),
    ];

    let mut sums = [0u32; 3];
    for (x, y) in points {
        let x = x.min(width.saturating_sub(1)) as usize;
        let y = y.min(height.saturating_sub(1)) as usize;
        let idx = (y * width as usize + x) * channels;
        for (sum, value) in sums.iter_mut().zip(&data[idx..idx + 3]) {
            *sum += *value as u32;
        }
    }

    let count = points.len() as f32;
    sums.map(|sum| (sum as f32 / count).round() as u8)
}

/// Single classification pass over an interleaved RGB or RGBA buffer.
/// Alpha, when present, is copied through.
pub fn separate_pixels(data: &[u8], width: u32, height: u32, channels: usize) -> Vec<u8> {
    let background = sample_background(data, width, height, channels);
    debug!(
        "estimated background rgb({}, {}, {})",
        background[0], background[1], background[2]
    );

    let mut output = vec![0u8; data.len()];
    for (src, dst) in data
        .chunks_exact(channels)
        .zip(output.chunks_exact_mut(channels))
    {
        let diff: u32 = src[..3]
            .iter()
            .zip(background.iter())
            .map(|(value, bg)| value.abs_diff(*bg) as u32)
            .sum();
        if diff < BACKGROUND_THRESHOLD {
            dst[..3].fill(255);
        } else {
            for (out, value) in dst[..3].iter_mut().zip(&src[..3]) {
                *out = (*value as f32 * DARKEN_FACTOR).round().clamp(0.0, 255.0) as u8;
            }
        }
        if channels == 4 {
            dst[3] = src[3];
        }
    }
    output
}

/// Cleans up a figure that arrives already isolated: composites it onto
/// white and stretches its luminance range.
pub fn flatten_and_normalize(bytes: &[u8]) -> Result<Vec<u8>> {
    let image =
        image::load_from_memory(bytes).with_context(|| "failed to decode extracted image")?;
    let flattened = flatten_on_white(&image.to_rgba8());
    let normalized = contrast_stretch(&flattened);
    encode_png(&DynamicImage::ImageRgb8(normalized))
}

fn flatten_on_white(rgba: &RgbaImage) -> RgbImage {
    let (width, height) = rgba.dimensions();
    let mut output = RgbImage::new(width, height);
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as f32 / 255.0;
        let blend = |value: u8| (value as f32 * alpha + 255.0 * (1.0 - alpha)).round() as u8;
        output.put_pixel(x, y, image::Rgb([blend(r), blend(g), blend(b)]));
    }
    output
}

fn luminance(pixel: &image::Rgb<u8>) -> f32 {
    let [r, g, b] = pixel.0;
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

fn contrast_stretch(image: &RgbImage) -> RgbImage {
    let mut min = 255.0f32;
    let mut max = 0.0f32;
    for pixel in image.pixels() {
        let value = luminance(pixel);
        min = min.min(value);
        max = max.max(value);
    }

    if max - min < 1.0 {
        return image.clone();
    }

    let scale = 255.0 / (max - min);
    let mut output = image.clone();
    for pixel in output.pixels_mut() {
        for channel in pixel.0.iter_mut() {
            let stretched = ((*channel as f32 - min) * scale).round().clamp(0.0, 255.0);
            *channel = stretched as u8;
        }
    }
    output
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    image
        .write_to(&mut cursor, ImageFormat::Png)
        .with_context(|| "failed to encode PNG")?;
    Ok(cursor.into_inner())
}

pub fn to_data_uri(png: &[u8]) -> String {
    format!("{}{}", PNG_DATA_URI_PREFIX, BASE64.encode(png))
}
