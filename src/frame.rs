//! Frame preparation helpers shared by the motion-estimation pipeline.

use image::{GrayImage, Luma, RgbImage};

/// Convert an RGB frame to grayscale using BT.601 luma weights.
pub fn to_grayscale(frame: &RgbImage) -> GrayImage {
    let (width, height) = frame.dimensions();
    let mut gray = GrayImage::new(width, height);
    for (x, y, pixel) in frame.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        gray.put_pixel(x, y, Luma([luma.round().min(255.0) as u8]));
    }
    gray
}

/// Build an image pyramid with `max_level` downsampled levels (level 0 is the
/// input itself). Each level halves the previous one with a 2x2 box filter.
///
/// Stops early if a level would become smaller than 2x2.
pub fn build_pyramid(gray: &GrayImage, max_level: usize) -> Vec<GrayImage> {
    let mut pyramid = Vec::with_capacity(max_level + 1);
    pyramid.push(gray.clone());
    for level in 1..=max_level {
        let prev = &pyramid[level - 1];
        let (width, height) = prev.dimensions();
        if width / 2 < 2 || height / 2 < 2 {
            break;
        }
        pyramid.push(downsample(prev));
    }
    pyramid
}

fn downsample(image: &GrayImage) -> GrayImage {
    let (width, height) = image.dimensions();
    let new_width = width / 2;
    let new_height = height / 2;
    let raw = image.as_raw();
    let stride = width as usize;

    let mut result = GrayImage::new(new_width, new_height);
    for y in 0..new_height {
        for x in 0..new_width {
            let sx = (x * 2) as usize;
            let sy = (y * 2) as usize;
            let sum = raw[sy * stride + sx] as u32
                + raw[sy * stride + sx + 1] as u32
                + raw[(sy + 1) * stride + sx] as u32
                + raw[(sy + 1) * stride + sx + 1] as u32;
            result.put_pixel(x, y, Luma([((sum + 2) / 4) as u8]));
        }
    }
    result
}

/// Sample a grayscale image at a subpixel position with bilinear
/// interpolation. Coordinates are clamped to the image bounds.
pub(crate) fn sample_bilinear(image: &GrayImage, x: f32, y: f32) -> f32 {
    let (width, height) = image.dimensions();
    let xf = x.clamp(0.0, (width - 1) as f32);
    let yf = y.clamp(0.0, (height - 1) as f32);

    let x0 = xf.floor() as u32;
    let y0 = yf.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let tx = xf - x0 as f32;
    let ty = yf - y0 as f32;

    let raw = image.as_raw();
    let stride = width as usize;
    let p00 = raw[y0 as usize * stride + x0 as usize] as f32;
    let p10 = raw[y0 as usize * stride + x1 as usize] as f32;
    let p01 = raw[y1 as usize * stride + x0 as usize] as f32;
    let p11 = raw[y1 as usize * stride + x1 as usize] as f32;

    p00 * (1.0 - tx) * (1.0 - ty) + p10 * tx * (1.0 - ty) + p01 * (1.0 - tx) * ty + p11 * tx * ty
}
