//! Frame overlay drawing: zone lines, count labels, crossing flashes and
//! debug flow arrows.
//!
//! Everything draws in place on an [`RgbImage`]; geometry reaching past the
//! frame edge is clipped, never an error.

use std::hash::Hash;

use font8x8::legacy::BASIC_LEGACY;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;

use crate::camera_motion::FlowField;
use crate::counting::{ZoneCounter, ZoneLabel};

mod paths;

pub use paths::AbsolutePaths;

/// Colors and stroke widths for the overlay.
#[derive(Debug, Clone)]
pub struct OverlayStyle {
    /// Zone line color.
    pub zone_color: Rgb<u8>,
    /// Color of a zone line on the frame a crossing is registered.
    pub flash_color: Rgb<u8>,
    /// Count label color.
    pub text_color: Rgb<u8>,
    /// Flow arrow color.
    pub flow_color: Rgb<u8>,
    pub zone_thickness: u32,
    /// Added to `zone_thickness` while a zone flashes.
    pub flash_extra_thickness: u32,
    pub flow_thickness: u32,
    /// Arrow head length relative to the arrow length.
    pub tip_length: f32,
    /// Integer upscaling of the 8x8 label font.
    pub text_scale: u32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            zone_color: Rgb([255, 0, 0]),
            flash_color: Rgb([0, 255, 0]),
            text_color: Rgb([0, 0, 255]),
            flow_color: Rgb([0, 0, 255]),
            zone_thickness: 4,
            flash_extra_thickness: 20,
            flow_thickness: 2,
            tip_length: 0.5,
            text_scale: 2,
        }
    }
}

/// Draw every zone line with its running count.
///
/// Zones listed in `flashes` are drawn thicker in the flash color; pass the
/// zones of the events just returned by
/// [`ZoneCounter::register`](crate::counting::ZoneCounter::register) to get
/// the one-frame crossing flash.
pub fn draw_zones<Id: Eq + Hash + Clone>(
    frame: &mut RgbImage,
    counter: &ZoneCounter<Id>,
    flashes: &[ZoneLabel],
    style: &OverlayStyle,
) {
    for zone in &counter.layout().zones {
        let flashed = flashes.contains(&zone.label);
        let (color, thickness) = if flashed {
            (style.flash_color, style.zone_thickness + style.flash_extra_thickness)
        } else {
            (style.zone_color, style.zone_thickness)
        };
        draw_thick_line(frame, zone.start, zone.end, color, thickness);

        let text = format!("{}{}", zone.label.caption(), counter.count_for(zone.label));
        let baseline = (zone.start[0] as i32, zone.end[1] as i32 - 10);
        draw_label(frame, &text, baseline, style.text_color, style.text_scale);
    }
}

/// Draw the tracked feature correspondences as arrows pointing from each
/// feature's current position back to where it sat in the reference frame.
pub fn draw_flow(frame: &mut RgbImage, field: &FlowField, style: &OverlayStyle) {
    for i in 0..field.len() {
        let curr = field.curr_points[i];
        let prev = field.prev_points[i];
        draw_arrow(
            frame,
            [f64::from(curr[0]), f64::from(curr[1])],
            [f64::from(prev[0]), f64::from(prev[1])],
            style.flow_color,
            style.flow_thickness,
            style.tip_length,
        );
    }
}

/// Line segment with a pixel thickness, built from parallel one-pixel lines
/// offset along the segment normal.
pub fn draw_thick_line(
    frame: &mut RgbImage,
    start: [f64; 2],
    end: [f64; 2],
    color: Rgb<u8>,
    thickness: u32,
) {
    let (x0, y0) = (start[0] as f32, start[1] as f32);
    let (x1, y1) = (end[0] as f32, end[1] as f32);
    let dx = x1 - x0;
    let dy = y1 - y0;
    let length = (dx * dx + dy * dy).sqrt();
    if length <= f32::EPSILON {
        return;
    }
    let nx = -dy / length;
    let ny = dx / length;

    let strokes = thickness.max(1);
    for i in 0..strokes {
        let offset = i as f32 - (strokes as f32 - 1.0) / 2.0;
        draw_line_segment_mut(
            frame,
            (x0 + nx * offset, y0 + ny * offset),
            (x1 + nx * offset, y1 + ny * offset),
            color,
        );
    }
}

/// Arrow from `from` to `to` with the head at `to`.
pub fn draw_arrow(
    frame: &mut RgbImage,
    from: [f64; 2],
    to: [f64; 2],
    color: Rgb<u8>,
    thickness: u32,
    tip_length: f32,
) {
    draw_thick_line(frame, from, to, color, thickness);

    let dx = (from[0] - to[0]) as f32;
    let dy = (from[1] - to[1]) as f32;
    let length = (dx * dx + dy * dy).sqrt();
    if length <= f32::EPSILON {
        return;
    }
    let tip = f64::from(tip_length * length);
    let angle = f64::from(dy.atan2(dx));
    for side in [-1.0, 1.0] {
        let theta = angle + side * std::f64::consts::FRAC_PI_4;
        let barb = [to[0] + tip * theta.cos(), to[1] + tip * theta.sin()];
        draw_thick_line(frame, to, barb, color, thickness);
    }
}

/// Render `text` with the 8x8 bitmap font, scaled by `scale`.
///
/// `baseline` is the bottom-left corner of the text. Characters outside the
/// ASCII range are skipped.
pub fn draw_label(
    frame: &mut RgbImage,
    text: &str,
    baseline: (i32, i32),
    color: Rgb<u8>,
    scale: u32,
) {
    let scale = scale.max(1) as i32;
    let top = baseline.1 - 8 * scale;
    let (width, height) = frame.dimensions();

    let mut pen_x = baseline.0;
    for ch in text.chars() {
        let code = ch as usize;
        if code < 128 {
            let glyph = BASIC_LEGACY[code];
            for (row, bits) in glyph.iter().enumerate() {
                for col in 0..8i32 {
                    if bits & (1 << col) == 0 {
                        continue;
                    }
                    for py in 0..scale {
                        for px in 0..scale {
                            let x = pen_x + col * scale + px;
                            let y = top + row as i32 * scale + py;
                            if x >= 0 && y >= 0 && (x as u32) < width && (y as u32) < height {
                                frame.put_pixel(x as u32, y as u32, color);
                            }
                        }
                    }
                }
            }
        }
        pen_x += 8 * scale;
    }
}
