//! Camera-stabilized track trails.
//!
//! Recorded positions are stored in absolute (reference-frame) coordinates
//! and re-projected into the current frame at draw time, so a panning camera
//! leaves trails pinned to the scene instead of smearing across it.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_circle_mut;
use nalgebra::DMatrix;

use crate::camera_motion::CoordinateTransformation;

use super::draw_thick_line;

const PALETTE: [Rgb<u8>; 8] = [
    Rgb([0, 255, 0]),
    Rgb([255, 0, 0]),
    Rgb([0, 128, 255]),
    Rgb([255, 255, 0]),
    Rgb([0, 255, 255]),
    Rgb([255, 0, 255]),
    Rgb([255, 128, 0]),
    Rgb([128, 0, 255]),
];

fn palette_color<Id: Hash>(track_id: &Id) -> Rgb<u8> {
    let mut hasher = DefaultHasher::new();
    track_id.hash(&mut hasher);
    PALETTE[(hasher.finish() % PALETTE.len() as u64) as usize]
}

/// Per-track position history held in absolute coordinates.
#[derive(Debug, Clone)]
pub struct AbsolutePaths<Id> {
    history: HashMap<Id, VecDeque<[f64; 2]>>,
    /// Positions kept per track; older ones are dropped.
    pub max_history: usize,
    /// Trail stroke width in pixels.
    pub thickness: u32,
}

impl<Id> Default for AbsolutePaths<Id> {
    fn default() -> Self {
        Self {
            history: HashMap::new(),
            max_history: 30,
            thickness: 2,
        }
    }
}

impl<Id: Eq + Hash + Clone> AbsolutePaths<Id> {
    pub fn new(max_history: usize, thickness: u32) -> Self {
        Self {
            history: HashMap::new(),
            max_history,
            thickness,
        }
    }

    /// Append a track's current frame position, converted to absolute
    /// coordinates with the transformation estimated for this frame.
    pub fn record(
        &mut self,
        track_id: &Id,
        center: [f64; 2],
        transform: &dyn CoordinateTransformation,
    ) {
        let rel = DMatrix::from_row_slice(1, 2, &center);
        let abs = transform.rel_to_abs(&rel);
        let trail = self.history.entry(track_id.clone()).or_default();
        trail.push_back([abs[(0, 0)], abs[(0, 1)]]);
        while trail.len() > self.max_history.max(1) {
            trail.pop_front();
        }
    }

    /// Draw every trail into `frame`, re-projected through `transform` so the
    /// points land where the scene content sits in this frame.
    pub fn draw(&self, frame: &mut RgbImage, transform: &dyn CoordinateTransformation) {
        for (track_id, trail) in &self.history {
            if trail.is_empty() {
                continue;
            }
            let mut abs = DMatrix::zeros(trail.len(), 2);
            for (i, point) in trail.iter().enumerate() {
                abs[(i, 0)] = point[0];
                abs[(i, 1)] = point[1];
            }
            let rel = transform.abs_to_rel(&abs);
            let color = palette_color(track_id);

            for i in 1..rel.nrows() {
                draw_thick_line(
                    frame,
                    [rel[(i - 1, 0)], rel[(i - 1, 1)]],
                    [rel[(i, 0)], rel[(i, 1)]],
                    color,
                    self.thickness,
                );
            }
            let newest = rel.nrows() - 1;
            draw_filled_circle_mut(
                frame,
                (rel[(newest, 0)] as i32, rel[(newest, 1)] as i32),
                self.thickness as i32 + 1,
                color,
            );
        }
    }

    /// Drop the stored trail for a track that is no longer alive.
    pub fn forget(&mut self, track_id: &Id) {
        self.history.remove(track_id);
    }

    pub fn history_len(&self, track_id: &Id) -> usize {
        self.history.get(track_id).map_or(0, VecDeque::len)
    }
}
