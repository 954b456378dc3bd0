//! Sparse feature sampling and pyramidal Lucas-Kanade optical flow.
//!
//! Corner-like features are sampled from the reference frame (Shi-Tomasi
//! minimum-eigenvalue response) and tracked into the current frame with an
//! iterative coarse-to-fine Gauss-Newton solver. Features whose tracking
//! fails are dropped from both point arrays, preserving pairing.

use image::GrayImage;

use crate::frame::{build_pyramid, sample_bilinear};

/// Configuration for feature sampling and optical flow.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Maximum number of corners sampled from the reference frame.
    pub max_points: usize,
    /// Minimum pixel distance between sampled corners.
    pub min_distance: u32,
    /// Window size for the corner structure tensor. Must be odd.
    pub block_size: usize,
    /// Corners with a response below `quality_level * strongest_response`
    /// are discarded.
    pub quality_level: f32,
    /// Side of the square tracking window. Must be odd.
    pub win_size: usize,
    /// Number of pyramid levels above the full-resolution image.
    pub max_level: usize,
    /// Maximum Gauss-Newton iterations per pyramid level.
    pub max_iter: usize,
    /// Convergence threshold on the per-iteration displacement.
    pub epsilon: f32,
    /// Features whose structure tensor has a smaller minimum eigenvalue
    /// (normalized by window area) are marked as lost.
    pub min_eigen_threshold: f32,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_points: 200,
            min_distance: 15,
            block_size: 3,
            quality_level: 0.01,
            win_size: 21,
            max_level: 3,
            max_iter: 30,
            epsilon: 0.01,
            min_eigen_threshold: 1e-4,
        }
    }
}

/// Paired feature positions in the reference and current frames.
///
/// The two arrays always have identical length; both may be empty when the
/// scene offers no trackable evidence (textureless frame, full mask).
#[derive(Debug, Clone, Default)]
pub struct FlowField {
    pub curr_points: Vec<[f32; 2]>,
    pub prev_points: Vec<[f32; 2]>,
}

impl FlowField {
    pub fn len(&self) -> usize {
        self.curr_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.curr_points.is_empty()
    }
}

/// Sample features in `prev_gray` (unless `prev_points` is supplied) and
/// track them into `curr_gray`.
///
/// Pixels where `mask` is zero are excluded from sampling. Features that
/// fail to track are dropped from both output arrays; an empty result means
/// "no motion evidence", never an error.
pub fn sample_and_track(
    prev_gray: &GrayImage,
    curr_gray: &GrayImage,
    prev_points: Option<Vec<[f32; 2]>>,
    mask: Option<&GrayImage>,
    config: &FlowConfig,
) -> FlowField {
    let prev_pts = match prev_points {
        Some(points) => points,
        None => good_features_to_track(prev_gray, mask, config),
    };
    if prev_pts.is_empty() {
        return FlowField::default();
    }

    let (next_pts, status) = track_pyr_lk(prev_gray, curr_gray, &prev_pts, config);

    let mut curr_points = Vec::with_capacity(prev_pts.len());
    let mut prev_out = Vec::with_capacity(prev_pts.len());
    for i in 0..prev_pts.len() {
        if status[i] {
            curr_points.push(next_pts[i]);
            prev_out.push(prev_pts[i]);
        }
    }
    FlowField {
        curr_points,
        prev_points: prev_out,
    }
}

/// Detect up to `config.max_points` corner-like features.
///
/// Response is the minimum eigenvalue of the gradient structure tensor over
/// a `block_size` window. Candidates below `quality_level` of the strongest
/// response are discarded, remaining ones are kept strongest-first subject
/// to the `min_distance` spacing constraint.
pub fn good_features_to_track(
    gray: &GrayImage,
    mask: Option<&GrayImage>,
    config: &FlowConfig,
) -> Vec<[f32; 2]> {
    let (width, height) = gray.dimensions();
    let (width, height) = (width as usize, height as usize);
    let radius = config.block_size / 2;
    let margin = radius + 1;
    if width <= 2 * margin || height <= 2 * margin {
        return Vec::new();
    }

    let raw = gray.as_raw();
    let at = |x: usize, y: usize| raw[y * width + x] as f32;

    // Sobel gradients, skipping the one-pixel border
    let mut grad_x = vec![0.0f32; width * height];
    let mut grad_y = vec![0.0f32; width * height];
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let idx = y * width + x;
            grad_x[idx] = (at(x + 1, y - 1) + 2.0 * at(x + 1, y) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x - 1, y) + at(x - 1, y + 1));
            grad_y[idx] = (at(x - 1, y + 1) + 2.0 * at(x, y + 1) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x, y - 1) + at(x + 1, y - 1));
        }
    }

    // Minimum-eigenvalue response of the structure tensor
    let mut response = vec![0.0f32; width * height];
    let mut max_response = 0.0f32;
    let mask_raw = mask.map(|m| m.as_raw());
    for y in margin..height - margin {
        for x in margin..width - margin {
            if let Some(m) = mask_raw {
                if m[y * width + x] == 0 {
                    continue;
                }
            }
            let mut gxx = 0.0f32;
            let mut gxy = 0.0f32;
            let mut gyy = 0.0f32;
            for wy in y - radius..=y + radius {
                for wx in x - radius..=x + radius {
                    let gx = grad_x[wy * width + wx];
                    let gy = grad_y[wy * width + wx];
                    gxx += gx * gx;
                    gxy += gx * gy;
                    gyy += gy * gy;
                }
            }
            let lambda_min =
                0.5 * ((gxx + gyy) - ((gxx - gyy).powi(2) + 4.0 * gxy * gxy).sqrt());
            response[y * width + x] = lambda_min;
            if lambda_min > max_response {
                max_response = lambda_min;
            }
        }
    }
    if max_response <= 0.0 {
        return Vec::new();
    }

    // Keep local maxima above the quality threshold, strongest first
    let threshold = config.quality_level * max_response;
    let mut candidates: Vec<(f32, usize, usize)> = Vec::new();
    for y in margin..height - margin {
        for x in margin..width - margin {
            let value = response[y * width + x];
            if value < threshold || value <= 0.0 {
                continue;
            }
            let mut is_max = true;
            'nms: for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let ny = (y as i64 + dy) as usize;
                    let nx = (x as i64 + dx) as usize;
                    if response[ny * width + nx] > value {
                        is_max = false;
                        break 'nms;
                    }
                }
            }
            if is_max {
                candidates.push((value, x, y));
            }
        }
    }
    candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

    // Greedy spacing enforcement on a coarse grid
    let min_dist = config.min_distance as f32;
    let min_dist2 = min_dist * min_dist;
    let cell = min_dist.max(1.0);
    let grid_w = (width as f32 / cell).ceil() as usize;
    let grid_h = (height as f32 / cell).ceil() as usize;
    let mut grid: Vec<Vec<[f32; 2]>> = vec![Vec::new(); grid_w * grid_h];

    let mut selected = Vec::new();
    for &(_, x, y) in &candidates {
        let fx = x as f32;
        let fy = y as f32;
        let cx = (fx / cell) as usize;
        let cy = (fy / cell) as usize;
        let x0 = cx.saturating_sub(1);
        let y0 = cy.saturating_sub(1);
        let x1 = (cx + 1).min(grid_w - 1);
        let y1 = (cy + 1).min(grid_h - 1);

        let mut spaced = true;
        'cells: for gy in y0..=y1 {
            for gx in x0..=x1 {
                for p in &grid[gy * grid_w + gx] {
                    let dx = p[0] - fx;
                    let dy = p[1] - fy;
                    if dx * dx + dy * dy < min_dist2 {
                        spaced = false;
                        break 'cells;
                    }
                }
            }
        }
        if spaced {
            grid[cy * grid_w + cx].push([fx, fy]);
            selected.push([fx, fy]);
            if selected.len() >= config.max_points {
                break;
            }
        }
    }
    selected
}

/// Track `points` from `prev` into `curr` with pyramidal iterative LK.
///
/// Returns the new positions and a per-feature success flag.
fn track_pyr_lk(
    prev: &GrayImage,
    curr: &GrayImage,
    points: &[[f32; 2]],
    config: &FlowConfig,
) -> (Vec<[f32; 2]>, Vec<bool>) {
    let (width, height) = prev.dimensions();
    let min_dim = width.min(height) as usize;
    let mut levels = 0;
    while levels < config.max_level && (min_dim >> (levels + 1)) >= config.win_size + 2 {
        levels += 1;
    }

    let prev_pyr = build_pyramid(prev, levels);
    let curr_pyr = build_pyramid(curr, levels);
    let top = prev_pyr.len().min(curr_pyr.len()) - 1;

    let half = (config.win_size / 2) as f32;
    let window_area = (config.win_size * config.win_size) as f32;
    let epsilon2 = config.epsilon * config.epsilon;

    let mut next_pts = vec![[0.0f32; 2]; points.len()];
    let mut status = vec![false; points.len()];

    for (i, &point) in points.iter().enumerate() {
        let scale = (1u32 << top) as f32;
        let mut x = point[0] / scale;
        let mut y = point[1] / scale;
        let mut dx = 0.0f32;
        let mut dy = 0.0f32;
        let mut valid = true;

        for level in (0..=top).rev() {
            let p_img = &prev_pyr[level];
            let c_img = &curr_pyr[level];
            if level < top {
                x *= 2.0;
                y *= 2.0;
                dx *= 2.0;
                dy *= 2.0;
            }

            let (lw, lh) = p_img.dimensions();
            let in_bounds = |cx: f32, cy: f32| {
                cx - half >= 1.0
                    && cy - half >= 1.0
                    && cx + half < lw as f32 - 1.0
                    && cy + half < lh as f32 - 1.0
            };
            if !in_bounds(x, y) {
                valid = false;
                break;
            }

            for _ in 0..config.max_iter {
                if !in_bounds(x + dx, y + dy) {
                    valid = false;
                    break;
                }

                let mut gxx = 0.0f32;
                let mut gxy = 0.0f32;
                let mut gyy = 0.0f32;
                let mut gxt = 0.0f32;
                let mut gyt = 0.0f32;

                let mut wy = -half;
                while wy <= half {
                    let mut wx = -half;
                    while wx <= half {
                        let px = x + wx;
                        let py = y + wy;
                        let gx = 0.5
                            * (sample_bilinear(p_img, px + 1.0, py)
                                - sample_bilinear(p_img, px - 1.0, py));
                        let gy = 0.5
                            * (sample_bilinear(p_img, px, py + 1.0)
                                - sample_bilinear(p_img, px, py - 1.0));
                        let it = sample_bilinear(c_img, px + dx, py + dy)
                            - sample_bilinear(p_img, px, py);

                        gxx += gx * gx;
                        gxy += gx * gy;
                        gyy += gy * gy;
                        gxt += gx * it;
                        gyt += gy * it;
                        wx += 1.0;
                    }
                    wy += 1.0;
                }

                let det = gxx * gyy - gxy * gxy;
                let lambda_min =
                    0.5 * ((gxx + gyy) - ((gxx - gyy).powi(2) + 4.0 * gxy * gxy).sqrt());
                if det.abs() < 1e-7 || lambda_min / window_area < config.min_eigen_threshold {
                    valid = false;
                    break;
                }

                let inv_det = 1.0 / det;
                let delta_x = (gxy * gyt - gyy * gxt) * inv_det;
                let delta_y = (gxy * gxt - gxx * gyt) * inv_det;
                dx += delta_x;
                dy += delta_y;
                if delta_x * delta_x + delta_y * delta_y < epsilon2 {
                    break;
                }
            }
            if !valid {
                break;
            }
        }

        if valid {
            next_pts[i] = [x + dx, y + dy];
            status[i] = true;
        }
    }
    (next_pts, status)
}
