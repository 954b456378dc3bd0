//! Planar homography fitting: direct linear transform plus RANSAC.
//!
//! `fit_homography` solves the least-squares DLT system over all
//! correspondences (with Hartley normalization), `fit_homography_ransac`
//! wraps it in a RANSAC loop with minimal 4-point samples and returns the
//! inlier mask alongside the refit matrix.

use log::debug;
use nalgebra::{DMatrix, Matrix3};

use crate::{Error, Result};

/// RANSAC parameters for robust homography fitting.
#[derive(Debug, Clone)]
pub struct RansacParams {
    /// Maximum reprojection error (pixels) for a pair to count as an inlier.
    pub reproj_threshold: f64,
    /// Iteration cap; the adaptive confidence bound can stop earlier.
    pub max_iters: usize,
    /// Desired probability of sampling at least one outlier-free set.
    pub confidence: f64,
    /// Seed for the deterministic sampling sequence.
    pub seed: u64,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            reproj_threshold: 3.0,
            max_iters: 2000,
            confidence: 0.995,
            seed: 12345,
        }
    }
}

/// Result of a robust fit: the matrix, which pairs supported it, and how many.
#[derive(Debug, Clone)]
pub struct HomographyFit {
    pub matrix: Matrix3<f64>,
    pub inlier_mask: Vec<bool>,
    pub num_inliers: usize,
}

/// Least-squares DLT homography mapping `src` points onto `dst` points.
///
/// Requires at least 4 correspondences. Points are Hartley-normalized
/// before building the 2n x 9 system; the solution is the eigenvector of
/// AᵀA with the smallest eigenvalue.
pub fn fit_homography(src: &DMatrix<f64>, dst: &DMatrix<f64>) -> Result<Matrix3<f64>> {
    let n = src.nrows();
    if dst.nrows() != n || (n > 0 && (src.ncols() != 2 || dst.ncols() != 2)) {
        return Err(Error::InvalidPointsShape {
            expected: "matching (n, 2) point sets".to_string(),
            got: format!(
                "({}, {}) and ({}, {})",
                src.nrows(),
                src.ncols(),
                dst.nrows(),
                dst.ncols()
            ),
        });
    }
    if n < 4 {
        return Err(Error::InsufficientCorrespondences { got: n });
    }

    let (t_src, _) = normalization(src).ok_or_else(|| {
        Error::NonInvertibleTransform("degenerate source point configuration".to_string())
    })?;
    let (t_dst, t_dst_inv) = normalization(dst).ok_or_else(|| {
        Error::NonInvertibleTransform("degenerate destination point configuration".to_string())
    })?;

    let mut a = DMatrix::zeros(2 * n, 9);
    for i in 0..n {
        let (x, y) = apply_similarity(&t_src, src[(i, 0)], src[(i, 1)]);
        let (xp, yp) = apply_similarity(&t_dst, dst[(i, 0)], dst[(i, 1)]);

        a[(2 * i, 0)] = -x;
        a[(2 * i, 1)] = -y;
        a[(2 * i, 2)] = -1.0;
        a[(2 * i, 6)] = x * xp;
        a[(2 * i, 7)] = y * xp;
        a[(2 * i, 8)] = xp;

        a[(2 * i + 1, 3)] = -x;
        a[(2 * i + 1, 4)] = -y;
        a[(2 * i + 1, 5)] = -1.0;
        a[(2 * i + 1, 6)] = x * yp;
        a[(2 * i + 1, 7)] = y * yp;
        a[(2 * i + 1, 8)] = yp;
    }

    // Null vector of A via the smallest eigenpair of the 9x9 normal matrix
    let ata = a.transpose() * &a;
    let eigen = ata.symmetric_eigen();
    let mut min_index = 0;
    for i in 1..eigen.eigenvalues.len() {
        if eigen.eigenvalues[i] < eigen.eigenvalues[min_index] {
            min_index = i;
        }
    }
    let h = eigen.eigenvectors.column(min_index);

    let h_norm = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);
    let mut matrix = t_dst_inv * h_norm * t_src;

    let scale = matrix[(2, 2)];
    if scale.abs() > 1e-12 {
        matrix /= scale;
    }
    Ok(matrix)
}

/// Robust RANSAC homography mapping `src` onto `dst`.
///
/// Draws minimal 4-point samples with a deterministic LCG, keeps the model
/// with the most reprojection inliers, tightens the iteration bound as the
/// inlier ratio improves, and refits on the final inlier set.
pub fn fit_homography_ransac(
    src: &DMatrix<f64>,
    dst: &DMatrix<f64>,
    params: &RansacParams,
) -> Result<HomographyFit> {
    let n = src.nrows();
    if dst.nrows() != n || (n > 0 && (src.ncols() != 2 || dst.ncols() != 2)) {
        return Err(Error::InvalidPointsShape {
            expected: "matching (n, 2) point sets".to_string(),
            got: format!(
                "({}, {}) and ({}, {})",
                src.nrows(),
                src.ncols(),
                dst.nrows(),
                dst.ncols()
            ),
        });
    }
    if n < 4 {
        return Err(Error::InsufficientCorrespondences { got: n });
    }

    if n == 4 {
        let matrix = fit_homography(src, dst)?;
        let (inlier_mask, num_inliers) =
            inlier_mask(&matrix, src, dst, params.reproj_threshold);
        return Ok(HomographyFit {
            matrix,
            inlier_mask,
            num_inliers,
        });
    }

    let mut seed = params.seed;
    let mut best_matrix: Option<Matrix3<f64>> = None;
    let mut best_inliers = 0usize;
    let mut iter_bound = params.max_iters;
    let threshold2 = params.reproj_threshold * params.reproj_threshold;

    let mut iteration = 0;
    while iteration < iter_bound {
        iteration += 1;

        // Draw 4 distinct indices
        let mut indices = [0usize; 4];
        let mut drawn = 0;
        let mut attempts = 0;
        while drawn < 4 && attempts < 64 {
            seed = lcg(seed);
            let candidate = ((seed >> 33) as usize) % n;
            attempts += 1;
            if !indices[..drawn].contains(&candidate) {
                indices[drawn] = candidate;
                drawn += 1;
            }
        }
        if drawn < 4 {
            continue;
        }

        let mut sample_src = [[0.0f64; 2]; 4];
        let mut sample_dst = [[0.0f64; 2]; 4];
        for (k, &idx) in indices.iter().enumerate() {
            sample_src[k] = [src[(idx, 0)], src[(idx, 1)]];
            sample_dst[k] = [dst[(idx, 0)], dst[(idx, 1)]];
        }
        let Some(candidate) = solve_minimal(&sample_src, &sample_dst) else {
            continue;
        };

        let mut inliers = 0usize;
        for i in 0..n {
            if reprojection_error2(&candidate, src[(i, 0)], src[(i, 1)], dst[(i, 0)], dst[(i, 1)])
                .is_some_and(|e| e <= threshold2)
            {
                inliers += 1;
            }
        }

        if inliers > best_inliers {
            best_inliers = inliers;
            best_matrix = Some(candidate);

            // Standard adaptive bound: enough iterations to hit an
            // outlier-free sample with the requested confidence.
            let inlier_ratio = inliers as f64 / n as f64;
            let miss = 1.0 - inlier_ratio.powi(4);
            if miss <= f64::EPSILON {
                break;
            }
            let needed = ((1.0 - params.confidence).ln() / miss.ln()).ceil();
            if needed.is_finite() && needed >= 0.0 {
                iter_bound = iter_bound.min(needed as usize);
            }
        }
    }

    let best = best_matrix.ok_or_else(|| {
        Error::NonInvertibleTransform("no valid homography model found".to_string())
    })?;

    // Refit on the inliers of the best model
    let (mask, count) = inlier_mask(&best, src, dst, params.reproj_threshold);
    let matrix = if count >= 4 {
        let mut src_in = DMatrix::zeros(count, 2);
        let mut dst_in = DMatrix::zeros(count, 2);
        let mut row = 0;
        for i in 0..n {
            if mask[i] {
                src_in[(row, 0)] = src[(i, 0)];
                src_in[(row, 1)] = src[(i, 1)];
                dst_in[(row, 0)] = dst[(i, 0)];
                dst_in[(row, 1)] = dst[(i, 1)];
                row += 1;
            }
        }
        match fit_homography(&src_in, &dst_in) {
            Ok(refined) => refined,
            Err(err) => {
                debug!("inlier refit failed ({err}); keeping ransac model");
                best
            }
        }
    } else {
        best
    };

    let (inlier_mask, num_inliers) = inlier_mask(&matrix, src, dst, params.reproj_threshold);
    Ok(HomographyFit {
        matrix,
        inlier_mask,
        num_inliers,
    })
}

fn lcg(seed: u64) -> u64 {
    seed.wrapping_mul(6364136223846793005).wrapping_add(1)
}

/// Hartley similarity: centroid to origin, mean distance sqrt(2).
/// Returns the transform and its inverse, or None for a degenerate cloud.
fn normalization(points: &DMatrix<f64>) -> Option<(Matrix3<f64>, Matrix3<f64>)> {
    let n = points.nrows() as f64;
    let mut cx = 0.0;
    let mut cy = 0.0;
    for i in 0..points.nrows() {
        cx += points[(i, 0)];
        cy += points[(i, 1)];
    }
    cx /= n;
    cy /= n;

    let mut mean_dist = 0.0;
    for i in 0..points.nrows() {
        let dx = points[(i, 0)] - cx;
        let dy = points[(i, 1)] - cy;
        mean_dist += (dx * dx + dy * dy).sqrt();
    }
    mean_dist /= n;
    if mean_dist < 1e-12 {
        return None;
    }

    let s = std::f64::consts::SQRT_2 / mean_dist;
    let forward = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let inverse = Matrix3::new(1.0 / s, 0.0, cx, 0.0, 1.0 / s, cy, 0.0, 0.0, 1.0);
    Some((forward, inverse))
}

fn apply_similarity(t: &Matrix3<f64>, x: f64, y: f64) -> (f64, f64) {
    (t[(0, 0)] * x + t[(0, 2)], t[(1, 1)] * y + t[(1, 2)])
}

/// Exact solve from 4 correspondences by Gauss-Jordan elimination of the
/// 8x9 system with h9 fixed to 1. Returns None for degenerate samples.
fn solve_minimal(src: &[[f64; 2]; 4], dst: &[[f64; 2]; 4]) -> Option<Matrix3<f64>> {
    let mut m = [[0.0f64; 9]; 8];
    for i in 0..4 {
        let [x, y] = src[i];
        let [xp, yp] = dst[i];
        m[i * 2] = [-x, -y, -1.0, 0.0, 0.0, 0.0, x * xp, y * xp, xp];
        m[i * 2 + 1] = [0.0, 0.0, 0.0, -x, -y, -1.0, x * yp, y * yp, yp];
    }

    for col in 0..8 {
        let mut max_row = col;
        let mut max_val = m[col][col].abs();
        for row in col + 1..8 {
            if m[row][col].abs() > max_val {
                max_val = m[row][col].abs();
                max_row = row;
            }
        }
        if max_val < 1e-10 {
            return None;
        }
        m.swap(col, max_row);
        let pivot = m[col][col];
        for j in col..9 {
            m[col][j] /= pivot;
        }
        for row in 0..8 {
            if row != col {
                let factor = m[row][col];
                for j in col..9 {
                    m[row][j] -= factor * m[col][j];
                }
            }
        }
    }

    let mut h = [0.0f64; 9];
    h[8] = 1.0;
    for i in 0..8 {
        h[i] = -m[i][8];
    }
    Some(Matrix3::new(
        h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8],
    ))
}

/// Squared distance between H(src) and dst; None when the point maps to
/// infinity.
fn reprojection_error2(h: &Matrix3<f64>, x: f64, y: f64, xp: f64, yp: f64) -> Option<f64> {
    let w = h[(2, 0)] * x + h[(2, 1)] * y + h[(2, 2)];
    if w.abs() < 1e-8 {
        return None;
    }
    let px = (h[(0, 0)] * x + h[(0, 1)] * y + h[(0, 2)]) / w;
    let py = (h[(1, 0)] * x + h[(1, 1)] * y + h[(1, 2)]) / w;
    Some((px - xp).powi(2) + (py - yp).powi(2))
}

fn inlier_mask(
    h: &Matrix3<f64>,
    src: &DMatrix<f64>,
    dst: &DMatrix<f64>,
    threshold: f64,
) -> (Vec<bool>, usize) {
    let threshold2 = threshold * threshold;
    let mut mask = vec![false; src.nrows()];
    let mut count = 0;
    for i in 0..src.nrows() {
        if reprojection_error2(h, src[(i, 0)], src[(i, 1)], dst[(i, 0)], dst[(i, 1)])
            .is_some_and(|e| e <= threshold2)
        {
            mask[i] = true;
            count += 1;
        }
    }
    (mask, count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid_points(cols: usize, rows: usize, step: f64) -> DMatrix<f64> {
        let mut points = DMatrix::zeros(cols * rows, 2);
        for r in 0..rows {
            for c in 0..cols {
                points[(r * cols + c, 0)] = 10.0 + c as f64 * step;
                points[(r * cols + c, 1)] = 10.0 + r as f64 * step;
            }
        }
        points
    }

    fn project(h: &Matrix3<f64>, points: &DMatrix<f64>) -> DMatrix<f64> {
        let mut out = DMatrix::zeros(points.nrows(), 2);
        for i in 0..points.nrows() {
            let x = points[(i, 0)];
            let y = points[(i, 1)];
            let w = h[(2, 0)] * x + h[(2, 1)] * y + h[(2, 2)];
            out[(i, 0)] = (h[(0, 0)] * x + h[(0, 1)] * y + h[(0, 2)]) / w;
            out[(i, 1)] = (h[(1, 0)] * x + h[(1, 1)] * y + h[(1, 2)]) / w;
        }
        out
    }

    fn sample_homography() -> Matrix3<f64> {
        Matrix3::new(
            1.02, 0.01, 5.0, -0.015, 0.99, -3.0, 1e-5, -2e-5, 1.0,
        )
    }

    #[test]
    fn test_fit_identity() {
        let points = grid_points(4, 4, 30.0);
        let h = fit_homography(&points, &points).expect("fit");
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(h[(i, j)], expected, epsilon = 1e-8);
            }
        }
    }

    #[test]
    fn test_fit_translation() {
        let src = grid_points(4, 4, 30.0);
        let mut dst = src.clone();
        for i in 0..dst.nrows() {
            dst[(i, 0)] += 12.0;
            dst[(i, 1)] -= 7.0;
        }
        let h = fit_homography(&src, &dst).expect("fit");
        assert_relative_eq!(h[(0, 2)], 12.0, epsilon = 1e-6);
        assert_relative_eq!(h[(1, 2)], -7.0, epsilon = 1e-6);
    }

    #[test]
    fn test_fit_projective_exact() {
        let truth = sample_homography();
        let src = grid_points(5, 4, 25.0);
        let dst = project(&truth, &src);
        let h = fit_homography(&src, &dst).expect("fit");
        let reprojected = project(&h, &src);
        for i in 0..src.nrows() {
            assert_relative_eq!(reprojected[(i, 0)], dst[(i, 0)], epsilon = 1e-6);
            assert_relative_eq!(reprojected[(i, 1)], dst[(i, 1)], epsilon = 1e-6);
        }
    }

    #[test]
    fn test_fit_requires_four_points() {
        let src = grid_points(3, 1, 20.0);
        let dst = src.clone();
        let err = fit_homography(&src, &dst).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::InsufficientCorrespondences { got: 3 }
        ));
    }

    #[test]
    fn test_fit_rejects_coincident_points() {
        let src = DMatrix::from_row_slice(4, 2, &[5.0, 5.0, 5.0, 5.0, 5.0, 5.0, 5.0, 5.0]);
        let dst = grid_points(4, 1, 20.0);
        assert!(fit_homography(&src, &dst).is_err());
    }

    #[test]
    fn test_ransac_with_outliers() {
        let truth = sample_homography();
        let src = grid_points(6, 5, 22.0);
        let mut dst = project(&truth, &src);
        // Corrupt 6 of 30 correspondences
        for i in 0..6 {
            dst[(i * 5, 0)] += 60.0 + i as f64 * 13.0;
            dst[(i * 5, 1)] -= 45.0;
        }

        let fit = fit_homography_ransac(&src, &dst, &RansacParams::default()).expect("fit");
        assert_eq!(fit.num_inliers, 24);
        assert_eq!(fit.inlier_mask.iter().filter(|&&m| m).count(), 24);
        for i in 0..6 {
            assert!(!fit.inlier_mask[i * 5], "outlier {} marked inlier", i * 5);
        }

        // The recovered model must match the truth on clean points
        let reprojected = project(&fit.matrix, &src);
        let clean = project(&truth, &src);
        for i in 0..src.nrows() {
            if fit.inlier_mask[i] {
                assert_relative_eq!(reprojected[(i, 0)], clean[(i, 0)], epsilon = 1e-6);
                assert_relative_eq!(reprojected[(i, 1)], clean[(i, 1)], epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_ransac_deterministic() {
        let truth = sample_homography();
        let src = grid_points(5, 5, 25.0);
        let mut dst = project(&truth, &src);
        dst[(3, 0)] += 40.0;
        dst[(17, 1)] -= 55.0;

        let params = RansacParams::default();
        let a = fit_homography_ransac(&src, &dst, &params).expect("fit");
        let b = fit_homography_ransac(&src, &dst, &params).expect("fit");
        assert_eq!(a.num_inliers, b.num_inliers);
        assert_relative_eq!(a.matrix[(0, 2)], b.matrix[(0, 2)], epsilon = 1e-12);
    }

    #[test]
    fn test_ransac_insufficient_correspondences() {
        let src = grid_points(3, 1, 20.0);
        let dst = src.clone();
        let err = fit_homography_ransac(&src, &dst, &RansacParams::default()).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::InsufficientCorrespondences { got: 3 }
        ));
    }

    #[test]
    fn test_ransac_minimal_four_points() {
        let truth = sample_homography();
        let src = grid_points(2, 2, 50.0);
        let dst = project(&truth, &src);
        let fit = fit_homography_ransac(&src, &dst, &RansacParams::default()).expect("fit");
        assert_eq!(fit.num_inliers, 4);
    }

    #[test]
    fn test_ransac_collinear_points_fail() {
        // All points on one line: no homography is determined
        let mut src = DMatrix::zeros(8, 2);
        for i in 0..8 {
            src[(i, 0)] = i as f64 * 10.0;
            src[(i, 1)] = 5.0;
        }
        let dst = src.clone();
        assert!(fit_homography_ransac(&src, &dst, &RansacParams::default()).is_err());
    }

    #[test]
    fn test_solve_minimal_translation() {
        let src = [[0.0, 0.0], [100.0, 0.0], [100.0, 100.0], [0.0, 100.0]];
        let dst = [[10.0, 20.0], [110.0, 20.0], [110.0, 120.0], [10.0, 120.0]];
        let h = solve_minimal(&src, &dst).expect("solvable");
        assert_relative_eq!(h[(0, 2)], 10.0, epsilon = 1e-9);
        assert_relative_eq!(h[(1, 2)], 20.0, epsilon = 1e-9);
    }

    #[test]
    fn test_solve_minimal_degenerate() {
        let src = [[0.0, 0.0], [10.0, 10.0], [20.0, 20.0], [30.0, 30.0]];
        let dst = [[0.0, 0.0], [10.0, 10.0], [20.0, 20.0], [30.0, 30.0]];
        assert!(solve_minimal(&src, &dst).is_none());
    }
}
