//! Coordinate transformation implementations.

use log::debug;
use nalgebra::{DMatrix, Matrix3};

use crate::camera_motion::homography::{fit_homography_ransac, RansacParams};
use crate::{Error, Result};

/// Trait for transforming between relative and absolute coordinates.
///
/// This is used for camera motion compensation.
///
/// Point coordinates can be interpreted in 2 references:
/// - Relative: their position on the current frame, (0, 0) is top left
/// - Absolute: their position in a fixed space, (0, 0) is the top left of the
///   reference frame the session started from
pub trait CoordinateTransformation: Send + Sync + std::fmt::Debug {
    /// Transform points from relative (camera frame) to absolute (world frame) coordinates.
    fn rel_to_abs(&self, points: &DMatrix<f64>) -> DMatrix<f64>;

    /// Transform points from absolute (world frame) to relative (camera frame) coordinates.
    fn abs_to_rel(&self, points: &DMatrix<f64>) -> DMatrix<f64>;

    /// Clone this transformation into a boxed trait object.
    fn clone_box(&self) -> Box<dyn CoordinateTransformation>;
}

impl Clone for Box<dyn CoordinateTransformation> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Trait for computing coordinate transformations between point correspondences.
pub trait TransformationGetter: Send + Sync {
    /// Compute the transformation between current and previous points.
    ///
    /// # Returns
    /// Tuple of (should_update_reference, transformation)
    fn call(
        &mut self,
        curr_pts: &DMatrix<f64>,
        prev_pts: &DMatrix<f64>,
    ) -> Result<(bool, Box<dyn CoordinateTransformation>)>;

    /// Proportion of correspondences that supported the last fitted model,
    /// when the getter tracks one.
    fn last_proportion(&self) -> Option<f64> {
        None
    }
}

/// No-op transformation that returns points unchanged.
///
/// Used when camera motion is not being tracked.
#[derive(Debug, Clone, Default)]
pub struct NilCoordinateTransformation;

impl CoordinateTransformation for NilCoordinateTransformation {
    fn rel_to_abs(&self, points: &DMatrix<f64>) -> DMatrix<f64> {
        points.clone()
    }

    fn abs_to_rel(&self, points: &DMatrix<f64>) -> DMatrix<f64> {
        points.clone()
    }

    fn clone_box(&self) -> Box<dyn CoordinateTransformation> {
        Box::new(self.clone())
    }
}

/// Full perspective transformation using a 3x3 homography matrix.
///
/// `homography_matrix` maps relative (current frame) coordinates to absolute
/// (reference frame) coordinates; the inverse is precomputed once so both
/// directions are a single matrix application.
#[derive(Debug, Clone)]
pub struct HomographyTransformation {
    /// 3x3 matrix mapping relative to absolute coordinates.
    pub homography_matrix: Matrix3<f64>,
    /// Pre-computed inverse, mapping absolute to relative coordinates.
    pub inverse_homography_matrix: Matrix3<f64>,
}

impl HomographyTransformation {
    /// Create a new homography transformation from the relative-to-absolute matrix.
    pub fn new(homography_matrix: Matrix3<f64>) -> Result<Self> {
        let inverse = homography_matrix.try_inverse().ok_or_else(|| {
            Error::NonInvertibleTransform("cannot invert homography matrix".to_string())
        })?;

        Ok(Self {
            homography_matrix,
            inverse_homography_matrix: inverse,
        })
    }

    /// Identity transformation (no camera motion yet).
    pub fn identity() -> Self {
        Self {
            homography_matrix: Matrix3::identity(),
            inverse_homography_matrix: Matrix3::identity(),
        }
    }

    /// Apply a homography to 2D points.
    fn transform_points(&self, points: &DMatrix<f64>, matrix: &Matrix3<f64>) -> DMatrix<f64> {
        if points.ncols() != 2 {
            return points.clone();
        }

        let rows = points.nrows();
        let mut result = DMatrix::zeros(rows, 2);

        for i in 0..rows {
            let x = points[(i, 0)];
            let y = points[(i, 1)];

            // [x', y', w'] = H * [x, y, 1]^T
            let x_prime = matrix[(0, 0)] * x + matrix[(0, 1)] * y + matrix[(0, 2)];
            let y_prime = matrix[(1, 0)] * x + matrix[(1, 1)] * y + matrix[(1, 2)];
            let w_prime = matrix[(2, 0)] * x + matrix[(2, 1)] * y + matrix[(2, 2)];

            // Perspective division
            let w = if w_prime == 0.0 { 0.0000001 } else { w_prime };
            result[(i, 0)] = x_prime / w;
            result[(i, 1)] = y_prime / w;
        }

        result
    }
}

impl CoordinateTransformation for HomographyTransformation {
    fn rel_to_abs(&self, points: &DMatrix<f64>) -> DMatrix<f64> {
        self.transform_points(points, &self.homography_matrix)
    }

    fn abs_to_rel(&self, points: &DMatrix<f64>) -> DMatrix<f64> {
        self.transform_points(points, &self.inverse_homography_matrix)
    }

    fn clone_box(&self) -> Box<dyn CoordinateTransformation> {
        Box::new(self.clone())
    }
}

/// Calculates homography transformations between point correspondences using RANSAC.
///
/// The camera movement is estimated against a fixed reference frame rather than
/// the immediately preceding one; comparing consecutive frames can make motion
/// too small to estimate reliably. Each fit maps the reference points onto the
/// current ones and is composed with the homographies accumulated at earlier
/// reference renewals, so the returned transformation always relates the current
/// frame to the session's first frame. When the fit explains fewer than
/// `proportion_points_used_threshold` of the correspondences, the caller is told
/// to renew its reference frame and the composed matrix becomes the new
/// accumulation baseline.
pub struct HomographyTransformationGetter {
    /// RANSAC parameters for each per-frame fit.
    pub ransac: RansacParams,

    /// Minimum proportion of points that must be matched, below which the
    /// reference frame is renewed.
    pub proportion_points_used_threshold: f64,

    /// Accumulated homography from the original reference frame, in the
    /// absolute-to-relative direction.
    data: Option<Matrix3<f64>>,

    last_proportion: Option<f64>,
}

impl HomographyTransformationGetter {
    /// Create a new homography transformation getter.
    pub fn new(ransac: RansacParams, proportion_points_used_threshold: f64) -> Self {
        Self {
            ransac,
            proportion_points_used_threshold,
            data: None,
            last_proportion: None,
        }
    }
}

impl Default for HomographyTransformationGetter {
    fn default() -> Self {
        Self::new(RansacParams::default(), 0.9)
    }
}

impl TransformationGetter for HomographyTransformationGetter {
    fn call(
        &mut self,
        curr_pts: &DMatrix<f64>,
        prev_pts: &DMatrix<f64>,
    ) -> Result<(bool, Box<dyn CoordinateTransformation>)> {
        if curr_pts.nrows() != prev_pts.nrows()
            || curr_pts.ncols() != 2
            || prev_pts.ncols() != 2
        {
            return Err(Error::InvalidPointsShape {
                expected: "matching (n, 2) point sets".to_string(),
                got: format!(
                    "({}, {}) and ({}, {})",
                    curr_pts.nrows(),
                    curr_pts.ncols(),
                    prev_pts.nrows(),
                    prev_pts.ncols()
                ),
            });
        }

        // Fit reference -> current, the same direction the chain accumulates in
        let fit = fit_homography_ransac(prev_pts, curr_pts, &self.ransac)?;
        let proportion_points_used = fit.num_inliers as f64 / curr_pts.nrows() as f64;
        self.last_proportion = Some(proportion_points_used);
        let update_prvs = proportion_points_used < self.proportion_points_used_threshold;

        // Compose with what earlier reference renewals accumulated
        let abs_to_rel = match &self.data {
            Some(prev_data) => fit.matrix * prev_data,
            None => fit.matrix,
        };

        if update_prvs {
            debug!(
                "renewing reference frame: {:.3} of points matched (threshold {:.3})",
                proportion_points_used, self.proportion_points_used_threshold
            );
            self.data = Some(abs_to_rel);
        }

        let rel_to_abs = abs_to_rel.try_inverse().ok_or_else(|| {
            Error::NonInvertibleTransform("accumulated homography is singular".to_string())
        })?;

        Ok((
            update_prvs,
            Box::new(HomographyTransformation {
                homography_matrix: rel_to_abs,
                inverse_homography_matrix: abs_to_rel,
            }),
        ))
    }

    fn last_proportion(&self) -> Option<f64> {
        self.last_proportion
    }
}
