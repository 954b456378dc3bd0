//! Camera motion compensation module.
//!
//! Estimates how the camera moved between a reference frame and the current
//! one so that point coordinates can be carried into a fixed absolute space:
//!
//! - Sparse feature sampling and pyramidal Lucas-Kanade optical flow
//! - Robust RANSAC homography fitting with drift-triggered reference renewal
//! - Relative/absolute coordinate transformations
//! - [`MotionEstimator`], the per-session state machine tying them together

mod estimator;
mod flow;
mod homography;
mod transformations;

pub use estimator::{MotionDiagnostics, MotionEstimator};
pub use flow::{good_features_to_track, sample_and_track, FlowConfig, FlowField};
pub use homography::{fit_homography, fit_homography_ransac, HomographyFit, RansacParams};
pub use transformations::{
    CoordinateTransformation, HomographyTransformation, HomographyTransformationGetter,
    NilCoordinateTransformation, TransformationGetter,
};
