//! # Crossflow - Camera Motion Compensation & Zone Counting
//!
//! Core analytics for stationary-or-panning traffic cameras: estimate the
//! camera's own motion from sparse optical flow so that tracked positions can
//! be expressed in a fixed ("absolute") coordinate space, and count how many
//! tracked objects cross configured zones in each direction.
//!
//! Detection and track association are external collaborators; this crate
//! consumes frames, occupancy masks, and per-frame tracked positions.
//!
//! ## Features
//!
//! - Shi-Tomasi corner sampling with pyramidal Lucas-Kanade optical flow
//! - RANSAC homography estimation with drift-triggered reference renewal
//! - Relative/absolute coordinate transformations anchored to the first frame
//! - Per-session zone-crossing registries with monotonic directional counts
//! - Frame overlay: zone lines, counts, crossing flash, flow arrows, paths
//!
//! ## Example
//!
//! ```rust,ignore
//! use crossflow::{MotionEstimator, ZoneCounter, ZoneLayout};
//!
//! let mut estimator = MotionEstimator::default();
//! let mut counter: ZoneCounter<String> = ZoneCounter::new(ZoneLayout::default())?;
//!
//! // Per frame: estimate camera motion, then feed tracked objects
//! let transform = estimator.update(&frame, None)?;
//! let events = counter.register_and_render(&track_id, &extent, &mut frame);
//! ```

// Public modules
pub mod camera_motion;
pub mod counting;
pub mod drawing;
pub mod frame;
pub mod utils;

// Re-exports for convenience
pub use camera_motion::{
    CoordinateTransformation, FlowConfig, FlowField, HomographyTransformation,
    HomographyTransformationGetter, MotionDiagnostics, MotionEstimator,
    NilCoordinateTransformation, RansacParams, TransformationGetter,
};
pub use counting::{Zone, ZoneCounter, ZoneCounts, ZoneEvent, ZoneLabel, ZoneLayout};
pub use drawing::{AbsolutePaths, OverlayStyle};

// Error types
pub use crate::error::{Error, Result};

mod error {
    use thiserror::Error;

    /// Errors that can occur in the crossflow library
    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Invalid configuration: {0}")]
        InvalidConfig(String),

        #[error("Invalid zone configuration: {0}")]
        InvalidZoneConfig(String),

        #[error("Invalid points shape: expected {expected}, got {got}")]
        InvalidPointsShape { expected: String, got: String },

        #[error("Insufficient correspondences for homography: got {got}, need at least 4")]
        InsufficientCorrespondences { got: usize },

        #[error("Non-invertible transform: {0}")]
        NonInvertibleTransform(String),

        #[error("Zone layout parse error: {0}")]
        ParseError(#[from] serde_json::Error),

        #[error("IO error: {0}")]
        IoError(#[from] std::io::Error),
    }

    /// Result type for crossflow operations
    pub type Result<T> = std::result::Result<T, Error>;
}
