//! Camera motion estimation from sparse optical flow.

use image::{GrayImage, RgbImage};
use log::debug;

use crate::camera_motion::flow::{self, FlowConfig, FlowField};
use crate::camera_motion::transformations::{
    CoordinateTransformation, HomographyTransformation, HomographyTransformationGetter,
    NilCoordinateTransformation, TransformationGetter,
};
use crate::utils::points_to_matrix;
use crate::{frame, Result};

/// Counters exposing what the estimator did across a session.
///
/// `fallback_frames` counts calls that returned the previous transformation
/// because the frame offered no usable motion evidence; without it those
/// frames would be indistinguishable from genuinely static ones.
#[derive(Debug, Clone, Default)]
pub struct MotionDiagnostics {
    /// Frames processed, including the first.
    pub frames: u64,
    /// Reference-frame renewals triggered by the transformation getter.
    pub renewals: u64,
    /// Frames answered with the previous transformation.
    pub fallback_frames: u64,
    /// Inlier proportion of the most recent successful fit.
    pub last_inlier_ratio: Option<f64>,
}

/// Reference frame the estimator tracks against.
enum ReferenceState {
    Uninitialized,
    Active {
        gray: GrayImage,
        mask: Option<GrayImage>,
        /// Reference-frame feature positions carried between calls; `None`
        /// forces a fresh detection on the next update.
        points: Option<Vec<[f32; 2]>>,
    },
}

/// Estimates camera motion by tracking sparse features against a reference
/// frame and fitting a robust homography to the correspondences.
///
/// The reference frame stays fixed while the fits keep explaining enough of
/// the tracked points; when the getter reports a renewal the current frame
/// becomes the new reference and the accumulated transformation carries the
/// history forward, so returned transformations always relate the current
/// frame to the first one.
///
/// Frames must be fed in strict arrival order; one estimator serves one
/// video session.
pub struct MotionEstimator {
    /// Feature sampling and tracking configuration.
    pub flow_config: FlowConfig,
    getter: Box<dyn TransformationGetter>,
    state: ReferenceState,
    last_transform: Box<dyn CoordinateTransformation>,
    last_flow: Option<FlowField>,
    diagnostics: MotionDiagnostics,
}

impl MotionEstimator {
    /// Create an estimator with explicit flow configuration and getter.
    pub fn new(flow_config: FlowConfig, getter: Box<dyn TransformationGetter>) -> Self {
        Self {
            flow_config,
            getter,
            state: ReferenceState::Uninitialized,
            last_transform: Box::new(NilCoordinateTransformation),
            last_flow: None,
            diagnostics: MotionDiagnostics::default(),
        }
    }

    /// Process the next frame and return the transformation relating it to
    /// the session's first frame.
    ///
    /// `mask` excludes zero-valued pixels from feature sampling (moving
    /// objects, overlays); it is captured together with the reference frame
    /// and replaced on renewal.
    ///
    /// When the frame offers no usable motion evidence (no trackable
    /// features, too few correspondences, degenerate fit) the previous
    /// transformation is returned unchanged and the event is recorded in
    /// [`MotionDiagnostics::fallback_frames`].
    pub fn update(
        &mut self,
        frame: &RgbImage,
        mask: Option<&GrayImage>,
    ) -> Result<Box<dyn CoordinateTransformation>> {
        self.diagnostics.frames += 1;
        let gray = frame::to_grayscale(frame);

        let ReferenceState::Active {
            gray: reference,
            mask: reference_mask,
            points,
        } = &mut self.state
        else {
            // First frame becomes the reference and is, by definition,
            // unmoved relative to itself.
            self.state = ReferenceState::Active {
                gray,
                mask: mask.cloned(),
                points: None,
            };
            let transform: Box<dyn CoordinateTransformation> =
                Box::new(HomographyTransformation::identity());
            self.last_transform = transform.clone();
            return Ok(transform);
        };

        // Taking the stored points leaves `None` behind, so every failure
        // path below implicitly forces a fresh detection on the next call.
        let field = flow::sample_and_track(
            reference,
            &gray,
            points.take(),
            reference_mask.as_ref(),
            &self.flow_config,
        );

        if field.is_empty() {
            self.diagnostics.fallback_frames += 1;
            debug!("no trackable flow in frame {}; reusing previous transform", self.diagnostics.frames);
            self.last_flow = Some(field);
            return Ok(self.last_transform.clone());
        }

        let curr_pts = points_to_matrix(&field.curr_points);
        let prev_pts = points_to_matrix(&field.prev_points);

        match self.getter.call(&curr_pts, &prev_pts) {
            Ok((update_prvs, transform)) => {
                self.diagnostics.last_inlier_ratio = self.getter.last_proportion();
                if update_prvs {
                    self.diagnostics.renewals += 1;
                    self.state = ReferenceState::Active {
                        gray,
                        mask: mask.cloned(),
                        points: None,
                    };
                } else {
                    *points = Some(field.prev_points.clone());
                }
                self.last_flow = Some(field);
                self.last_transform = transform.clone();
                Ok(transform)
            }
            Err(err) => {
                self.diagnostics.fallback_frames += 1;
                debug!("transformation fit failed ({err}); reusing previous transform");
                self.last_flow = Some(field);
                Ok(self.last_transform.clone())
            }
        }
    }

    /// Feature correspondences of the most recent update, for debug overlays.
    pub fn last_flow(&self) -> Option<&FlowField> {
        self.last_flow.as_ref()
    }

    /// Session counters.
    pub fn diagnostics(&self) -> &MotionDiagnostics {
        &self.diagnostics
    }
}

impl Default for MotionEstimator {
    fn default() -> Self {
        Self::new(
            FlowConfig::default(),
            Box::new(HomographyTransformationGetter::default()),
        )
    }
}
