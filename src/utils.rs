//! Utility functions for crossflow.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::OnceLock;

use log::warn;
use nalgebra::DMatrix;

use crate::{Error, Result};

/// Validate that points have shape (n_points, 2).
///
/// An empty matrix is valid: some frames legitimately produce no points.
pub fn validate_points(points: &DMatrix<f64>) -> Result<()> {
    if points.nrows() > 0 && points.ncols() != 2 {
        return Err(Error::InvalidPointsShape {
            expected: "(n, 2)".to_string(),
            got: format!("({}, {})", points.nrows(), points.ncols()),
        });
    }
    Ok(())
}

/// Convert pixel-space feature points into the (n, 2) matrix used by the
/// transformation layer.
pub fn points_to_matrix(points: &[[f32; 2]]) -> DMatrix<f64> {
    let mut matrix = DMatrix::zeros(points.len(), 2);
    for (i, p) in points.iter().enumerate() {
        matrix[(i, 0)] = p[0] as f64;
        matrix[(i, 1)] = p[1] as f64;
    }
    matrix
}

/// Global set of warned messages (for warn_once).
static WARNED_MESSAGES: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();

/// Emit a warning only once per distinct message.
///
/// Subsequent calls with the same message are ignored. Used for per-frame
/// conditions that would otherwise flood the log.
pub fn warn_once(message: &str) {
    let warned = WARNED_MESSAGES.get_or_init(|| Mutex::new(HashSet::new()));
    let Ok(mut guard) = warned.lock() else {
        return;
    };
    if !guard.contains(message) {
        warn!("{}", message);
        guard.insert(message.to_string());
    }
}
