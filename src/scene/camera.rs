//! Camera samples.

use serde::{Deserialize, Serialize};

/// Physical camera parameters for one frame.
///
/// Lengths are in millimetres except the clipping planes and the focus
/// distance, which are in scene units.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSample {
    pub focal_length: f64,
    pub horizontal_aperture: f64,
    pub vertical_aperture: f64,
    pub near_clipping_plane: f64,
    pub far_clipping_plane: f64,
    pub f_stop: f64,
    pub focus_distance: f64,
}

impl Default for CameraSample {
    fn default() -> Self {
        Self {
            focal_length: 35.0,
            horizontal_aperture: 36.0,
            vertical_aperture: 24.0,
            near_clipping_plane: 0.1,
            far_clipping_plane: 100_000.0,
            f_stop: 5.6,
            focus_distance: 5.0,
        }
    }
}

impl CameraSample {
    /// Set focal length.
    pub fn with_focal_length(mut self, focal_length: f64) -> Self {
        self.focal_length = focal_length;
        self
    }
}
