//! Global tracking configuration consumed by the optical pipeline

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::math::DEG_TO_RAD;

/// Longest history the position predictor will keep
pub const MAX_POSITION_PREDICTION_HISTORY: usize = 50;

/// Tracking thresholds shared by every controller.
///
/// Field names double as the persisted key names. Loading and saving is left to the
/// host; every field has a default so partial documents deserialize.
///
/// # Example
/// ```
/// use controller_fusion::TrackingConfig;
///
/// let config = TrackingConfig {
///     controller_position_smoothing: 0.5,
///     ignore_pose_from_one_tracker: false,
///     ..Default::default()
/// };
/// assert_eq!(config.optical_tracking_timeout, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Frames older than this (milliseconds) are ignored
    pub optical_tracking_timeout: u32,
    /// Projections smaller than this (px²) are treated as noise
    pub min_valid_projection_area: f32,
    /// Occlusion zone radius in pixels; values below 0.01 disable the guard
    pub occluded_area_on_loss_size: f32,
    /// Projections at least this large (px²) are never suppressed by the guard
    pub occluded_area_regain_projection_size: f32,
    /// Guard is bypassed while fewer than this many trackers have been accepted
    pub occluded_area_ignore_trackers: u32,
    /// Per-axis pair deviation (cm) before a triangulated pair is rejected
    pub max_tracker_position_deviation: f32,
    /// Prediction gain applied to the position delta from its rolling history
    pub controller_position_prediction: f32,
    /// Number of positions in the rolling prediction history
    pub controller_position_prediction_history: u32,
    /// Weight of the previous position in the exponential smoother
    pub controller_position_smoothing: f32,
    /// Skip tracker pairs that face each other across the play space
    #[serde(alias = "excluded_opposed_cameras")]
    pub exclude_opposed_cameras: bool,
    /// Refuse single-tracker poses while other trackers are available
    pub ignore_pose_from_one_tracker: bool,
    /// Yaw of the play space's forward direction in degrees
    pub global_forward_degrees: f32,
    /// Most sensor packets a controller processes per tick
    pub max_packets_per_tick: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            optical_tracking_timeout: 100,
            min_valid_projection_area: 16.0,
            occluded_area_on_loss_size: 4.0,
            occluded_area_regain_projection_size: 32.0,
            occluded_area_ignore_trackers: 0,
            max_tracker_position_deviation: 10.0,
            controller_position_prediction: 0.0,
            controller_position_prediction_history: 5,
            controller_position_smoothing: 0.0,
            exclude_opposed_cameras: false,
            ignore_pose_from_one_tracker: true,
            global_forward_degrees: 270.0,
            max_packets_per_tick: 100,
        }
    }
}

impl TrackingConfig {
    /// Copy of the configuration with every value clamped into its legal range.
    ///
    /// Each clamped field is logged; an out-of-range value is never fatal.
    pub fn sanitized(&self) -> Self {
        let mut config = self.clone();

        config.min_valid_projection_area =
            clamp_logged("min_valid_projection_area", self.min_valid_projection_area, 0.0, f32::MAX);
        config.occluded_area_on_loss_size =
            clamp_logged("occluded_area_on_loss_size", self.occluded_area_on_loss_size, 0.0, f32::MAX);
        config.occluded_area_regain_projection_size = clamp_logged(
            "occluded_area_regain_projection_size",
            self.occluded_area_regain_projection_size,
            0.0,
            f32::MAX,
        );
        config.max_tracker_position_deviation = clamp_logged(
            "max_tracker_position_deviation",
            self.max_tracker_position_deviation,
            0.0,
            f32::MAX,
        );
        config.controller_position_prediction = clamp_logged(
            "controller_position_prediction",
            self.controller_position_prediction,
            0.0,
            100.0,
        );
        config.controller_position_smoothing = clamp_logged(
            "controller_position_smoothing",
            self.controller_position_smoothing,
            0.0,
            0.99,
        );

        let history = self.controller_position_prediction_history as usize;
        let clamped_history = history.clamp(1, MAX_POSITION_PREDICTION_HISTORY);
        if clamped_history != history {
            warn!(
                field = "controller_position_prediction_history",
                value = history,
                clamped = clamped_history,
                "tracking config value out of range"
            );
        }
        config.controller_position_prediction_history = clamped_history as u32;

        if !self.global_forward_degrees.is_finite() {
            warn!(field = "global_forward_degrees", "tracking config value is not finite, using default");
            config.global_forward_degrees = Self::default().global_forward_degrees;
        }

        if self.max_packets_per_tick == 0 {
            warn!(field = "max_packets_per_tick", "tracking config value out of range, using 1");
            config.max_packets_per_tick = 1;
        }

        config
    }

    /// Play-space forward axis derived from `global_forward_degrees`
    pub fn global_forward_axis(&self) -> Vector3<f32> {
        let radians = self.global_forward_degrees * DEG_TO_RAD;
        Vector3::new(radians.cos(), 0.0, radians.sin())
    }

    /// Play-space right axis, forward crossed with world up
    pub fn global_right_axis(&self) -> Vector3<f32> {
        let radians = self.global_forward_degrees * DEG_TO_RAD;
        Vector3::new(-radians.sin(), 0.0, radians.cos())
    }
}

fn clamp_logged(field: &'static str, value: f32, min: f32, max: f32) -> f32 {
    if value.is_nan() {
        warn!(field, "tracking config value is NaN, using lower bound");
        return min;
    }
    let clamped = value.clamp(min, max);
    if clamped != value {
        warn!(field, value, clamped, "tracking config value out of range");
    }
    clamped
}
