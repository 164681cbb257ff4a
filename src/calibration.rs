//! Per-device filter constants derived from calibration data

use nalgebra::Vector3;

use crate::device::DeviceCalibration;
use crate::filter_space::PoseFilterSpace;

/// Smallest variance any curve will report, keeps Kalman gains finite
const MIN_VARIANCE: f32 = 1.0e-6;

/// Optical measurement variance as a function of projection area.
///
/// Evaluates `min(A·e^(B·area), max_value)`. Fits have a negative `B`, so large,
/// close projections are trusted more than small, distant ones.
///
/// # Example
/// ```
/// use controller_fusion::calibration::VarianceCurve;
///
/// let curve = VarianceCurve { a: 0.03, b: -0.0015, max_value: 0.03 };
/// assert!(curve.evaluate(2000.0) < curve.evaluate(100.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VarianceCurve {
    pub a: f32,
    pub b: f32,
    pub max_value: f32,
}

impl VarianceCurve {
    /// Curve whose ceiling is its value at zero area
    pub fn from_fit(a: f32, b: f32) -> Self {
        Self { a, b, max_value: a.abs().max(MIN_VARIANCE) }
    }

    /// Variance for a projection of `screen_area` square pixels
    pub fn evaluate(&self, screen_area: f32) -> f32 {
        let value = self.a * (self.b * screen_area.max(0.0)).exp();
        if value.is_finite() {
            value.clamp(MIN_VARIANCE, self.max_value.max(MIN_VARIANCE))
        } else {
            self.max_value.max(MIN_VARIANCE)
        }
    }
}

/// Constants used by the orientation half of a pose filter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationConstants {
    /// Expected accelerometer direction in the identity pose (filter space)
    pub gravity_calibration_direction: Vector3<f32>,
    /// Expected magnetometer direction in the identity pose, if the device has one
    pub magnetometer_calibration_direction: Option<Vector3<f32>>,
    pub accelerometer_variance: f32,
    pub gyro_variance: f32,
    pub gyro_drift: f32,
    pub magnetometer_variance: f32,
    pub mean_update_time_delta: f32,
    pub orientation_variance_curve: VarianceCurve,
}

/// Constants used by the position half of a pose filter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionConstants {
    pub gravity_calibration_direction: Vector3<f32>,
    pub accelerometer_variance: f32,
    /// Linear accelerations below this magnitude (g) are zeroed
    pub accelerometer_noise_radius: f32,
    pub max_velocity: f32,
    pub mean_update_time_delta: f32,
    pub position_variance_curve: VarianceCurve,
    pub use_linear_acceleration: bool,
    /// Drop the vertical component of linear acceleration
    pub apply_gravity_mask: bool,
    /// Offset from an attachment parent, in the parent's frame (cm)
    pub attachment_offset_cm: Vector3<f32>,
}

/// Everything a pose filter needs from the device, fixed for the filter's lifetime
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseFilterConstants {
    pub orientation: OrientationConstants,
    pub position: PositionConstants,
}

impl PoseFilterConstants {
    /// Build the constants for a device whose filter space is `space`
    pub fn from_calibration(calibration: &DeviceCalibration, space: &PoseFilterSpace) -> Self {
        let gravity = space.gravity_calibration_direction();
        let mean_update_time_delta = if calibration.mean_update_time_delta > 0.0 {
            calibration.mean_update_time_delta
        } else {
            DeviceCalibration::default().mean_update_time_delta
        };

        Self {
            orientation: OrientationConstants {
                gravity_calibration_direction: gravity,
                magnetometer_calibration_direction: space.magnetometer_calibration_direction(),
                accelerometer_variance: calibration.accelerometer_variance,
                gyro_variance: calibration.gyro_variance,
                gyro_drift: calibration.gyro_drift,
                magnetometer_variance: calibration.magnetometer_variance,
                mean_update_time_delta,
                orientation_variance_curve: VarianceCurve::from_fit(
                    calibration.orientation_variance_exp_fit_a,
                    calibration.orientation_variance_exp_fit_b,
                ),
            },
            position: PositionConstants {
                gravity_calibration_direction: gravity,
                accelerometer_variance: calibration.accelerometer_variance,
                accelerometer_noise_radius: calibration.accelerometer_noise_radius,
                max_velocity: calibration.max_velocity,
                mean_update_time_delta,
                position_variance_curve: VarianceCurve::from_fit(
                    calibration.position_variance_exp_fit_a,
                    calibration.position_variance_exp_fit_b,
                ),
                use_linear_acceleration: calibration.use_linear_acceleration,
                apply_gravity_mask: calibration.apply_gravity_mask,
                attachment_offset_cm: calibration.attachment_offset_cm,
            },
        }
    }
}

impl Default for PoseFilterConstants {
    fn default() -> Self {
        Self::from_calibration(&DeviceCalibration::default(), &PoseFilterSpace::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceType;

    #[test]
    fn test_variance_curve_is_clamped() {
        let curve = VarianceCurve::from_fit(0.03, -0.0015);
        assert!((curve.evaluate(0.0) - 0.03).abs() < 1e-7);
        assert!((curve.evaluate(-50.0) - 0.03).abs() < 1e-7);
        assert!(curve.evaluate(1.0e6) >= MIN_VARIANCE);

        let growing = VarianceCurve { a: 1.0, b: 1.0, max_value: 5.0 };
        assert_eq!(growing.evaluate(100.0), 5.0);
    }

    #[test]
    fn test_constants_follow_filter_space() {
        let calibration = DeviceCalibration {
            identity_gravity_direction: Vector3::new(0.0, 2.0, 0.0),
            identity_magnetometer_direction: Some(Vector3::new(1.0, 0.0, 0.0)),
            ..Default::default()
        };
        let space = PoseFilterSpace::for_device(DeviceType::Wand, &calibration);
        let constants = PoseFilterConstants::from_calibration(&calibration, &space);

        let gravity = constants.orientation.gravity_calibration_direction;
        assert!((gravity.norm() - 1.0).abs() < 1e-6);
        assert!(constants.orientation.magnetometer_calibration_direction.is_some());
        assert_eq!(constants.position.gravity_calibration_direction, gravity);
    }

    #[test]
    fn test_missing_update_period_uses_default() {
        let calibration = DeviceCalibration {
            mean_update_time_delta: 0.0,
            ..Default::default()
        };
        let constants = PoseFilterConstants::from_calibration(&calibration, &PoseFilterSpace::default());
        assert!(constants.position.mean_update_time_delta > 0.0);
    }
}
