//! Narrow interface to the (external) device layer

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::color::TrackingColorId;
use crate::types::TrackingShape;

/// Controller families the fusion core knows how to filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    /// Motion wand with a glowing sphere and a full MARG sensor set
    Wand,
    /// One-handed navigation pad; no optical target, never tracked
    Navigator,
    /// Gamepad with a light bar, accelerometer and gyroscope
    Gamepad,
    /// Optical-only marker with no inertial sensors
    Virtual,
}

impl DeviceType {
    /// True for devices with an optical target and a pose filter
    pub fn is_tracked(self) -> bool {
        !matches!(self, DeviceType::Navigator)
    }
}

/// One sensor axis triple as reported by the device layer
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorReading {
    /// Raw ADC counts
    pub raw: Vector3<i32>,
    /// Calibrated value: g for accelerometers, rad/s for gyroscopes, unit field for magnetometers
    pub calibrated: Vector3<f32>,
}

impl SensorReading {
    pub fn calibrated(calibrated: Vector3<f32>) -> Self {
        Self { raw: Vector3::zeros(), calibrated }
    }
}

/// One hardware-buffered inertial frame
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ImuFrame {
    pub accelerometer: Option<SensorReading>,
    pub gyroscope: Option<SensorReading>,
}

/// State captured by one device poll
///
/// Some devices buffer two inertial frames per report; `frames` is oldest first.
/// The magnetometer, when present, is sampled once per poll.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    pub device_type: DeviceType,
    pub poll_sequence_number: u32,
    pub frames: Vec<ImuFrame>,
    pub magnetometer: Option<SensorReading>,
}

/// Per-device constants used to build the pose filter.
///
/// Loaded by the host from the device's configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceCalibration {
    /// Configured position filter name, empty for the device default
    pub position_filter: String,
    /// Configured orientation filter name, empty for the device default
    pub orientation_filter: String,
    /// Calibrated accelerometer reading while the device rests in its identity pose (g)
    pub identity_gravity_direction: Vector3<f32>,
    /// Calibrated magnetometer reading in the identity pose, if the device has one
    pub identity_magnetometer_direction: Option<Vector3<f32>>,
    /// Yaw of the device's identity-forward direction in degrees
    pub identity_forward_degrees: f32,
    pub accelerometer_variance: f32,
    /// Linear accelerations below this magnitude (g) are treated as noise
    pub accelerometer_noise_radius: f32,
    pub gyro_variance: f32,
    pub gyro_drift: f32,
    pub magnetometer_variance: f32,
    pub mean_update_time_delta: f32,
    /// Position variance exponential fit `A·e^(B·area)`
    pub position_variance_exp_fit_a: f32,
    pub position_variance_exp_fit_b: f32,
    /// Orientation variance exponential fit `A·e^(B·area)`
    pub orientation_variance_exp_fit_a: f32,
    pub orientation_variance_exp_fit_b: f32,
    /// Velocity clamp for the position filters (cm/s)
    pub max_velocity: f32,
    /// Light-bar projections below this area are reported with zero confidence
    pub min_screen_projection_area: f32,
    pub use_linear_acceleration: bool,
    pub apply_gravity_mask: bool,
    /// Offset from an attachment parent, in the parent's frame (cm)
    pub attachment_offset_cm: Vector3<f32>,
}

impl Default for DeviceCalibration {
    fn default() -> Self {
        Self {
            position_filter: String::new(),
            orientation_filter: String::new(),
            identity_gravity_direction: Vector3::new(0.0, 1.0, 0.0),
            identity_magnetometer_direction: None,
            identity_forward_degrees: 270.0,
            accelerometer_variance: 1.0e-4,
            accelerometer_noise_radius: 0.015,
            gyro_variance: 1.0e-4,
            gyro_drift: 1.0e-5,
            magnetometer_variance: 2.0e-3,
            mean_update_time_delta: 0.008,
            position_variance_exp_fit_a: 0.03,
            position_variance_exp_fit_b: -0.0015,
            orientation_variance_exp_fit_a: 0.005,
            orientation_variance_exp_fit_b: -0.001,
            max_velocity: 500.0,
            min_screen_projection_area: 16.0,
            use_linear_acceleration: true,
            apply_gravity_mask: false,
            attachment_offset_cm: Vector3::zeros(),
        }
    }
}

/// Device capabilities the controller view needs.
///
/// Implemented by the host's driver wrapper. The view owns its device exclusively.
pub trait ControllerDevice: Send {
    fn device_type(&self) -> DeviceType;

    /// Bluetooth connection, the only transport that streams tracked data
    fn is_bluetooth(&self) -> bool;

    /// Optical target description, `None` if the device config is missing or broken
    fn tracking_shape(&self) -> Option<TrackingShape>;

    fn calibration(&self) -> &DeviceCalibration;

    /// Color currently assigned in the device's own configuration
    fn tracking_color_id(&self) -> Option<TrackingColorId>;

    /// Store a new tracking color; returns false if the device refuses it
    fn set_tracking_color_id(&mut self, color: Option<TrackingColorId>) -> bool;

    /// Drive the tracking LED
    fn set_led_color(&mut self, rgb: [u8; 3]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_navigator_is_untracked() {
        assert!(DeviceType::Wand.is_tracked());
        assert!(DeviceType::Gamepad.is_tracked());
        assert!(DeviceType::Virtual.is_tracked());
        assert!(!DeviceType::Navigator.is_tracked());
    }

    #[test]
    fn test_calibration_partial_document() {
        let json = r#"{ "orientation_filter": "MadgwickARG", "max_velocity": 250.0 }"#;
        let calibration: DeviceCalibration = serde_json::from_str(json).unwrap();
        assert_eq!(calibration.orientation_filter, "MadgwickARG");
        assert_eq!(calibration.max_velocity, 250.0);
        assert_eq!(calibration.position_filter, "");
        assert_eq!(calibration.identity_gravity_direction, Vector3::new(0.0, 1.0, 0.0));
    }
}
