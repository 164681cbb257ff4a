//! Frame normalization between device sensor axes and the pose filters' space
//!
//! Filters work in a Y-up frame where the controller's identity pose faces the
//! play-space forward direction. Each device family reports its inertial sensors in
//! its own axes; the filter space rotates them into that frame and supplies the
//! reference directions the filters correct against.

use nalgebra::{Matrix3, UnitQuaternion, Vector3};

use crate::device::{DeviceCalibration, DeviceType};
use crate::filter::PoseFilter;
use crate::math::{DEG_TO_RAD, Vector3Ext};
use crate::packet_queue::SensorPacket;
use crate::types::Pose;

/// Sensor axes already match the filter frame
pub const SENSOR_TRANSFORM_IDENTITY: Matrix3<f32> = Matrix3::new(
    1.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, //
    0.0, 0.0, 1.0,
);

/// Sensor axes are Z-up with +Y pointing forward: (x, y, z) maps to (x, z, -y)
pub const SENSOR_TRANSFORM_Z_UP: Matrix3<f32> = Matrix3::new(
    1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, //
    0.0, -1.0, 0.0,
);

/// Identity directions were recorded upright
pub const CALIBRATION_TRANSFORM_UPRIGHT: Matrix3<f32> = SENSOR_TRANSFORM_IDENTITY;

/// Identity directions were recorded with the device lying on its back (+Z up)
pub const CALIBRATION_TRANSFORM_LAYING_FLAT: Matrix3<f32> = Matrix3::new(
    1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, //
    0.0, -1.0, 0.0,
);

/// One sensor packet expressed in filter space, with the filter's current state
/// attached so every strategy sees the same inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseFilterPacket {
    /// Filter orientation before this packet is applied
    pub current_orientation: UnitQuaternion<f32>,
    /// Filter position before this packet is applied (cm)
    pub current_position_cm: Vector3<f32>,
    /// Accelerometer reading in g
    pub accelerometer: Option<Vector3<f32>>,
    /// Accelerometer minus gravity, rotated into world space, in g
    pub world_linear_acceleration: Option<Vector3<f32>>,
    /// Angular rate in rad/s
    pub gyroscope: Option<Vector3<f32>>,
    /// Unit magnetic field direction
    pub magnetometer: Option<Vector3<f32>>,
    pub optical_position_cm: Option<Vector3<f32>>,
    pub optical_orientation: Option<UnitQuaternion<f32>>,
    /// Projection area backing the optical measurement (px²)
    pub projection_area: f32,
    /// Orientation injected by another subsystem
    pub external_orientation: Option<UnitQuaternion<f32>>,
    /// Latest pose of the controller this one is attached to
    pub attachment_parent_pose: Option<Pose>,
}

impl PoseFilterPacket {
    /// Packet with no measurements, anchored at the given state
    pub fn empty(current_orientation: UnitQuaternion<f32>, current_position_cm: Vector3<f32>) -> Self {
        Self {
            current_orientation,
            current_position_cm,
            accelerometer: None,
            world_linear_acceleration: None,
            gyroscope: None,
            magnetometer: None,
            optical_position_cm: None,
            optical_orientation: None,
            projection_area: 0.0,
            external_orientation: None,
            attachment_parent_pose: None,
        }
    }

    pub fn has_optical_measurement(&self) -> bool {
        self.optical_position_cm.is_some()
    }
}

/// Device-specific mapping into filter space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseFilterSpace {
    identity_gravity_direction: Vector3<f32>,
    identity_magnetometer_direction: Option<Vector3<f32>>,
    calibration_transform: Matrix3<f32>,
    sensor_transform: Matrix3<f32>,
}

impl PoseFilterSpace {
    pub fn new(
        identity_gravity_direction: Vector3<f32>,
        identity_magnetometer_direction: Option<Vector3<f32>>,
        calibration_transform: Matrix3<f32>,
        sensor_transform: Matrix3<f32>,
    ) -> Self {
        Self {
            identity_gravity_direction,
            identity_magnetometer_direction,
            calibration_transform,
            sensor_transform,
        }
    }

    /// Filter space for a device family.
    ///
    /// Wands report Z-up sensor axes, carry a magnetometer and are calibrated lying
    /// flat against a fixed +Y gravity. Gamepads report in filter axes, are calibrated
    /// upright against their recorded gravity and have no magnetometer. Virtual
    /// controllers have no inertial sensors at all, so only the default gravity
    /// direction matters.
    pub fn for_device(device_type: DeviceType, calibration: &DeviceCalibration) -> Self {
        match device_type {
            DeviceType::Wand => Self::new(
                Vector3::y(),
                calibration.identity_magnetometer_direction,
                CALIBRATION_TRANSFORM_LAYING_FLAT,
                SENSOR_TRANSFORM_Z_UP,
            ),
            DeviceType::Gamepad => Self::new(
                calibration.identity_gravity_direction,
                None,
                CALIBRATION_TRANSFORM_UPRIGHT,
                SENSOR_TRANSFORM_IDENTITY,
            ),
            DeviceType::Virtual | DeviceType::Navigator => Self::default(),
        }
    }

    /// Expected accelerometer direction in the identity pose
    pub fn gravity_calibration_direction(&self) -> Vector3<f32> {
        let direction = (self.calibration_transform * self.identity_gravity_direction).safe_normalize();
        if direction == Vector3::zeros() {
            Vector3::y()
        } else {
            direction
        }
    }

    /// Expected magnetometer direction in the identity pose, if the device has one
    pub fn magnetometer_calibration_direction(&self) -> Option<Vector3<f32>> {
        self.identity_magnetometer_direction
            .map(|m| (self.calibration_transform * m).safe_normalize())
            .filter(|m| *m != Vector3::zeros())
    }

    /// Rotation taking the device's identity-forward yaw onto the play-space forward yaw
    pub fn forward_alignment(identity_forward_degrees: f32, global_forward_degrees: f32) -> UnitQuaternion<f32> {
        UnitQuaternion::from_axis_angle(
            &Vector3::y_axis(),
            (identity_forward_degrees - global_forward_degrees) * DEG_TO_RAD,
        )
    }

    /// Express a queued packet in filter space
    pub fn create_filter_packet(&self, packet: &SensorPacket, filter: &dyn PoseFilter) -> PoseFilterPacket {
        let mut filter_packet = PoseFilterPacket::empty(filter.orientation(0.0), filter.position_cm(0.0));

        match packet {
            SensorPacket::Imu(imu) => {
                filter_packet.accelerometer = imu.accelerometer.map(|a| self.sensor_transform * a.calibrated);
                filter_packet.gyroscope = imu.gyroscope.map(|g| self.sensor_transform * g.calibrated);
                filter_packet.magnetometer = imu
                    .magnetometer
                    .map(|m| (self.sensor_transform * m.calibrated).safe_normalize())
                    .filter(|m| *m != Vector3::zeros());

                if filter.is_orientation_state_valid() {
                    filter_packet.world_linear_acceleration = filter_packet.accelerometer.map(|accelerometer| {
                        filter_packet.current_orientation * accelerometer - self.gravity_calibration_direction()
                    });
                }
            }
            SensorPacket::Optical(optical) => {
                filter_packet.optical_position_cm = Some(optical.position_cm);
                filter_packet.optical_orientation = optical.orientation;
                filter_packet.projection_area = optical.projection_area;
            }
        }

        filter_packet
    }
}

impl Default for PoseFilterSpace {
    fn default() -> Self {
        Self::new(Vector3::y(), None, CALIBRATION_TRANSFORM_UPRIGHT, SENSOR_TRANSFORM_IDENTITY)
    }
}
