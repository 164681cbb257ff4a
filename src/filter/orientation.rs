//! Orientation strategies of the compound pose filter

use nalgebra::{Matrix3x4, Quaternion, UnitQuaternion, Vector3};
use tracing::trace;

use super::OrientationFilterKind;
use crate::calibration::OrientationConstants;
use crate::filter_space::PoseFilterPacket;
use crate::math::{DEG_TO_RAD, QuaternionExt, Vector3Ext, clamp01};
use crate::offset::{GyroOffset, GyroOffsetSettings};

/// Complementary filter constants
const INITIAL_GAIN: f32 = 10.0;
const INITIALISATION_PERIOD: f32 = 3.0; // seconds
const COMPLEMENTARY_GAIN: f32 = 0.5;
const ACCELERATION_REJECTION_DEGREES: f32 = 10.0;
const MAGNETIC_REJECTION_DEGREES: f32 = 20.0;
const RECOVERY_TRIGGER_PERIOD: f32 = 5.0; // seconds
const RECOVERY_DECREMENT: f32 = 9.0;

/// Fraction of the way to a fully trusted optical orientation taken per packet
const OPTICAL_CORRECTION_GAIN: f32 = 0.2;

/// Floor for the Madgwick step size so low-noise gyros still converge
const MIN_MADGWICK_BETA: f32 = 0.02;

/// Raw estimate plus the recenter reference applied on output
#[derive(Debug, Clone, Copy)]
struct OrientationState {
    orientation: UnitQuaternion<f32>,
    /// World-frame angular velocity of the raw estimate
    angular_velocity: Vector3<f32>,
    angular_acceleration: Vector3<f32>,
    reset_orientation: UnitQuaternion<f32>,
    valid: bool,
}

impl Default for OrientationState {
    fn default() -> Self {
        Self {
            orientation: UnitQuaternion::identity(),
            angular_velocity: Vector3::zeros(),
            angular_acceleration: Vector3::zeros(),
            reset_orientation: UnitQuaternion::identity(),
            valid: false,
        }
    }
}

impl OrientationState {
    fn set_angular_velocity(&mut self, angular_velocity: Vector3<f32>, delta_time: f32) {
        self.angular_acceleration = (angular_velocity - self.angular_velocity) / delta_time;
        self.angular_velocity = angular_velocity;
    }

    /// Adopt an absolute orientation measurement
    fn set_measured(&mut self, orientation: UnitQuaternion<f32>, delta_time: f32) {
        if self.valid {
            let rotation = orientation * self.orientation.inverse();
            self.set_angular_velocity(rotation.scaled_axis() / delta_time, delta_time);
        }
        self.orientation = orientation;
        self.valid = true;
    }
}

/// Gyroscope integration with accelerometer and magnetometer feedback.
///
/// The feedback gain starts high and ramps down so the estimate snaps to gravity
/// after a reset. Readings that disagree with the estimate by more than the
/// rejection angle are ignored until they have disagreed for the recovery period,
/// after which they are trusted again.
#[derive(Debug, Clone)]
struct ComplementaryCore {
    initialising: bool,
    ramped_gain: f32,
    accelerometer_ignored: bool,
    /// Seconds of recent accelerometer disagreement
    acceleration_recovery_trigger: f32,
    magnetometer_ignored: bool,
    magnetic_recovery_trigger: f32,
    acceleration_rejection_squared: f32,
    magnetic_rejection_squared: f32,
    gyro_offset: GyroOffset,
}

impl ComplementaryCore {
    fn new(constants: &OrientationConstants) -> Self {
        let threshold = (3.0 * DEG_TO_RAD).max(3.0 * constants.gyro_drift.abs().sqrt());
        Self {
            initialising: true,
            ramped_gain: INITIAL_GAIN,
            accelerometer_ignored: false,
            acceleration_recovery_trigger: 0.0,
            magnetometer_ignored: false,
            magnetic_recovery_trigger: 0.0,
            acceleration_rejection_squared: (ACCELERATION_REJECTION_DEGREES * DEG_TO_RAD).sin().powi(2),
            magnetic_rejection_squared: (MAGNETIC_REJECTION_DEGREES * DEG_TO_RAD).sin().powi(2),
            gyro_offset: GyroOffset::new(GyroOffsetSettings {
                threshold_rad_per_sec: threshold,
                ..Default::default()
            }),
        }
    }

    /// Back to the initialising state with the rejection thresholds kept
    fn reset(&mut self) {
        self.initialising = true;
        self.ramped_gain = INITIAL_GAIN;
        self.accelerometer_ignored = false;
        self.acceleration_recovery_trigger = 0.0;
        self.magnetometer_ignored = false;
        self.magnetic_recovery_trigger = 0.0;
        self.gyro_offset.reset();
    }

    /// Returns the half-feedback for one reference direction and updates its
    /// rejection bookkeeping.
    fn reference_feedback(
        sensor: Vector3<f32>,
        expected: Vector3<f32>,
        rejection_squared: f32,
        initialising: bool,
        trigger: &mut f32,
        ignored: &mut bool,
        delta_time: f32,
    ) -> Vector3<f32> {
        let feedback = calculate_feedback(sensor, expected);

        *ignored = true;
        if initialising || feedback.norm_squared() <= rejection_squared {
            *ignored = false;
            *trigger = (*trigger - RECOVERY_DECREMENT * delta_time).max(0.0);
        } else {
            *trigger += delta_time;
        }

        // persistent disagreement means the estimate is wrong, not the sensor
        if *trigger > RECOVERY_TRIGGER_PERIOD {
            *ignored = false;
        }
        *trigger = (*trigger).min(RECOVERY_TRIGGER_PERIOD);

        if *ignored { Vector3::zeros() } else { feedback * 0.5 }
    }

    #[allow(clippy::too_many_arguments)]
    fn step(
        &mut self,
        orientation: UnitQuaternion<f32>,
        gyroscope: Vector3<f32>,
        accelerometer: Option<Vector3<f32>>,
        magnetometer: Option<Vector3<f32>>,
        gravity_reference: Vector3<f32>,
        magnetic_reference: Option<Vector3<f32>>,
        delta_time: f32,
    ) -> UnitQuaternion<f32> {
        if self.initialising {
            self.ramped_gain -= (INITIAL_GAIN - COMPLEMENTARY_GAIN) / INITIALISATION_PERIOD * delta_time;
            if self.ramped_gain <= COMPLEMENTARY_GAIN {
                self.ramped_gain = COMPLEMENTARY_GAIN;
                self.initialising = false;
            }
        }

        let inverse = orientation.inverse();

        let mut half_accelerometer_feedback = Vector3::zeros();
        if let Some(accelerometer) = accelerometer.map(|a| a.safe_normalize()).filter(|a| *a != Vector3::zeros()) {
            half_accelerometer_feedback = Self::reference_feedback(
                accelerometer,
                inverse * gravity_reference,
                self.acceleration_rejection_squared,
                self.initialising,
                &mut self.acceleration_recovery_trigger,
                &mut self.accelerometer_ignored,
                delta_time,
            );
        }

        let mut half_magnetometer_feedback = Vector3::zeros();
        if let (Some(magnetometer), Some(reference)) = (magnetometer, magnetic_reference) {
            // only the horizontal heading error is corrected by the magnetometer
            let expected = inverse * reference;
            let up = inverse * gravity_reference;
            let sensor_east = magnetometer.cross(&up).safe_normalize();
            let expected_east = expected.cross(&up).safe_normalize();
            if sensor_east != Vector3::zeros() && expected_east != Vector3::zeros() {
                half_magnetometer_feedback = Self::reference_feedback(
                    sensor_east,
                    expected_east,
                    self.magnetic_rejection_squared,
                    self.initialising,
                    &mut self.magnetic_recovery_trigger,
                    &mut self.magnetometer_ignored,
                    delta_time,
                );
            }
        }

        let half_gyroscope = gyroscope * 0.5;
        let adjusted_half_gyroscope =
            half_gyroscope + (half_accelerometer_feedback + half_magnetometer_feedback) * self.ramped_gain;

        integrate_quaternion(orientation, adjusted_half_gyroscope, delta_time)
    }
}

/// Feedback vector between a sensor direction and its expected direction
fn calculate_feedback(sensor: Vector3<f32>, reference: Vector3<f32>) -> Vector3<f32> {
    let cross = sensor.cross(&reference);
    if sensor.dot(&reference) < 0.0 {
        cross.safe_normalize()
    } else {
        cross
    }
}

/// First-order quaternion integration of a body-frame half angular rate
fn integrate_quaternion(
    orientation: UnitQuaternion<f32>,
    half_gyroscope: Vector3<f32>,
    delta_time: f32,
) -> UnitQuaternion<f32> {
    let gyro_quat = Quaternion::from_parts(0.0, half_gyroscope);
    let derivative = orientation.as_ref() * gyro_quat;
    UnitQuaternion::from_quaternion(orientation.as_ref() + derivative * delta_time)
}

/// Orientation whose body-frame reading of `reference` is `sensor`
fn align_to_reference(sensor: Vector3<f32>, reference: Vector3<f32>) -> UnitQuaternion<f32> {
    UnitQuaternion::rotation_between(&sensor, &reference)
        .unwrap_or_else(|| UnitQuaternion::from_axis_angle(&Vector3::x_axis(), core::f32::consts::PI))
}

/// Gradient of `|R(q)ᵀ·d - s|²` with respect to the quaternion components
fn madgwick_gradient(orientation: &UnitQuaternion<f32>, d: &Vector3<f32>, s: &Vector3<f32>) -> Quaternion<f32> {
    let (q1, q2, q3, q4) = (orientation.w, orientation.i, orientation.j, orientation.k);
    let (dx, dy, dz) = (d.x, d.y, d.z);

    let f = Vector3::new(
        2.0 * dx * (0.5 - q3 * q3 - q4 * q4) + 2.0 * dy * (q1 * q4 + q2 * q3) + 2.0 * dz * (q2 * q4 - q1 * q3) - s.x,
        2.0 * dx * (q2 * q3 - q1 * q4) + 2.0 * dy * (0.5 - q2 * q2 - q4 * q4) + 2.0 * dz * (q1 * q2 + q3 * q4) - s.y,
        2.0 * dx * (q1 * q3 + q2 * q4) + 2.0 * dy * (q3 * q4 - q1 * q2) + 2.0 * dz * (0.5 - q2 * q2 - q3 * q3) - s.z,
    );
    #[rustfmt::skip]
    let jacobian = Matrix3x4::new(
        2.0 * dy * q4 - 2.0 * dz * q3,
        2.0 * dy * q3 + 2.0 * dz * q4,
        -4.0 * dx * q3 + 2.0 * dy * q2 - 2.0 * dz * q1,
        -4.0 * dx * q4 + 2.0 * dy * q1 + 2.0 * dz * q2,

        -2.0 * dx * q4 + 2.0 * dz * q2,
        2.0 * dx * q3 - 4.0 * dy * q2 + 2.0 * dz * q1,
        2.0 * dx * q2 + 2.0 * dz * q4,
        -2.0 * dx * q1 - 4.0 * dy * q4 + 2.0 * dz * q3,

        2.0 * dx * q3 - 2.0 * dy * q2,
        2.0 * dx * q4 - 2.0 * dy * q1 - 4.0 * dz * q2,
        2.0 * dx * q1 + 2.0 * dy * q4 - 4.0 * dz * q3,
        2.0 * dx * q2 + 2.0 * dy * q3,
    );

    let gradient = jacobian.transpose() * f;
    Quaternion::new(gradient[0], gradient[1], gradient[2], gradient[3])
}

/// One orientation strategy with its state
#[derive(Debug, Clone)]
pub struct OrientationFilter {
    kind: OrientationFilterKind,
    constants: OrientationConstants,
    state: OrientationState,
    complementary: ComplementaryCore,
    madgwick_beta: f32,
}

impl OrientationFilter {
    pub fn new(kind: OrientationFilterKind, constants: OrientationConstants) -> Self {
        let gyro_error = constants.gyro_variance.abs().sqrt();
        Self {
            kind,
            constants,
            state: OrientationState::default(),
            complementary: ComplementaryCore::new(&constants),
            madgwick_beta: ((3.0f32 / 4.0).sqrt() * gyro_error).max(MIN_MADGWICK_BETA),
        }
    }

    pub fn kind(&self) -> OrientationFilterKind {
        self.kind
    }

    pub fn is_valid(&self) -> bool {
        self.state.valid
    }

    pub fn update(&mut self, delta_time: f32, packet: &PoseFilterPacket) {
        match self.kind {
            OrientationFilterKind::PassThrough => {
                if let Some(optical) = packet.optical_orientation {
                    self.state.set_measured(optical, delta_time);
                }
            }
            OrientationFilterKind::External => {
                if let Some(external) = packet.external_orientation {
                    self.state.set_measured(external, delta_time);
                }
            }
            OrientationFilterKind::MadgwickArg | OrientationFilterKind::MadgwickMarg => {
                self.update_madgwick(delta_time, packet);
            }
            OrientationFilterKind::ComplementaryArg
            | OrientationFilterKind::ComplementaryMarg
            | OrientationFilterKind::ComplementaryOpticalArg => {
                self.update_complementary(delta_time, packet);
            }
        }
    }

    fn uses_magnetometer(&self) -> bool {
        matches!(
            self.kind,
            OrientationFilterKind::MadgwickMarg | OrientationFilterKind::ComplementaryMarg
        )
    }

    /// Snap to gravity on the first accelerometer reading
    fn initialise_from_accelerometer(&mut self, packet: &PoseFilterPacket) -> bool {
        if self.state.valid {
            return true;
        }
        match packet.accelerometer.filter(|a| a.norm() > f32::EPSILON) {
            Some(accelerometer) => {
                self.state.orientation =
                    align_to_reference(accelerometer, self.constants.gravity_calibration_direction);
                self.state.valid = true;
                true
            }
            None => false,
        }
    }

    fn update_madgwick(&mut self, delta_time: f32, packet: &PoseFilterPacket) {
        let Some(gyroscope) = packet.gyroscope else {
            return;
        };
        if !self.initialise_from_accelerometer(packet) {
            return;
        }

        let orientation = self.state.orientation;
        let mut gradient = Quaternion::new(0.0, 0.0, 0.0, 0.0);
        if let Some(accelerometer) = packet.accelerometer.map(|a| a.safe_normalize()) {
            gradient += madgwick_gradient(&orientation, &self.constants.gravity_calibration_direction, &accelerometer);
        }
        if self.uses_magnetometer()
            && let (Some(magnetometer), Some(reference)) =
                (packet.magnetometer, self.constants.magnetometer_calibration_direction)
        {
            gradient += madgwick_gradient(&orientation, &reference, &magnetometer);
        }

        let gradient_norm = gradient.norm();
        let mut derivative = orientation.as_ref() * Quaternion::from_parts(0.0, gyroscope) * 0.5;
        if gradient_norm > f32::EPSILON {
            derivative -= gradient * (self.madgwick_beta / gradient_norm);
        }

        self.state.orientation = UnitQuaternion::from_quaternion(orientation.as_ref() + derivative * delta_time);
        let angular_velocity = self.state.orientation * gyroscope;
        self.state.set_angular_velocity(angular_velocity, delta_time);
    }

    fn update_complementary(&mut self, delta_time: f32, packet: &PoseFilterPacket) {
        if let Some(gyroscope) = packet.gyroscope {
            if !self.initialise_from_accelerometer(packet) {
                return;
            }
            let was_learning_bias = self.complementary.gyro_offset.is_active();
            let gyroscope = self.complementary.gyro_offset.update(gyroscope, delta_time);
            if !was_learning_bias && self.complementary.gyro_offset.is_active() {
                trace!(bias = ?self.complementary.gyro_offset.offset(), "stationary, tracking gyro bias");
            }
            let magnetic_reference = if self.uses_magnetometer() {
                self.constants.magnetometer_calibration_direction
            } else {
                None
            };

            self.state.orientation = self.complementary.step(
                self.state.orientation,
                gyroscope,
                packet.accelerometer,
                packet.magnetometer,
                self.constants.gravity_calibration_direction,
                magnetic_reference,
                delta_time,
            );
            let angular_velocity = self.state.orientation * gyroscope;
            self.state.set_angular_velocity(angular_velocity, delta_time);
        }

        if self.kind == OrientationFilterKind::ComplementaryOpticalArg
            && let Some(optical) = packet.optical_orientation
        {
            self.apply_optical_correction(optical, packet.projection_area);
        }
    }

    /// Pull toward an optical orientation in proportion to how much it is trusted
    fn apply_optical_correction(&mut self, optical: UnitQuaternion<f32>, projection_area: f32) {
        if projection_area <= 0.0 {
            return;
        }
        if !self.state.valid {
            self.state.orientation = optical;
            self.state.valid = true;
            return;
        }

        let curve = &self.constants.orientation_variance_curve;
        let trust = clamp01(1.0 - curve.evaluate(projection_area) / curve.max_value);
        let blend = OPTICAL_CORRECTION_GAIN * trust;
        self.state.orientation = self
            .state
            .orientation
            .try_slerp(&optical, blend, 1.0e-6)
            .unwrap_or(optical);
    }

    pub fn orientation(&self, time: f32) -> UnitQuaternion<f32> {
        self.state.reset_orientation * self.state.orientation.extrapolate(&self.state.angular_velocity, time)
    }

    pub fn angular_velocity(&self) -> Vector3<f32> {
        self.state.reset_orientation * self.state.angular_velocity
    }

    pub fn angular_acceleration(&self) -> Vector3<f32> {
        self.state.reset_orientation * self.state.angular_acceleration
    }

    pub fn recenter(&mut self, reference: UnitQuaternion<f32>) {
        self.state.reset_orientation = reference * self.state.orientation.inverse();
    }

    pub fn reset(&mut self) {
        self.state = OrientationState::default();
        self.complementary.reset();
    }
}
