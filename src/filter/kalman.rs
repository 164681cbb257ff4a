//! Joint state-space pose estimator
//!
//! Position runs a constant-acceleration Kalman filter over
//! `[position, velocity, acceleration]`. Orientation runs an error-state
//! extended Kalman filter: the nominal quaternion and gyro bias are propagated
//! directly, while a six-element error `[δθ, δb]` carries the covariance and is
//! folded back into the nominal state after every correction.

use nalgebra::{Matrix3, Matrix3x6, Matrix6, SMatrix, SVector, UnitQuaternion, Vector3, Vector6};

use super::{PoseFilter, PoseFilterKind};
use crate::calibration::{OrientationConstants, PoseFilterConstants, PositionConstants};
use crate::filter_space::PoseFilterPacket;
use crate::math::{GRAVITY_CM_PER_SEC_SQR, QuaternionExt, Vector3Ext};

type Vector9 = SVector<f32, 9>;
type Matrix9 = SMatrix<f32, 9, 9>;
type Matrix3x9 = SMatrix<f32, 3, 9>;

/// White-jerk spectral density driving the position model (cm²/s⁵)
const JERK_VARIANCE: f32 = 1.0e5;
const INITIAL_VELOCITY_VARIANCE: f32 = 100.0;
const INITIAL_ACCELERATION_VARIANCE: f32 = 1.0e4;

const INITIAL_ANGLE_VARIANCE: f32 = 0.1;
const INITIAL_BIAS_VARIANCE: f32 = 0.01;

/// Accelerometer readings outside this band (g) are dominated by motion
const ACCEL_MAGNITUDE_MIN: f32 = 0.8;
const ACCEL_MAGNITUDE_MAX: f32 = 1.2;

/// Skew-symmetric cross-product matrix
fn skew(v: &Vector3<f32>) -> Matrix3<f32> {
    v.cross_matrix()
}

#[derive(Debug, Clone)]
struct PositionKalman {
    state: Vector9,
    covariance: Matrix9,
    valid: bool,
}

impl PositionKalman {
    fn new() -> Self {
        Self {
            state: Vector9::zeros(),
            covariance: Matrix9::identity(),
            valid: false,
        }
    }

    fn initialise(&mut self, position_cm: Vector3<f32>, variance: f32) {
        self.state = Vector9::zeros();
        self.state.fixed_rows_mut::<3>(0).copy_from(&position_cm);
        let mut diagonal = Vector9::zeros();
        diagonal.fixed_rows_mut::<3>(0).fill(variance);
        diagonal.fixed_rows_mut::<3>(3).fill(INITIAL_VELOCITY_VARIANCE);
        diagonal.fixed_rows_mut::<3>(6).fill(INITIAL_ACCELERATION_VARIANCE);
        self.covariance = Matrix9::from_diagonal(&diagonal);
        self.valid = true;
    }

    fn predict(&mut self, delta_time: f32) {
        let dt = delta_time;
        let identity = Matrix3::<f32>::identity();

        let mut transition = Matrix9::identity();
        transition.fixed_view_mut::<3, 3>(0, 3).copy_from(&(identity * dt));
        transition.fixed_view_mut::<3, 3>(0, 6).copy_from(&(identity * (0.5 * dt * dt)));
        transition.fixed_view_mut::<3, 3>(3, 6).copy_from(&(identity * dt));

        let mut diagonal = Vector9::zeros();
        diagonal.fixed_rows_mut::<3>(0).fill(JERK_VARIANCE * dt.powi(5) / 20.0);
        diagonal.fixed_rows_mut::<3>(3).fill(JERK_VARIANCE * dt.powi(3) / 3.0);
        diagonal.fixed_rows_mut::<3>(6).fill(JERK_VARIANCE * dt);

        self.state = transition * self.state;
        self.covariance = transition * self.covariance * transition.transpose() + Matrix9::from_diagonal(&diagonal);
    }

    /// Correct one 3-axis block of the state with a direct measurement
    fn correct(&mut self, block: usize, measurement: Vector3<f32>, variance: f32) {
        let mut observation = Matrix3x9::zeros();
        observation.fixed_view_mut::<3, 3>(0, block).fill_with_identity();

        let innovation = measurement - observation * self.state;
        let innovation_covariance =
            observation * self.covariance * observation.transpose() + Matrix3::<f32>::identity() * variance;
        let Some(inverse) = innovation_covariance.try_inverse() else {
            return;
        };
        let gain = self.covariance * observation.transpose() * inverse;

        self.state += gain * innovation;
        self.covariance = (Matrix9::identity() - gain * observation) * self.covariance;
    }

    fn update(&mut self, delta_time: f32, packet: &PoseFilterPacket, constants: &PositionConstants) {
        if self.valid {
            self.predict(delta_time);
        }

        if let Some(optical) = packet.optical_position_cm {
            let variance = constants.position_variance_curve.evaluate(packet.projection_area);
            if self.valid {
                self.correct(0, optical, variance);
            } else {
                self.initialise(optical, variance);
            }
        }

        if self.valid
            && constants.use_linear_acceleration
            && let Some(acceleration) = packet.world_linear_acceleration
        {
            let variance = constants.accelerometer_variance.max(1.0e-6) * GRAVITY_CM_PER_SEC_SQR.powi(2);
            self.correct(6, acceleration * GRAVITY_CM_PER_SEC_SQR, variance);
        }
    }

    fn position(&self) -> Vector3<f32> {
        self.state.fixed_rows::<3>(0).into_owned()
    }

    fn velocity(&self) -> Vector3<f32> {
        self.state.fixed_rows::<3>(3).into_owned()
    }

    fn acceleration(&self) -> Vector3<f32> {
        self.state.fixed_rows::<3>(6).into_owned()
    }
}

#[derive(Debug, Clone)]
struct OrientationKalman {
    orientation: UnitQuaternion<f32>,
    gyro_bias: Vector3<f32>,
    covariance: Matrix6<f32>,
    /// World-frame, bias-corrected angular velocity
    angular_velocity: Vector3<f32>,
    angular_acceleration: Vector3<f32>,
    reset_orientation: UnitQuaternion<f32>,
    valid: bool,
}

impl OrientationKalman {
    fn new() -> Self {
        Self {
            orientation: UnitQuaternion::identity(),
            gyro_bias: Vector3::zeros(),
            covariance: Self::initial_covariance(),
            angular_velocity: Vector3::zeros(),
            angular_acceleration: Vector3::zeros(),
            reset_orientation: UnitQuaternion::identity(),
            valid: false,
        }
    }

    fn initial_covariance() -> Matrix6<f32> {
        let mut diagonal = Vector6::zeros();
        diagonal.fixed_rows_mut::<3>(0).fill(INITIAL_ANGLE_VARIANCE);
        diagonal.fixed_rows_mut::<3>(3).fill(INITIAL_BIAS_VARIANCE);
        Matrix6::from_diagonal(&diagonal)
    }

    fn predict(&mut self, delta_time: f32, gyroscope: Vector3<f32>, constants: &OrientationConstants) {
        let rate = gyroscope - self.gyro_bias;
        self.orientation *= UnitQuaternion::from_scaled_axis(rate * delta_time);

        let mut transition = Matrix6::identity();
        transition
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&(Matrix3::<f32>::identity() - skew(&rate) * delta_time));
        transition
            .fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&(-Matrix3::<f32>::identity() * delta_time));

        let mut noise = Vector6::zeros();
        noise.fixed_rows_mut::<3>(0).fill(constants.gyro_variance.max(1.0e-8) * delta_time);
        noise.fixed_rows_mut::<3>(3).fill(constants.gyro_drift.max(1.0e-10) * delta_time);

        self.covariance = transition * self.covariance * transition.transpose() + Matrix6::from_diagonal(&noise);

        let angular_velocity = self.orientation * rate;
        self.angular_acceleration = (angular_velocity - self.angular_velocity) / delta_time;
        self.angular_velocity = angular_velocity;
    }

    /// Correct with an observation linear in the error state, then fold the error
    /// back into the nominal state
    fn correct(&mut self, observation: Matrix3x6<f32>, residual: Vector3<f32>, variance: f32) {
        let innovation_covariance =
            observation * self.covariance * observation.transpose() + Matrix3::<f32>::identity() * variance;
        let Some(inverse) = innovation_covariance.try_inverse() else {
            return;
        };
        let gain = self.covariance * observation.transpose() * inverse;
        let error = gain * residual;

        let angle_error: Vector3<f32> = error.fixed_rows::<3>(0).into_owned();
        let bias_error: Vector3<f32> = error.fixed_rows::<3>(3).into_owned();
        self.orientation *= UnitQuaternion::from_scaled_axis(angle_error);
        self.gyro_bias += bias_error;
        self.covariance = (Matrix6::identity() - gain * observation) * self.covariance;
    }

    /// Correct against a reference direction observed in the body frame
    fn correct_direction(&mut self, sensor: Vector3<f32>, reference: Vector3<f32>, variance: f32) {
        let expected = self.orientation.inverse() * reference;
        let mut observation = Matrix3x6::zeros();
        observation.fixed_view_mut::<3, 3>(0, 0).copy_from(&skew(&expected));
        self.correct(observation, sensor - expected, variance.max(1.0e-6));
    }

    fn update(&mut self, delta_time: f32, packet: &PoseFilterPacket, constants: &OrientationConstants) {
        if !self.valid {
            if let Some(accelerometer) = packet.accelerometer.filter(|a| a.norm() > f32::EPSILON) {
                self.orientation =
                    UnitQuaternion::rotation_between(&accelerometer, &constants.gravity_calibration_direction)
                        .unwrap_or_else(|| {
                            UnitQuaternion::from_axis_angle(&Vector3::x_axis(), core::f32::consts::PI)
                        });
                self.valid = true;
            } else if let Some(optical) = packet.optical_orientation {
                self.orientation = optical;
                self.valid = true;
            } else {
                return;
            }
        }

        if let Some(gyroscope) = packet.gyroscope {
            self.predict(delta_time, gyroscope, constants);
        }

        if let Some(accelerometer) = packet.accelerometer {
            let magnitude = accelerometer.norm();
            if (ACCEL_MAGNITUDE_MIN..=ACCEL_MAGNITUDE_MAX).contains(&magnitude) {
                self.correct_direction(
                    accelerometer / magnitude,
                    constants.gravity_calibration_direction,
                    constants.accelerometer_variance,
                );
            }
        }

        if let (Some(magnetometer), Some(reference)) =
            (packet.magnetometer, constants.magnetometer_calibration_direction)
        {
            let magnetometer = magnetometer.safe_normalize();
            if magnetometer != Vector3::zeros() {
                self.correct_direction(magnetometer, reference, constants.magnetometer_variance);
            }
        }

        if let Some(optical) = packet.optical_orientation
            && packet.projection_area > 0.0
        {
            let variance = constants.orientation_variance_curve.evaluate(packet.projection_area);
            let residual = (self.orientation.inverse() * optical).scaled_axis();
            let mut observation = Matrix3x6::zeros();
            observation.fixed_view_mut::<3, 3>(0, 0).fill_with_identity();
            self.correct(observation, residual, variance);
        }
    }
}

/// Kalman strategy for both halves of the pose
#[derive(Debug, Clone)]
pub struct KalmanPoseFilter {
    constants: PoseFilterConstants,
    position: PositionKalman,
    orientation: OrientationKalman,
}

impl KalmanPoseFilter {
    pub fn new(constants: &PoseFilterConstants) -> Self {
        Self {
            constants: *constants,
            position: PositionKalman::new(),
            orientation: OrientationKalman::new(),
        }
    }

    /// Current gyroscope bias estimate in rad/s
    pub fn gyro_bias(&self) -> Vector3<f32> {
        self.orientation.gyro_bias
    }
}

impl PoseFilter for KalmanPoseFilter {
    fn kind(&self) -> PoseFilterKind {
        PoseFilterKind::Kalman
    }

    fn update(&mut self, delta_time: f32, packet: &PoseFilterPacket) {
        self.orientation.update(delta_time, packet, &self.constants.orientation);
        self.position.update(delta_time, packet, &self.constants.position);
    }

    fn is_orientation_state_valid(&self) -> bool {
        self.orientation.valid
    }

    fn is_position_state_valid(&self) -> bool {
        self.position.valid
    }

    fn orientation(&self, time: f32) -> UnitQuaternion<f32> {
        self.orientation.reset_orientation
            * self
                .orientation
                .orientation
                .extrapolate(&self.orientation.angular_velocity, time)
    }

    fn angular_velocity_rad_per_sec(&self) -> Vector3<f32> {
        self.orientation.reset_orientation * self.orientation.angular_velocity
    }

    fn angular_acceleration_rad_per_sec_sqr(&self) -> Vector3<f32> {
        self.orientation.reset_orientation * self.orientation.angular_acceleration
    }

    fn position_cm(&self, time: f32) -> Vector3<f32> {
        let position = self.position.position();
        if time > 0.0 {
            position + self.position.velocity() * time + self.position.acceleration() * (0.5 * time * time)
        } else {
            position
        }
    }

    fn velocity_cm_per_sec(&self) -> Vector3<f32> {
        self.position.velocity()
    }

    fn acceleration_cm_per_sec_sqr(&self) -> Vector3<f32> {
        self.position.acceleration()
    }

    fn recenter_orientation(&mut self, reference: UnitQuaternion<f32>) {
        self.orientation.reset_orientation = reference * self.orientation.orientation.inverse();
    }

    fn reset_state(&mut self) {
        self.position = PositionKalman::new();
        self.orientation = OrientationKalman::new();
    }
}
