//! Position strategies of the compound pose filter

use nalgebra::Vector3;

use super::PositionFilterKind;
use crate::calibration::PositionConstants;
use crate::filter_space::PoseFilterPacket;
use crate::math::{GRAVITY_CM_PER_SEC_SQR, Vector3Ext, clamp01};

/// Smoothing time constant applied to the least trusted optical samples (s)
const MAX_OPTICAL_SMOOTHING_TIME: f32 = 0.1;

/// Time constant of the fixed exponential smoother (s)
const EXPONENTIAL_TIME_CONSTANT: f32 = 0.05;

/// Share of an optical correction fed back into the inertial velocity
const VELOCITY_CORRECTION_GAIN: f32 = 0.5;

#[derive(Debug, Clone, Copy)]
struct PositionState {
    position_cm: Vector3<f32>,
    velocity_cm_per_sec: Vector3<f32>,
    acceleration_cm_per_sec_sqr: Vector3<f32>,
    /// Seconds accumulated since the last optical sample
    time_since_optical: f32,
    /// Scalar position variance of the inertial prediction (cm²)
    predicted_variance: f32,
    valid: bool,
}

impl Default for PositionState {
    fn default() -> Self {
        Self {
            position_cm: Vector3::zeros(),
            velocity_cm_per_sec: Vector3::zeros(),
            acceleration_cm_per_sec_sqr: Vector3::zeros(),
            time_since_optical: 0.0,
            predicted_variance: 0.0,
            valid: false,
        }
    }
}

impl PositionState {
    /// Move to `position_cm`, deriving velocity and acceleration over `delta_time`
    fn move_to(&mut self, position_cm: Vector3<f32>, delta_time: f32) {
        if self.valid && delta_time > 0.0 {
            let velocity = (position_cm - self.position_cm) / delta_time;
            self.acceleration_cm_per_sec_sqr = (velocity - self.velocity_cm_per_sec) / delta_time;
            self.velocity_cm_per_sec = velocity;
        }
        self.position_cm = position_cm;
        self.valid = true;
    }
}

/// One position strategy with its state
#[derive(Debug, Clone)]
pub struct PositionFilter {
    kind: PositionFilterKind,
    constants: PositionConstants,
    state: PositionState,
}

impl PositionFilter {
    pub fn new(kind: PositionFilterKind, constants: PositionConstants) -> Self {
        Self {
            kind,
            constants,
            state: PositionState::default(),
        }
    }

    pub fn kind(&self) -> PositionFilterKind {
        self.kind
    }

    pub fn is_valid(&self) -> bool {
        self.state.valid
    }

    pub fn update(&mut self, delta_time: f32, packet: &PoseFilterPacket) {
        self.state.time_since_optical += delta_time;

        match self.kind {
            PositionFilterKind::PassThrough => {
                if let Some(optical) = packet.optical_position_cm {
                    let elapsed = self.take_optical_interval();
                    self.state.move_to(optical, elapsed);
                }
            }
            PositionFilterKind::LowPassOptical => {
                if let Some(optical) = packet.optical_position_cm {
                    let elapsed = self.take_optical_interval();
                    let alpha = self.variance_weighted_alpha(packet.projection_area, elapsed);
                    self.blend_toward(optical, alpha, elapsed);
                }
            }
            PositionFilterKind::LowPassExponential => {
                if let Some(optical) = packet.optical_position_cm {
                    let elapsed = self.take_optical_interval();
                    let alpha = 1.0 - (-elapsed / EXPONENTIAL_TIME_CONSTANT).exp();
                    self.blend_toward(optical, alpha, elapsed);
                }
            }
            PositionFilterKind::LowPassImu => {
                self.integrate_inertial(delta_time, packet);
                if let Some(optical) = packet.optical_position_cm {
                    let elapsed = self.take_optical_interval();
                    let alpha = self.variance_weighted_alpha(packet.projection_area, elapsed);
                    self.correct_inertial(optical, alpha, elapsed);
                }
            }
            PositionFilterKind::ComplementaryOpticalImu => {
                if self.integrate_inertial(delta_time, packet) {
                    self.state.predicted_variance += self.constants.accelerometer_variance.max(1.0e-6) * delta_time;
                }
                if let Some(optical) = packet.optical_position_cm {
                    let elapsed = self.take_optical_interval();
                    let optical_variance = self.constants.position_variance_curve.evaluate(packet.projection_area);
                    if self.state.valid {
                        let predicted = self.state.predicted_variance;
                        let gain = predicted / (predicted + optical_variance);
                        self.correct_inertial(optical, gain, elapsed);
                        self.state.predicted_variance = (1.0 - gain) * predicted;
                    } else {
                        self.state.move_to(optical, elapsed);
                        self.state.predicted_variance = optical_variance;
                    }
                }
            }
            PositionFilterKind::ExternalAttachment => {
                if let Some(parent) = packet.attachment_parent_pose {
                    let position = parent.position_cm + parent.orientation * self.constants.attachment_offset_cm;
                    self.state.move_to(position, delta_time);
                }
            }
        }
    }

    fn take_optical_interval(&mut self) -> f32 {
        let elapsed = self.state.time_since_optical;
        self.state.time_since_optical = 0.0;
        elapsed
    }

    /// Blend factor for an optical sample; close projections are followed tightly
    fn variance_weighted_alpha(&self, projection_area: f32, elapsed: f32) -> f32 {
        let curve = &self.constants.position_variance_curve;
        let time_constant = MAX_OPTICAL_SMOOTHING_TIME * clamp01(curve.evaluate(projection_area) / curve.max_value);
        if time_constant <= f32::EPSILON {
            1.0
        } else {
            clamp01(elapsed / (elapsed + time_constant))
        }
    }

    fn blend_toward(&mut self, optical: Vector3<f32>, alpha: f32, elapsed: f32) {
        if !self.state.valid {
            self.state.move_to(optical, elapsed);
            return;
        }
        let blended = self.state.position_cm + (optical - self.state.position_cm) * alpha;
        self.state.move_to(blended, elapsed);
    }

    /// Dead-reckon one inertial packet. Returns false when nothing was integrated.
    fn integrate_inertial(&mut self, delta_time: f32, packet: &PoseFilterPacket) -> bool {
        if !self.state.valid || !self.constants.use_linear_acceleration {
            return false;
        }
        let Some(mut acceleration) = packet.world_linear_acceleration else {
            return false;
        };

        if self.constants.apply_gravity_mask {
            let up = self.constants.gravity_calibration_direction.safe_normalize();
            acceleration -= up * acceleration.dot(&up);
        }
        if acceleration.norm() < self.constants.accelerometer_noise_radius {
            acceleration = Vector3::zeros();
        }

        let acceleration_cm = acceleration * GRAVITY_CM_PER_SEC_SQR;
        let mut velocity = self.state.velocity_cm_per_sec + acceleration_cm * delta_time;
        let speed = velocity.norm();
        if self.constants.max_velocity > 0.0 && speed > self.constants.max_velocity {
            velocity *= self.constants.max_velocity / speed;
        }

        self.state.position_cm += (self.state.velocity_cm_per_sec + velocity) * 0.5 * delta_time;
        self.state.velocity_cm_per_sec = velocity;
        self.state.acceleration_cm_per_sec_sqr = acceleration_cm;
        true
    }

    /// Pull the inertial estimate toward an optical sample
    fn correct_inertial(&mut self, optical: Vector3<f32>, gain: f32, elapsed: f32) {
        if !self.state.valid {
            self.state.move_to(optical, elapsed);
            return;
        }
        let correction = (optical - self.state.position_cm) * clamp01(gain);
        self.state.position_cm += correction;
        if elapsed > 0.0 {
            self.state.velocity_cm_per_sec += correction * (VELOCITY_CORRECTION_GAIN / elapsed);
        }
    }

    /// Position extrapolated `time` seconds ahead
    pub fn position_cm(&self, time: f32) -> Vector3<f32> {
        if time > 0.0 {
            self.state.position_cm + self.state.velocity_cm_per_sec * time
        } else {
            self.state.position_cm
        }
    }

    pub fn velocity(&self) -> Vector3<f32> {
        self.state.velocity_cm_per_sec
    }

    pub fn acceleration(&self) -> Vector3<f32> {
        self.state.acceleration_cm_per_sec_sqr
    }

    pub fn reset(&mut self) {
        self.state = PositionState::default();
    }
}
