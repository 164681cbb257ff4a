//! Gyroscope bias tracking for variable-rate sensors

use nalgebra::Vector3;

use crate::math::DEG_TO_RAD;

/// Bias tracker tuning
///
/// # Example
/// ```
/// use controller_fusion::offset::{GyroOffset, GyroOffsetSettings};
///
/// let settings = GyroOffsetSettings {
///     timeout_seconds: 2.0,
///     ..Default::default()
/// };
/// let offset = GyroOffset::new(settings);
/// assert!(!offset.is_active());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GyroOffsetSettings {
    /// Low-pass cutoff used while estimating the bias (Hz)
    pub cutoff_frequency: f32,
    /// Time the device must stay still before estimation starts (s)
    pub timeout_seconds: f32,
    /// Angular rate above which the device counts as moving (rad/s)
    pub threshold_rad_per_sec: f32,
}

impl Default for GyroOffsetSettings {
    fn default() -> Self {
        Self {
            cutoff_frequency: 0.02,
            timeout_seconds: 5.0,
            threshold_rad_per_sec: 3.0 * DEG_TO_RAD,
        }
    }
}

/// Runtime gyroscope bias estimate.
///
/// The bias is only learned while the corrected rate stays under the motion
/// threshold for the whole timeout. Samples arrive at an irregular rate, so the
/// filter coefficient and the stationary timer are driven by each sample's delta time.
#[derive(Debug, Clone, Copy)]
pub struct GyroOffset {
    settings: GyroOffsetSettings,
    /// Seconds spent below the motion threshold
    stationary_time: f32,
    /// Estimated bias in rad/s
    gyroscope_offset: Vector3<f32>,
}

impl GyroOffset {
    pub fn new(settings: GyroOffsetSettings) -> Self {
        Self {
            settings,
            stationary_time: 0.0,
            gyroscope_offset: Vector3::zeros(),
        }
    }

    /// Correct one gyroscope sample and refine the bias estimate
    ///
    /// # Arguments
    /// * `gyroscope` - Angular rate in rad/s
    /// * `delta_time` - Seconds since the previous sample
    ///
    /// # Returns
    /// Bias-corrected angular rate
    pub fn update(&mut self, gyroscope: Vector3<f32>, delta_time: f32) -> Vector3<f32> {
        let corrected = gyroscope - self.gyroscope_offset;

        if corrected.amax() > self.settings.threshold_rad_per_sec {
            self.stationary_time = 0.0;
            return corrected;
        }

        if self.stationary_time < self.settings.timeout_seconds {
            self.stationary_time += delta_time;
            return corrected;
        }

        let coefficient =
            (2.0 * core::f32::consts::PI * self.settings.cutoff_frequency * delta_time).min(1.0);
        self.gyroscope_offset += corrected * coefficient;

        corrected
    }

    /// Current bias estimate in rad/s
    pub fn offset(&self) -> Vector3<f32> {
        self.gyroscope_offset
    }

    pub fn reset(&mut self) {
        self.stationary_time = 0.0;
        self.gyroscope_offset = Vector3::zeros();
    }

    /// True once the stationary timeout has elapsed and the bias is being learned
    pub fn is_active(&self) -> bool {
        self.stationary_time >= self.settings.timeout_seconds
    }
}

impl Default for GyroOffset {
    fn default() -> Self {
        Self::new(GyroOffsetSettings::default())
    }
}
