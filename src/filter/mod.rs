//! Pose filter family
//!
//! A pose filter turns the time-ordered stream of filter-space packets into an
//! orientation and position that can be queried at any extrapolation time. The
//! strategy is chosen once, when the controller is opened, from the device type and
//! the configured filter names; it never changes mid-session.

mod kalman;
mod orientation;
mod position;

use core::fmt;

use nalgebra::{UnitQuaternion, Vector3};
use tracing::{debug, warn};

use crate::calibration::PoseFilterConstants;
use crate::device::DeviceType;
use crate::filter_space::PoseFilterPacket;

pub use kalman::KalmanPoseFilter;
pub use orientation::OrientationFilter;
pub use position::PositionFilter;

/// Contract shared by every pose filter strategy.
///
/// `update` receives packets in non-decreasing timestamp order with a delta time
/// already clamped by the caller. Accessors never run the correction step; they
/// extrapolate the current state forward by `time` seconds.
pub trait PoseFilter: Send + fmt::Debug {
    fn kind(&self) -> PoseFilterKind;

    /// Fold one packet into the estimate
    fn update(&mut self, delta_time: f32, packet: &PoseFilterPacket);

    fn is_orientation_state_valid(&self) -> bool;

    fn is_position_state_valid(&self) -> bool;

    /// Orientation extrapolated `time` seconds ahead
    fn orientation(&self, time: f32) -> UnitQuaternion<f32>;

    /// World-frame angular velocity
    fn angular_velocity_rad_per_sec(&self) -> Vector3<f32>;

    fn angular_acceleration_rad_per_sec_sqr(&self) -> Vector3<f32>;

    /// Position extrapolated `time` seconds ahead
    fn position_cm(&self, time: f32) -> Vector3<f32>;

    fn velocity_cm_per_sec(&self) -> Vector3<f32>;

    fn acceleration_cm_per_sec_sqr(&self) -> Vector3<f32>;

    /// Rebase the orientation so the current pose reads as `reference`.
    ///
    /// Position, velocity and the filter's internal dynamics are untouched.
    fn recenter_orientation(&mut self, reference: UnitQuaternion<f32>);

    /// Discard all state and history, as if freshly built from its constants
    fn reset_state(&mut self);
}

/// Orientation strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrientationFilterKind {
    /// Copies the optical orientation
    PassThrough,
    /// Gradient-descent fusion of gyroscope and accelerometer
    MadgwickArg,
    /// Gradient-descent fusion of gyroscope, accelerometer and magnetometer
    MadgwickMarg,
    /// Gyroscope integration with accelerometer feedback
    ComplementaryArg,
    /// Gyroscope integration with accelerometer and magnetometer feedback
    ComplementaryMarg,
    /// Gyroscope integration with accelerometer feedback and optical yaw correction
    ComplementaryOpticalArg,
    /// Orientation injected from another subsystem
    External,
}

impl OrientationFilterKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "PassThru" => Some(Self::PassThrough),
            "MadgwickARG" => Some(Self::MadgwickArg),
            "MadgwickMARG" => Some(Self::MadgwickMarg),
            "ComplementaryARG" => Some(Self::ComplementaryArg),
            "ComplementaryMARG" => Some(Self::ComplementaryMarg),
            "ComplementaryOpticalARG" => Some(Self::ComplementaryOpticalArg),
            "OrientationExternal" => Some(Self::External),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::PassThrough => "PassThru",
            Self::MadgwickArg => "MadgwickARG",
            Self::MadgwickMarg => "MadgwickMARG",
            Self::ComplementaryArg => "ComplementaryARG",
            Self::ComplementaryMarg => "ComplementaryMARG",
            Self::ComplementaryOpticalArg => "ComplementaryOpticalARG",
            Self::External => "OrientationExternal",
        }
    }
}

/// Position strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PositionFilterKind {
    /// Copies the optical position
    PassThrough,
    /// Variance-weighted smoothing of optical positions
    LowPassOptical,
    /// Inertial dead reckoning pulled toward optical positions
    LowPassImu,
    /// Fixed time-constant exponential smoothing of optical positions
    LowPassExponential,
    /// Inertial prediction corrected by variance-weighted optical updates
    ComplementaryOpticalImu,
    /// Rigidly attached to a parent controller
    ExternalAttachment,
}

impl PositionFilterKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "PassThru" => Some(Self::PassThrough),
            "LowPassOptical" => Some(Self::LowPassOptical),
            "LowPassIMU" => Some(Self::LowPassImu),
            "LowPassExponential" => Some(Self::LowPassExponential),
            "ComplementaryOpticalIMU" => Some(Self::ComplementaryOpticalImu),
            "PositionExternalAttachment" => Some(Self::ExternalAttachment),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::PassThrough => "PassThru",
            Self::LowPassOptical => "LowPassOptical",
            Self::LowPassImu => "LowPassIMU",
            Self::LowPassExponential => "LowPassExponential",
            Self::ComplementaryOpticalImu => "ComplementaryOpticalIMU",
            Self::ExternalAttachment => "PositionExternalAttachment",
        }
    }
}

/// The strategy a controller's pose filter runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoseFilterKind {
    /// Independent orientation and position strategies
    Compound {
        position: PositionFilterKind,
        orientation: OrientationFilterKind,
    },
    /// Joint state-space estimator
    Kalman,
}

fn is_kalman_position_name(name: &str) -> bool {
    matches!(name, "PoseKalman" | "PositionKalman")
}

fn is_kalman_orientation_name(name: &str) -> bool {
    matches!(name, "PoseKalman" | "OrientationKalman")
}

impl PoseFilterKind {
    /// Strategy used when configuration names nothing usable
    ///
    /// # Example
    /// ```
    /// use controller_fusion::DeviceType;
    /// use controller_fusion::filter::{OrientationFilterKind, PoseFilterKind, PositionFilterKind};
    ///
    /// assert_eq!(
    ///     PoseFilterKind::default_for(DeviceType::Wand),
    ///     PoseFilterKind::Compound {
    ///         position: PositionFilterKind::LowPassOptical,
    ///         orientation: OrientationFilterKind::ComplementaryMarg,
    ///     }
    /// );
    /// ```
    pub fn default_for(device_type: DeviceType) -> Self {
        let (position, orientation) = Self::default_parts(device_type);
        Self::Compound { position, orientation }
    }

    fn default_parts(device_type: DeviceType) -> (PositionFilterKind, OrientationFilterKind) {
        match device_type {
            DeviceType::Wand => (PositionFilterKind::LowPassOptical, OrientationFilterKind::ComplementaryMarg),
            DeviceType::Gamepad => (
                PositionFilterKind::ComplementaryOpticalImu,
                OrientationFilterKind::ComplementaryOpticalArg,
            ),
            DeviceType::Virtual => (PositionFilterKind::LowPassOptical, OrientationFilterKind::External),
            DeviceType::Navigator => {
                debug_assert!(false, "navigator devices have no pose filter");
                (PositionFilterKind::PassThrough, OrientationFilterKind::PassThrough)
            }
        }
    }

    /// Pick the strategy for a device from its configured filter names.
    ///
    /// Kalman is used only when both names request it. Unknown names, a lone Kalman
    /// name, or an orientation strategy a virtual controller cannot feed fall back to
    /// the device default with a warning. Empty names select the default silently.
    pub fn resolve(device_type: DeviceType, position_name: &str, orientation_name: &str) -> Self {
        let (default_position, default_orientation) = Self::default_parts(device_type);

        let kalman_position = is_kalman_position_name(position_name);
        let kalman_orientation = is_kalman_orientation_name(orientation_name);
        if kalman_position && kalman_orientation {
            return Self::Kalman;
        }

        let position = if kalman_position {
            warn!(
                position_name,
                orientation_name,
                fallback = default_position.name(),
                "Kalman position filter needs a Kalman orientation filter, using default"
            );
            default_position
        } else {
            Self::resolve_name(position_name, PositionFilterKind::from_name, default_position, default_position.name())
        };

        let mut orientation = if kalman_orientation {
            warn!(
                position_name,
                orientation_name,
                fallback = default_orientation.name(),
                "Kalman orientation filter needs a Kalman position filter, using default"
            );
            default_orientation
        } else {
            Self::resolve_name(
                orientation_name,
                OrientationFilterKind::from_name,
                default_orientation,
                default_orientation.name(),
            )
        };

        if device_type == DeviceType::Virtual && orientation != OrientationFilterKind::External {
            warn!(
                orientation = orientation.name(),
                "virtual controllers have no inertial sensors, using external orientation"
            );
            orientation = OrientationFilterKind::External;
        }

        Self::Compound { position, orientation }
    }

    fn resolve_name<K>(name: &str, parse: fn(&str) -> Option<K>, default: K, default_name: &'static str) -> K {
        if name.is_empty() {
            debug!(fallback = default_name, "no filter configured, using device default");
            return default;
        }
        parse(name).unwrap_or_else(|| {
            warn!(name, fallback = default_name, "unknown pose filter name, using device default");
            default
        })
    }
}

/// Build a filter for `kind` from the device constants
pub fn create_pose_filter(kind: PoseFilterKind, constants: &PoseFilterConstants) -> Box<dyn PoseFilter> {
    match kind {
        PoseFilterKind::Kalman => Box::new(KalmanPoseFilter::new(constants)),
        PoseFilterKind::Compound { position, orientation } => Box::new(CompoundPoseFilter {
            orientation: OrientationFilter::new(orientation, constants.orientation),
            position: PositionFilter::new(position, constants.position),
        }),
    }
}

/// Orientation and position strategies run side by side.
///
/// The orientation half is updated first so the position half sees the packet's
/// world-space acceleration under the newest orientation.
#[derive(Debug, Clone)]
pub struct CompoundPoseFilter {
    orientation: OrientationFilter,
    position: PositionFilter,
}

impl PoseFilter for CompoundPoseFilter {
    fn kind(&self) -> PoseFilterKind {
        PoseFilterKind::Compound {
            position: self.position.kind(),
            orientation: self.orientation.kind(),
        }
    }

    fn update(&mut self, delta_time: f32, packet: &PoseFilterPacket) {
        self.orientation.update(delta_time, packet);
        self.position.update(delta_time, packet);
    }

    fn is_orientation_state_valid(&self) -> bool {
        self.orientation.is_valid()
    }

    fn is_position_state_valid(&self) -> bool {
        self.position.is_valid()
    }

    fn orientation(&self, time: f32) -> UnitQuaternion<f32> {
        self.orientation.orientation(time)
    }

    fn angular_velocity_rad_per_sec(&self) -> Vector3<f32> {
        self.orientation.angular_velocity()
    }

    fn angular_acceleration_rad_per_sec_sqr(&self) -> Vector3<f32> {
        self.orientation.angular_acceleration()
    }

    fn position_cm(&self, time: f32) -> Vector3<f32> {
        self.position.position_cm(time)
    }

    fn velocity_cm_per_sec(&self) -> Vector3<f32> {
        self.position.velocity()
    }

    fn acceleration_cm_per_sec_sqr(&self) -> Vector3<f32> {
        self.position.acceleration()
    }

    fn recenter_orientation(&mut self, reference: UnitQuaternion<f32>) {
        self.orientation.recenter(reference);
    }

    fn reset_state(&mut self) {
        self.orientation.reset();
        self.position.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for kind in [
            OrientationFilterKind::PassThrough,
            OrientationFilterKind::MadgwickArg,
            OrientationFilterKind::MadgwickMarg,
            OrientationFilterKind::ComplementaryArg,
            OrientationFilterKind::ComplementaryMarg,
            OrientationFilterKind::ComplementaryOpticalArg,
            OrientationFilterKind::External,
        ] {
            assert_eq!(OrientationFilterKind::from_name(kind.name()), Some(kind));
        }
        for kind in [
            PositionFilterKind::PassThrough,
            PositionFilterKind::LowPassOptical,
            PositionFilterKind::LowPassImu,
            PositionFilterKind::LowPassExponential,
            PositionFilterKind::ComplementaryOpticalImu,
            PositionFilterKind::ExternalAttachment,
        ] {
            assert_eq!(PositionFilterKind::from_name(kind.name()), Some(kind));
        }
    }

    #[test]
    fn test_unknown_names_fall_back_per_device() {
        assert_eq!(
            PoseFilterKind::resolve(DeviceType::Wand, "Bogus", "AlsoBogus"),
            PoseFilterKind::default_for(DeviceType::Wand)
        );
        assert_eq!(
            PoseFilterKind::resolve(DeviceType::Gamepad, "", ""),
            PoseFilterKind::default_for(DeviceType::Gamepad)
        );
        assert_eq!(
            PoseFilterKind::resolve(DeviceType::Wand, "PassThru", "nonsense"),
            PoseFilterKind::Compound {
                position: PositionFilterKind::PassThrough,
                orientation: OrientationFilterKind::ComplementaryMarg,
            }
        );
    }

    #[test]
    fn test_kalman_requires_both_halves() {
        assert_eq!(PoseFilterKind::resolve(DeviceType::Wand, "PoseKalman", "PoseKalman"), PoseFilterKind::Kalman);
        assert_eq!(
            PoseFilterKind::resolve(DeviceType::Gamepad, "PositionKalman", "OrientationKalman"),
            PoseFilterKind::Kalman
        );
        assert_eq!(
            PoseFilterKind::resolve(DeviceType::Wand, "PositionKalman", "MadgwickARG"),
            PoseFilterKind::Compound {
                position: PositionFilterKind::LowPassOptical,
                orientation: OrientationFilterKind::MadgwickArg,
            }
        );
    }

    #[test]
    fn test_virtual_orientation_is_forced_external() {
        assert_eq!(
            PoseFilterKind::resolve(DeviceType::Virtual, "PassThru", "MadgwickMARG"),
            PoseFilterKind::Compound {
                position: PositionFilterKind::PassThrough,
                orientation: OrientationFilterKind::External,
            }
        );
    }

    #[test]
    fn test_factory_builds_requested_kind() {
        let constants = PoseFilterConstants::default();
        for kind in [PoseFilterKind::Kalman, PoseFilterKind::default_for(DeviceType::Gamepad)] {
            let filter = create_pose_filter(kind, &constants);
            assert_eq!(filter.kind(), kind);
            assert!(!filter.is_orientation_state_valid());
            assert!(!filter.is_position_state_valid());
        }
    }
}
