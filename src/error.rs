//! Error type for the fallible controller operations

use thiserror::Error;

use crate::color::TrackingColorId;
use crate::device::DeviceType;

/// Failures surfaced to the host service.
///
/// Runtime tracking problems (lost projections, outlier pairs, queue overload) are
/// recovered in place and logged instead of being reported here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FusionError {
    #[error("controller {0} is not open")]
    ControllerNotOpen(usize),

    #[error("device type {0:?} has no optical target and no pose filter")]
    UntrackedDevice(DeviceType),

    #[error("controller {0} is not connected over a transport that streams tracking data")]
    NotStreaming(usize),

    #[error("no tracking color is available for controller {0}")]
    TrackingColorsExhausted(usize),

    #[error("device rejected tracking color {0:?}")]
    TrackingColorRejected(TrackingColorId),

    #[error("stop_tracking called on controller {0} without a matching start_tracking")]
    TrackingNotStarted(usize),
}

pub type Result<T> = core::result::Result<T, FusionError>;
