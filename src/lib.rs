//! Controller Fusion - optical and inertial pose fusion for camera-tracked motion controllers
//!
//! This library turns what cameras see of a controller's glowing target, together
//! with the controller's accelerometer, gyroscope and magnetometer samples, into one
//! continuously queryable 6-DOF pose per controller.
//!
//! # Pipeline
//!
//! - [`projection`] reconstructs a tracker-relative pose from each camera's 2D
//!   projection (sphere range-from-size or an iterative light-bar solve)
//! - [`occlusion`] suppresses noisy re-detections near where a controller was lost
//! - [`triangulation`] fuses every tracker pair into one world-space estimate with
//!   outlier rejection, latency prediction and smoothing
//! - [`packet_queue`] merges inertial and optical packets in timestamp order across
//!   producer threads
//! - [`filter`] holds the pluggable pose filters (pass-through, low-pass,
//!   complementary, Madgwick and Kalman strategies)
//! - [`controller`] owns one device and drives all of the above once per tick
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use controller_fusion::{ControllerView, FilterLifecycle, TrackingColorAllocator, TrackingConfig};
//!
//! // One color pool shared by every controller
//! let colors = Arc::new(TrackingColorAllocator::new());
//! let config = TrackingConfig {
//!     ignore_pose_from_one_tracker: false,
//!     ..Default::default()
//! };
//! let view = ControllerView::new(0, &config, colors);
//!
//! // Per tick, after `open` and `start_tracking`:
//! //   view.update_optical_pose_estimation(&trackers, now)?;
//! //   view.update_state_and_predict()?;
//! //   let pose = view.filtered_pose(0.0)?;
//! assert!(!view.is_open());
//! assert_eq!(view.lifecycle(), FilterLifecycle::Uninitialized);
//! ```
//!
//! The crate logs through [`tracing`] and never installs a subscriber.

pub mod calibration;
pub mod color;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod filter;
pub mod filter_space;
pub mod math;
pub mod occlusion;
pub mod offset;
pub mod packet_queue;
pub mod projection;
pub mod tracker;
pub mod triangulation;
pub mod types;

// Re-export the types most hosts need
pub use calibration::{PoseFilterConstants, VarianceCurve};
pub use color::{TrackingColorAllocator, TrackingColorId};
pub use config::TrackingConfig;
pub use controller::{ControllerView, FilterLifecycle, PublishedFrame, SharedPose, TickReport, new_shared_pose};
pub use device::{ControllerDevice, DeviceCalibration, DeviceState, DeviceType, ImuFrame, SensorReading};
pub use error::{FusionError, Result};
pub use filter::{PoseFilter, PoseFilterKind, create_pose_filter};
pub use math::{DEG_TO_RAD, QuaternionExt, RAD_TO_DEG, Vector3Ext};
pub use tracker::{ProjectionRequest, TrackerGeometry, TrackerIntrinsics, TrackerView};
pub use types::*;
