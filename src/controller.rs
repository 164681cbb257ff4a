//! Per-controller view: the device, its pose filter and its optical tracking state
//!
//! A [`ControllerView`] exclusively owns an open device together with everything
//! the fusion core keeps for it: per-tracker projection estimates, occlusion zones,
//! the triangulator's history, the sensor packet queues and the pose filter. The
//! host drives it once per tick:
//!
//! 1. [`ControllerView::update_optical_pose_estimation`] with the current trackers,
//! 2. [`ControllerView::update_state_and_predict`] to feed queued packets to the filter,
//! 3. [`ControllerView::take_unpublished_frame`] to stream the result.
//!
//! Device polling threads post inertial packets through a [`SensorPacketProducer`]
//! obtained from [`ControllerView::sensor_packet_producer`].

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use nalgebra::UnitQuaternion;
use parking_lot::RwLock;
use tracing::{debug, info, trace, warn};

use crate::calibration::PoseFilterConstants;
use crate::color::{TrackingColorAllocator, TrackingColorId};
use crate::config::TrackingConfig;
use crate::device::{ControllerDevice, DeviceState, DeviceType};
use crate::error::{FusionError, Result};
use crate::filter::{PoseFilter, PoseFilterKind, create_pose_filter};
use crate::filter_space::PoseFilterSpace;
use crate::math::clamp01;
use crate::occlusion::{OcclusionGuard, OcclusionVerdict};
use crate::packet_queue::{
    OpticalPacket, OpticalPacketSender, SensorPacketProducer, SensorPacketQueue, clamp_time_delta,
};
use crate::projection::update_tracker_estimate;
use crate::tracker::{ProjectionRequest, TrackerView};
use crate::triangulation::{MultiTrackerTriangulator, TrackerObservation};
use crate::types::{MulticamPoseEstimate, Physics, Pose, TrackerProjectionEstimate, TrackingShape};

/// Used when a device reports no usable tracking shape
const DEFAULT_SPHERE_RADIUS_CM: f32 = 2.25;
/// Speed (cm/s) at which the ROI prediction time saturates
const ROI_PREDICTION_FULL_SPEED: f32 = 30.0;
/// Longest ROI prediction time (s)
const ROI_PREDICTION_MAX_TIME: f32 = 0.1;
const LED_OFF: [u8; 3] = [0, 0, 0];

/// A pose shared between controllers or injected by the host.
///
/// Each view writes its filtered pose into its own handle every tick. Other views
/// read it as an attachment parent, and a host can supply one as an external
/// orientation source.
pub type SharedPose = Arc<RwLock<Pose>>;

/// Fresh handle holding the identity pose
pub fn new_shared_pose() -> SharedPose {
    Arc::new(RwLock::new(Pose::default()))
}

/// Where a view's pose filter is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterLifecycle {
    /// No device open
    Uninitialized,
    /// Constants loaded, no packet processed yet
    Initialized,
    /// Filter state cleared in place, no packet processed since
    Reset,
    /// At least one packet processed since the filter was built or reset
    Running,
}

/// What one call to [`ControllerView::update_state_and_predict`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    /// Packets fed to the filter
    pub processed: usize,
    /// Oldest packets discarded to respect the per-tick ceiling
    pub trimmed: usize,
    /// Packets older than one already processed, skipped
    pub out_of_order: usize,
}

/// Snapshot handed to the streaming layer once per dirty period
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PublishedFrame {
    pub controller_id: usize,
    pub pose: Pose,
    pub physics: Physics,
    pub currently_tracking: bool,
    pub tracking_color: Option<TrackingColorId>,
}

/// Owner of one controller's fusion state
pub struct ControllerView {
    controller_id: usize,
    config: TrackingConfig,
    color_allocator: Arc<TrackingColorAllocator>,
    device: Option<Box<dyn ControllerDevice>>,
    shape: Option<TrackingShape>,
    filter_space: PoseFilterSpace,
    filter: Option<Box<dyn PoseFilter>>,
    lifecycle: FilterLifecycle,
    tracker_estimates: Vec<TrackerProjectionEstimate>,
    enforce_new_roi: HashSet<usize>,
    occlusion: OcclusionGuard,
    triangulator: MultiTrackerTriangulator,
    multicam: MulticamPoseEstimate,
    packet_queue: SensorPacketQueue,
    packet_producer: SensorPacketProducer,
    optical_sender: OpticalPacketSender,
    last_filter_timestamp: Option<Instant>,
    unpublished: bool,
    tracking_listeners: usize,
    tracking_color: Option<TrackingColorId>,
    led_lit: bool,
    published_pose: SharedPose,
    external_orientation: Option<SharedPose>,
    attachment_parent: Option<SharedPose>,
}

impl ControllerView {
    /// Create a closed view. The configuration is sanitized on the way in.
    pub fn new(controller_id: usize, config: &TrackingConfig, color_allocator: Arc<TrackingColorAllocator>) -> Self {
        let config = config.sanitized();
        let packet_queue = SensorPacketQueue::new();
        let packet_producer = SensorPacketProducer::new(packet_queue.imu_sender());
        let optical_sender = packet_queue.optical_sender();

        Self {
            controller_id,
            triangulator: MultiTrackerTriangulator::new(&config),
            config,
            color_allocator,
            device: None,
            shape: None,
            filter_space: PoseFilterSpace::default(),
            filter: None,
            lifecycle: FilterLifecycle::Uninitialized,
            tracker_estimates: Vec::new(),
            enforce_new_roi: HashSet::new(),
            occlusion: OcclusionGuard::new(),
            multicam: MulticamPoseEstimate::default(),
            packet_queue,
            packet_producer,
            optical_sender,
            last_filter_timestamp: None,
            unpublished: false,
            tracking_listeners: 0,
            tracking_color: None,
            led_lit: false,
            published_pose: new_shared_pose(),
            external_orientation: None,
            attachment_parent: None,
        }
    }

    pub fn controller_id(&self) -> usize {
        self.controller_id
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    pub fn device_type(&self) -> Option<DeviceType> {
        self.device.as_ref().map(|device| device.device_type())
    }

    pub fn lifecycle(&self) -> FilterLifecycle {
        self.lifecycle
    }

    pub fn filter_kind(&self) -> Option<PoseFilterKind> {
        self.filter.as_ref().map(|filter| filter.kind())
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    /// Replace the tracking configuration; the prediction history restarts
    pub fn set_config(&mut self, config: &TrackingConfig) {
        self.config = config.sanitized();
        self.triangulator = MultiTrackerTriangulator::new(&self.config);
    }

    /// Take ownership of `device` and build its tracking state.
    ///
    /// Devices without an optical target, or not connected over a streaming
    /// transport, are held but get no pose filter and no tracking color. A view
    /// that already holds a device closes it first.
    pub fn open(&mut self, device: Box<dyn ControllerDevice>) {
        if self.device.is_some() {
            self.close();
        }

        let device_type = device.device_type();
        let tracked = is_tracked_mode(&*device);
        let discarded = self.packet_queue.discard_pending();
        self.device = Some(device);
        self.clear_optical_state();
        self.last_filter_timestamp = None;
        self.unpublished = false;

        if !tracked {
            debug!(controller_id = self.controller_id, ?device_type, "opened without tracking");
            return;
        }

        self.shape = Some(self.resolve_tracking_shape());
        self.assign_initial_tracking_color();
        if let Err(error) = self.build_pose_filter() {
            debug_assert!(false, "tracked device failed to build a pose filter: {error}");
            warn!(controller_id = self.controller_id, %error, "could not build pose filter");
        }

        info!(
            controller_id = self.controller_id,
            ?device_type,
            tracking_color = ?self.tracking_color,
            discarded,
            "controller opened"
        );
    }

    /// Release the device and everything built for it.
    ///
    /// Queued packets are dropped without waiting for producers; packets posted
    /// later are discarded on the next open.
    pub fn close(&mut self) -> Option<Box<dyn ControllerDevice>> {
        let mut device = self.device.take()?;
        if self.led_lit {
            device.set_led_color(LED_OFF);
        }
        if let Some(color) = self.tracking_color.take() {
            self.color_allocator.free(self.controller_id, color);
        }

        let discarded = self.packet_queue.discard_pending();
        self.shape = None;
        self.filter = None;
        self.filter_space = PoseFilterSpace::default();
        self.lifecycle = FilterLifecycle::Uninitialized;
        self.clear_optical_state();
        self.tracking_listeners = 0;
        self.led_lit = false;
        self.unpublished = false;
        self.last_filter_timestamp = None;

        info!(controller_id = self.controller_id, discarded, "controller closed");
        Some(device)
    }

    /// Clear the pose filter's state in place.
    ///
    /// The strategy and its constants are kept and the next packet starts the
    /// estimate over. A view without a filter yet builds one instead.
    pub fn reset_pose_filter(&mut self) -> Result<()> {
        self.tracked_device()?;
        let Some(filter) = self.filter.as_mut() else {
            return self.build_pose_filter();
        };

        filter.reset_state();
        self.lifecycle = FilterLifecycle::Reset;
        self.last_filter_timestamp = None;
        debug!(controller_id = self.controller_id, kind = ?filter.kind(), "pose filter reset");
        Ok(())
    }

    /// Build the pose filter from the device's calibration
    fn build_pose_filter(&mut self) -> Result<()> {
        let device = self.tracked_device()?;
        let device_type = device.device_type();
        let calibration = device.calibration();
        let kind = PoseFilterKind::resolve(device_type, &calibration.position_filter, &calibration.orientation_filter);
        let space = PoseFilterSpace::for_device(device_type, calibration);
        let constants = PoseFilterConstants::from_calibration(calibration, &space);

        self.filter_space = space;
        self.filter = Some(create_pose_filter(kind, &constants));
        self.lifecycle = FilterLifecycle::Initialized;
        self.last_filter_timestamp = None;
        debug!(controller_id = self.controller_id, ?kind, "pose filter built");
        Ok(())
    }

    /// Run projection, occlusion and triangulation for this tick.
    ///
    /// When the controller is being tracked an optical packet is queued for the
    /// next [`update_state_and_predict`](Self::update_state_and_predict).
    pub fn update_optical_pose_estimation(
        &mut self,
        trackers: &[&dyn TrackerView],
        now: Instant,
    ) -> Result<MulticamPoseEstimate> {
        let device = self.tracked_device()?;
        let device_type = device.device_type();
        let min_screen_projection_area = device.calibration().min_screen_projection_area;
        let shape = self
            .shape
            .unwrap_or(TrackingShape::Sphere { radius_cm: DEFAULT_SPHERE_RADIUS_CM });

        let color = self.tracking_color_id();
        if color.is_none() && self.led_lit {
            debug!(controller_id = self.controller_id, "tracking color lost, turning LED off");
            self.refresh_led();
        }
        let Some(color) = color.filter(|_| self.tracking_listeners > 0) else {
            for estimate in &mut self.tracker_estimates {
                estimate.currently_tracking = false;
            }
            self.multicam.currently_tracking = false;
            return Ok(self.multicam);
        };

        if let Some(max_id) = trackers.iter().map(|tracker| tracker.tracker_id()).max()
            && self.tracker_estimates.len() <= max_id
        {
            self.tracker_estimates.resize_with(max_id + 1, Default::default);
        }

        let roi_prediction_time = self.roi_prediction_time();
        let available_trackers = trackers.iter().filter(|tracker| tracker.is_open()).count();

        let mut was_tracking = vec![false; trackers.len()];
        let mut visible = vec![false; trackers.len()];
        for (index, tracker) in trackers.iter().enumerate() {
            let tracker_id = tracker.tracker_id();
            let estimate = &mut self.tracker_estimates[tracker_id];
            let keep_roi = estimate.currently_tracking || estimate.occluded;
            let request = ProjectionRequest {
                controller_id: self.controller_id,
                tracking_color: color,
                shape,
                previous_projection: estimate.projection.filter(|_| keep_roi),
                roi_prediction_time,
                enforce_new_roi: self.enforce_new_roi.contains(&tracker_id),
            };
            was_tracking[index] = estimate.currently_tracking;
            visible[index] = update_tracker_estimate(estimate, *tracker, &request, &self.config, now).is_visible();
        }

        // largest projections first, the guard only applies once enough have passed
        let mut by_area: Vec<usize> = (0..trackers.len()).collect();
        by_area.sort_by(|&a, &b| {
            let area = |index: usize| self.tracker_estimates[trackers[index].tracker_id()].screen_area();
            area(b).total_cmp(&area(a))
        });
        let always_pass = self.config.occluded_area_ignore_trackers as usize;
        let mut projections_passed = 0;
        for index in by_area {
            let tracker_id = trackers[index].tracker_id();
            let estimate = &mut self.tracker_estimates[tracker_id];
            let verdict = self.occlusion.evaluate(
                tracker_id,
                was_tracking[index],
                visible[index],
                estimate.projection.as_ref(),
                &self.config,
            );
            if let OcclusionVerdict::Suppressed { center, radius } = verdict
                && projections_passed >= always_pass
            {
                trace!(tracker_id, controller_id = self.controller_id, "projection suppressed by occlusion zone");
                estimate.occluded = true;
                estimate.currently_tracking = false;
                estimate.occlusion_zone_center = center;
                estimate.occlusion_zone_radius = radius;
            } else if estimate.currently_tracking {
                projections_passed += 1;
            }
        }

        let observations: Vec<TrackerObservation<'_>> = trackers
            .iter()
            .filter_map(|tracker| {
                let tracker_id = tracker.tracker_id();
                let estimate = &self.tracker_estimates[tracker_id];
                (estimate.currently_tracking && !estimate.occluded).then(|| TrackerObservation {
                    tracker_id,
                    geometry: tracker.geometry(),
                    estimate,
                })
            })
            .collect();

        let result = self.triangulator.triangulate(
            &shape,
            &observations,
            available_trackers,
            &self.multicam,
            &self.config,
            now,
        );
        self.enforce_new_roi = result.enforce_new_roi.into_iter().collect();
        self.multicam = result.estimate;

        if self.multicam.currently_tracking {
            let packet = OpticalPacket::from_multicam(device_type, &self.multicam, min_screen_projection_area, now);
            if self.optical_sender.send(packet).is_err() {
                debug!(controller_id = self.controller_id, "optical queue closed, dropping packet");
            }
        }
        Ok(self.multicam)
    }

    /// Queue inertial packets for a device poll made on the tick thread
    pub fn notify_sensor_data_received(&mut self, state: &DeviceState, now: Instant) -> usize {
        if self.filter.is_none() {
            return 0;
        }
        self.packet_producer.post(state, now)
    }

    /// Producer for a polling thread that posts inertial packets directly
    pub fn sensor_packet_producer(&self) -> SensorPacketProducer {
        SensorPacketProducer::new(self.packet_queue.imu_sender())
    }

    /// Sender for a camera thread that posts optical packets directly
    pub fn optical_packet_sender(&self) -> OpticalPacketSender {
        self.packet_queue.optical_sender()
    }

    pub fn pending_packets(&self) -> usize {
        self.packet_queue.len()
    }

    /// Feed every queued packet to the pose filter, oldest first.
    ///
    /// At most `max_packets_per_tick` of the newest packets are used. Each update
    /// sees the time since the previously processed packet, clamped.
    pub fn update_state_and_predict(&mut self) -> Result<TickReport> {
        self.tracked_device()?;
        let Some(filter) = self.filter.as_mut() else {
            return Err(FusionError::ControllerNotOpen(self.controller_id));
        };

        let drained = self.packet_queue.drain(self.config.max_packets_per_tick);
        let mut report = TickReport {
            trimmed: drained.trimmed,
            ..Default::default()
        };

        let external_orientation = self.external_orientation.as_ref().map(|source| source.read().orientation);
        let attachment_parent_pose = self.attachment_parent.as_ref().map(|parent| *parent.read());

        for packet in &drained.packets {
            let timestamp = packet.timestamp();
            if self.last_filter_timestamp.is_some_and(|last| timestamp < last) {
                report.out_of_order += 1;
                continue;
            }

            let delta_time = clamp_time_delta(self.last_filter_timestamp, timestamp);
            let mut filter_packet = self.filter_space.create_filter_packet(packet, &**filter);
            filter_packet.external_orientation = external_orientation;
            filter_packet.attachment_parent_pose = attachment_parent_pose;
            filter.update(delta_time, &filter_packet);

            self.last_filter_timestamp = Some(timestamp);
            report.processed += 1;
        }

        if report.out_of_order > 0 {
            debug!(
                controller_id = self.controller_id,
                skipped = report.out_of_order,
                "skipped packets older than the filter state"
            );
        }

        if report.processed > 0 {
            self.lifecycle = FilterLifecycle::Running;
            self.unpublished = true;
            *self.published_pose.write() = Pose::new(filter.orientation(0.0), filter.position_cm(0.0));
        }
        Ok(report)
    }

    /// Filtered pose extrapolated `time` seconds ahead
    pub fn filtered_pose(&self, time: f32) -> Result<Pose> {
        let filter = self.active_filter()?;
        Ok(Pose::new(filter.orientation(time), filter.position_cm(time)))
    }

    pub fn filtered_physics(&self) -> Result<Physics> {
        Ok(physics_of(self.active_filter()?))
    }

    /// Orientation and position state validity
    pub fn filter_state_valid(&self) -> Result<(bool, bool)> {
        let filter = self.active_filter()?;
        Ok((filter.is_orientation_state_valid(), filter.is_position_state_valid()))
    }

    /// Make the current orientation read as `reference`.
    ///
    /// `reference` is composed with the turn from the device's identity-forward yaw
    /// to the play-space forward yaw. Position and velocity state are kept.
    pub fn recenter_orientation(&mut self, reference: UnitQuaternion<f32>) -> Result<()> {
        let identity_forward_degrees = self.tracked_device()?.calibration().identity_forward_degrees;
        let alignment = PoseFilterSpace::forward_alignment(identity_forward_degrees, self.config.global_forward_degrees);
        let Some(filter) = self.filter.as_mut() else {
            return Err(FusionError::ControllerNotOpen(self.controller_id));
        };

        filter.recenter_orientation(reference * alignment);
        self.unpublished = true;
        info!(controller_id = self.controller_id, "orientation recentered");
        Ok(())
    }

    /// Add a tracking listener; the first one lights the LED
    pub fn start_tracking(&mut self) -> Result<()> {
        self.tracked_device()?;
        self.tracking_listeners += 1;
        if self.tracking_listeners == 1 {
            self.refresh_led();
            debug!(controller_id = self.controller_id, "tracking enabled");
        }
        Ok(())
    }

    /// Drop a tracking listener; the last one turns the LED off
    pub fn stop_tracking(&mut self) -> Result<()> {
        self.tracked_device()?;
        if self.tracking_listeners == 0 {
            return Err(FusionError::TrackingNotStarted(self.controller_id));
        }
        self.tracking_listeners -= 1;
        if self.tracking_listeners == 0 {
            self.refresh_led();
            self.multicam.currently_tracking = false;
            debug!(controller_id = self.controller_id, "tracking disabled");
        }
        Ok(())
    }

    pub fn is_tracking_enabled(&self) -> bool {
        self.tracking_listeners > 0
    }

    /// Tracking color this controller currently owns in the shared pool
    pub fn tracking_color_id(&self) -> Option<TrackingColorId> {
        self.tracking_color
            .filter(|color| self.color_allocator.owner_of(*color) == Some(self.controller_id))
    }

    /// Assign a tracking color, taking it from any controller that holds it.
    ///
    /// The device must accept the color first. Optical state and the pose filter
    /// are reset because the old color's observations no longer apply.
    pub fn set_tracking_color_id(&mut self, color: Option<TrackingColorId>) -> Result<()> {
        self.tracked_device()?;
        let Some(device) = self.device.as_mut() else {
            return Err(FusionError::ControllerNotOpen(self.controller_id));
        };
        let accepted = device.set_tracking_color_id(color);
        if let Some(color) = color
            && !accepted
        {
            warn!(controller_id = self.controller_id, ?color, "device rejected tracking color");
            return Err(FusionError::TrackingColorRejected(color));
        }

        if let Some(previous) = self.tracking_color.take() {
            self.color_allocator.free(self.controller_id, previous);
        }
        if let Some(color) = color {
            self.color_allocator.claim(self.controller_id, color);
        }
        self.tracking_color = color;

        self.refresh_led();
        self.clear_optical_state();
        self.reset_pose_filter()?;
        info!(controller_id = self.controller_id, tracking_color = ?color, "tracking color changed");
        Ok(())
    }

    /// How far ahead trackers should shift their search window, from the
    /// controller's speed
    pub fn roi_prediction_time(&self) -> f32 {
        self.filter.as_ref().map_or(0.0, |filter| {
            clamp01(filter.velocity_cm_per_sec().norm() / ROI_PREDICTION_FULL_SPEED) * ROI_PREDICTION_MAX_TIME
        })
    }

    /// Latest multi-tracker estimate
    pub fn multicam_estimate(&self) -> &MulticamPoseEstimate {
        &self.multicam
    }

    pub fn tracker_estimate(&self, tracker_id: usize) -> Option<&TrackerProjectionEstimate> {
        self.tracker_estimates.get(tracker_id)
    }

    /// Handle other views can read this controller's pose from
    pub fn shared_pose(&self) -> SharedPose {
        Arc::clone(&self.published_pose)
    }

    /// Orientation source for the `External` orientation strategy
    pub fn set_external_orientation_source(&mut self, source: Option<SharedPose>) {
        self.external_orientation = source;
    }

    /// Parent pose for the `ExternalAttachment` position strategy
    pub fn set_attachment_parent(&mut self, parent: Option<SharedPose>) {
        self.attachment_parent = parent;
    }

    /// Snapshot for the streaming layer if anything changed since the last call
    pub fn take_unpublished_frame(&mut self) -> Option<PublishedFrame> {
        if !self.unpublished {
            return None;
        }
        let filter = self.filter.as_deref()?;
        let frame = PublishedFrame {
            controller_id: self.controller_id,
            pose: Pose::new(filter.orientation(0.0), filter.position_cm(0.0)),
            physics: physics_of(filter),
            currently_tracking: self.multicam.currently_tracking,
            tracking_color: self.tracking_color_id(),
        };
        self.unpublished = false;
        Some(frame)
    }

    fn tracked_device(&self) -> Result<&dyn ControllerDevice> {
        let device = self
            .device
            .as_deref()
            .ok_or(FusionError::ControllerNotOpen(self.controller_id))?;
        let device_type = device.device_type();
        if !device_type.is_tracked() {
            return Err(FusionError::UntrackedDevice(device_type));
        }
        if !is_tracked_mode(device) {
            return Err(FusionError::NotStreaming(self.controller_id));
        }
        Ok(device)
    }

    fn active_filter(&self) -> Result<&dyn PoseFilter> {
        self.tracked_device()?;
        self.filter
            .as_deref()
            .ok_or(FusionError::ControllerNotOpen(self.controller_id))
    }

    fn resolve_tracking_shape(&self) -> TrackingShape {
        let shape = self.device.as_ref().and_then(|device| device.tracking_shape());
        match shape {
            Some(shape) if shape.is_valid() => shape,
            _ => {
                warn!(
                    controller_id = self.controller_id,
                    radius_cm = DEFAULT_SPHERE_RADIUS_CM,
                    "missing or invalid tracking shape, using default sphere"
                );
                TrackingShape::Sphere { radius_cm: DEFAULT_SPHERE_RADIUS_CM }
            }
        }
    }

    /// Keep the device's configured color unless another controller owns it,
    /// otherwise allocate one from the pool
    fn assign_initial_tracking_color(&mut self) {
        let Some(device) = self.device.as_mut() else {
            return;
        };
        let controller_id = self.controller_id;

        let configured = device.tracking_color_id().filter(|color| {
            self.color_allocator
                .owner_of(*color)
                .is_none_or(|owner| owner == controller_id)
        });
        if let Some(color) = configured {
            self.color_allocator.claim(controller_id, color);
            self.tracking_color = Some(color);
            return;
        }

        self.tracking_color = match self.color_allocator.allocate(controller_id) {
            Ok(color) if device.set_tracking_color_id(Some(color)) => Some(color),
            Ok(color) => {
                warn!(controller_id, ?color, "device rejected allocated tracking color");
                self.color_allocator.free(controller_id, color);
                None
            }
            Err(_) => None,
        };
    }

    fn refresh_led(&mut self) {
        let rgb = if self.tracking_listeners > 0 {
            self.tracking_color_id().and_then(TrackingColorId::led_rgb)
        } else {
            None
        };
        if let Some(device) = self.device.as_mut() {
            device.set_led_color(rgb.unwrap_or(LED_OFF));
        }
        self.led_lit = rgb.is_some();
    }

    fn clear_optical_state(&mut self) {
        self.tracker_estimates.clear();
        self.enforce_new_roi.clear();
        self.occlusion.clear();
        self.triangulator.reset();
        self.multicam = MulticamPoseEstimate::default();
    }
}

impl Drop for ControllerView {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ControllerView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerView")
            .field("controller_id", &self.controller_id)
            .field("device_type", &self.device_type())
            .field("lifecycle", &self.lifecycle)
            .field("tracking_color", &self.tracking_color)
            .field("tracking_listeners", &self.tracking_listeners)
            .field("multicam", &self.multicam)
            .finish_non_exhaustive()
    }
}

/// Bluetooth devices stream tracking data; virtual controllers need no transport
fn is_tracked_mode(device: &dyn ControllerDevice) -> bool {
    let device_type = device.device_type();
    device_type.is_tracked() && (device.is_bluetooth() || device_type == DeviceType::Virtual)
}

fn physics_of(filter: &dyn PoseFilter) -> Physics {
    Physics {
        linear_velocity_cm_per_sec: filter.velocity_cm_per_sec(),
        linear_acceleration_cm_per_sec_sqr: filter.acceleration_cm_per_sec_sqr(),
        angular_velocity_rad_per_sec: filter.angular_velocity_rad_per_sec(),
        angular_acceleration_rad_per_sec_sqr: filter.angular_acceleration_rad_per_sec_sqr(),
    }
}
