//! Mock device and tracker shared by the scenario tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Instant;

use controller_fusion::{
    ControllerDevice, DeviceCalibration, DeviceType, Pose, ProjectionRequest, TrackerGeometry, TrackerIntrinsics,
    TrackerView, TrackingColorId, TrackingProjection, TrackingShape,
};
use nalgebra::{Point2, UnitQuaternion, Vector3};
use parking_lot::Mutex;

pub const SPHERE_RADIUS_CM: f32 = 2.25;

pub struct MockDevice {
    pub device_type: DeviceType,
    pub calibration: DeviceCalibration,
    pub color: Option<TrackingColorId>,
    pub led: Arc<Mutex<[u8; 3]>>,
}

impl MockDevice {
    pub fn new(device_type: DeviceType) -> Self {
        Self {
            device_type,
            calibration: DeviceCalibration::default(),
            color: None,
            led: Arc::new(Mutex::new([0, 0, 0])),
        }
    }

    pub fn with_calibration(device_type: DeviceType, calibration: DeviceCalibration) -> Self {
        Self { calibration, ..Self::new(device_type) }
    }
}

impl ControllerDevice for MockDevice {
    fn device_type(&self) -> DeviceType {
        self.device_type
    }

    fn is_bluetooth(&self) -> bool {
        true
    }

    fn tracking_shape(&self) -> Option<TrackingShape> {
        Some(TrackingShape::Sphere { radius_cm: SPHERE_RADIUS_CM })
    }

    fn calibration(&self) -> &DeviceCalibration {
        &self.calibration
    }

    fn tracking_color_id(&self) -> Option<TrackingColorId> {
        self.color
    }

    fn set_tracking_color_id(&mut self, color: Option<TrackingColorId>) -> bool {
        self.color = color;
        true
    }

    fn set_led_color(&mut self, rgb: [u8; 3]) {
        *self.led.lock() = rgb;
    }
}

/// Tracker whose next projection is set by the test
pub struct ScriptedTracker {
    pub id: usize,
    pub geometry: TrackerGeometry,
    pub frame: Option<Instant>,
    pub projection: Option<TrackingProjection>,
}

impl ScriptedTracker {
    /// Tracker on the X axis, yawed by `yaw` radians
    pub fn at(id: usize, x: f32, yaw: f32) -> Self {
        Self {
            id,
            geometry: TrackerGeometry::new(
                TrackerIntrinsics::default(),
                Pose::new(UnitQuaternion::from_axis_angle(&Vector3::y_axis(), yaw), Vector3::new(x, 0.0, 0.0)),
            ),
            frame: None,
            projection: None,
        }
    }

    /// Publish a frame showing a blob of `radius_px` centered on `target`
    pub fn show(&mut self, target: &Vector3<f32>, radius_px: f32, frame: Instant) {
        self.projection = self
            .geometry
            .project_world_point(target)
            .map(|center| TrackingProjection::ellipse(center, radius_px, radius_px, 0.0));
        self.frame = Some(frame);
    }

    /// Publish a frame showing a blob at a pixel
    pub fn show_pixel(&mut self, center: Point2<f32>, radius_px: f32, frame: Instant) {
        self.projection = Some(TrackingProjection::ellipse(center, radius_px, radius_px, 0.0));
        self.frame = Some(frame);
    }

    /// Publish a frame in which the controller is not found
    pub fn show_nothing(&mut self, frame: Instant) {
        self.projection = None;
        self.frame = Some(frame);
    }

    pub fn center(&self) -> Option<Point2<f32>> {
        self.projection.map(|projection| projection.center())
    }
}

impl TrackerView for ScriptedTracker {
    fn tracker_id(&self) -> usize {
        self.id
    }

    fn is_open(&self) -> bool {
        true
    }

    fn has_unpublished_frame(&self) -> bool {
        self.frame.is_some()
    }

    fn last_new_data_timestamp(&self) -> Option<Instant> {
        self.frame
    }

    fn geometry(&self) -> &TrackerGeometry {
        &self.geometry
    }

    fn compute_projection_for_controller(&self, _request: &ProjectionRequest) -> Option<TrackingProjection> {
        self.projection
    }
}
