//! End-to-end scenarios through a controller view with scripted trackers

mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use approx::assert_relative_eq;
use common::{MockDevice, ScriptedTracker};
use controller_fusion::packet_queue::{MAX_TIME_DELTA_SECONDS, MIN_TIME_DELTA_SECONDS, OpticalPacket, clamp_time_delta};
use controller_fusion::tracker::triangulate_world_position;
use controller_fusion::{
    ControllerView, DeviceCalibration, DeviceState, DeviceType, Pose, TrackerView, TrackingColorAllocator,
    TrackingConfig, new_shared_pose,
};
use nalgebra::{Point2, UnitQuaternion, Vector3};
use rand::prelude::*;
use rand_pcg::Pcg64;

const TICK: Duration = Duration::from_millis(10);

fn open_view(config: &TrackingConfig, device: MockDevice) -> ControllerView {
    let mut view = ControllerView::new(0, config, Arc::new(TrackingColorAllocator::new()));
    view.open(Box::new(device));
    view.start_tracking().unwrap();
    view
}

fn virtual_state() -> DeviceState {
    DeviceState {
        device_type: DeviceType::Virtual,
        poll_sequence_number: 0,
        frames: Vec::new(),
        magnetometer: None,
    }
}

fn optical(timestamp: Instant, position_cm: Vector3<f32>) -> OpticalPacket {
    OpticalPacket {
        timestamp,
        position_cm,
        orientation: None,
        projection_area: 200.0,
    }
}

#[test]
fn test_random_gaps_are_clamped() {
    let mut rng = Pcg64::seed_from_u64(7);
    let t0 = Instant::now();
    for _ in 0..1000 {
        let gap = Duration::from_secs_f32(rng.random_range(0.0..0.5));
        let delta_time = clamp_time_delta(Some(t0), t0 + gap);
        assert!((MIN_TIME_DELTA_SECONDS..=MAX_TIME_DELTA_SECONDS).contains(&delta_time));
    }
}

#[test]
fn test_filter_sees_clamped_time_steps() {
    let calibration = DeviceCalibration {
        position_filter: "PassThru".to_string(),
        ..Default::default()
    };
    let mut view = open_view(
        &TrackingConfig::default(),
        MockDevice::with_calibration(DeviceType::Virtual, calibration),
    );
    let sender = view.optical_packet_sender();
    let t0 = Instant::now();

    // a one second gap is seen as 1/30 s
    sender.send(optical(t0, Vector3::new(0.0, 0.0, 100.0))).unwrap();
    sender.send(optical(t0 + Duration::from_secs(1), Vector3::new(10.0, 0.0, 100.0))).unwrap();
    let report = view.update_state_and_predict().unwrap();
    assert_eq!(report.processed, 2);
    let physics = view.filtered_physics().unwrap();
    assert_relative_eq!(physics.linear_velocity_cm_per_sec.x, 300.0, epsilon = 0.01);

    // a 100 µs gap is seen as 1/2500 s
    let t1 = t0 + Duration::from_secs(1) + Duration::from_micros(100);
    sender.send(optical(t1, Vector3::new(10.04, 0.0, 100.0))).unwrap();
    view.update_state_and_predict().unwrap();
    let physics = view.filtered_physics().unwrap();
    assert_relative_eq!(physics.linear_velocity_cm_per_sec.x, 100.0, epsilon = 0.05);
}

#[test]
fn test_two_trackers_meet_at_sphere() {
    let mut view = open_view(&TrackingConfig::default(), MockDevice::new(DeviceType::Virtual));
    let now = Instant::now();
    let target = Vector3::new(-12.0, 20.0, 240.0);

    let mut left = ScriptedTracker::at(0, -90.0, 0.35);
    let mut right = ScriptedTracker::at(1, 90.0, -0.35);
    left.show(&target, 7.0, now);
    right.show(&target, 6.0, now);

    let estimate = view.update_optical_pose_estimation(&[&left, &right], now).unwrap();
    assert!(estimate.currently_tracking);
    assert_relative_eq!(estimate.position_cm, target, epsilon = 0.05);

    view.update_state_and_predict().unwrap();
    assert_relative_eq!(view.filtered_pose(0.0).unwrap().position_cm, target, epsilon = 0.05);
}

#[test]
fn test_single_tracker_reports_its_own_world_pose() {
    let config = TrackingConfig {
        ignore_pose_from_one_tracker: false,
        ..Default::default()
    };
    let mut view = open_view(&config, MockDevice::new(DeviceType::Virtual));
    let now = Instant::now();

    let mut seen = ScriptedTracker::at(0, -40.0, 0.2);
    let mut blind = ScriptedTracker::at(1, 40.0, -0.2);
    seen.show(&Vector3::new(0.0, 0.0, 160.0), 10.0, now);
    blind.show_nothing(now);

    let estimate = view.update_optical_pose_estimation(&[&seen, &blind], now).unwrap();
    let relative = view.tracker_estimate(0).unwrap().position_cm;
    assert!(estimate.currently_tracking);
    assert_relative_eq!(estimate.position_cm, seen.geometry().compute_world_position(&relative));
}

#[test]
fn test_occlusion_zone_suppresses_then_regains() {
    let config = TrackingConfig {
        ignore_pose_from_one_tracker: false,
        ..Default::default()
    };
    let mut view = open_view(&config, MockDevice::new(DeviceType::Virtual));
    let mut tracker = ScriptedTracker::at(0, 0.0, 0.0);
    let mut now = Instant::now();

    tracker.show(&Vector3::new(0.0, 0.0, 150.0), 6.0, now);
    assert!(view.update_optical_pose_estimation(&[&tracker], now).unwrap().currently_tracking);
    let lost_at = tracker.center().unwrap();

    for _ in 0..2 {
        now += TICK;
        tracker.show_nothing(now);
        assert!(!view.update_optical_pose_estimation(&[&tracker], now).unwrap().currently_tracking);
    }

    // ~19.6 px², above the noise floor but below the regain size, 1.4 px from the loss point
    now += TICK;
    let nearby = Point2::new(lost_at.x + 1.0, lost_at.y + 1.0);
    tracker.show_pixel(nearby, 2.5, now);
    assert!(!view.update_optical_pose_estimation(&[&tracker], now).unwrap().currently_tracking);
    assert!(view.tracker_estimate(0).unwrap().occluded);

    // ~50 px² clears the regain size
    now += TICK;
    tracker.show_pixel(nearby, 4.0, now);
    assert!(view.update_optical_pose_estimation(&[&tracker], now).unwrap().currently_tracking);
    assert!(!view.tracker_estimate(0).unwrap().occluded);
}

#[test]
fn test_occlusion_zone_is_bypassed_with_too_few_projections() {
    let config = TrackingConfig {
        ignore_pose_from_one_tracker: false,
        occluded_area_ignore_trackers: 2,
        ..Default::default()
    };
    let mut view = open_view(&config, MockDevice::new(DeviceType::Virtual));
    let mut tracker = ScriptedTracker::at(0, 0.0, 0.0);
    let mut now = Instant::now();

    tracker.show(&Vector3::new(0.0, 0.0, 150.0), 6.0, now);
    view.update_optical_pose_estimation(&[&tracker], now).unwrap();
    let lost_at = tracker.center().unwrap();

    for _ in 0..2 {
        now += TICK;
        tracker.show_nothing(now);
        view.update_optical_pose_estimation(&[&tracker], now).unwrap();
    }

    // same small detection that would be suppressed, but only one tracker sees anything
    now += TICK;
    tracker.show_pixel(Point2::new(lost_at.x + 1.0, lost_at.y + 1.0), 2.5, now);
    assert!(view.update_optical_pose_estimation(&[&tracker], now).unwrap().currently_tracking);
    assert!(!view.tracker_estimate(0).unwrap().occluded);
}

#[test]
fn test_largest_projections_pass_the_occlusion_zone_first() {
    let config = TrackingConfig {
        ignore_pose_from_one_tracker: false,
        occluded_area_ignore_trackers: 1,
        ..Default::default()
    };
    let mut view = open_view(&config, MockDevice::new(DeviceType::Virtual));
    let mut small = ScriptedTracker::at(0, -60.0, 0.3);
    let mut large = ScriptedTracker::at(1, 60.0, -0.3);
    let target = Vector3::new(0.0, 0.0, 180.0);
    let mut now = Instant::now();

    small.show(&target, 6.0, now);
    large.show(&target, 6.0, now);
    view.update_optical_pose_estimation(&[&small, &large], now).unwrap();
    let (small_lost_at, large_lost_at) = (small.center().unwrap(), large.center().unwrap());

    for _ in 0..2 {
        now += TICK;
        small.show_nothing(now);
        large.show_nothing(now);
        view.update_optical_pose_estimation(&[&small, &large], now).unwrap();
    }

    // both reappear inside their zones below the regain size; only the larger passes
    now += TICK;
    small.show_pixel(Point2::new(small_lost_at.x + 1.0, small_lost_at.y), 2.5, now);
    large.show_pixel(Point2::new(large_lost_at.x + 1.0, large_lost_at.y), 2.9, now);
    let estimate = view.update_optical_pose_estimation(&[&small, &large], now).unwrap();

    assert!(estimate.currently_tracking);
    assert!(view.tracker_estimate(0).unwrap().occluded);
    assert!(!view.tracker_estimate(1).unwrap().occluded);
    let relative = view.tracker_estimate(1).unwrap().position_cm;
    assert_relative_eq!(estimate.position_cm, large.geometry().compute_world_position(&relative));
}

#[test]
fn test_occluded_tracker_is_left_out_of_triangulation() {
    let mut view = open_view(&TrackingConfig::default(), MockDevice::new(DeviceType::Virtual));
    let mut a = ScriptedTracker::at(0, -80.0, 0.4);
    let mut b = ScriptedTracker::at(1, 0.0, 0.0);
    let mut c = ScriptedTracker::at(2, 80.0, -0.4);
    let first = Vector3::new(0.0, 0.0, 200.0);
    let mut now = Instant::now();

    a.show(&first, 8.0, now);
    b.show(&first, 9.0, now);
    c.show(&first, 8.0, now);
    let estimate = view.update_optical_pose_estimation(&[&a, &b, &c], now).unwrap();
    assert_relative_eq!(estimate.position_cm, first, epsilon = 0.05);
    let lost_at = b.center().unwrap();

    for _ in 0..2 {
        now += TICK;
        a.show(&first, 8.0, now);
        b.show_nothing(now);
        c.show(&first, 8.0, now);
        view.update_optical_pose_estimation(&[&a, &b, &c], now).unwrap();
    }

    now += TICK;
    let moved = Vector3::new(3.0, 2.0, 205.0);
    a.show(&moved, 8.0, now);
    b.show_pixel(Point2::new(lost_at.x + 1.0, lost_at.y), 2.5, now);
    c.show(&moved, 8.0, now);
    let estimate = view.update_optical_pose_estimation(&[&a, &b, &c], now).unwrap();

    let expected = triangulate_world_position(
        a.geometry(),
        &a.center().unwrap(),
        c.geometry(),
        &c.center().unwrap(),
    )
    .unwrap();
    assert!(view.tracker_estimate(1).unwrap().occluded);
    assert!(estimate.currently_tracking);
    assert_relative_eq!(estimate.position_cm, expected, epsilon = 1e-3);
}

#[test]
fn test_recenter_keeps_relative_motion() {
    let yaw = |angle: f32| UnitQuaternion::from_axis_angle(&Vector3::y_axis(), angle);
    let roll = |angle: f32| UnitQuaternion::from_axis_angle(&Vector3::z_axis(), angle);
    let start = yaw(0.7) * roll(0.2);
    let end = roll(0.3) * start;

    let run = |recenter: bool| {
        let mut view = open_view(&TrackingConfig::default(), MockDevice::new(DeviceType::Virtual));
        let source = new_shared_pose();
        view.set_external_orientation_source(Some(Arc::clone(&source)));
        let t0 = Instant::now();

        *source.write() = Pose::new(start, Vector3::zeros());
        view.notify_sensor_data_received(&virtual_state(), t0);
        view.update_state_and_predict().unwrap();
        if recenter {
            view.recenter_orientation(UnitQuaternion::identity()).unwrap();
        }
        let before = view.filtered_pose(0.0).unwrap().orientation;

        *source.write() = Pose::new(end, Vector3::zeros());
        view.notify_sensor_data_received(&virtual_state(), t0 + TICK);
        view.update_state_and_predict().unwrap();
        let after = view.filtered_pose(0.0).unwrap().orientation;
        (before, before.inverse() * after)
    };

    let (_, plain_delta) = run(false);
    let (recentered, recentered_delta) = run(true);
    assert!(recentered.angle() < 1e-4);
    assert!(plain_delta.angle_to(&recentered_delta) < 1e-4);
}

#[test]
fn test_burst_is_trimmed_to_newest_packets() {
    let mut view = open_view(&TrackingConfig::default(), MockDevice::new(DeviceType::Virtual));
    let mut producer = view.sensor_packet_producer();
    let t0 = Instant::now();
    for i in 0..150u64 {
        producer.post(&virtual_state(), t0 + Duration::from_millis(i));
    }
    assert_eq!(view.pending_packets(), 150);

    let report = view.update_state_and_predict().unwrap();
    assert_eq!(report.processed, 100);
    assert_eq!(report.trimmed, 50);
    assert_eq!(view.pending_packets(), 0);
}

#[test]
fn test_polling_thread_feeds_the_tick() {
    let mut view = open_view(&TrackingConfig::default(), MockDevice::new(DeviceType::Virtual));
    let mut producer = view.sensor_packet_producer();
    let t0 = Instant::now();

    let poller = thread::spawn(move || {
        (0..40u64)
            .map(|i| producer.post(&virtual_state(), t0 + Duration::from_millis(i * 4)))
            .sum::<usize>()
    });
    let posted = poller.join().unwrap();

    let report = view.update_state_and_predict().unwrap();
    assert_eq!(report.processed, posted);
    assert!(view.take_unpublished_frame().is_some());
}

#[test]
fn test_attached_controller_follows_parent() {
    let calibration = DeviceCalibration {
        position_filter: "PositionExternalAttachment".to_string(),
        attachment_offset_cm: Vector3::new(0.0, 0.0, 10.0),
        ..Default::default()
    };
    let mut child = open_view(
        &TrackingConfig::default(),
        MockDevice::with_calibration(DeviceType::Virtual, calibration),
    );
    let parent = new_shared_pose();
    child.set_attachment_parent(Some(Arc::clone(&parent)));

    *parent.write() = Pose::new(
        UnitQuaternion::from_axis_angle(&Vector3::y_axis(), core::f32::consts::FRAC_PI_2),
        Vector3::new(1.0, 2.0, 3.0),
    );
    child.notify_sensor_data_received(&virtual_state(), Instant::now());
    child.update_state_and_predict().unwrap();

    assert_relative_eq!(
        child.filtered_pose(0.0).unwrap().position_cm,
        Vector3::new(11.0, 2.0, 3.0),
        epsilon = 1e-4
    );
}
