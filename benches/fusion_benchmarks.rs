use std::f32::consts::PI;
use std::time::Instant;

use controller_fusion::filter::{OrientationFilterKind, PositionFilterKind};
use controller_fusion::filter_space::PoseFilterPacket;
use controller_fusion::tracker::triangulate_world_position;
use controller_fusion::triangulation::{MultiTrackerTriangulator, TrackerObservation};
use controller_fusion::{
    MulticamPoseEstimate, Pose, PoseFilterConstants, PoseFilterKind, TrackerGeometry, TrackerIntrinsics,
    TrackerProjectionEstimate, TrackingConfig, TrackingProjection, TrackingShape, create_pose_filter,
};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use nalgebra::{Point2, UnitQuaternion, Vector2, Vector3};
use rand::prelude::*;
use rand_pcg::Pcg64;

const DELTA_TIME: f32 = 0.008; // 125Hz

// Pre-generated sensor data so RNG cost stays out of the measurements
struct PreGeneratedPackets {
    packets: Vec<PoseFilterPacket>,
    index: usize,
}

impl PreGeneratedPackets {
    fn new(count: usize, seed: u64) -> Self {
        let mut rng = Pcg64::seed_from_u64(seed);
        let mut packets = Vec::with_capacity(count);

        for i in 0..count {
            let time = i as f32 * DELTA_TIME;
            let phase = time * 0.5 * 2.0 * PI;
            let mut packet = PoseFilterPacket::empty(UnitQuaternion::identity(), Vector3::zeros());

            packet.gyroscope = Some(Vector3::new(
                0.2 * phase.sin() + rng.random_range(-0.01..0.01),
                0.2 * (phase * 1.3).cos() + rng.random_range(-0.01..0.01),
                0.2 * (phase * 0.7).sin() + rng.random_range(-0.01..0.01),
            ));
            packet.accelerometer = Some(Vector3::new(
                -0.1 * phase.sin() + rng.random_range(-0.002..0.002),
                1.0 + rng.random_range(-0.002..0.002),
                0.1 * phase.cos() + rng.random_range(-0.002..0.002),
            ));
            packet.magnetometer = Some(
                Vector3::new(
                    0.6 + rng.random_range(-0.05..0.05),
                    -0.8 + rng.random_range(-0.05..0.05),
                    0.05 * phase.sin(),
                )
                .normalize(),
            );
            packet.world_linear_acceleration = Some(Vector3::new(0.05 * phase.cos(), 0.0, 0.0));

            // one optical sample per four inertial ones
            if i % 4 == 0 {
                packet.optical_position_cm = Some(Vector3::new(
                    10.0 * phase.cos() + rng.random_range(-0.2..0.2),
                    5.0 * phase.sin() + rng.random_range(-0.2..0.2),
                    150.0 + rng.random_range(-0.2..0.2),
                ));
                packet.projection_area = 400.0;
            }
            packets.push(packet);
        }

        Self { packets, index: 0 }
    }

    fn next(&mut self) -> PoseFilterPacket {
        let packet = self.packets[self.index];
        self.index = (self.index + 1) % self.packets.len();
        packet
    }
}

/// Benchmark one update of each common filter configuration
fn bench_filter_update(c: &mut Criterion) {
    let constants = PoseFilterConstants::default();
    let kinds = [
        (
            "filter_update_wand_default",
            PoseFilterKind::Compound {
                position: PositionFilterKind::LowPassOptical,
                orientation: OrientationFilterKind::ComplementaryMarg,
            },
        ),
        (
            "filter_update_madgwick_imu",
            PoseFilterKind::Compound {
                position: PositionFilterKind::LowPassImu,
                orientation: OrientationFilterKind::MadgwickMarg,
            },
        ),
        ("filter_update_kalman", PoseFilterKind::Kalman),
    ];

    for (name, kind) in kinds {
        let mut filter = create_pose_filter(kind, &constants);
        let mut data = PreGeneratedPackets::new(1000, 42);
        c.bench_function(name, |b| {
            b.iter(|| {
                let packet = data.next();
                filter.update(black_box(DELTA_TIME), black_box(&packet));
            })
        });
    }
}

fn tracker(x: f32, yaw: f32) -> TrackerGeometry {
    TrackerGeometry::new(
        TrackerIntrinsics::default(),
        Pose::new(UnitQuaternion::from_axis_angle(&Vector3::y_axis(), yaw), Vector3::new(x, 0.0, 0.0)),
    )
}

/// Benchmark two-ray triangulation
fn bench_triangulate_pair(c: &mut Criterion) {
    let left = tracker(-80.0, 0.4);
    let right = tracker(80.0, -0.4);
    let target = Vector3::new(5.0, 10.0, 200.0);
    let (Some(a), Some(b)) = (left.project_world_point(&target), right.project_world_point(&target)) else {
        return;
    };

    c.bench_function("triangulate_pair", |bench| {
        bench.iter(|| triangulate_world_position(black_box(&left), black_box(&a), black_box(&right), black_box(&b)))
    });
}

/// Benchmark a full multi-tracker triangulation over noisy projections
fn bench_multi_tracker(c: &mut Criterion) {
    let mut rng = Pcg64::seed_from_u64(7);
    let config = TrackingConfig::default();
    let shape = TrackingShape::Sphere { radius_cm: 2.25 };
    let geometries = [tracker(-120.0, 0.5), tracker(-40.0, 0.15), tracker(40.0, -0.15), tracker(120.0, -0.5)];
    let target = Vector3::new(0.0, 20.0, 220.0);

    let estimates: Vec<TrackerProjectionEstimate> = geometries
        .iter()
        .map(|geometry| {
            let center = geometry.project_world_point(&target).unwrap_or(Point2::origin());
            let jitter = Vector2::new(rng.random_range(-0.3..0.3), rng.random_range(-0.3..0.3));
            TrackerProjectionEstimate {
                projection: Some(TrackingProjection::ellipse(
                    center + jitter,
                    rng.random_range(6.0..10.0),
                    rng.random_range(6.0..10.0),
                    0.0,
                )),
                position_cm: geometry.compute_relative_position(&target),
                currently_tracking: true,
                ..Default::default()
            }
        })
        .collect();
    let observations: Vec<TrackerObservation<'_>> = geometries
        .iter()
        .zip(&estimates)
        .enumerate()
        .map(|(tracker_id, (geometry, estimate))| TrackerObservation { tracker_id, geometry, estimate })
        .collect();

    let mut triangulator = MultiTrackerTriangulator::new(&config);
    let previous = MulticamPoseEstimate::default();
    c.bench_function("triangulate_four_trackers", |b| {
        b.iter(|| {
            triangulator.triangulate(
                black_box(&shape),
                black_box(&observations),
                4,
                &previous,
                &config,
                Instant::now(),
            )
        })
    });
}

criterion_group!(benches, bench_filter_update, bench_triangulate_pair, bench_multi_tracker);
criterion_main!(benches);
