//! Fusion of per-tracker estimates into one world-space pose
//!
//! Every unordered pair of trackers with a valid projection is triangulated.
//! Pairs that disagree with the running average are discarded, and trackers
//! implicated in most of the discarded pairs are asked to re-acquire their region
//! of interest. The accepted average is then shaped by an optional latency
//! predictor and an exponential smoother.

use std::collections::VecDeque;
use std::time::Instant;

use nalgebra::{UnitQuaternion, Vector3};
use tracing::debug;

use crate::config::{MAX_POSITION_PREDICTION_HISTORY, TrackingConfig};
use crate::math::weighted_quaternion_average;
use crate::tracker::{TrackerGeometry, triangulate_world_pose, triangulate_world_position};
use crate::types::{MulticamPoseEstimate, TrackerProjectionEstimate, TrackingShape};

/// Prediction and smoothing gains at or below this are off
const MIN_SHAPING_GAIN: f32 = 0.01;
/// Deviation thresholds at or below this disable pair rejection
const MIN_POSITION_DEVIATION: f32 = 0.01;
const MAX_SMOOTHING: f32 = 0.99;

/// Decides whether a lone tracker may drive the pose
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingleTrackerPolicy {
    ignore_pose_from_one_tracker: bool,
}

impl SingleTrackerPolicy {
    pub fn from_config(config: &TrackingConfig) -> Self {
        Self {
            ignore_pose_from_one_tracker: config.ignore_pose_from_one_tracker,
        }
    }

    /// A single tracker's pose is used when it is the only tracker available, or
    /// when single-tracker poses are not being ignored.
    pub fn allows(&self, available_trackers: usize) -> bool {
        available_trackers == 1 || !self.ignore_pose_from_one_tracker
    }
}

/// One tracker's contribution to a triangulation
#[derive(Debug, Clone, Copy)]
pub struct TrackerObservation<'a> {
    pub tracker_id: usize,
    pub geometry: &'a TrackerGeometry,
    pub estimate: &'a TrackerProjectionEstimate,
}

impl TrackerObservation<'_> {
    fn screen_area(&self) -> f32 {
        self.estimate.screen_area()
    }

    fn world_position(&self) -> Vector3<f32> {
        self.geometry.compute_world_position(&self.estimate.position_cm)
    }

    fn world_orientation(&self) -> Option<UnitQuaternion<f32>> {
        self.estimate
            .orientation_valid
            .then(|| self.geometry.compute_world_orientation(&self.estimate.orientation))
    }
}

/// Result of one triangulation tick
#[derive(Debug, Clone, PartialEq)]
pub struct TriangulationResult {
    pub estimate: MulticamPoseEstimate,
    /// Trackers that should search their whole frame on the next tick
    pub enforce_new_roi: Vec<usize>,
}

/// Cameras on opposite sides of the play space in both X and Z
fn are_opposed(a: &TrackerGeometry, b: &TrackerGeometry) -> bool {
    let (first, second) = (a.world_origin(), b.world_origin());
    (first.x > 0.0) == (second.x < 0.0) && (first.z > 0.0) == (second.z < 0.0)
}

/// Per-controller multi-tracker triangulation with temporal shaping
#[derive(Debug, Clone)]
pub struct MultiTrackerTriangulator {
    history: VecDeque<Vector3<f32>>,
    capacity: usize,
}

impl MultiTrackerTriangulator {
    pub fn new(config: &TrackingConfig) -> Self {
        let capacity = (config.controller_position_prediction_history as usize).clamp(1, MAX_POSITION_PREDICTION_HISTORY);
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Drop the prediction history
    pub fn reset(&mut self) {
        self.history.clear();
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Combine this tick's valid observations into a world pose.
    ///
    /// `observations` hold only trackers whose estimate is tracking and not
    /// suppressed; `available_trackers` counts every open tracker.
    pub fn triangulate(
        &mut self,
        shape: &TrackingShape,
        observations: &[TrackerObservation<'_>],
        available_trackers: usize,
        previous: &MulticamPoseEstimate,
        config: &TrackingConfig,
        now: Instant,
    ) -> TriangulationResult {
        let policy = SingleTrackerPolicy::from_config(config);

        let mut sorted: Vec<TrackerObservation<'_>> = observations.to_vec();
        sorted.sort_by(|a, b| b.screen_area().total_cmp(&a.screen_area()));

        let mut estimate = MulticamPoseEstimate {
            currently_tracking: false,
            last_update_timestamp: Some(now),
            ..*previous
        };
        let mut enforce_new_roi = Vec::new();

        match sorted.len() {
            0 => {}
            1 => {
                if policy.allows(available_trackers) {
                    Self::apply_single(&mut estimate, &sorted[0]);
                }
            }
            _ => {
                let accepted = self.triangulate_pairs(shape, &sorted, config, &mut estimate, &mut enforce_new_roi);
                if accepted {
                    self.shape_position(&mut estimate, previous, config);
                } else if policy.allows(available_trackers) {
                    Self::apply_single(&mut estimate, &sorted[0]);
                }
            }
        }

        if estimate.currently_tracking {
            estimate.screen_area = sorted.iter().map(TrackerObservation::screen_area).sum::<f32>() / sorted.len() as f32;
            estimate.last_visible_timestamp = sorted
                .iter()
                .filter_map(|observation| observation.estimate.last_visible_timestamp)
                .max()
                .or(previous.last_visible_timestamp);
        }

        TriangulationResult { estimate, enforce_new_roi }
    }

    fn apply_single(estimate: &mut MulticamPoseEstimate, observation: &TrackerObservation<'_>) {
        estimate.position_cm = observation.world_position();
        match observation.world_orientation() {
            Some(orientation) => {
                estimate.orientation = orientation;
                estimate.orientation_valid = true;
            }
            None => estimate.orientation_valid = false,
        }
        estimate.currently_tracking = true;
    }

    /// Returns false when no pair was accepted
    fn triangulate_pairs(
        &mut self,
        shape: &TrackingShape,
        sorted: &[TrackerObservation<'_>],
        config: &TrackingConfig,
        estimate: &mut MulticamPoseEstimate,
        enforce_new_roi: &mut Vec<usize>,
    ) -> bool {
        let model = shape.light_bar_points();
        let mut rejections = vec![0usize; sorted.len()];
        let mut position_sum = Vector3::zeros();
        let mut pair_count = 0usize;
        let mut orientations = Vec::new();
        let mut weights = Vec::new();

        for i in 0..sorted.len() {
            for j in (i + 1)..sorted.len() {
                let (first, second) = (&sorted[i], &sorted[j]);
                if config.exclude_opposed_cameras && are_opposed(first.geometry, second.geometry) {
                    continue;
                }
                let (Some(projection_a), Some(projection_b)) = (first.estimate.projection, second.estimate.projection)
                else {
                    continue;
                };

                let candidate = match (&model, projection_a.light_bar_points(), projection_b.light_bar_points()) {
                    (Some(model), Some(points_a), Some(points_b)) => {
                        triangulate_world_pose(model, first.geometry, &points_a, second.geometry, &points_b)
                            .map(|pose| (pose.position_cm, Some(pose.orientation)))
                    }
                    _ => triangulate_world_position(
                        first.geometry,
                        &projection_a.center(),
                        second.geometry,
                        &projection_b.center(),
                    )
                    .map(|position| (position, None)),
                };
                let Some((position, orientation)) = candidate else {
                    continue;
                };

                if config.max_tracker_position_deviation > MIN_POSITION_DEVIATION && pair_count > 0 {
                    let average = position_sum / pair_count as f32;
                    if (position - average).amax() > config.max_tracker_position_deviation {
                        rejections[i] += 1;
                        rejections[j] += 1;
                        continue;
                    }
                }

                position_sum += position;
                pair_count += 1;
                if let Some(orientation) = orientation {
                    orientations.push(orientation);
                    weights.push(first.screen_area() + second.screen_area());
                }
            }
        }

        let projection_count = sorted.len();
        for (index, count) in rejections.iter().enumerate() {
            if *count > 0 && *count >= projection_count - 1 {
                let tracker_id = sorted[index].tracker_id;
                debug!(tracker_id, rejected_pairs = *count, "tracker disagrees with the others, forcing new ROI");
                enforce_new_roi.push(tracker_id);
            }
        }

        if pair_count == 0 {
            return false;
        }

        estimate.position_cm = position_sum / pair_count as f32;
        match weighted_quaternion_average(&orientations, &weights) {
            Some(orientation) => {
                estimate.orientation = orientation;
                estimate.orientation_valid = true;
            }
            None => estimate.orientation_valid = false,
        }
        estimate.currently_tracking = true;
        true
    }

    /// Latency prediction from the rolling history, then smoothing toward the
    /// previous position
    fn shape_position(&mut self, estimate: &mut MulticamPoseEstimate, previous: &MulticamPoseEstimate, config: &TrackingConfig) {
        let average = estimate.position_cm;
        let mut position = average;

        let prediction = config.controller_position_prediction;
        if prediction > MIN_SHAPING_GAIN && !self.history.is_empty() {
            let history_average = self.history.iter().sum::<Vector3<f32>>() / self.history.len() as f32;
            position += (average - history_average) * prediction;
        }

        if self.history.len() >= self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(average);

        let smoothing = config.controller_position_smoothing.min(MAX_SMOOTHING);
        if smoothing > MIN_SHAPING_GAIN && previous.currently_tracking {
            position = previous.position_cm * smoothing + position * (1.0 - smoothing);
        }

        estimate.position_cm = position;
    }
}
