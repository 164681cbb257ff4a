//! Per-tracker reconstruction of a tracker-relative pose from a video projection

use std::time::{Duration, Instant};

use tracing::trace;

use crate::config::TrackingConfig;
use crate::tracker::{PoseFromProjection, ProjectionRequest, TrackerView};
use crate::types::TrackerProjectionEstimate;

/// What one tracker contributed this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionOutcome {
    /// Tracker closed, or its newest frame is too old to use
    Unavailable,
    /// No new frame since the last tick; the previous estimate stands
    NoNewFrame,
    /// A new frame was searched and the controller was not found or not solvable
    NotVisible,
    /// A new frame yielded a valid tracker-relative pose
    Visible,
}

impl ProjectionOutcome {
    pub fn is_visible(self) -> bool {
        self == ProjectionOutcome::Visible
    }
}

/// Refresh `estimate` from the tracker's newest frame.
///
/// `last_visible_timestamp` moves only when a new frame produces a valid pose. The
/// projection is kept after a miss so the occlusion guard and the tracker's ROI
/// search can still refer to where the controller was last seen.
pub fn update_tracker_estimate(
    estimate: &mut TrackerProjectionEstimate,
    tracker: &dyn TrackerView,
    request: &ProjectionRequest,
    config: &TrackingConfig,
    now: Instant,
) -> ProjectionOutcome {
    estimate.last_update_timestamp = Some(now);
    estimate.occluded = false;

    if !tracker.is_open() {
        estimate.currently_tracking = false;
        return ProjectionOutcome::Unavailable;
    }

    let timeout = Duration::from_millis(u64::from(config.optical_tracking_timeout));
    let frame_timestamp = tracker.last_new_data_timestamp();
    let frame_is_fresh = frame_timestamp.is_some_and(|stamp| now.saturating_duration_since(stamp) <= timeout);

    if !tracker.has_unpublished_frame() {
        let seen_recently = estimate
            .last_visible_timestamp
            .is_some_and(|stamp| now.saturating_duration_since(stamp) <= timeout);
        if !seen_recently {
            estimate.currently_tracking = false;
        }
        return ProjectionOutcome::NoNewFrame;
    }

    if !frame_is_fresh {
        trace!(tracker_id = tracker.tracker_id(), "ignoring stale tracker frame");
        estimate.currently_tracking = false;
        return ProjectionOutcome::Unavailable;
    }

    let projection = tracker
        .compute_projection_for_controller(request)
        .filter(|projection| projection.screen_area >= config.min_valid_projection_area);
    let Some(projection) = projection else {
        estimate.currently_tracking = false;
        return ProjectionOutcome::NotVisible;
    };

    let seed = estimate.solve_seed;
    match tracker.compute_pose_for_projection(&projection, &request.shape, seed.as_ref()) {
        PoseFromProjection::Solved { pose, orientation_valid } => {
            estimate.projection = Some(projection);
            estimate.position_cm = pose.position_cm;
            estimate.orientation = pose.orientation;
            estimate.orientation_valid = orientation_valid;
            if !request.shape.is_sphere() {
                estimate.solve_seed = Some(pose);
            }
            estimate.currently_tracking = true;
            estimate.last_visible_timestamp = frame_timestamp.or(Some(now));
            ProjectionOutcome::Visible
        }
        PoseFromProjection::Rejected { seed } => {
            if seed.is_some() {
                estimate.solve_seed = seed;
            }
            estimate.projection = Some(projection);
            estimate.orientation_valid = false;
            estimate.currently_tracking = false;
            ProjectionOutcome::NotVisible
        }
    }
}
