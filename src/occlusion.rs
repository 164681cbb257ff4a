//! Suppression of noisy re-detections near where a controller was lost

use std::collections::HashMap;

use nalgebra::{Point2, distance};
use tracing::trace;

use crate::config::TrackingConfig;
use crate::types::TrackingProjection;

/// Zone radii below this disable the guard
const MIN_ACTIVE_ZONE_SIZE: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
struct OcclusionZone {
    occluded: bool,
    center: Point2<f32>,
}

impl Default for OcclusionZone {
    fn default() -> Self {
        Self {
            occluded: false,
            center: Point2::origin(),
        }
    }
}

/// Guard decision for one tracker's observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OcclusionVerdict {
    /// The observation may be used
    Clear,
    /// A small detection inside the frozen zone; ignore it this tick
    Suppressed { center: Point2<f32>, radius: f32 },
}

/// Per-controller occlusion zones, one per tracker.
///
/// While a controller is tracked the zone follows its projection center. Once the
/// controller is neither tracked nor visible the zone freezes. A later detection
/// inside the frozen zone is suppressed unless its projection is large enough to be
/// obviously real.
#[derive(Debug, Clone, Default)]
pub struct OcclusionGuard {
    zones: HashMap<usize, OcclusionZone>,
}

impl OcclusionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the zone for `tracker_id` and judge this tick's observation.
    ///
    /// # Arguments
    /// * `was_tracking` - The tracker saw the controller on the previous tick
    /// * `visible` - A projection was found this tick
    /// * `projection` - This tick's projection, or the last known one when not visible
    pub fn evaluate(
        &mut self,
        tracker_id: usize,
        was_tracking: bool,
        visible: bool,
        projection: Option<&TrackingProjection>,
        config: &TrackingConfig,
    ) -> OcclusionVerdict {
        let size = config.occluded_area_on_loss_size;
        if size < MIN_ACTIVE_ZONE_SIZE {
            return OcclusionVerdict::Clear;
        }

        let zone = self.zones.entry(tracker_id).or_default();
        let observed = was_tracking || visible;

        if !zone.occluded {
            match projection {
                Some(projection) if observed => zone.center = projection.center(),
                _ if observed => {}
                _ => {
                    zone.occluded = true;
                    trace!(tracker_id, x = zone.center.x, y = zone.center.y, "occlusion zone frozen");
                }
            }
            return OcclusionVerdict::Clear;
        }

        if !observed {
            return OcclusionVerdict::Clear;
        }

        let Some(projection) = projection else {
            zone.occluded = false;
            return OcclusionVerdict::Clear;
        };

        let in_area = distance(&projection.center(), &zone.center) < size;
        let regained =
            projection.screen_area.max(config.min_valid_projection_area) >= config.occluded_area_regain_projection_size;

        if in_area && !regained {
            OcclusionVerdict::Suppressed {
                center: zone.center,
                radius: size,
            }
        } else {
            zone.occluded = false;
            OcclusionVerdict::Clear
        }
    }

    /// Tracker currently has a frozen zone
    pub fn is_occluded(&self, tracker_id: usize) -> bool {
        self.zones.get(&tracker_id).is_some_and(|zone| zone.occluded)
    }

    /// Forget every zone
    pub fn clear(&mut self) {
        self.zones.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(x: f32, y: f32, radius: f32) -> TrackingProjection {
        TrackingProjection::ellipse(Point2::new(x, y), radius, radius, 0.0)
    }

    fn lose_at(guard: &mut OcclusionGuard, config: &TrackingConfig, x: f32, y: f32) {
        let last = blob(x, y, 5.0);
        assert_eq!(guard.evaluate(0, true, true, Some(&last), config), OcclusionVerdict::Clear);
        // missed this tick, still tracking from the last one
        assert_eq!(guard.evaluate(0, true, false, Some(&last), config), OcclusionVerdict::Clear);
        // neither tracking nor visible: zone freezes
        assert_eq!(guard.evaluate(0, false, false, Some(&last), config), OcclusionVerdict::Clear);
        assert!(guard.is_occluded(0));
    }

    #[test]
    fn test_small_detection_inside_zone_is_suppressed() {
        let config = TrackingConfig::default();
        let mut guard = OcclusionGuard::new();
        lose_at(&mut guard, &config, 100.0, 80.0);

        // area ~12.6 px², below the 32 px² regain size
        let verdict = guard.evaluate(0, false, true, Some(&blob(101.0, 81.0, 2.0)), &config);
        assert_eq!(
            verdict,
            OcclusionVerdict::Suppressed {
                center: Point2::new(100.0, 80.0),
                radius: config.occluded_area_on_loss_size,
            }
        );
        assert!(guard.is_occluded(0));
    }

    #[test]
    fn test_large_detection_regains_anywhere() {
        let config = TrackingConfig::default();
        let mut guard = OcclusionGuard::new();
        lose_at(&mut guard, &config, 100.0, 80.0);

        let verdict = guard.evaluate(0, false, true, Some(&blob(100.0, 80.0, 6.0)), &config);
        assert_eq!(verdict, OcclusionVerdict::Clear);
        assert!(!guard.is_occluded(0));
    }

    #[test]
    fn test_detection_outside_zone_is_accepted() {
        let config = TrackingConfig::default();
        let mut guard = OcclusionGuard::new();
        lose_at(&mut guard, &config, 100.0, 80.0);

        let verdict = guard.evaluate(0, false, true, Some(&blob(130.0, 80.0, 2.0)), &config);
        assert_eq!(verdict, OcclusionVerdict::Clear);
    }

    #[test]
    fn test_small_zone_disables_guard() {
        let config = TrackingConfig {
            occluded_area_on_loss_size: 0.0,
            ..Default::default()
        };
        let mut guard = OcclusionGuard::new();
        let last = blob(10.0, 10.0, 1.0);
        guard.evaluate(0, false, false, Some(&last), &config);
        assert!(!guard.is_occluded(0));
        assert_eq!(guard.evaluate(0, false, true, Some(&last), &config), OcclusionVerdict::Clear);
    }

    #[test]
    fn test_zones_are_per_tracker() {
        let config = TrackingConfig::default();
        let mut guard = OcclusionGuard::new();
        lose_at(&mut guard, &config, 50.0, 50.0);
        assert!(!guard.is_occluded(1));
        assert_eq!(
            guard.evaluate(1, false, true, Some(&blob(50.0, 50.0, 2.0)), &config),
            OcclusionVerdict::Clear
        );
        guard.clear();
        assert!(!guard.is_occluded(0));
    }
}
