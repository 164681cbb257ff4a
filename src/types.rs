//! Core data model shared by the optical and inertial halves of the pipeline
//!
//! World space is right-handed and Y-up, in centimeters. Tracker-relative space puts the
//! camera at the origin looking down +Z with +Y up and +X to the right of the image.

use std::time::Instant;

use nalgebra::{Point2, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Physical description of a controller's optical target
///
/// # Example
/// ```
/// use controller_fusion::TrackingShape;
///
/// let sphere = TrackingShape::Sphere { radius_cm: 2.25 };
/// assert!(sphere.is_sphere());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TrackingShape {
    /// Glowing ball of known radius
    Sphere {
        /// Sphere radius in centimeters
        radius_cm: f32,
    },
    /// Rectangular light bar with a triangle of fiducial corners.
    ///
    /// Points are in the controller's own frame (cm). The bar lies in its local XY
    /// plane facing -Z, so an identity pose presents the bar face-on to a tracker.
    LightBar {
        /// Top-left, top-right and bottom-center fiducials
        triangle: [Vector3<f32>; 3],
        /// Corners in top-right, top-left, bottom-left, bottom-right order
        quad: [Vector3<f32>; 4],
    },
}

impl TrackingShape {
    /// True for sphere targets
    pub fn is_sphere(&self) -> bool {
        matches!(self, TrackingShape::Sphere { .. })
    }

    /// Triangle followed by quad points, or `None` for spheres
    pub fn light_bar_points(&self) -> Option<[Vector3<f32>; 7]> {
        match self {
            TrackingShape::Sphere { .. } => None,
            TrackingShape::LightBar { triangle, quad } => Some([
                triangle[0], triangle[1], triangle[2], quad[0], quad[1], quad[2], quad[3],
            ]),
        }
    }

    /// A sanity check for shapes arriving from device configuration
    pub fn is_valid(&self) -> bool {
        match self {
            TrackingShape::Sphere { radius_cm } => radius_cm.is_finite() && *radius_cm > 0.0,
            TrackingShape::LightBar { quad, .. } => {
                let width = (quad[0] - quad[1]).norm();
                let height = (quad[1] - quad[2]).norm();
                width.is_finite() && width > 0.0 && height.is_finite() && height > 0.0
            }
        }
    }
}

/// Screen-space shape of a projection, in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProjectionShape {
    /// Ellipse fitted to a sphere's contour
    Ellipse {
        center: Point2<f32>,
        half_x_extent: f32,
        half_y_extent: f32,
        /// Ellipse rotation in radians
        angle: f32,
    },
    /// Light-bar fiducials, same ordering as [`TrackingShape::LightBar`]
    LightBar {
        triangle: [Point2<f32>; 3],
        quad: [Point2<f32>; 4],
    },
}

/// A tracker's 2D observation of a controller's tracking shape
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingProjection {
    pub shape: ProjectionShape,
    /// Projected area in square pixels, used as a tracking confidence proxy
    pub screen_area: f32,
}

impl TrackingProjection {
    /// Build an ellipse projection; area is computed from the extents
    pub fn ellipse(center: Point2<f32>, half_x_extent: f32, half_y_extent: f32, angle: f32) -> Self {
        Self {
            shape: ProjectionShape::Ellipse { center, half_x_extent, half_y_extent, angle },
            screen_area: core::f32::consts::PI * half_x_extent * half_y_extent,
        }
    }

    /// Build a light-bar projection; area is the quad's polygon area
    pub fn light_bar(triangle: [Point2<f32>; 3], quad: [Point2<f32>; 4]) -> Self {
        let mut twice_area = 0.0;
        for i in 0..4 {
            let a = quad[i];
            let b = quad[(i + 1) % 4];
            twice_area += a.x * b.y - b.x * a.y;
        }
        Self {
            shape: ProjectionShape::LightBar { triangle, quad },
            screen_area: 0.5 * f32::abs(twice_area),
        }
    }

    /// Ellipse center or quad centroid
    pub fn center(&self) -> Point2<f32> {
        match &self.shape {
            ProjectionShape::Ellipse { center, .. } => *center,
            ProjectionShape::LightBar { quad, .. } => {
                let sum = quad.iter().fold(Point2::origin().coords, |acc, p| acc + p.coords);
                Point2::from(sum / 4.0)
            }
        }
    }

    /// Triangle followed by quad points, or `None` for ellipses
    pub fn light_bar_points(&self) -> Option<[Point2<f32>; 7]> {
        match &self.shape {
            ProjectionShape::Ellipse { .. } => None,
            ProjectionShape::LightBar { triangle, quad } => Some([
                triangle[0], triangle[1], triangle[2], quad[0], quad[1], quad[2], quad[3],
            ]),
        }
    }
}

/// Orientation plus position in centimeters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub orientation: UnitQuaternion<f32>,
    pub position_cm: Vector3<f32>,
}

impl Pose {
    pub fn new(orientation: UnitQuaternion<f32>, position_cm: Vector3<f32>) -> Self {
        Self { orientation, position_cm }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            orientation: UnitQuaternion::identity(),
            position_cm: Vector3::zeros(),
        }
    }
}

/// Linear and angular derivatives reported next to a pose
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Physics {
    pub linear_velocity_cm_per_sec: Vector3<f32>,
    pub linear_acceleration_cm_per_sec_sqr: Vector3<f32>,
    pub angular_velocity_rad_per_sec: Vector3<f32>,
    pub angular_acceleration_rad_per_sec_sqr: Vector3<f32>,
}

/// Per (controller, tracker) reconstruction state
///
/// Owned by the controller view, indexed by tracker id, overwritten every tick.
#[derive(Debug, Clone)]
pub struct TrackerProjectionEstimate {
    /// Latest accepted projection, kept while tracking so the tracker can seed its ROI
    pub projection: Option<TrackingProjection>,
    /// Tracker-relative position in centimeters
    pub position_cm: Vector3<f32>,
    /// Tracker-relative orientation, meaningful when `orientation_valid`
    pub orientation: UnitQuaternion<f32>,
    pub orientation_valid: bool,
    /// Light-bar solve seed, set even on ticks whose estimate was rejected
    pub solve_seed: Option<Pose>,
    pub currently_tracking: bool,
    /// Suppressed by the occlusion guard this tick
    pub occluded: bool,
    pub occlusion_zone_center: Point2<f32>,
    pub occlusion_zone_radius: f32,
    pub last_visible_timestamp: Option<Instant>,
    pub last_update_timestamp: Option<Instant>,
}

impl Default for TrackerProjectionEstimate {
    fn default() -> Self {
        Self {
            projection: None,
            position_cm: Vector3::zeros(),
            orientation: UnitQuaternion::identity(),
            orientation_valid: false,
            solve_seed: None,
            currently_tracking: false,
            occluded: false,
            occlusion_zone_center: Point2::origin(),
            occlusion_zone_radius: 0.0,
            last_visible_timestamp: None,
            last_update_timestamp: None,
        }
    }
}

impl TrackerProjectionEstimate {
    /// Projection area or zero when nothing has been seen
    pub fn screen_area(&self) -> f32 {
        self.projection.map_or(0.0, |p| p.screen_area)
    }

    /// Tracker-relative pose built from the estimate
    pub fn relative_pose(&self) -> Pose {
        Pose::new(self.orientation, self.position_cm)
    }
}

/// World-space aggregate of all trackers' estimates for one controller
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MulticamPoseEstimate {
    pub position_cm: Vector3<f32>,
    /// Valid only for light-bar shapes
    pub orientation: UnitQuaternion<f32>,
    pub orientation_valid: bool,
    pub currently_tracking: bool,
    /// Mean projection area of the contributing trackers
    pub screen_area: f32,
    pub last_visible_timestamp: Option<Instant>,
    pub last_update_timestamp: Option<Instant>,
}

impl Default for MulticamPoseEstimate {
    fn default() -> Self {
        Self {
            position_cm: Vector3::zeros(),
            orientation: UnitQuaternion::identity(),
            orientation_valid: false,
            currently_tracking: false,
            screen_area: 0.0,
            last_visible_timestamp: None,
            last_update_timestamp: None,
        }
    }
}
