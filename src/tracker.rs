//! Tracker geometry and the capabilities the fusion core needs from a tracker
//!
//! Tracker-relative space puts the camera at the origin looking down +Z with +Y up.
//! Image space has its origin at the top-left corner with +v pointing down.

use std::time::Instant;

use nalgebra::{Matrix3, Matrix6, Point2, Rotation3, SMatrix, SVector, UnitQuaternion, Vector3, Vector6};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::color::TrackingColorId;
use crate::math::{DEG_TO_RAD, Vector3Ext, fit_plane};
use crate::types::{Pose, ProjectionShape, TrackingProjection, TrackingShape};

/// Seeds farther than this from the tracker are not trusted (cm)
const MAX_SEED_DISTANCE_CM: f32 = 300.0;

/// A light-bar solve whose reprojection error exceeds this is discarded (px)
const MAX_REPROJECTION_RMS_PX: f32 = 5.0;

/// Solved light-bar orientations tilted further than this about X or Y are implausible
const MAX_LIGHT_BAR_TILT_DEGREES: f32 = 30.0;

const MAX_SOLVE_ITERATIONS: usize = 20;
const SOLVE_CONVERGENCE_STEP: f32 = 1.0e-5;
const SOLVE_DAMPING: f32 = 1.0e-3;
const ROTATION_STEP: f32 = 1.0e-3;
const TRANSLATION_STEP: f32 = 1.0e-2;

/// Rays closer to parallel than this (1 - cos²) do not triangulate
const MIN_RAY_SEPARATION: f32 = 1.0e-6;

type Residuals = SVector<f32, 14>;
type Jacobian = SMatrix<f32, 14, 6>;

/// Pinhole model of a tracker's camera
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackerIntrinsics {
    /// Focal lengths in pixels
    pub focal_length_x: f32,
    pub focal_length_y: f32,
    /// Principal point in pixels
    pub principal_x: f32,
    pub principal_y: f32,
    pub pixel_width: f32,
    pub pixel_height: f32,
}

impl TrackerIntrinsics {
    /// Intrinsics with the principal point at the image center
    pub fn centered(focal_length: f32, pixel_width: f32, pixel_height: f32) -> Self {
        Self {
            focal_length_x: focal_length,
            focal_length_y: focal_length,
            principal_x: pixel_width / 2.0,
            principal_y: pixel_height / 2.0,
            pixel_width,
            pixel_height,
        }
    }

    /// Pixel of a tracker-relative point, `None` behind the camera
    pub fn project(&self, point: &Vector3<f32>) -> Option<Point2<f32>> {
        if point.z <= f32::EPSILON {
            return None;
        }
        Some(Point2::new(
            self.principal_x + self.focal_length_x * point.x / point.z,
            self.principal_y - self.focal_length_y * point.y / point.z,
        ))
    }

    /// Tracker-relative direction through a pixel, with unit depth
    pub fn unproject(&self, pixel: &Point2<f32>) -> Vector3<f32> {
        Vector3::new(
            (pixel.x - self.principal_x) / self.focal_length_x,
            -(pixel.y - self.principal_y) / self.focal_length_y,
            1.0,
        )
    }

    fn mean_focal_length(&self) -> f32 {
        0.5 * (self.focal_length_x + self.focal_length_y)
    }
}

impl Default for TrackerIntrinsics {
    fn default() -> Self {
        Self::centered(554.25, 640.0, 480.0)
    }
}

/// Intrinsics plus the tracker's placement in world space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerGeometry {
    pub intrinsics: TrackerIntrinsics,
    /// Maps tracker-relative coordinates into world space
    pub pose: Pose,
}

impl TrackerGeometry {
    pub fn new(intrinsics: TrackerIntrinsics, pose: Pose) -> Self {
        Self { intrinsics, pose }
    }

    /// World position of the tracker's camera
    pub fn world_origin(&self) -> Vector3<f32> {
        self.pose.position_cm
    }

    pub fn compute_world_position(&self, relative_position_cm: &Vector3<f32>) -> Vector3<f32> {
        self.pose.orientation * relative_position_cm + self.pose.position_cm
    }

    pub fn compute_world_orientation(&self, relative_orientation: &UnitQuaternion<f32>) -> UnitQuaternion<f32> {
        self.pose.orientation * relative_orientation
    }

    /// Tracker-relative position of a world point
    pub fn compute_relative_position(&self, world_position_cm: &Vector3<f32>) -> Vector3<f32> {
        self.pose.orientation.inverse() * (world_position_cm - self.pose.position_cm)
    }

    /// Pixel of a world point, `None` behind the camera
    pub fn project_world_point(&self, world_position_cm: &Vector3<f32>) -> Option<Point2<f32>> {
        self.intrinsics.project(&self.compute_relative_position(world_position_cm))
    }

    /// Unit world-space direction of the ray through a pixel
    pub fn world_ray_direction(&self, pixel: &Point2<f32>) -> Vector3<f32> {
        (self.pose.orientation * self.intrinsics.unproject(pixel)).safe_normalize()
    }
}

/// Midpoint of the closest approach of two trackers' rays through their pixels.
///
/// Returns `None` for (near) parallel rays.
///
/// # Example
/// ```
/// use nalgebra::{UnitQuaternion, Vector3};
/// use controller_fusion::tracker::{triangulate_world_position, TrackerGeometry, TrackerIntrinsics};
/// use controller_fusion::types::Pose;
///
/// let left = TrackerGeometry::new(
///     TrackerIntrinsics::default(),
///     Pose::new(UnitQuaternion::identity(), Vector3::new(-20.0, 0.0, 0.0)),
/// );
/// let right = TrackerGeometry::new(
///     TrackerIntrinsics::default(),
///     Pose::new(UnitQuaternion::identity(), Vector3::new(20.0, 0.0, 0.0)),
/// );
/// let target = Vector3::new(5.0, 3.0, 150.0);
/// let a = left.project_world_point(&target).unwrap();
/// let b = right.project_world_point(&target).unwrap();
/// let estimate = triangulate_world_position(&left, &a, &right, &b).unwrap();
/// assert!((estimate - target).norm() < 0.1);
/// ```
pub fn triangulate_world_position(
    tracker_a: &TrackerGeometry,
    pixel_a: &Point2<f32>,
    tracker_b: &TrackerGeometry,
    pixel_b: &Point2<f32>,
) -> Option<Vector3<f32>> {
    let origin_a = tracker_a.world_origin();
    let origin_b = tracker_b.world_origin();
    let direction_a = tracker_a.world_ray_direction(pixel_a);
    let direction_b = tracker_b.world_ray_direction(pixel_b);

    let cosine = direction_a.dot(&direction_b);
    let separation = 1.0 - cosine * cosine;
    if separation < MIN_RAY_SEPARATION {
        return None;
    }

    let offset = origin_a - origin_b;
    let along_a = direction_a.dot(&offset);
    let along_b = direction_b.dot(&offset);
    let distance_a = (cosine * along_b - along_a) / separation;
    let distance_b = (along_b - cosine * along_a) / separation;

    let closest_a = origin_a + direction_a * distance_a;
    let closest_b = origin_b + direction_b * distance_b;
    let midpoint = (closest_a + closest_b) * 0.5;
    midpoint.all_finite().then_some(midpoint)
}

/// World pose of a light bar seen by two trackers.
///
/// Each of the seven fiducials is triangulated, a plane is fitted through them, and
/// the bar's front (local -Z) is taken as the plane normal facing the first tracker.
/// Local +X follows the top edge of the quad.
pub fn triangulate_world_pose(
    model: &[Vector3<f32>; 7],
    tracker_a: &TrackerGeometry,
    points_a: &[Point2<f32>; 7],
    tracker_b: &TrackerGeometry,
    points_b: &[Point2<f32>; 7],
) -> Option<Pose> {
    let mut world = [Vector3::zeros(); 7];
    for (index, point) in world.iter_mut().enumerate() {
        *point = triangulate_world_position(tracker_a, &points_a[index], tracker_b, &points_b[index])?;
    }

    let (centroid, mut normal) = fit_plane(&world)?;
    if normal.dot(&(tracker_a.world_origin() - centroid)) < 0.0 {
        normal = -normal;
    }

    // quad[0] is top-right, quad[1] top-left
    let top_edge = world[3] - world[4];
    let x_axis = (top_edge - normal * top_edge.dot(&normal)).safe_normalize();
    if x_axis == Vector3::zeros() {
        return None;
    }
    let z_axis = -normal;
    let y_axis = z_axis.cross(&x_axis);
    let rotation = Rotation3::from_matrix_unchecked(Matrix3::from_columns(&[x_axis, y_axis, z_axis]));
    let orientation = UnitQuaternion::from_rotation_matrix(&rotation);

    let model_centroid = model.iter().sum::<Vector3<f32>>() / 7.0;
    Some(Pose::new(orientation, centroid - orientation * model_centroid))
}

/// Outcome of an iterative light-bar solve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightBarSolve {
    /// Tracker-relative pose
    pub pose: Pose,
    /// Root-mean-square reprojection error in pixels
    pub reprojection_rms: f32,
    /// Tilt about the tracker's X and Y axes is within the plausible range
    pub orientation_plausible: bool,
}

impl LightBarSolve {
    /// The solve is usable as a measurement
    pub fn converged(&self) -> bool {
        self.reprojection_rms <= MAX_REPROJECTION_RMS_PX
            && self.pose.position_cm.all_finite()
            && self.pose.position_cm.z > 0.0
    }
}

/// A previous tracker-relative pose is only a useful seed if it is nearby
pub fn is_usable_seed(seed: &Pose) -> bool {
    seed.position_cm.all_finite() && seed.position_cm.norm() < MAX_SEED_DISTANCE_CM && seed.position_cm.z > 0.0
}

fn project_model(intrinsics: &TrackerIntrinsics, model: &[Vector3<f32>; 7], pose: &Pose) -> Option<Residuals> {
    let mut projected = Residuals::zeros();
    for (index, point) in model.iter().enumerate() {
        let pixel = intrinsics.project(&(pose.orientation * point + pose.position_cm))?;
        projected[2 * index] = pixel.x;
        projected[2 * index + 1] = pixel.y;
    }
    Some(projected)
}

fn observed_pixels(image: &[Point2<f32>; 7]) -> Residuals {
    let mut observed = Residuals::zeros();
    for (index, pixel) in image.iter().enumerate() {
        observed[2 * index] = pixel.x;
        observed[2 * index + 1] = pixel.y;
    }
    observed
}

/// Apply a `[δθ, δt]` step, rotation applied on the tracker side
fn perturb(pose: &Pose, step: &Vector6<f32>) -> Pose {
    let rotation = UnitQuaternion::from_scaled_axis(Vector3::new(step[0], step[1], step[2]));
    Pose::new(
        rotation * pose.orientation,
        pose.position_cm + Vector3::new(step[3], step[4], step[5]),
    )
}

fn tilt_is_plausible(orientation: &UnitQuaternion<f32>) -> bool {
    let (about_x, about_y, _) = orientation.euler_angles();
    let limit = MAX_LIGHT_BAR_TILT_DEGREES * DEG_TO_RAD;
    about_x.abs() < limit && about_y.abs() < limit
}

/// Pose seed from the apparent width of the quad, facing the tracker
pub fn bootstrap_light_bar_seed(
    intrinsics: &TrackerIntrinsics,
    model: &[Vector3<f32>; 7],
    image: &[Point2<f32>; 7],
) -> Option<Pose> {
    let model_width = (model[3] - model[4]).norm();
    let image_width = (image[3] - image[4]).norm();
    if model_width <= f32::EPSILON || image_width <= f32::EPSILON {
        return None;
    }

    let depth = intrinsics.mean_focal_length() * model_width / image_width;
    let image_center = image[3..].iter().fold(Vector3::zeros(), |acc, p| acc + Vector3::new(p.x, p.y, 0.0)) / 4.0;
    let model_center = model[3..].iter().sum::<Vector3<f32>>() / 4.0;
    let ray = intrinsics.unproject(&Point2::new(image_center.x, image_center.y));

    let position = ray * depth - model_center;
    position.all_finite().then(|| Pose::new(UnitQuaternion::identity(), position))
}

/// Iterative pose-from-projection for a seven-point light bar.
///
/// Damped Gauss-Newton over a rotation and translation step with a numeric
/// Jacobian, starting at `seed`. Returns `None` if the model falls behind the
/// camera at any iterate; callers check [`LightBarSolve::converged`] before using
/// the pose.
pub fn solve_pose_from_projection(
    intrinsics: &TrackerIntrinsics,
    model: &[Vector3<f32>; 7],
    image: &[Point2<f32>; 7],
    seed: &Pose,
) -> Option<LightBarSolve> {
    let observed = observed_pixels(image);
    let mut pose = *seed;
    let mut residuals = project_model(intrinsics, model, &pose)? - observed;

    for _ in 0..MAX_SOLVE_ITERATIONS {
        let mut jacobian = Jacobian::zeros();
        for column in 0..6 {
            let delta = if column < 3 { ROTATION_STEP } else { TRANSLATION_STEP };
            let mut step = Vector6::zeros();
            step[column] = delta;
            let forward = project_model(intrinsics, model, &perturb(&pose, &step))?;
            step[column] = -delta;
            let backward = project_model(intrinsics, model, &perturb(&pose, &step))?;
            jacobian.set_column(column, &((forward - backward) / (2.0 * delta)));
        }

        let normal = jacobian.transpose() * jacobian;
        let damped = normal + Matrix6::from_diagonal(&normal.diagonal()) * SOLVE_DAMPING;
        let gradient = jacobian.transpose() * residuals;
        let step = -(damped.cholesky()?.solve(&gradient));

        let candidate = perturb(&pose, &step);
        let candidate_residuals = project_model(intrinsics, model, &candidate)? - observed;
        if candidate_residuals.norm_squared() > residuals.norm_squared() {
            break;
        }
        pose = candidate;
        residuals = candidate_residuals;

        if step.norm() < SOLVE_CONVERGENCE_STEP {
            break;
        }
    }

    let reprojection_rms = (residuals.norm_squared() / 7.0).sqrt();
    Some(LightBarSolve {
        pose,
        reprojection_rms: if reprojection_rms.is_finite() { reprojection_rms } else { f32::INFINITY },
        orientation_plausible: tilt_is_plausible(&pose.orientation),
    })
}

/// Tracker-relative pose recovered from one projection
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PoseFromProjection {
    Solved {
        pose: Pose,
        orientation_valid: bool,
    },
    /// Nothing usable this tick; `seed` primes the next light-bar solve
    Rejected { seed: Option<Pose> },
}

/// What a tracker needs to find a controller in its next frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionRequest {
    pub controller_id: usize,
    pub tracking_color: TrackingColorId,
    pub shape: TrackingShape,
    /// Previous projection, used to seed the region of interest
    pub previous_projection: Option<TrackingProjection>,
    /// How far ahead (s) to shift the ROI along the controller's motion
    pub roi_prediction_time: f32,
    /// Discard the tracked ROI and search the whole frame
    pub enforce_new_roi: bool,
}

/// A tracker as seen by the fusion core.
///
/// Implemented by the camera pipeline. Frame capture and blob detection happen
/// before any of these calls; they only report results.
pub trait TrackerView: Send {
    fn tracker_id(&self) -> usize;

    fn is_open(&self) -> bool;

    /// A frame has arrived that no controller has consumed yet
    fn has_unpublished_frame(&self) -> bool;

    /// Capture time of the newest frame
    fn last_new_data_timestamp(&self) -> Option<Instant>;

    fn geometry(&self) -> &TrackerGeometry;

    /// Locate the controller's tracking shape in the newest frame
    fn compute_projection_for_controller(&self, request: &ProjectionRequest) -> Option<TrackingProjection>;

    /// Recover a tracker-relative pose from a projection.
    ///
    /// Spheres use range-from-size. Light bars run the iterative solve from
    /// `previous`; without a usable seed a width-based bootstrap is returned as the
    /// next seed and the estimate is rejected.
    fn compute_pose_for_projection(
        &self,
        projection: &TrackingProjection,
        shape: &TrackingShape,
        previous: Option<&Pose>,
    ) -> PoseFromProjection {
        compute_pose_for_projection(&self.geometry().intrinsics, projection, shape, previous)
    }
}

/// Default pose recovery shared by every [`TrackerView`]
pub fn compute_pose_for_projection(
    intrinsics: &TrackerIntrinsics,
    projection: &TrackingProjection,
    shape: &TrackingShape,
    previous: Option<&Pose>,
) -> PoseFromProjection {
    match (shape, projection.light_bar_points()) {
        (TrackingShape::Sphere { radius_cm }, None) => match sphere_position(intrinsics, projection, *radius_cm) {
            Some(position) => PoseFromProjection::Solved {
                pose: Pose::new(UnitQuaternion::identity(), position),
                orientation_valid: false,
            },
            None => PoseFromProjection::Rejected { seed: None },
        },
        (TrackingShape::LightBar { .. }, Some(image)) => {
            let Some(model) = shape.light_bar_points() else {
                return PoseFromProjection::Rejected { seed: None };
            };
            let Some(seed) = previous.filter(|p| is_usable_seed(p)) else {
                return PoseFromProjection::Rejected {
                    seed: bootstrap_light_bar_seed(intrinsics, &model, &image),
                };
            };
            match solve_pose_from_projection(intrinsics, &model, &image, seed) {
                Some(solve) if solve.converged() => PoseFromProjection::Solved {
                    pose: solve.pose,
                    orientation_valid: solve.orientation_plausible,
                },
                _ => PoseFromProjection::Rejected {
                    seed: bootstrap_light_bar_seed(intrinsics, &model, &image),
                },
            }
        }
        _ => {
            debug_assert!(false, "projection shape does not match tracking shape");
            warn!("projection shape does not match tracking shape, ignoring projection");
            PoseFromProjection::Rejected { seed: None }
        }
    }
}

/// Tracker-relative sphere center from the ellipse's size and center
fn sphere_position(intrinsics: &TrackerIntrinsics, projection: &TrackingProjection, radius_cm: f32) -> Option<Vector3<f32>> {
    let ProjectionShape::Ellipse { center, half_x_extent, half_y_extent, .. } = projection.shape else {
        return None;
    };
    let radius_px = half_x_extent.min(half_y_extent);
    if radius_px <= f32::EPSILON {
        return None;
    }

    let angular_radius = (radius_px / intrinsics.mean_focal_length()).atan();
    let distance = radius_cm / angular_radius.sin();
    let position = intrinsics.unproject(&center).safe_normalize() * distance;
    position.all_finite().then_some(position)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn light_bar_model() -> [Vector3<f32>; 7] {
        [
            Vector3::new(-5.0, 1.5, 0.0),
            Vector3::new(5.0, 1.5, 0.0),
            Vector3::new(0.0, -1.5, 0.0),
            Vector3::new(7.5, 2.5, 0.0),
            Vector3::new(-7.5, 2.5, 0.0),
            Vector3::new(-7.5, -2.5, 0.0),
            Vector3::new(7.5, -2.5, 0.0),
        ]
    }

    fn image_of(intrinsics: &TrackerIntrinsics, model: &[Vector3<f32>; 7], pose: &Pose) -> [Point2<f32>; 7] {
        let mut image = [Point2::origin(); 7];
        for (pixel, point) in image.iter_mut().zip(model.iter()) {
            *pixel = intrinsics.project(&(pose.orientation * point + pose.position_cm)).unwrap();
        }
        image
    }

    #[test]
    fn test_project_unproject() {
        let intrinsics = TrackerIntrinsics::default();
        let point = Vector3::new(10.0, -4.0, 80.0);
        let pixel = intrinsics.project(&point).unwrap();
        assert!(pixel.x > intrinsics.principal_x);
        assert!(pixel.y > intrinsics.principal_y);
        assert_relative_eq!(intrinsics.unproject(&pixel) * point.z, point, epsilon = 1e-3);
        assert!(intrinsics.project(&Vector3::new(0.0, 0.0, -1.0)).is_none());
    }

    #[test]
    fn test_triangulation_recovers_point_and_rejects_parallel_rays() {
        let facing_in = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.3);
        let a = TrackerGeometry::new(
            TrackerIntrinsics::default(),
            Pose::new(facing_in, Vector3::new(-60.0, 10.0, 0.0)),
        );
        let b = TrackerGeometry::new(
            TrackerIntrinsics::default(),
            Pose::new(facing_in.inverse(), Vector3::new(60.0, -5.0, 0.0)),
        );
        let target = Vector3::new(4.0, 12.0, 180.0);
        let pixel_a = a.project_world_point(&target).unwrap();
        let pixel_b = b.project_world_point(&target).unwrap();

        let estimate = triangulate_world_position(&a, &pixel_a, &b, &pixel_b).unwrap();
        assert_relative_eq!(estimate, target, epsilon = 0.05);

        let center = Point2::new(320.0, 240.0);
        assert!(triangulate_world_position(&a, &center, &a, &center).is_none());
    }

    #[test]
    fn test_sphere_range_from_size() {
        let intrinsics = TrackerIntrinsics::default();
        let radius_cm = 2.25;
        let distance: f32 = 100.0;
        let radius_px = intrinsics.focal_length_x * (radius_cm / distance).asin().tan();
        let projection = TrackingProjection::ellipse(
            Point2::new(intrinsics.principal_x, intrinsics.principal_y),
            radius_px,
            radius_px * 1.2,
            0.0,
        );

        match compute_pose_for_projection(&intrinsics, &projection, &TrackingShape::Sphere { radius_cm }, None) {
            PoseFromProjection::Solved { pose, orientation_valid } => {
                assert!(!orientation_valid);
                assert_relative_eq!(pose.position_cm, Vector3::new(0.0, 0.0, distance), epsilon = 1e-2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_light_bar_solve_from_nearby_seed() {
        let intrinsics = TrackerIntrinsics::default();
        let model = light_bar_model();
        let truth = Pose::new(
            UnitQuaternion::from_euler_angles(0.1, -0.15, 0.05),
            Vector3::new(8.0, -3.0, 90.0),
        );
        let image = image_of(&intrinsics, &model, &truth);
        let seed = Pose::new(UnitQuaternion::from_euler_angles(0.0, -0.05, 0.0), Vector3::new(5.0, 0.0, 100.0));

        let solve = solve_pose_from_projection(&intrinsics, &model, &image, &seed).unwrap();
        assert!(solve.converged());
        assert!(solve.orientation_plausible);
        assert!(solve.reprojection_rms < 0.1);
        assert_relative_eq!(solve.pose.position_cm, truth.position_cm, epsilon = 0.5);
        assert!(solve.pose.orientation.angle_to(&truth.orientation) < 0.02);
    }

    #[test]
    fn test_light_bar_without_seed_bootstraps() {
        let intrinsics = TrackerIntrinsics::default();
        let shape = TrackingShape::LightBar {
            triangle: [light_bar_model()[0], light_bar_model()[1], light_bar_model()[2]],
            quad: [light_bar_model()[3], light_bar_model()[4], light_bar_model()[5], light_bar_model()[6]],
        };
        let truth = Pose::new(UnitQuaternion::identity(), Vector3::new(0.0, 0.0, 120.0));
        let image = image_of(&intrinsics, &light_bar_model(), &truth);
        let projection = TrackingProjection::light_bar(
            [image[0], image[1], image[2]],
            [image[3], image[4], image[5], image[6]],
        );

        let seed = match compute_pose_for_projection(&intrinsics, &projection, &shape, None) {
            PoseFromProjection::Rejected { seed: Some(seed) } => seed,
            other => panic!("unexpected {other:?}"),
        };
        assert_relative_eq!(seed.position_cm, truth.position_cm, epsilon = 1.0);

        // a distant seed is ignored
        let far = Pose::new(UnitQuaternion::identity(), Vector3::new(0.0, 0.0, 400.0));
        assert!(!is_usable_seed(&far));

        match compute_pose_for_projection(&intrinsics, &projection, &shape, Some(&seed)) {
            PoseFromProjection::Solved { pose, orientation_valid } => {
                assert!(orientation_valid);
                assert_relative_eq!(pose.position_cm, truth.position_cm, epsilon = 0.5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_implausible_tilt_is_flagged() {
        assert!(tilt_is_plausible(&UnitQuaternion::from_euler_angles(0.2, 0.2, 1.5)));
        assert!(!tilt_is_plausible(&UnitQuaternion::from_euler_angles(0.0, 40.0 * DEG_TO_RAD, 0.0)));
    }

    #[test]
    fn test_light_bar_world_pose_from_two_trackers() {
        let model = light_bar_model();
        let a = TrackerGeometry::new(
            TrackerIntrinsics::default(),
            Pose::new(UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.25), Vector3::new(-50.0, 0.0, 0.0)),
        );
        let b = TrackerGeometry::new(
            TrackerIntrinsics::default(),
            Pose::new(UnitQuaternion::from_axis_angle(&Vector3::y_axis(), -0.25), Vector3::new(50.0, 0.0, 0.0)),
        );
        let truth = Pose::new(
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.1),
            Vector3::new(0.0, 5.0, 200.0),
        );

        let pixels = |tracker: &TrackerGeometry| {
            let mut image = [Point2::origin(); 7];
            for (pixel, point) in image.iter_mut().zip(model.iter()) {
                *pixel = tracker
                    .project_world_point(&(truth.orientation * point + truth.position_cm))
                    .unwrap();
            }
            image
        };

        let pose = triangulate_world_pose(&model, &a, &pixels(&a), &b, &pixels(&b)).unwrap();
        assert_relative_eq!(pose.position_cm, truth.position_cm, epsilon = 0.1);
        assert!(pose.orientation.angle_to(&truth.orientation) < 0.01);
    }
}
