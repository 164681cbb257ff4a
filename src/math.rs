//! Vector and quaternion helpers shared by the projection, triangulation and filter code

use nalgebra::{Matrix3, Matrix4, Quaternion, SymmetricEigen, UnitQuaternion, Vector3, Vector4};

/// Mathematical constants
pub const DEG_TO_RAD: f32 = core::f32::consts::PI / 180.0;
pub const RAD_TO_DEG: f32 = 180.0 / core::f32::consts::PI;

/// Standard gravity expressed in the position filters' unit system
pub const GRAVITY_CM_PER_SEC_SQR: f32 = 980.665;

/// Extension trait for Vector3 operations
pub trait Vector3Ext {
    /// Normalize the vector, returning zero vector if magnitude is zero
    fn safe_normalize(&self) -> Vector3<f32>;

    /// True when every component is a finite number
    fn all_finite(&self) -> bool;
}

impl Vector3Ext for Vector3<f32> {
    fn safe_normalize(&self) -> Vector3<f32> {
        let mag = self.norm();
        if mag > f32::EPSILON {
            *self / mag
        } else {
            Vector3::zeros()
        }
    }

    fn all_finite(&self) -> bool {
        self.iter().all(|c| c.is_finite())
    }
}

/// Extension trait for UnitQuaternion operations
pub trait QuaternionExt {
    /// Rotation about the world up axis (+Y) by the given angle in degrees
    fn from_yaw_degrees(degrees: f32) -> UnitQuaternion<f32>;

    /// Rotate forward in time by a world-frame angular velocity
    ///
    /// # Arguments
    /// * `angular_velocity` - World-frame angular velocity in rad/s
    /// * `seconds` - Extrapolation interval, values <= 0 return the quaternion unchanged
    fn extrapolate(&self, angular_velocity: &Vector3<f32>, seconds: f32) -> UnitQuaternion<f32>;
}

impl QuaternionExt for UnitQuaternion<f32> {
    fn from_yaw_degrees(degrees: f32) -> UnitQuaternion<f32> {
        UnitQuaternion::from_axis_angle(&Vector3::y_axis(), degrees * DEG_TO_RAD)
    }

    fn extrapolate(&self, angular_velocity: &Vector3<f32>, seconds: f32) -> UnitQuaternion<f32> {
        if seconds <= 0.0 {
            return *self;
        }
        UnitQuaternion::from_scaled_axis(angular_velocity * seconds) * self
    }
}

/// Clamp a value into `[0, 1]`
pub fn clamp01(x: f32) -> f32 {
    x.clamp(0.0, 1.0)
}

/// Weighted average of rotations.
///
/// Uses the eigenvector of the weighted outer-product sum, which is insensitive to the
/// sign ambiguity of quaternions. Returns `None` if the weights sum to zero or the
/// inputs are empty.
///
/// # Example
/// ```
/// use nalgebra::{UnitQuaternion, Vector3};
/// use controller_fusion::math::weighted_quaternion_average;
///
/// let a = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.2);
/// let b = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.4);
/// let mean = weighted_quaternion_average(&[a, b], &[1.0, 1.0]).unwrap();
/// assert!((mean.angle() - 0.3).abs() < 1e-4);
/// ```
pub fn weighted_quaternion_average(
    quaternions: &[UnitQuaternion<f32>],
    weights: &[f32],
) -> Option<UnitQuaternion<f32>> {
    let total_weight: f32 = weights.iter().take(quaternions.len()).sum();
    if quaternions.is_empty() || total_weight <= f32::EPSILON {
        return None;
    }

    let mut accumulator = Matrix4::<f32>::zeros();
    for (q, w) in quaternions.iter().zip(weights) {
        let v: Vector4<f32> = q.as_ref().coords;
        accumulator += v * v.transpose() * (*w / total_weight);
    }

    let eigen = SymmetricEigen::new(accumulator);
    let dominant = eigen.eigenvectors.column(eigen.eigenvalues.imax()).into_owned();
    let mut mean = Quaternion::from_vector(dominant);

    // keep the hemisphere of the first input so identical inputs come back unchanged
    if mean.coords.dot(&quaternions[0].as_ref().coords) < 0.0 {
        mean = -mean;
    }
    UnitQuaternion::try_new(mean, f32::EPSILON)
}

/// Least-squares plane through a point set.
///
/// Returns the centroid and unit normal, or `None` for fewer than three points.
/// The normal's sign is arbitrary; callers orient it.
pub fn fit_plane(points: &[Vector3<f32>]) -> Option<(Vector3<f32>, Vector3<f32>)> {
    if points.len() < 3 {
        return None;
    }

    let centroid = points.iter().fold(Vector3::zeros(), |acc, p| acc + p) / points.len() as f32;
    let mut covariance = Matrix3::<f32>::zeros();
    for p in points {
        let d = p - centroid;
        covariance += d * d.transpose();
    }

    let eigen = SymmetricEigen::new(covariance);
    let normal = eigen.eigenvectors.column(eigen.eigenvalues.imin()).into_owned().safe_normalize();
    if normal.norm_squared() < 0.5 {
        return None;
    }
    Some((centroid, normal))
}
