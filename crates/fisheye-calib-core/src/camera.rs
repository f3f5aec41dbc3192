//! Equidistant fisheye camera model.
//!
//! A camera-frame point `(x, y, z)` is projected as
//!
//! ```text
//! a = x/z, b = y/z, r = sqrt(a² + b²), θ = atan(r)
//! θd = θ (1 + k1 θ² + k2 θ⁴ + k3 θ⁶ + k4 θ⁸)
//! u = fx (θd/r) a + cx,  v = fy (θd/r) b + cy
//! ```
//!
//! Skew is fixed at zero.

use crate::ModelError;
use nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector3, Vector6};
use serde::{Deserialize, Serialize};

const RADIUS_EPS: f64 = 1e-8;
const NEWTON_ITERS: usize = 20;
const NEWTON_EPS: f64 = 1e-12;
const NEWTON_MAX_FIX: f64 = 0.9;

/// Pinhole intrinsics with zero skew, in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Intrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Result<Self, ModelError> {
        let k = Self { fx, fy, cx, cy };
        k.validate()?;
        Ok(k)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if !(self.fx.is_finite() && self.fy.is_finite() && self.cx.is_finite() && self.cy.is_finite())
        {
            return Err(ModelError::NonFiniteIntrinsics);
        }
        if self.fx <= 0.0 || self.fy <= 0.0 {
            return Err(ModelError::NonPositiveFocal {
                fx: self.fx,
                fy: self.fy,
            });
        }
        Ok(())
    }

    /// Parse a row-major `K` matrix `[[fx,0,cx],[0,fy,cy],[0,0,1]]`.
    pub fn from_matrix(k: [[f64; 3]; 3]) -> Result<Self, ModelError> {
        if k.iter().flatten().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFiniteIntrinsics);
        }
        if k[0][1] != 0.0 {
            return Err(ModelError::IntrinsicLayout("skew must be zero"));
        }
        if k[1][0] != 0.0 || k[2][0] != 0.0 || k[2][1] != 0.0 || k[2][2] != 1.0 {
            return Err(ModelError::IntrinsicLayout(
                "lower triangle must be zero and K[2][2] must be 1",
            ));
        }
        Self::new(k[0][0], k[1][1], k[0][2], k[1][2])
    }

    pub fn to_matrix(&self) -> [[f64; 3]; 3] {
        [
            [self.fx, 0.0, self.cx],
            [0.0, self.fy, self.cy],
            [0.0, 0.0, 1.0],
        ]
    }

    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    /// Pixel to normalized image-plane coordinates.
    #[inline]
    pub fn normalize(&self, px: Point2<f64>) -> Point2<f64> {
        Point2::new((px.x - self.cx) / self.fx, (px.y - self.cy) / self.fy)
    }

    /// Normalized image-plane coordinates to pixel.
    #[inline]
    pub fn denormalize(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::new(self.fx * p.x + self.cx, self.fy * p.y + self.cy)
    }
}

/// Fisheye radial coefficients `(k1, k2, k3, k4)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub k3: f64,
    pub k4: f64,
}

impl Distortion {
    pub const ZERO: Distortion = Distortion {
        k1: 0.0,
        k2: 0.0,
        k3: 0.0,
        k4: 0.0,
    };

    pub fn from_array(d: [f64; 4]) -> Result<Self, ModelError> {
        if d.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFiniteDistortion);
        }
        Ok(Self {
            k1: d[0],
            k2: d[1],
            k3: d[2],
            k4: d[3],
        })
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.k1, self.k2, self.k3, self.k4]
    }

    /// Distorted angle `θd(θ)`.
    #[inline]
    pub fn theta_d(&self, theta: f64) -> f64 {
        let t2 = theta * theta;
        theta * (1.0 + t2 * (self.k1 + t2 * (self.k2 + t2 * (self.k3 + t2 * self.k4))))
    }

    /// `dθd/dθ`.
    #[inline]
    pub fn theta_d_derivative(&self, theta: f64) -> f64 {
        let t2 = theta * theta;
        1.0 + t2 * (3.0 * self.k1 + t2 * (5.0 * self.k2 + t2 * (7.0 * self.k3 + t2 * 9.0 * self.k4)))
    }

    /// Invert `θd(θ)` with damped Newton steps.
    ///
    /// Returns `None` when the iteration does not settle or flips sign, which
    /// happens for distorted radii outside the monotonic part of the polynomial.
    pub fn undistort_theta(&self, theta_d: f64) -> Option<f64> {
        if !theta_d.is_finite() {
            return None;
        }
        if theta_d.abs() < RADIUS_EPS {
            return Some(theta_d);
        }
        let mut theta = theta_d;
        for _ in 0..NEWTON_ITERS {
            let deriv = self.theta_d_derivative(theta);
            if deriv.abs() < 1e-12 {
                return None;
            }
            let fix = ((self.theta_d(theta) - theta_d) / deriv).clamp(-NEWTON_MAX_FIX, NEWTON_MAX_FIX);
            theta -= fix;
            if fix.abs() < NEWTON_EPS {
                break;
            }
        }
        let residual = (self.theta_d(theta) - theta_d).abs();
        let flipped = (theta_d > 0.0) != (theta > 0.0);
        (residual < 1e-9 && !flipped).then_some(theta)
    }

    /// Forward distortion of a normalized undistorted point.
    #[inline]
    pub fn distort(&self, p: Point2<f64>) -> Point2<f64> {
        let r = (p.x * p.x + p.y * p.y).sqrt();
        let scale = if r < RADIUS_EPS {
            1.0
        } else {
            self.theta_d(r.atan()) / r
        };
        Point2::new(p.x * scale, p.y * scale)
    }
}

/// Rigid transform from pattern (world) coordinates to the camera frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose {
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
}

impl Pose {
    pub fn new(rotation: Rotation3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    #[inline]
    pub fn transform(&self, p: &Point3<f64>) -> Vector3<f64> {
        self.rotation * p.coords + self.translation
    }

    /// Left-multiplicative update: `R <- exp(ω) R`, `t <- t + δt` with
    /// `delta = [ω, δt]`.
    pub fn perturbed(&self, delta: &Vector6<f64>) -> Pose {
        let omega = Vector3::new(delta[0], delta[1], delta[2]);
        let dt = Vector3::new(delta[3], delta[4], delta[5]);
        Pose {
            rotation: Rotation3::new(omega) * self.rotation,
            translation: self.translation + dt,
        }
    }
}

/// Intrinsics plus fisheye distortion.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FisheyeCamera {
    pub intrinsics: Intrinsics,
    pub distortion: Distortion,
}

impl FisheyeCamera {
    pub fn new(intrinsics: Intrinsics, distortion: Distortion) -> Self {
        Self {
            intrinsics,
            distortion,
        }
    }

    /// Distorted pixel of a normalized undistorted point `(x/z, y/z)`.
    #[inline]
    pub fn project_normalized(&self, p: Point2<f64>) -> Point2<f64> {
        self.intrinsics.denormalize(self.distortion.distort(p))
    }

    /// Project a camera-frame point; `None` behind the camera.
    #[inline]
    pub fn project(&self, p_cam: &Vector3<f64>) -> Option<Point2<f64>> {
        if p_cam.z <= RADIUS_EPS {
            return None;
        }
        Some(self.project_normalized(Point2::new(p_cam.x / p_cam.z, p_cam.y / p_cam.z)))
    }

    /// Unit viewing ray of a distorted pixel.
    pub fn pixel_to_ray(&self, px: Point2<f64>) -> Option<Vector3<f64>> {
        let pd = self.intrinsics.normalize(px);
        let theta_d = (pd.x * pd.x + pd.y * pd.y).sqrt();
        if theta_d < RADIUS_EPS {
            return Some(Vector3::z());
        }
        let theta = self.distortion.undistort_theta(theta_d)?;
        let s = theta.sin() / theta_d;
        Some(Vector3::new(pd.x * s, pd.y * s, theta.cos()))
    }

    /// Normalized undistorted coordinates of a distorted pixel.
    pub fn undistort_pixel(&self, px: Point2<f64>) -> Option<Point2<f64>> {
        let ray = self.pixel_to_ray(px)?;
        if ray.z <= 1e-6 {
            return None;
        }
        Some(Point2::new(ray.x / ray.z, ray.y / ray.z))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn camera() -> FisheyeCamera {
        FisheyeCamera::new(
            Intrinsics::new(310.0, 305.0, 322.0, 238.0).unwrap(),
            Distortion::from_array([0.08, -0.03, 0.01, -0.002]).unwrap(),
        )
    }

    #[test]
    fn matrix_round_trip_and_layout_checks() {
        let k = camera().intrinsics;
        assert_eq!(Intrinsics::from_matrix(k.to_matrix()).unwrap(), k);

        let mut skewed = k.to_matrix();
        skewed[0][1] = 0.5;
        assert!(matches!(
            Intrinsics::from_matrix(skewed),
            Err(ModelError::IntrinsicLayout(_))
        ));

        let mut negative = k.to_matrix();
        negative[1][1] = -1.0;
        assert!(matches!(
            Intrinsics::from_matrix(negative),
            Err(ModelError::NonPositiveFocal { .. })
        ));

        assert_eq!(
            Distortion::from_array([0.0, f64::NAN, 0.0, 0.0]),
            Err(ModelError::NonFiniteDistortion)
        );
    }

    #[test]
    fn theta_inverse_recovers_angle() {
        let d = camera().distortion;
        for theta in [0.0, 0.05, 0.4, 0.9, 1.3] {
            let back = d.undistort_theta(d.theta_d(theta)).unwrap();
            assert_relative_eq!(back, theta, epsilon = 1e-10);
        }
    }

    #[test]
    fn pixel_ray_round_trip() {
        let cam = camera();
        for p in [
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.3, -0.2, 1.0),
            Vector3::new(-1.5, 0.8, 1.0),
            Vector3::new(2.0, 2.5, 0.7),
        ] {
            let px = cam.project(&p).unwrap();
            let ray = cam.pixel_to_ray(px).unwrap();
            let expected = p.normalize();
            assert_relative_eq!(ray, expected, epsilon = 1e-9);
        }
    }

    #[test]
    fn zero_distortion_is_equidistant() {
        let cam = FisheyeCamera::new(camera().intrinsics, Distortion::ZERO);
        let px = cam.project_normalized(Point2::new(1.0, 0.0));
        // θ = atan(1) lands at fx * π/4 from the centre.
        assert_relative_eq!(px.x, 322.0 + 310.0 * std::f64::consts::FRAC_PI_4, epsilon = 1e-9);
        assert_relative_eq!(px.y, 238.0, epsilon = 1e-12);
    }

    #[test]
    fn behind_camera_does_not_project() {
        assert!(camera().project(&Vector3::new(0.1, 0.1, -1.0)).is_none());
    }

    #[test]
    fn left_update_rotates_in_camera_frame() {
        let pose = Pose::new(Rotation3::identity(), Vector3::new(0.0, 0.0, 5.0));
        let delta = Vector6::new(0.0, 0.0, std::f64::consts::FRAC_PI_2, 1.0, 0.0, 0.0);
        let moved = pose.perturbed(&delta);
        let p = moved.transform(&Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p, Vector3::new(1.0, 1.0, 5.0), epsilon = 1e-12);
    }
}
