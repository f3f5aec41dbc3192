//! Projection with analytic Jacobians.
//!
//! Intrinsic parameter order is `[fx, fy, cx, cy, k1, k2, k3, k4]`; pose
//! order is `[ω, δt]` for the left update in [`Pose::perturbed`].

use fisheye_calib_core::{Distortion, FisheyeCamera, Intrinsics, Pose};
use nalgebra::{Matrix2x3, Matrix3, Point3, SMatrix, SVector, Vector2, Vector3};

pub(crate) const NUM_INTRINSICS: usize = 8;
pub(crate) const NUM_POSE: usize = 6;

pub(crate) type IntrinsicVector = SVector<f64, NUM_INTRINSICS>;
pub(crate) type IntrinsicJacobian = SMatrix<f64, 2, NUM_INTRINSICS>;
pub(crate) type PoseJacobian = SMatrix<f64, 2, NUM_POSE>;

const RADIUS_EPS: f64 = 1e-8;
const MIN_DEPTH: f64 = 1e-8;

pub(crate) struct Projection {
    pub uv: Vector2<f64>,
    pub d_intrinsics: IntrinsicJacobian,
    pub d_pose: PoseJacobian,
}

pub(crate) fn intrinsic_vector(cam: &FisheyeCamera) -> IntrinsicVector {
    let k = &cam.intrinsics;
    let d = &cam.distortion;
    IntrinsicVector::from([k.fx, k.fy, k.cx, k.cy, d.k1, d.k2, d.k3, d.k4])
}

/// Rebuild a camera from a parameter vector; `None` for non-finite values or
/// non-positive focal lengths.
pub(crate) fn camera_from_vector(q: &IntrinsicVector) -> Option<FisheyeCamera> {
    let intrinsics = Intrinsics::new(q[0], q[1], q[2], q[3]).ok()?;
    let distortion = Distortion::from_array([q[4], q[5], q[6], q[7]]).ok()?;
    Some(FisheyeCamera::new(intrinsics, distortion))
}

#[inline]
fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Project a pattern point through `pose` and `cam`, with derivatives of the
/// pixel with respect to the intrinsics and the pose update.
pub(crate) fn project_with_jacobians(
    cam: &FisheyeCamera,
    pose: &Pose,
    object: &Point3<f64>,
) -> Option<Projection> {
    let rotated = pose.rotation * object.coords;
    let pc = rotated + pose.translation;
    if pc.z <= MIN_DEPTH {
        return None;
    }
    let inv_z = 1.0 / pc.z;
    let a = pc.x * inv_z;
    let b = pc.y * inv_z;
    let r2 = a * a + b * b;
    let r = r2.sqrt();

    let dist = &cam.distortion;
    let k = &cam.intrinsics;

    let theta = r.atan();
    // s = θd / r and its derivative with respect to r.
    let (s, ds_dr) = if r > RADIUS_EPS {
        let theta_d = dist.theta_d(theta);
        let dtheta_d_dr = dist.theta_d_derivative(theta) / (1.0 + r2);
        (theta_d / r, (dtheta_d_dr * r - theta_d) / r2)
    } else {
        (1.0, 0.0)
    };
    let xd = s * a;
    let yd = s * b;
    let uv = Vector2::new(k.fx * xd + k.cx, k.fy * yd + k.cy);

    let (dxd_da, dxd_db, dyd_da, dyd_db) = if r > RADIUS_EPS {
        let g = ds_dr / r;
        (s + g * a * a, g * a * b, g * a * b, s + g * b * b)
    } else {
        (s, 0.0, 0.0, s)
    };

    let d_ab_d_pc = Matrix2x3::new(
        inv_z,
        0.0,
        -pc.x * inv_z * inv_z,
        0.0,
        inv_z,
        -pc.y * inv_z * inv_z,
    );
    let d_uv_d_ab = nalgebra::Matrix2::new(
        k.fx * dxd_da,
        k.fx * dxd_db,
        k.fy * dyd_da,
        k.fy * dyd_db,
    );
    let d_uv_d_pc = d_uv_d_ab * d_ab_d_pc;

    let mut d_pose = PoseJacobian::zeros();
    d_pose
        .fixed_view_mut::<2, 3>(0, 0)
        .copy_from(&(d_uv_d_pc * -skew(&rotated)));
    d_pose.fixed_view_mut::<2, 3>(0, 3).copy_from(&d_uv_d_pc);

    let mut d_intrinsics = IntrinsicJacobian::zeros();
    d_intrinsics[(0, 0)] = xd;
    d_intrinsics[(1, 1)] = yd;
    d_intrinsics[(0, 2)] = 1.0;
    d_intrinsics[(1, 3)] = 1.0;
    if r > RADIUS_EPS {
        // dθd/dk_i = θ^(2i+1), i = 1..4
        let t2 = theta * theta;
        let mut power = theta * t2;
        for i in 0..4 {
            d_intrinsics[(0, 4 + i)] = k.fx * a / r * power;
            d_intrinsics[(1, 4 + i)] = k.fy * b / r * power;
            power *= t2;
        }
    }

    Some(Projection {
        uv,
        d_intrinsics,
        d_pose,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Rotation3, Vector6};

    fn camera() -> FisheyeCamera {
        FisheyeCamera::new(
            Intrinsics::new(300.0, 296.0, 318.0, 242.0).unwrap(),
            Distortion::from_array([0.08, -0.03, 0.01, -0.002]).unwrap(),
        )
    }

    fn pose() -> Pose {
        Pose::new(
            Rotation3::from_euler_angles(0.4, -0.3, 0.2),
            Vector3::new(-0.5, 0.3, 2.0),
        )
    }

    #[test]
    fn matches_camera_projection() {
        let cam = camera();
        let pose = pose();
        let x = Point3::new(0.7, -0.4, 0.0);
        let proj = project_with_jacobians(&cam, &pose, &x).unwrap();
        let expected = cam.project(&pose.transform(&x)).unwrap();
        assert_relative_eq!(proj.uv.x, expected.x, epsilon = 1e-9);
        assert_relative_eq!(proj.uv.y, expected.y, epsilon = 1e-9);
    }

    #[test]
    fn jacobians_match_finite_differences() {
        let cam = camera();
        let pose = pose();
        let x = Point3::new(1.1, 0.6, 0.0);
        let proj = project_with_jacobians(&cam, &pose, &x).unwrap();
        let h = 1e-6;

        let q = intrinsic_vector(&cam);
        for i in 0..NUM_INTRINSICS {
            let mut qp = q;
            let mut qm = q;
            qp[i] += h;
            qm[i] -= h;
            let up = project_with_jacobians(&camera_from_vector(&qp).unwrap(), &pose, &x).unwrap();
            let um = project_with_jacobians(&camera_from_vector(&qm).unwrap(), &pose, &x).unwrap();
            let numeric = (up.uv - um.uv) / (2.0 * h);
            assert_relative_eq!(
                numeric,
                proj.d_intrinsics.column(i).into_owned(),
                epsilon = 1e-4,
                max_relative = 1e-5
            );
        }

        for i in 0..NUM_POSE {
            let mut delta = Vector6::zeros();
            delta[i] = h;
            let up = project_with_jacobians(&cam, &pose.perturbed(&delta), &x).unwrap();
            let um = project_with_jacobians(&cam, &pose.perturbed(&-delta), &x).unwrap();
            let numeric = (up.uv - um.uv) / (2.0 * h);
            assert_relative_eq!(
                numeric,
                proj.d_pose.column(i).into_owned(),
                epsilon = 1e-4,
                max_relative = 1e-5
            );
        }
    }

    #[test]
    fn optical_axis_has_finite_jacobian() {
        let cam = camera();
        let pose = Pose::new(Rotation3::identity(), Vector3::new(0.0, 0.0, 3.0));
        let proj = project_with_jacobians(&cam, &pose, &Point3::origin()).unwrap();
        assert_relative_eq!(proj.uv, Vector2::new(318.0, 242.0), epsilon = 1e-12);
        assert!(proj.d_pose.iter().all(|v| v.is_finite()));
        assert_relative_eq!(proj.d_pose[(0, 3)], 100.0, epsilon = 1e-9);
    }

    #[test]
    fn behind_camera_is_rejected() {
        let pose = Pose::new(Rotation3::identity(), Vector3::new(0.0, 0.0, -1.0));
        assert!(project_with_jacobians(&camera(), &pose, &Point3::origin()).is_none());
    }
}
