//! Per-view pose initialisation, refinement and conditioning.

use crate::model::{project_with_jacobians, NUM_POSE};
use fisheye_calib_core::{estimate_homography, FisheyeCamera, Pose};
use nalgebra::{DMatrix, Matrix3, Matrix6, Point2, Point3, Rotation3, Vector2, Vector3, Vector6};

/// Linear pose from the plane-to-normalised-image homography.
///
/// Observations are first undistorted with `cam`, so the homography already
/// lives in normalised coordinates and `K = I` in the decomposition.
pub(crate) fn init_pose(
    cam: &FisheyeCamera,
    object: &[Point3<f64>],
    image: &[Point2<f64>],
) -> Option<Pose> {
    let normalized = image
        .iter()
        .map(|&p| cam.undistort_pixel(p))
        .collect::<Option<Vec<_>>>()?;
    let plane: Vec<Point2<f64>> = object.iter().map(|p| Point2::new(p.x, p.y)).collect();
    let h = estimate_homography(&plane, &normalized)?;
    pose_from_homography(&h.h)
}

/// Decompose `H ~ [r1 r2 t]` for a board on `Z = 0`.
pub(crate) fn pose_from_homography(h: &Matrix3<f64>) -> Option<Pose> {
    let h1 = h.column(0).into_owned();
    let h2 = h.column(1).into_owned();
    let h3 = h.column(2).into_owned();

    let mean_norm = 0.5 * (h1.norm() + h2.norm());
    if mean_norm <= f64::EPSILON {
        return None;
    }
    let mut lambda = 1.0 / mean_norm;
    // The board sits in front of the camera.
    if lambda * h3.z < 0.0 {
        lambda = -lambda;
    }

    let r1 = lambda * h1;
    let r2 = lambda * h2;
    let r3 = r1.cross(&r2);
    let r = Matrix3::from_columns(&[r1, r2, r3]);

    // Nearest rotation in the Frobenius sense.
    let svd = r.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);
    let mut r_orth = u * v_t;
    if r_orth.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        r_orth = u_flipped * v_t;
    }

    let t: Vector3<f64> = lambda * h3;
    if !t.iter().all(|v| v.is_finite()) {
        return None;
    }
    Some(Pose::new(Rotation3::from_matrix_unchecked(r_orth), t))
}

/// Sum of squared reprojection residuals; `None` if a point falls behind the
/// camera.
pub(crate) fn view_cost(
    cam: &FisheyeCamera,
    pose: &Pose,
    object: &[Point3<f64>],
    image: &[Point2<f64>],
) -> Option<f64> {
    object.iter().zip(image).try_fold(0.0, |acc, (x, obs)| {
        let px = cam.project(&pose.transform(x))?;
        Some(acc + (px - *obs).norm_squared())
    })
}

/// Pose normal equations `JᵀJ`, `Jᵀe` and the cost at `pose`.
fn pose_normal_equations(
    cam: &FisheyeCamera,
    pose: &Pose,
    object: &[Point3<f64>],
    image: &[Point2<f64>],
) -> Option<(Matrix6<f64>, Vector6<f64>, f64)> {
    let mut jtj = Matrix6::zeros();
    let mut jte = Vector6::zeros();
    let mut cost = 0.0;
    for (x, obs) in object.iter().zip(image) {
        let proj = project_with_jacobians(cam, pose, x)?;
        let e: Vector2<f64> = proj.uv - obs.coords;
        jtj += proj.d_pose.transpose() * proj.d_pose;
        jte += proj.d_pose.transpose() * e;
        cost += e.norm_squared();
    }
    Some((jtj, jte, cost))
}

/// Damped Gauss-Newton on a single pose with the camera held fixed.
///
/// Never returns a pose with a higher cost than the input.
pub(crate) fn refine_pose(
    cam: &FisheyeCamera,
    pose: Pose,
    object: &[Point3<f64>],
    image: &[Point2<f64>],
    iters: usize,
) -> Pose {
    let mut pose = pose;
    let mut lambda = 1e-6;
    for _ in 0..iters {
        let Some((jtj, jte, cost)) = pose_normal_equations(cam, &pose, object, image) else {
            break;
        };
        let mut accepted = false;
        while lambda < 1e6 {
            let mut a = jtj;
            for i in 0..NUM_POSE {
                a[(i, i)] += lambda * (a[(i, i)] + 1e-9);
            }
            let Some(delta) = a.cholesky().map(|c| c.solve(&-jte)) else {
                lambda *= 10.0;
                continue;
            };
            let candidate = pose.perturbed(&delta);
            match view_cost(cam, &candidate, object, image) {
                Some(c) if c < cost => {
                    pose = candidate;
                    lambda = (lambda * 0.1).max(1e-12);
                    accepted = true;
                    if delta.norm() < 1e-12 || cost - c <= 1e-15 * cost {
                        return pose;
                    }
                    break;
                }
                _ => lambda *= 10.0,
            }
        }
        if !accepted {
            break;
        }
    }
    pose
}

/// Condition number of the Jacobi-scaled pose normal matrix.
///
/// Scaling by the diagonal removes the unit mismatch between rotation and
/// translation so the number reflects geometry, not parameterisation.
pub(crate) fn pose_condition(
    cam: &FisheyeCamera,
    pose: &Pose,
    object: &[Point3<f64>],
    image: &[Point2<f64>],
) -> f64 {
    match pose_normal_equations(cam, pose, object, image) {
        Some((jtj, _, _)) => scaled_condition(&DMatrix::from_iterator(
            NUM_POSE,
            NUM_POSE,
            jtj.iter().copied(),
        )),
        None => f64::INFINITY,
    }
}

/// `λmax / λmin` of `D⁻¹ A D⁻¹` with `D = sqrt(diag(A))`.
pub(crate) fn scaled_condition(a: &DMatrix<f64>) -> f64 {
    let n = a.nrows();
    if n == 0 {
        return 1.0;
    }
    let mut scale = Vec::with_capacity(n);
    for i in 0..n {
        let d = a[(i, i)];
        if d <= 0.0 || !d.is_finite() {
            return f64::INFINITY;
        }
        scale.push(1.0 / d.sqrt());
    }
    let scaled = DMatrix::from_fn(n, n, |r, c| a[(r, c)] * scale[r] * scale[c]);
    let eig = scaled.symmetric_eigen();
    let max = eig.eigenvalues.max();
    let min = eig.eigenvalues.min();
    if min <= 0.0 || !min.is_finite() || !max.is_finite() {
        return f64::INFINITY;
    }
    max / min
}
