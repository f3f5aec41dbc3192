//! Joint Levenberg-Marquardt over intrinsics and all poses.
//!
//! The normal equations have the block-arrow structure
//!
//! ```text
//! [ U   W1 .. Wn ] [δq ]     [gq ]
//! [ W1ᵀ V1       ] [δp1] = - [gp1]
//! [ ..      ..   ] [.. ]     [.. ]
//! [ Wnᵀ       Vn ] [δpn]     [gpn]
//! ```
//!
//! so the 8×8 Schur complement in `δq` is solved first and the 6×6 pose
//! blocks back-substituted.

use crate::model::{
    camera_from_vector, intrinsic_vector, project_with_jacobians, IntrinsicVector, NUM_INTRINSICS,
    NUM_POSE,
};
use crate::pose::{refine_pose, scaled_condition, view_cost};
use crate::{SolverError, SolverParams};
use fisheye_calib_core::{FisheyeCamera, Pose};
use nalgebra::{DMatrix, Matrix6, Point2, Point3, SMatrix, Vector6};

type IntrinsicBlock = SMatrix<f64, NUM_INTRINSICS, NUM_INTRINSICS>;
type CrossBlock = SMatrix<f64, NUM_INTRINSICS, NUM_POSE>;

const MAX_LAMBDA: f64 = 1e12;
const MIN_LAMBDA: f64 = 1e-12;
/// Pose refits between joint steps are cheap; a few iterations suffice.
const EXTRINSIC_REFIT_ITERS: usize = 3;

pub(crate) struct Problem<'a> {
    pub objects: &'a [Vec<Point3<f64>>],
    pub images: &'a [Vec<Point2<f64>>],
    /// `true` for parameters held at their current value.
    pub fixed: [bool; NUM_INTRINSICS],
}

pub(crate) struct Solution {
    pub camera: FisheyeCamera,
    pub poses: Vec<Pose>,
    pub cost: f64,
    pub iterations: usize,
}

struct NormalEquations {
    u: IntrinsicBlock,
    gq: IntrinsicVector,
    w: Vec<CrossBlock>,
    v: Vec<Matrix6<f64>>,
    gp: Vec<Vector6<f64>>,
    cost: f64,
}

impl Problem<'_> {
    pub(crate) fn total_cost(&self, cam: &FisheyeCamera, poses: &[Pose]) -> Option<f64> {
        poses
            .iter()
            .zip(self.objects.iter().zip(self.images))
            .try_fold(0.0, |acc, (pose, (obj, img))| {
                Some(acc + view_cost(cam, pose, obj, img)?)
            })
    }

    fn normal_equations(&self, cam: &FisheyeCamera, poses: &[Pose]) -> Option<NormalEquations> {
        let mut ne = NormalEquations {
            u: IntrinsicBlock::zeros(),
            gq: IntrinsicVector::zeros(),
            w: Vec::with_capacity(poses.len()),
            v: Vec::with_capacity(poses.len()),
            gp: Vec::with_capacity(poses.len()),
            cost: 0.0,
        };
        for (pose, (obj, img)) in poses.iter().zip(self.objects.iter().zip(self.images)) {
            let mut w = CrossBlock::zeros();
            let mut v = Matrix6::zeros();
            let mut gp = Vector6::zeros();
            for (x, obs) in obj.iter().zip(img) {
                let proj = project_with_jacobians(cam, pose, x)?;
                let e = proj.uv - obs.coords;
                let jq = proj.d_intrinsics;
                let jp = proj.d_pose;
                ne.u += jq.transpose() * jq;
                ne.gq += jq.transpose() * e;
                w += jq.transpose() * jp;
                v += jp.transpose() * jp;
                gp += jp.transpose() * e;
                ne.cost += e.norm_squared();
            }
            ne.w.push(w);
            ne.v.push(v);
            ne.gp.push(gp);
        }
        self.mask(&mut ne);
        Some(ne)
    }

    /// Decouple fixed parameters: zero their rows and columns, unit diagonal.
    fn mask(&self, ne: &mut NormalEquations) {
        for i in (0..NUM_INTRINSICS).filter(|&i| self.fixed[i]) {
            ne.u.row_mut(i).fill(0.0);
            ne.u.column_mut(i).fill(0.0);
            ne.u[(i, i)] = 1.0;
            ne.gq[i] = 0.0;
            for w in &mut ne.w {
                w.row_mut(i).fill(0.0);
            }
        }
    }

    /// Solve the damped system; `None` when a block is not positive definite.
    fn solve(&self, ne: &NormalEquations, lambda: f64) -> Option<(IntrinsicVector, Vec<Vector6<f64>>)> {
        let mut s = damped(&ne.u, lambda);
        let mut rhs = -ne.gq;
        let mut v_inv = Vec::with_capacity(ne.v.len());
        for ((w, v), gp) in ne.w.iter().zip(&ne.v).zip(&ne.gp) {
            let vi = damped(v, lambda).try_inverse()?;
            let wv = w * vi;
            s -= wv * w.transpose();
            rhs += wv * gp;
            v_inv.push(vi);
        }
        let dq = s.cholesky()?.solve(&rhs);
        let dp = ne
            .w
            .iter()
            .zip(&ne.gp)
            .zip(&v_inv)
            .map(|((w, gp), vi)| vi * (-gp - w.transpose() * dq))
            .collect();
        Some((dq, dp))
    }

    /// Scaled condition number of the undamped Schur complement over the
    /// free intrinsics.
    fn intrinsic_condition(&self, ne: &NormalEquations) -> f64 {
        let mut s = ne.u;
        for (w, v) in ne.w.iter().zip(&ne.v) {
            let Some(vi) = v.try_inverse() else {
                return f64::INFINITY;
            };
            s -= w * vi * w.transpose();
        }
        let free: Vec<usize> = (0..NUM_INTRINSICS).filter(|&i| !self.fixed[i]).collect();
        let sub = DMatrix::from_fn(free.len(), free.len(), |r, c| s[(free[r], free[c])]);
        scaled_condition(&sub)
    }
}

/// Marquardt damping: scale the diagonal by `1 + λ`.
fn damped<const N: usize>(a: &SMatrix<f64, N, N>, lambda: f64) -> SMatrix<f64, N, N> {
    let mut out = *a;
    for i in 0..N {
        out[(i, i)] += lambda * a[(i, i)] + 1e-12;
    }
    out
}

pub(crate) fn optimize(
    problem: &Problem<'_>,
    camera: FisheyeCamera,
    poses: Vec<Pose>,
    params: &SolverParams,
) -> Result<Solution, SolverError> {
    let behind = || SolverError::Diverged("a pattern point projects behind the camera".into());
    let mut camera = camera;
    let mut poses = poses;
    let mut lambda = params.initial_lambda.max(MIN_LAMBDA);
    let mut ne = problem.normal_equations(&camera, &poses).ok_or_else(behind)?;
    let mut iterations = 0;

    while iterations < params.max_iters {
        iterations += 1;
        let q = intrinsic_vector(&camera);
        let step = problem.solve(&ne, lambda).and_then(|(dq, dp)| {
            let cam = camera_from_vector(&(q + dq))?;
            let moved: Vec<Pose> = poses.iter().zip(&dp).map(|(p, d)| p.perturbed(d)).collect();
            let cost = problem.total_cost(&cam, &moved)?;
            Some((cam, moved, cost, dq))
        });

        match step {
            Some((cam, moved, cost, dq)) if cost < ne.cost => {
                camera = cam;
                poses = moved;
                if params.recompute_extrinsic {
                    for (pose, (obj, img)) in
                        poses.iter_mut().zip(problem.objects.iter().zip(problem.images))
                    {
                        *pose = refine_pose(&camera, *pose, obj, img, EXTRINSIC_REFIT_ITERS);
                    }
                }
                lambda = (lambda * 0.1).max(MIN_LAMBDA);
                ne = problem.normal_equations(&camera, &poses).ok_or_else(behind)?;
                let change = dq.norm() / intrinsic_vector(&camera).norm();
                log::trace!(
                    "lm iter {iterations}: cost {:.6e}, lambda {lambda:.1e}, change {change:.2e}",
                    ne.cost
                );
                if change < params.epsilon {
                    break;
                }
            }
            _ => {
                lambda *= 10.0;
                log::trace!("lm iter {iterations}: step rejected, lambda {lambda:.1e}");
                if lambda > MAX_LAMBDA {
                    break;
                }
            }
        }
    }

    let condition = problem.intrinsic_condition(&ne);
    log::debug!(
        "lm finished after {iterations} iterations, cost {:.6e}, condition {condition:.3e}",
        ne.cost
    );
    if condition > params.max_condition {
        return Err(SolverError::IllConditioned { condition });
    }

    Ok(Solution {
        camera,
        poses,
        cost: ne.cost,
        iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fisheye_calib_core::{Distortion, Intrinsics};
    use nalgebra::{Rotation3, Vector3};

    fn board() -> Vec<Point3<f64>> {
        (0..6)
            .flat_map(|r| (0..8).map(move |c| Point3::new(c as f64 * 0.1, r as f64 * 0.1, 0.0)))
            .collect()
    }

    fn scene() -> (FisheyeCamera, Vec<Pose>, Vec<Vec<Point3<f64>>>, Vec<Vec<Point2<f64>>>) {
        let cam = FisheyeCamera::new(
            Intrinsics::new(300.0, 298.0, 321.0, 238.0).unwrap(),
            Distortion::from_array([0.08, -0.03, 0.01, -0.002]).unwrap(),
        );
        let poses: Vec<Pose> = [
            (0.5, 0.1, 0.0, Vector3::new(-0.9, -0.6, 0.8)),
            (-0.4, 0.5, 0.3, Vector3::new(0.1, -0.3, 0.9)),
            (0.2, -0.6, -0.2, Vector3::new(-0.4, 0.2, 0.7)),
            (0.0, 0.0, 0.6, Vector3::new(-0.3, -0.3, 1.2)),
        ]
        .into_iter()
        .map(|(rx, ry, rz, t)| Pose::new(Rotation3::from_euler_angles(rx, ry, rz), t))
        .collect();
        let obj = board();
        let objects = vec![obj.clone(); poses.len()];
        let images = poses
            .iter()
            .map(|p| obj.iter().map(|x| cam.project(&p.transform(x)).unwrap()).collect())
            .collect();
        (cam, poses, objects, images)
    }

    #[test]
    fn converges_from_perturbed_start() {
        let (cam, poses, objects, images) = scene();
        let problem = Problem {
            objects: &objects,
            images: &images,
            fixed: [false; NUM_INTRINSICS],
        };
        let start_cam = FisheyeCamera::new(
            Intrinsics::new(285.0, 285.0, 319.5, 239.5).unwrap(),
            Distortion::ZERO,
        );
        let start_poses = poses
            .iter()
            .map(|p| p.perturbed(&Vector6::new(0.01, -0.01, 0.005, 0.01, -0.01, 0.02)))
            .collect();
        let sol = optimize(&problem, start_cam, start_poses, &SolverParams::default()).unwrap();
        assert!(sol.cost < 1e-6, "cost {}", sol.cost);
        assert!((sol.camera.intrinsics.fx - cam.intrinsics.fx).abs() < 1e-3);
        assert!((sol.camera.distortion.k1 - cam.distortion.k1).abs() < 1e-4);
    }

    #[test]
    fn fixed_coefficients_stay_put() {
        let (_, poses, objects, images) = scene();
        let mut fixed = [false; NUM_INTRINSICS];
        fixed[6] = true;
        fixed[7] = true;
        let problem = Problem {
            objects: &objects,
            images: &images,
            fixed,
        };
        let start_cam = FisheyeCamera::new(
            Intrinsics::new(295.0, 295.0, 319.5, 239.5).unwrap(),
            Distortion::ZERO,
        );
        let sol = optimize(&problem, start_cam, poses, &SolverParams::default()).unwrap();
        assert_eq!(sol.camera.distortion.k3, 0.0);
        assert_eq!(sol.camera.distortion.k4, 0.0);
        assert!(sol.camera.distortion.k1 != 0.0);
    }

    #[test]
    fn board_behind_camera_diverges() {
        let (cam, poses, objects, images) = scene();
        let problem = Problem {
            objects: &objects,
            images: &images,
            fixed: [false; NUM_INTRINSICS],
        };
        let mut start = poses;
        start[2] = Pose::new(Rotation3::identity(), Vector3::new(0.0, 0.0, -1.0));
        assert!(matches!(
            optimize(&problem, cam, start, &SolverParams::default()),
            Err(SolverError::Diverged(_))
        ));
    }
}
