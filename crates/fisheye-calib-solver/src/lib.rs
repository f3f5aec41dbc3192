//! Fisheye intrinsic calibration from planar pattern observations.
//!
//! Given the object coordinates of a planar pattern (on `Z = 0`) and the
//! matching sub-pixel image points in several views, [`calibrate`] estimates
//! `fx, fy, cx, cy` and the four fisheye coefficients by minimising the
//! reprojection error over the intrinsics and every view pose:
//!
//! 1. focal candidates from the image size and the view homographies,
//! 2. linear pose per view, refined by Gauss-Newton,
//! 3. joint Levenberg-Marquardt on the Schur-reduced normal equations.
//!
//! Results are deterministic for a given input; permuting the views only
//! changes floating-point summation order.

mod error;
mod init;
mod lm;
mod model;
mod params;
mod pose;

pub use error::SolverError;
pub use params::{FixDistortion, SolverParams};

use fisheye_calib_core::{Distortion, FisheyeCamera, Intrinsics, Pose};
use lm::Problem;
use model::NUM_INTRINSICS;
use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Fitted camera with fit statistics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationOutput {
    pub camera: FisheyeCamera,
    /// Root-mean-square reprojection error over all points, in pixels.
    pub rms: f64,
    pub per_view_rms: Vec<f64>,
    pub iterations: usize,
}

fn validate(
    objects: &[Vec<Point3<f64>>],
    images: &[Vec<Point2<f64>>],
    image_size: (usize, usize),
) -> Result<(), SolverError> {
    let invalid = |msg: String| Err(SolverError::InvalidInput(msg));
    if objects.is_empty() {
        return invalid("no views".into());
    }
    if objects.len() != images.len() {
        return invalid(format!(
            "{} object point sets but {} image point sets",
            objects.len(),
            images.len()
        ));
    }
    if image_size.0 == 0 || image_size.1 == 0 {
        return invalid(format!("empty image size {}x{}", image_size.0, image_size.1));
    }
    for (view, (obj, img)) in objects.iter().zip(images).enumerate() {
        if obj.len() != img.len() {
            return invalid(format!(
                "view {view}: {} object points but {} image points",
                obj.len(),
                img.len()
            ));
        }
        if obj.len() < 4 {
            return invalid(format!("view {view}: at least 4 points required"));
        }
        if obj.iter().any(|p| p.z != 0.0 || !p.x.is_finite() || !p.y.is_finite()) {
            return invalid(format!("view {view}: object points must be finite and lie on z = 0"));
        }
        if img.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return invalid(format!("view {view}: non-finite image point"));
        }
    }
    Ok(())
}

/// Initial camera and poses for the best focal candidate.
fn initialize(
    objects: &[Vec<Point3<f64>>],
    images: &[Vec<Point2<f64>>],
    image_size: (usize, usize),
    params: &SolverParams,
) -> Result<(FisheyeCamera, Vec<Pose>), SolverError> {
    let (cx, cy) = init::principal_point_guess(image_size);
    let mut best: Option<(f64, FisheyeCamera, Vec<Pose>)> = None;
    let mut failed_view = 0;

    for f in init::focal_candidates(objects, images, image_size) {
        let Ok(intrinsics) = Intrinsics::new(f, f, cx, cy) else {
            continue;
        };
        let cam = FisheyeCamera::new(intrinsics, Distortion::ZERO);
        let mut poses = Vec::with_capacity(objects.len());
        for (view, (obj, img)) in objects.iter().zip(images).enumerate() {
            match pose::init_pose(&cam, obj, img) {
                Some(p) => poses.push(pose::refine_pose(&cam, p, obj, img, params.pose_iters)),
                None => {
                    failed_view = view;
                    break;
                }
            }
        }
        if poses.len() != objects.len() {
            log::debug!("focal candidate {f:.2}: pose initialisation failed in view {failed_view}");
            continue;
        }
        let Some(cost) = (Problem {
            objects,
            images,
            fixed: [false; NUM_INTRINSICS],
        })
        .total_cost(&cam, &poses) else {
            continue;
        };
        log::debug!("focal candidate {f:.2}: initial cost {cost:.6e}");
        if best.as_ref().is_none_or(|(c, _, _)| cost < *c) {
            best = Some((cost, cam, poses));
        }
    }

    best.map(|(_, cam, poses)| (cam, poses))
        .ok_or(SolverError::IllConditionedView {
            view: failed_view,
            condition: f64::INFINITY,
        })
}

/// Reject solutions that cannot be handed out as a camera.
fn check_solution(camera: &FisheyeCamera) -> Result<(), SolverError> {
    let q = model::intrinsic_vector(camera);
    if q.iter().any(|v| !v.is_finite()) {
        return Err(SolverError::Diverged("non-finite parameters".into()));
    }
    let k = &camera.intrinsics;
    if k.fx <= 0.0 || k.fy <= 0.0 {
        return Err(SolverError::Diverged(format!(
            "non-positive focal length ({}, {})",
            k.fx, k.fy
        )));
    }
    Ok(())
}

/// Estimate fisheye intrinsics from pattern observations.
///
/// `objects[i]` and `images[i]` are the pattern points and their detected
/// pixels in view `i`, in the same order. `image_size` is `(width, height)`.
#[cfg_attr(feature = "tracing", instrument(level = "info", skip_all, fields(views = objects.len())))]
pub fn calibrate(
    objects: &[Vec<Point3<f64>>],
    images: &[Vec<Point2<f64>>],
    image_size: (usize, usize),
    params: &SolverParams,
) -> Result<CalibrationOutput, SolverError> {
    validate(objects, images, image_size)?;

    let (camera, poses) = initialize(objects, images, image_size, params)?;
    log::debug!(
        "initial focal {:.3}, principal point ({:.1}, {:.1})",
        camera.intrinsics.fx,
        camera.intrinsics.cx,
        camera.intrinsics.cy
    );

    if params.check_cond {
        for (view, ((pose, obj), img)) in poses.iter().zip(objects).zip(images).enumerate() {
            let condition = pose::pose_condition(&camera, pose, obj, img);
            if condition > params.pose_cond_threshold {
                log::warn!("view {view}: pose condition number {condition:.3e}");
                return Err(SolverError::IllConditionedView { view, condition });
            }
        }
    }

    let mut fixed = [false; NUM_INTRINSICS];
    for (i, f) in params.fix_distortion.mask().into_iter().enumerate() {
        fixed[4 + i] = f;
    }
    let problem = Problem {
        objects,
        images,
        fixed,
    };
    let solution = lm::optimize(&problem, camera, poses, params)?;

    check_solution(&solution.camera)?;

    let per_view_rms = solution
        .poses
        .iter()
        .zip(objects.iter().zip(images))
        .map(|(pose, (obj, img))| {
            pose::view_cost(&solution.camera, pose, obj, img)
                .map(|c| (c / obj.len() as f64).sqrt())
                .ok_or_else(|| SolverError::Diverged("a pattern point projects behind the camera".into()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let total_points: usize = objects.iter().map(Vec::len).sum();
    let rms = (solution.cost / total_points as f64).sqrt();
    log::info!(
        "calibrated {} views in {} iterations: rms {rms:.4} px",
        objects.len(),
        solution.iterations
    );

    Ok(CalibrationOutput {
        camera: solution.camera,
        rms,
        per_view_rms,
        iterations: solution.iterations,
    })
}
