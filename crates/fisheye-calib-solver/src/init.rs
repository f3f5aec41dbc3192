//! Initial intrinsics.
//!
//! The principal point starts at the image centre and distortion at zero.
//! Focal length candidates come from the image size (a 180° field across the
//! larger dimension) and from the vanishing-point constraints of the view
//! homographies; the solver keeps whichever fits the data better.

use fisheye_calib_core::estimate_homography;
use nalgebra::{Point2, Point3};

const VP_ITERS: usize = 10;
/// Views reaching past this angle are skipped by the linearisation.
const VP_MAX_THETA: f64 = 1.45;

pub(crate) fn principal_point_guess(size: (usize, usize)) -> (f64, f64) {
    (size.0 as f64 / 2.0 - 0.5, size.1 as f64 / 2.0 - 0.5)
}

pub(crate) fn size_focal_guess(size: (usize, usize)) -> f64 {
    size.0.max(size.1) as f64 / std::f64::consts::PI
}

/// Focal length from the orthonormality of the rotation columns.
///
/// Observations are linearised with the equidistant model for the current
/// focal guess, each view's homography then yields two equations in
/// `w = 1/f²`, solved jointly by least squares. Repeats until `f` settles.
pub(crate) fn vanishing_point_focal(
    objects: &[Vec<Point3<f64>>],
    images: &[Vec<Point2<f64>>],
    center: (f64, f64),
    f0: f64,
) -> Option<f64> {
    let mut f = f0;
    for _ in 0..VP_ITERS {
        let mut num = 0.0;
        let mut den = 0.0;
        for (obj, img) in objects.iter().zip(images) {
            let Some(lin) = linearize(img, center, f) else {
                continue;
            };
            let plane: Vec<Point2<f64>> = obj.iter().map(|p| Point2::new(p.x, p.y)).collect();
            let Some(h) = estimate_homography(&plane, &lin) else {
                continue;
            };
            let h = h.h / h.h.norm();
            let equations = [
                (
                    h[(0, 0)] * h[(0, 1)] + h[(1, 0)] * h[(1, 1)],
                    h[(2, 0)] * h[(2, 1)],
                ),
                (
                    h[(0, 0)].powi(2) + h[(1, 0)].powi(2) - h[(0, 1)].powi(2) - h[(1, 1)].powi(2),
                    h[(2, 0)].powi(2) - h[(2, 1)].powi(2),
                ),
            ];
            for (a, b) in equations {
                num += a * b;
                den += a * a;
            }
        }
        if den <= 1e-300 {
            return None;
        }
        let w = -num / den;
        if !(w.is_finite() && w > 0.0) {
            return None;
        }
        let next = 1.0 / w.sqrt();
        let settled = ((next - f) / f).abs() < 1e-4;
        f = next;
        if settled {
            break;
        }
    }
    (f.is_finite() && f > 0.0).then_some(f)
}

/// Map distorted pixels to a pinhole image with focal `f`, centred on `center`.
fn linearize(img: &[Point2<f64>], center: (f64, f64), f: f64) -> Option<Vec<Point2<f64>>> {
    img.iter()
        .map(|p| {
            let (mx, my) = (p.x - center.0, p.y - center.1);
            let rho = (mx * mx + my * my).sqrt();
            if rho < 1e-9 {
                return Some(Point2::new(mx, my));
            }
            let theta = rho / f;
            if theta >= VP_MAX_THETA {
                return None;
            }
            let s = f * theta.tan() / rho;
            Some(Point2::new(mx * s, my * s))
        })
        .collect()
}

/// Candidate focal lengths, size-based first.
pub(crate) fn focal_candidates(
    objects: &[Vec<Point3<f64>>],
    images: &[Vec<Point2<f64>>],
    size: (usize, usize),
) -> Vec<f64> {
    let f0 = size_focal_guess(size);
    let mut out = vec![f0];
    if let Some(f) = vanishing_point_focal(objects, images, principal_point_guess(size), f0) {
        if (f - f0).abs() > 1e-6 * f0 {
            out.push(f);
        }
    }
    out
}
