//! Sub-pixel corner refinement.
//!
//! At the true corner `q`, every image gradient `g(p)` in the neighbourhood is
//! orthogonal to `p - q`: either `p` lies in a flat region (`g = 0`) or on an
//! edge through `q` (`g ⟂ p - q`). Summing `g gᵀ (q - p) = 0` over a Gaussian
//! weighted window gives a 2×2 linear system for `q`, re-solved around each
//! new estimate until it stops moving.

use crate::params::RefineParams;
use fisheye_calib_core::{sample_bilinear, GrayImageView};
use nalgebra::Point2;
#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Refine one corner; returns `coarse` when the window is degenerate or the
/// estimate walks out of the window.
pub fn refine_corner(
    img: &GrayImageView<'_>,
    coarse: Point2<f32>,
    params: &RefineParams,
) -> Point2<f32> {
    let hw = params.half_window.max(1) as i32;
    let inv_hw2 = 1.0 / (hw * hw) as f64;
    let eps2 = (params.epsilon as f64).powi(2);

    let mut cx = coarse.x as f64;
    let mut cy = coarse.y as f64;
    for _ in 0..params.max_iters.max(1) {
        let (mut a, mut b, mut c) = (0.0f64, 0.0f64, 0.0f64);
        let (mut bb1, mut bb2) = (0.0f64, 0.0f64);

        for dy in -hw..=hw {
            for dx in -hw..=hw {
                let w = (-((dx * dx + dy * dy) as f64) * inv_hw2).exp();
                let px = cx + dx as f64;
                let py = cy + dy as f64;
                let (fx, fy) = (px as f32, py as f32);
                let gx = 0.5
                    * (sample_bilinear(img, fx + 1.0, fy) - sample_bilinear(img, fx - 1.0, fy))
                        as f64;
                let gy = 0.5
                    * (sample_bilinear(img, fx, fy + 1.0) - sample_bilinear(img, fx, fy - 1.0))
                        as f64;

                let gxx = gx * gx * w;
                let gxy = gx * gy * w;
                let gyy = gy * gy * w;
                a += gxx;
                b += gxy;
                c += gyy;
                bb1 += gxx * px + gxy * py;
                bb2 += gxy * px + gyy * py;
            }
        }

        let det = a * c - b * b;
        let trace = a + c;
        if trace <= f64::EPSILON || det <= 1e-6 * trace * trace {
            break;
        }
        let nx = (c * bb1 - b * bb2) / det;
        let ny = (a * bb2 - b * bb1) / det;
        let shift2 = (nx - cx).powi(2) + (ny - cy).powi(2);
        cx = nx;
        cy = ny;
        if shift2 < eps2 {
            break;
        }
    }

    let hw = hw as f64;
    let moved_out = (cx - coarse.x as f64).abs() > hw || (cy - coarse.y as f64).abs() > hw;
    if moved_out || !cx.is_finite() || !cy.is_finite() {
        return coarse;
    }
    Point2::new(cx as f32, cy as f32)
}

/// Refine every corner independently; output order matches input order.
pub fn refine_corners(
    img: &GrayImageView<'_>,
    corners: &[Point2<f32>],
    params: &RefineParams,
) -> Vec<Point2<f32>> {
    #[cfg(feature = "rayon")]
    let iter = corners.par_iter();
    #[cfg(not(feature = "rayon"))]
    let iter = corners.iter();
    iter.map(|&c| refine_corner(img, c, params)).collect()
}
