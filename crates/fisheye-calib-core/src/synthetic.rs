//! Analytic rendering of checkerboards seen through a fisheye camera.
//!
//! Used to produce calibration views with known ground truth. Each output
//! pixel is supersampled: every sample is back-projected to a viewing ray,
//! intersected with the board plane and shaded by the square it lands in.

use crate::{FisheyeCamera, GrayImage, PatternGeometry, Pose};
use nalgebra::{Point2, Point3, Vector3};
#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Shading and sampling options for [`render_board`].
#[derive(Clone, Copy, Debug)]
pub struct BoardStyle {
    pub dark: u8,
    pub light: u8,
    /// Colour outside the board and its margin.
    pub background: u8,
    /// Light margin around the squares, in squares.
    pub margin: f64,
    /// Samples per pixel along each axis.
    pub supersample: usize,
}

impl Default for BoardStyle {
    fn default() -> Self {
        Self {
            dark: 30,
            light: 220,
            background: 120,
            margin: 0.6,
            supersample: 3,
        }
    }
}

/// Render `pattern` at `pose` into a `width × height` image.
///
/// The board has `(cols + 1) × (rows + 1)` squares so that its inner corners
/// coincide with [`PatternGeometry::object_points`]; the square touching the
/// first inner corner on the top-left is dark.
pub fn render_board(
    camera: &FisheyeCamera,
    pose: &Pose,
    pattern: &PatternGeometry,
    width: usize,
    height: usize,
    style: &BoardStyle,
) -> GrayImage {
    let ss = style.supersample.max(1);
    let inv_rot = pose.rotation.inverse();
    let normal = pose.rotation * Vector3::z();
    let plane_d = normal.dot(&pose.translation);
    let s = pattern.spacing;
    let (cols, rows) = (pattern.cols as f64, pattern.rows as f64);

    let shade = |ray: &Vector3<f64>| -> f64 {
        let denom = normal.dot(ray);
        if denom.abs() < 1e-12 {
            return style.background as f64;
        }
        let depth = plane_d / denom;
        if depth <= 0.0 {
            return style.background as f64;
        }
        let p_board: Point3<f64> = Point3::from(inv_rot * (ray * depth - pose.translation));
        // Board units: inner corners at integer (col, row).
        let bx = p_board.x / s;
        let by = p_board.y / s;
        let inside_squares = bx >= -1.0 && bx < cols && by >= -1.0 && by < rows;
        if inside_squares {
            let cell = (bx + 1.0).floor() as i64 + (by + 1.0).floor() as i64;
            return if cell % 2 == 0 {
                style.dark as f64
            } else {
                style.light as f64
            };
        }
        let m = style.margin;
        let inside_margin = bx >= -1.0 - m && bx < cols + m && by >= -1.0 - m && by < rows + m;
        if inside_margin {
            style.light as f64
        } else {
            style.background as f64
        }
    };

    let mut img = GrayImage::new(width, height);
    if width == 0 {
        return img;
    }
    #[cfg(feature = "rayon")]
    let rows = img.data.par_chunks_mut(width);
    #[cfg(not(feature = "rayon"))]
    let rows = img.data.chunks_mut(width);
    rows.enumerate().for_each(|(v, row)| {
        for (u, out) in row.iter_mut().enumerate() {
            let mut acc = 0.0;
            for sy in 0..ss {
                for sx in 0..ss {
                    let px = Point2::new(
                        u as f64 + (sx as f64 + 0.5) / ss as f64 - 0.5,
                        v as f64 + (sy as f64 + 0.5) / ss as f64 - 0.5,
                    );
                    acc += match camera.pixel_to_ray(px) {
                        Some(ray) => shade(&ray),
                        None => style.background as f64,
                    };
                }
            }
            *out = (acc / (ss * ss) as f64 + 0.5).clamp(0.0, 255.0) as u8;
        }
    });
    img
}

/// Exact image positions of the inner corners, row-major.
pub fn project_corners(
    camera: &FisheyeCamera,
    pose: &Pose,
    pattern: &PatternGeometry,
) -> Option<Vec<Point2<f64>>> {
    pattern
        .object_points()
        .iter()
        .map(|p| camera.project(&pose.transform(p)))
        .collect()
}

/// Pose that looks at the board centre from `distance` after tilting the
/// board by `tilt_x`, `tilt_y` (radians) and rolling it by `roll`, then
/// moving it by `offset` in the camera frame.
pub fn look_at_board(
    pattern: &PatternGeometry,
    distance: f64,
    tilt_x: f64,
    tilt_y: f64,
    roll: f64,
    offset: Vector3<f64>,
) -> Pose {
    use nalgebra::Rotation3;
    let rotation = Rotation3::from_euler_angles(tilt_x, tilt_y, roll);
    let centre = Vector3::new(
        (pattern.cols as f64 - 1.0) * pattern.spacing * 0.5,
        (pattern.rows as f64 - 1.0) * pattern.spacing * 0.5,
        0.0,
    );
    let translation = Vector3::new(0.0, 0.0, distance) + offset - rotation * centre;
    Pose::new(rotation, translation)
}
