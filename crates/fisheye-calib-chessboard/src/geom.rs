use std::f32::consts::{FRAC_PI_2, PI};

/// Difference between two undirected axis angles (defined modulo π),
/// in `[0, π/2]`.
pub fn axis_angle_diff(a: f32, b: f32) -> f32 {
    let diff = (b - a).rem_euclid(PI);
    diff.min(PI - diff)
}

/// Angle between an undirected axis `axis_angle` and a directed vector
/// angle `vec_angle`, in `[0, π/2]`.
pub fn axis_vec_diff(axis_angle: f32, vec_angle: f32) -> f32 {
    axis_angle_diff(axis_angle, vec_angle)
}

/// Adjacent chessboard corners see their light diagonal rotated by 90°.
pub fn is_opposite_phase(a: f32, b: f32, tolerance: f32) -> bool {
    (FRAC_PI_2 - axis_angle_diff(a, b)).abs() <= tolerance.abs()
}
