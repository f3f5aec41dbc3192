use serde::{Deserialize, Serialize};

/// Distortion coefficients held at their initial value (zero).
///
/// All four are fitted by default.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FixDistortion {
    pub k1: bool,
    pub k2: bool,
    pub k3: bool,
    pub k4: bool,
}

impl FixDistortion {
    pub fn mask(&self) -> [bool; 4] {
        [self.k1, self.k2, self.k3, self.k4]
    }
}

/// Solver configuration.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SolverParams {
    /// Levenberg-Marquardt iteration cap.
    pub max_iters: usize,
    /// Stop once an accepted step changes the intrinsics by less than this,
    /// relative to their norm.
    pub epsilon: f64,
    /// Re-fit every pose with the intrinsics held after each accepted step.
    pub recompute_extrinsic: bool,
    /// Reject views whose pose Jacobian is near-singular.
    pub check_cond: bool,
    /// Condition-number limit for the per-view check.
    pub pose_cond_threshold: f64,
    /// Condition-number limit for the intrinsic normal equations.
    pub max_condition: f64,
    /// Gauss-Newton iterations when fitting a single pose.
    pub pose_iters: usize,
    pub initial_lambda: f64,
    pub fix_distortion: FixDistortion,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            max_iters: 30,
            epsilon: 1e-6,
            recompute_extrinsic: true,
            check_cond: true,
            pose_cond_threshold: 1e6,
            max_condition: 1e12,
            pose_iters: 20,
            initial_lambda: 1e-3,
            fix_distortion: FixDistortion::default(),
        }
    }
}
