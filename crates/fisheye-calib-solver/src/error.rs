/// Calibration failures. A failed run never yields intrinsics.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("invalid calibration input: {0}")]
    InvalidInput(String),

    /// A single view does not constrain its pose (or no pose could be
    /// initialised for it).
    #[error("view {view} is ill-conditioned (condition number {condition:.3e})")]
    IllConditionedView { view: usize, condition: f64 },

    /// The views together do not constrain the intrinsics.
    #[error("calibration is ill-conditioned (condition number {condition:.3e})")]
    IllConditioned { condition: f64 },

    #[error("calibration diverged: {0}")]
    Diverged(String),
}
