/// Validation failures for camera and pattern parameters.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("intrinsic matrix contains non-finite values")]
    NonFiniteIntrinsics,

    #[error("focal lengths must be positive (fx={fx}, fy={fy})")]
    NonPositiveFocal { fx: f64, fy: f64 },

    #[error("intrinsic matrix must have the form [[fx,0,cx],[0,fy,cy],[0,0,1]] ({0})")]
    IntrinsicLayout(&'static str),

    #[error("distortion coefficients contain non-finite values")]
    NonFiniteDistortion,

    #[error("pattern needs at least 2x2 inner corners (rows={rows}, cols={cols})")]
    PatternTooSmall { rows: u32, cols: u32 },

    #[error("pattern spacing must be positive and finite (got {0})")]
    InvalidSpacing(f64),
}
