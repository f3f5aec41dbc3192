use fisheye_calib_core::ModelError;
use fisheye_calib_solver::SolverError;

/// Errors of the top-level `undistort` / `calibrate` operations.
#[derive(thiserror::Error, Debug)]
pub enum FisheyeError {
    #[error("image {index} could not be decoded: {source}")]
    Decode {
        index: usize,
        #[source]
        source: image::ImageError,
    },

    /// K, D, pattern size or options failed validation; nothing was computed.
    #[error("malformed parameter: {0}")]
    MalformedParameter(String),

    #[error("no calibration pattern found in any of {images} images")]
    NoPatternFound { images: usize },

    #[error("image {index} is {}x{}, expected {}x{}", got.0, got.1, expected.0, expected.1)]
    ImageSizeMismatch {
        index: usize,
        expected: (usize, usize),
        got: (usize, usize),
    },

    #[error(transparent)]
    Calibration(#[from] SolverError),

    #[error("unsupported output format {0:?}")]
    UnsupportedFormat(String),

    #[error("could not encode output image: {0}")]
    Encode(#[source] image::ImageError),
}

impl From<ModelError> for FisheyeError {
    fn from(err: ModelError) -> Self {
        FisheyeError::MalformedParameter(err.to_string())
    }
}
