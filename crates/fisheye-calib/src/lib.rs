//! Fisheye lens calibration and undistortion.
//!
//! Two operations cover the whole workflow:
//!
//! - [`calibrate`] takes checkerboard photographs (any container the `image`
//!   crate decodes) and the inner-corner count of the board and returns the
//!   camera matrix `K` and the four fisheye coefficients `D`;
//! - [`undistort`] takes one image and a calibration and returns the
//!   corrected image, re-encoded in the requested format.
//!
//! ## Quickstart
//!
//! ```no_run
//! use fisheye_calib::{calibrate, undistort, UndistortOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let images: Vec<Vec<u8>> = ["a.jpg", "b.jpg", "c.jpg"]
//!     .iter()
//!     .map(std::fs::read)
//!     .collect::<Result<_, _>>()?;
//! let calibration = calibrate(&images, 9, 6)?;
//!
//! let options = UndistortOptions::from_parts(Some(".png"), None, Some(1.2))?;
//! let corrected = undistort(&images[0], &calibration, &options)?;
//! std::fs::write("a_undistorted.png", corrected)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `fisheye_calib::core`: image buffers, camera model, remap tables.
//! - `fisheye_calib::chessboard`: corner detector and sub-pixel refiner.
//! - `fisheye_calib::solver`: Levenberg-Marquardt calibration from points.

mod calibration;
mod codec;
mod error;
mod io;
mod options;
mod orchestrator;
mod undistort;

pub use fisheye_calib_chessboard as chessboard;
pub use fisheye_calib_core as core;
pub use fisheye_calib_solver as solver;

pub use calibration::Calibration;
pub use error::FisheyeError;
pub use io::{CalibrateConfig, CalibrationReport, FisheyeIoError, SkipReason};
pub use options::{OutputFormat, UndistortOptions};
pub use orchestrator::calibrate_with_config;
pub use undistort::{remap_cache, Undistorter};

/// Remove fisheye distortion from an encoded image.
///
/// `calibration` is validated before the image is decoded. The output keeps
/// the source channel layout (grayscale stays grayscale, everything else is
/// RGB) and is encoded as `options.format`.
pub fn undistort(
    image_bytes: &[u8],
    calibration: &Calibration,
    options: &UndistortOptions,
) -> Result<Vec<u8>, FisheyeError> {
    undistort::undistort_bytes(image_bytes, calibration, options)
}

/// Calibrate from encoded checkerboard images with default parameters.
///
/// `pattern_cols × pattern_rows` is the inner-corner count of the board.
/// Images in which the full board is not found are skipped; at least one
/// must contain it.
pub fn calibrate<B: AsRef<[u8]> + Sync>(
    images: &[B],
    pattern_cols: u32,
    pattern_rows: u32,
) -> Result<Calibration, FisheyeError> {
    let config = CalibrateConfig::for_pattern(pattern_cols, pattern_rows)?;
    calibrate_with_config(images, &config).map(|(calibration, _)| calibration)
}
