//! Checkerboard detector for calibration images.
//!
//! Pipeline:
//! 1. Dense ChESS saddle response on a radius-5 ring of 16 samples.
//! 2. Candidate corners: thresholding, non-maximum suppression, centre-of-mass
//!    sub-pixel position and a light-square diagonal orientation.
//! 3. Grid growth from the strongest seeds: each step predicts the next
//!    corner by extrapolating local step vectors and accepts the nearest
//!    candidate of opposite phase (orientation rotated by ~90°).
//! 4. The grown grid must be exactly `cols × rows` (either way round) and
//!    complete; it is then relabelled with a `D4` transform into row-major
//!    order starting at the top-left-most corner.
//!
//! [`refine_corners`] sharpens the detected corners to sub-pixel accuracy with
//! the gradient-orthogonality least-squares scheme.

mod corners;
mod detector;
mod geom;
mod grid;
mod params;
mod refine;
mod response;

pub use corners::{find_corners, Corner};
pub use detector::{ChessboardDetection, ChessboardDetector};
pub use params::{ChessboardParams, GridParams, RefineParams, SaddleParams};
pub use refine::{refine_corner, refine_corners};
pub use response::{chess_response, ResponseMap};
