//! Calibration over a batch of encoded images.
//!
//! Every image is decoded and run through detection and refinement in
//! parallel. Outcomes are folded in input order, so the observation list (and
//! therefore the solver input) does not depend on thread scheduling. Images
//! that contribute observations must all share the size of the first one;
//! skipped images may have any size.

use crate::codec::{decode, to_gray};
use crate::io::{CalibrateConfig, CalibrationReport, SkipReason};
use crate::{Calibration, FisheyeError};
use fisheye_calib_chessboard::{refine_corners, ChessboardDetector, RefineParams};
use fisheye_calib_core::{GrayImage, PatternGeometry};
use fisheye_calib_solver::calibrate as solve;
use log::{debug, info};
use nalgebra::{Point2, Point3};
#[cfg(feature = "rayon")]
use rayon::prelude::*;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Result of looking for the pattern in one image.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Outcome {
    Detected(Vec<Point2<f64>>),
    Skipped(SkipReason),
}

pub(crate) fn observe(
    img: &GrayImage,
    pattern: &PatternGeometry,
    detector: &ChessboardDetector,
    refine: &RefineParams,
) -> Outcome {
    let view = img.view();
    match detector.detect(&view, pattern.rows, pattern.cols) {
        Some(det) => Outcome::Detected(
            refine_corners(&view, &det.corners, refine)
                .into_iter()
                .map(|p| Point2::new(p.x as f64, p.y as f64))
                .collect(),
        ),
        None => Outcome::Skipped(SkipReason::PatternNotFound),
    }
}

/// Decode everything up front; the first failure (by index) wins.
fn decode_all<B: AsRef<[u8]> + Sync>(images: &[B]) -> Result<Vec<GrayImage>, FisheyeError> {
    #[cfg(feature = "rayon")]
    let iter = images.par_iter();
    #[cfg(not(feature = "rayon"))]
    let iter = images.iter();
    let decoded: Vec<Result<GrayImage, FisheyeError>> = iter
        .enumerate()
        .map(|(index, bytes)| decode(bytes.as_ref(), index).map(to_gray))
        .collect();
    decoded.into_iter().collect()
}

/// Calibrate from encoded images with explicit detector, refiner and solver
/// parameters.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip_all, fields(images = images.len()))
)]
pub fn calibrate_with_config<B: AsRef<[u8]> + Sync>(
    images: &[B],
    config: &CalibrateConfig,
) -> Result<(Calibration, CalibrationReport), FisheyeError> {
    config.pattern.validate()?;
    let grays = decode_all(images)?;

    let detector = ChessboardDetector::new(config.detector.clone());
    #[cfg(feature = "rayon")]
    let iter = grays.par_iter();
    #[cfg(not(feature = "rayon"))]
    let iter = grays.iter();
    let outcomes: Vec<Outcome> = iter
        .map(|img| observe(img, &config.pattern, &detector, &config.refine))
        .collect();

    let mut report = CalibrationReport::default();
    let mut image_points = Vec::new();
    let mut size = None;
    for (index, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Outcome::Detected(points) => {
                let got = (grays[index].width, grays[index].height);
                let expected = *size.get_or_insert(got);
                if got != expected {
                    return Err(FisheyeError::ImageSizeMismatch {
                        index,
                        expected,
                        got,
                    });
                }
                report.used.push(index);
                image_points.push(points);
            }
            Outcome::Skipped(reason) => {
                info!("image {index}: skipped ({reason:?})");
                report.skipped.push((index, reason));
            }
        }
    }

    let Some(size) = size else {
        return Err(FisheyeError::NoPatternFound {
            images: images.len(),
        });
    };
    debug!(
        "pattern found in {} of {} images",
        image_points.len(),
        images.len()
    );

    let object: Vec<Point3<f64>> = config.pattern.object_points();
    let objects = vec![object; image_points.len()];
    let output = solve(&objects, &image_points, size, &config.solver)?;

    report.rms = output.rms;
    report.per_view_rms = output.per_view_rms;
    report.iterations = output.iterations;
    Ok((Calibration::from(output.camera), report))
}
