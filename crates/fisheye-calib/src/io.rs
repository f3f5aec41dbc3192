//! JSON configuration and report helpers for calibration runs.

use crate::{Calibration, FisheyeError};
use fisheye_calib_chessboard::{ChessboardParams, RefineParams};
use fisheye_calib_core::PatternGeometry;
use fisheye_calib_solver::SolverParams;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(thiserror::Error, Debug)]
pub enum FisheyeIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn default_pattern() -> PatternGeometry {
    PatternGeometry {
        rows: 6,
        cols: 9,
        spacing: 1.0,
    }
}

/// Everything a calibration run needs besides the images.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrateConfig {
    #[serde(default = "default_pattern")]
    pub pattern: PatternGeometry,
    #[serde(default)]
    pub detector: ChessboardParams,
    #[serde(default)]
    pub refine: RefineParams,
    #[serde(default)]
    pub solver: SolverParams,
}

impl Default for CalibrateConfig {
    fn default() -> Self {
        Self {
            pattern: default_pattern(),
            detector: ChessboardParams::default(),
            refine: RefineParams::default(),
            solver: SolverParams::default(),
        }
    }
}

impl CalibrateConfig {
    /// Default parameters for a board with `cols × rows` inner corners.
    pub fn for_pattern(cols: u32, rows: u32) -> Result<Self, FisheyeError> {
        Ok(Self {
            pattern: PatternGeometry::new(rows, cols)?,
            ..Self::default()
        })
    }

    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, FisheyeIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), FisheyeIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Why an image did not contribute to the calibration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    PatternNotFound,
}

/// Per-run summary next to the calibration itself.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    /// Indices of the images whose corners entered the solver.
    pub used: Vec<usize>,
    pub skipped: Vec<(usize, SkipReason)>,
    /// RMS reprojection error over all used corners, in pixels.
    pub rms: f64,
    pub per_view_rms: Vec<f64>,
    pub iterations: usize,
}

impl CalibrationReport {
    /// Write this report to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), FisheyeIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

impl Calibration {
    /// Load a `{"K": .., "D": ..}` file.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, FisheyeIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), FisheyeIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let cfg: CalibrateConfig = serde_json::from_str(
            r#"{"pattern": {"rows": 5, "cols": 7}, "solver": {"max_iters": 60}}"#,
        )
        .unwrap();
        assert_eq!(cfg.pattern.rows, 5);
        assert_eq!(cfg.pattern.spacing, 1.0);
        assert_eq!(cfg.solver.max_iters, 60);
        assert_eq!(cfg.refine, RefineParams::default());
    }

    #[test]
    fn config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calib.json");
        let cfg = CalibrateConfig::for_pattern(8, 5).unwrap();
        cfg.write_json(&path).unwrap();
        assert_eq!(CalibrateConfig::load_json(&path).unwrap(), cfg);
        assert!(matches!(
            CalibrateConfig::load_json(dir.path().join("missing.json")),
            Err(FisheyeIoError::Io(_))
        ));
    }

    #[test]
    fn tiny_pattern_is_malformed() {
        assert!(matches!(
            CalibrateConfig::for_pattern(1, 6),
            Err(FisheyeError::MalformedParameter(_))
        ));
    }
}
