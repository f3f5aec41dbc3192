use crate::ModelError;
use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// Inner-corner layout of a planar checkerboard.
///
/// Object points are row-major: index `row * cols + col` sits at
/// `(col * spacing, row * spacing, 0)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatternGeometry {
    pub rows: u32,
    pub cols: u32,
    #[serde(default = "default_spacing")]
    pub spacing: f64,
}

fn default_spacing() -> f64 {
    1.0
}

impl PatternGeometry {
    pub fn new(rows: u32, cols: u32) -> Result<Self, ModelError> {
        Self::with_spacing(rows, cols, default_spacing())
    }

    pub fn with_spacing(rows: u32, cols: u32, spacing: f64) -> Result<Self, ModelError> {
        let geometry = Self {
            rows,
            cols,
            spacing,
        };
        geometry.validate()?;
        Ok(geometry)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.rows < 2 || self.cols < 2 {
            return Err(ModelError::PatternTooSmall {
                rows: self.rows,
                cols: self.cols,
            });
        }
        if !(self.spacing.is_finite() && self.spacing > 0.0) {
            return Err(ModelError::InvalidSpacing(self.spacing));
        }
        Ok(())
    }

    /// Number of inner corners.
    pub fn len(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn object_points(&self) -> Vec<Point3<f64>> {
        (0..self.rows)
            .flat_map(|row| {
                (0..self.cols).map(move |col| {
                    Point3::new(col as f64 * self.spacing, row as f64 * self.spacing, 0.0)
                })
            })
            .collect()
    }
}
