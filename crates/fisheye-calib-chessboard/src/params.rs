use serde::{Deserialize, Serialize};

/// Saddle-point candidate extraction.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SaddleParams {
    /// Relative threshold as a fraction of the maximum response.
    pub threshold_rel: f32,
    /// Absolute response floor; images whose strongest saddle stays below it
    /// have too little contrast to hold a board.
    pub threshold_abs: f32,
    /// Non-maximum suppression radius (pixels).
    pub nms_radius: u32,
    /// Minimum count of above-threshold pixels in the NMS window.
    pub min_cluster_size: u32,
    /// Weaker candidates closer than this to a stronger one are dropped.
    pub min_distance_pix: f32,
}

impl Default for SaddleParams {
    fn default() -> Self {
        Self {
            threshold_rel: 0.1,
            threshold_abs: 64.0,
            nms_radius: 2,
            min_cluster_size: 2,
            min_distance_pix: 4.0,
        }
    }
}

/// Grid growth over candidate corners.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GridParams {
    /// Neighbours inspected around a seed.
    pub k_neighbors: usize,
    /// Tolerance for the 90° phase flip between neighbours and for the 45°
    /// edge-to-diagonal relation at seeds.
    pub orientation_tolerance_deg: f32,
    /// Search radius around a predicted corner, relative to the local step.
    pub search_radius_rel: f32,
    /// Steps shorter than this are rejected.
    pub min_spacing_pix: f32,
    /// Strongest candidates tried as seeds before giving up.
    pub max_seeds: usize,
}

impl Default for GridParams {
    fn default() -> Self {
        Self {
            k_neighbors: 8,
            orientation_tolerance_deg: 30.0,
            search_radius_rel: 0.4,
            min_spacing_pix: 6.0,
            max_seeds: 12,
        }
    }
}

/// Parameters of the full detector.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChessboardParams {
    pub saddle: SaddleParams,
    pub grid: GridParams,
}

/// Sub-pixel refinement window and termination criteria.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RefineParams {
    /// Half side of the search window; 3 gives a 7×7 window.
    pub half_window: u32,
    /// Iteration cap per corner.
    pub max_iters: u32,
    /// Stop once a step moves the corner by less than this (pixels).
    pub epsilon: f32,
}

impl Default for RefineParams {
    fn default() -> Self {
        Self {
            half_window: 3,
            max_iters: 30,
            epsilon: 0.1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let p: ChessboardParams =
            serde_json::from_str(r#"{"grid": {"max_seeds": 3}}"#).unwrap();
        assert_eq!(p.grid.max_seeds, 3);
        assert_eq!(p.grid.k_neighbors, GridParams::default().k_neighbors);
        assert_eq!(p.saddle, SaddleParams::default());
    }
}
