use crate::corners::{find_corners, Corner};
use crate::grid::{GridGrower, GrownGrid};
use crate::params::ChessboardParams;
use fisheye_calib_core::{GrayImageView, GRID_TRANSFORMS_D4};
use log::{debug, info};
use nalgebra::Point2;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Tolerance (pixels) under which two origin candidates count as tied.
const ORIGIN_TIE_PIX: f32 = 1e-3;

/// Inner corners of one board, row-major: `corners[row * cols + col]`.
#[derive(Clone, Debug, PartialEq)]
pub struct ChessboardDetection {
    pub rows: u32,
    pub cols: u32,
    pub corners: Vec<Point2<f32>>,
}

/// Checkerboard detector for a known inner-corner count.
#[derive(Clone, Debug, Default)]
pub struct ChessboardDetector {
    pub params: ChessboardParams,
}

impl ChessboardDetector {
    pub fn new(params: ChessboardParams) -> Self {
        Self { params }
    }

    /// Find the `rows × cols` inner corners, or `None` if the full board is
    /// not visible.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, img), fields(width = img.width, height = img.height))
    )]
    pub fn detect(
        &self,
        img: &GrayImageView<'_>,
        rows: u32,
        cols: u32,
    ) -> Option<ChessboardDetection> {
        let corners = find_corners(img, &self.params.saddle);
        self.detect_from_corners(&corners, rows, cols)
    }

    /// Grid growth and canonical ordering over precomputed candidates
    /// (strongest first).
    pub fn detect_from_corners(
        &self,
        corners: &[Corner],
        rows: u32,
        cols: u32,
    ) -> Option<ChessboardDetection> {
        let expected = rows as usize * cols as usize;
        if rows < 2 || cols < 2 || corners.len() < expected {
            debug!(
                "{} candidates cannot hold a {cols}x{rows} board",
                corners.len()
            );
            return None;
        }

        let grower = GridGrower::new(corners, &self.params.grid);
        for seed in 0..corners.len().min(self.params.grid.max_seeds) {
            let Some((u, v)) = grower.seed_axes(seed) else {
                continue;
            };
            let grid = grower.grow(seed, u, v, 2 * expected);
            let (w, h) = grid.extent();
            let fits = (w, h) == (cols as usize, rows as usize)
                || (w, h) == (rows as usize, cols as usize);
            if grid.len() != expected || !fits {
                debug!(
                    "seed {seed}: grew {} corners spanning {w}x{h}, want {cols}x{rows}",
                    grid.len()
                );
                continue;
            }
            if let Some(ordered) = canonical_order(&grid, corners, rows, cols) {
                info!("detected {cols}x{rows} board from seed {seed}");
                return Some(ChessboardDetection {
                    rows,
                    cols,
                    corners: ordered,
                });
            }
        }
        None
    }
}

/// Relabel the grid into row-major order: first row along the `cols` side,
/// index 0 at the corner with the smallest `x + y`, ties resolved towards a
/// first row pointing to `+x`.
fn canonical_order(
    grid: &GrownGrid,
    corners: &[Corner],
    rows: u32,
    cols: u32,
) -> Option<Vec<Point2<f32>>> {
    let cells: Vec<[i32; 2]> = grid.cells.keys().map(|&(i, j)| [i, j]).collect();
    let indices: Vec<usize> = grid.cells.values().copied().collect();
    let (rows, cols) = (rows as usize, cols as usize);

    let mut best: Option<(f32, f32, Vec<Point2<f32>>)> = None;
    for t in GRID_TRANSFORMS_D4 {
        let relabeled = t.relabel(&cells);
        let mut ordered = vec![None; rows * cols];
        let mut fits = true;
        for (&[i, j], &index) in relabeled.iter().zip(&indices) {
            let (i, j) = (i as usize, j as usize);
            if i >= cols || j >= rows {
                fits = false;
                break;
            }
            ordered[j * cols + i] = Some(corners[index].position);
        }
        if !fits {
            continue;
        }
        let Some(ordered) = ordered.into_iter().collect::<Option<Vec<_>>>() else {
            continue;
        };

        let origin = ordered[0].x + ordered[0].y;
        let run = ordered[1].x - ordered[0].x;
        let better = match &best {
            None => true,
            Some((b_origin, b_run, _)) => {
                if (origin - b_origin).abs() > ORIGIN_TIE_PIX {
                    origin < *b_origin
                } else {
                    run > *b_run
                }
            }
        };
        if better {
            best = Some((origin, run, ordered));
        }
    }
    best.map(|(_, _, ordered)| ordered)
}
