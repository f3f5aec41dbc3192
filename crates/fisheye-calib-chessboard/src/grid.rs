//! Seeded breadth-first growth of a chessboard lattice over candidate corners.

use crate::corners::Corner;
use crate::geom::{axis_vec_diff, is_opposite_phase};
use crate::params::GridParams;
use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::Vector2;
use std::collections::{BTreeMap, VecDeque};
use std::f32::consts::FRAC_PI_4;

/// Lattice step directions: `(di, dj)`.
const DIRECTIONS: [(i32, i32); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

#[derive(Clone, Copy, Debug)]
struct Node {
    index: usize,
    /// Image displacement for `i + 1`.
    step_i: Vector2<f32>,
    /// Image displacement for `j + 1`.
    step_j: Vector2<f32>,
}

/// A grown lattice: grid cell `(i, j)` to candidate index.
#[derive(Clone, Debug, Default)]
pub struct GrownGrid {
    pub cells: BTreeMap<(i32, i32), usize>,
}

impl GrownGrid {
    /// `(width, height)` of the bounding box in cells.
    pub fn extent(&self) -> (usize, usize) {
        let mut it = self.cells.keys();
        let Some(&(i0, j0)) = it.next() else {
            return (0, 0);
        };
        let (mut min_i, mut max_i, mut min_j, mut max_j) = (i0, i0, j0, j0);
        for &(i, j) in it {
            min_i = min_i.min(i);
            max_i = max_i.max(i);
            min_j = min_j.min(j);
            max_j = max_j.max(j);
        }
        ((max_i - min_i + 1) as usize, (max_j - min_j + 1) as usize)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

pub struct GridGrower<'a> {
    corners: &'a [Corner],
    tree: KdTree<f32, 2>,
    params: &'a GridParams,
}

impl<'a> GridGrower<'a> {
    pub fn new(corners: &'a [Corner], params: &'a GridParams) -> Self {
        let coords: Vec<[f32; 2]> = corners
            .iter()
            .map(|c| [c.position.x, c.position.y])
            .collect();
        let tree: KdTree<f32, 2> = (&coords).into();
        Self {
            corners,
            tree,
            params,
        }
    }

    fn position(&self, index: usize) -> Vector2<f32> {
        self.corners[index].position.coords
    }

    fn tolerance(&self) -> f32 {
        self.params.orientation_tolerance_deg.to_radians()
    }

    /// Two local lattice steps at `seed`: the closest valid neighbour and the
    /// closest one roughly perpendicular to it.
    pub fn seed_axes(&self, seed: usize) -> Option<(Vector2<f32>, Vector2<f32>)> {
        let corner = &self.corners[seed];
        let p = self.position(seed);
        let tol = self.tolerance();

        let mut valid = Vec::new();
        let query = [p.x, p.y];
        for nn in self
            .tree
            .nearest_n::<SquaredEuclidean>(&query, self.params.k_neighbors + 1)
        {
            let index = nn.item as usize;
            if index == seed {
                continue;
            }
            let other = &self.corners[index];
            let step = self.position(index) - p;
            let distance = step.norm();
            if distance < self.params.min_spacing_pix {
                continue;
            }
            if !is_opposite_phase(corner.orientation, other.orientation, tol) {
                continue;
            }
            // Lattice edges run at ~45° to both light diagonals.
            let edge_angle = step.y.atan2(step.x);
            if (axis_vec_diff(corner.orientation, edge_angle) - FRAC_PI_4).abs() > tol
                || (axis_vec_diff(other.orientation, edge_angle) - FRAC_PI_4).abs() > tol
            {
                continue;
            }
            valid.push((step, distance));
        }

        let (u, du) = *valid.first()?;
        let (v, _) = valid.iter().skip(1).copied().find(|(v, dv)| {
            let cos = (u.dot(v) / (du * dv)).abs();
            cos < 0.5 && *dv > 0.5 * du && *dv < 2.0 * du
        })?;
        Some((u, v))
    }

    /// Nearest unused candidate of opposite phase within `radius` of `pred`.
    fn find_near(
        &self,
        pred: Vector2<f32>,
        radius: f32,
        from: usize,
        used: &[bool],
    ) -> Option<usize> {
        let tol = self.tolerance();
        let r2 = radius * radius;
        let orientation = self.corners[from].orientation;
        self.tree
            .nearest_n::<SquaredEuclidean>(&[pred.x, pred.y], 4)
            .into_iter()
            .take_while(|nn| nn.distance <= r2)
            .map(|nn| nn.item as usize)
            .find(|&index| {
                !used[index]
                    && is_opposite_phase(orientation, self.corners[index].orientation, tol)
            })
    }

    /// Breadth-first growth from `seed` with initial steps `u` (along `i`)
    /// and `v` (along `j`). Stops once more than `max_cells` are assigned.
    pub fn grow(
        &self,
        seed: usize,
        u: Vector2<f32>,
        v: Vector2<f32>,
        max_cells: usize,
    ) -> GrownGrid {
        let mut used = vec![false; self.corners.len()];
        let mut nodes: BTreeMap<(i32, i32), Node> = BTreeMap::new();
        let mut queue = VecDeque::new();

        used[seed] = true;
        nodes.insert(
            (0, 0),
            Node {
                index: seed,
                step_i: u,
                step_j: v,
            },
        );
        queue.push_back((0, 0));

        while let Some((i, j)) = queue.pop_front() {
            let node = nodes[&(i, j)];
            let p = self.position(node.index);

            for (di, dj) in DIRECTIONS {
                let target = (i + di, j + dj);
                if nodes.contains_key(&target) {
                    continue;
                }
                let step = if di != 0 {
                    node.step_i * di as f32
                } else {
                    node.step_j * dj as f32
                };
                // Extrapolate from the opposite neighbour when there is one.
                let pred = match nodes.get(&(i - di, j - dj)) {
                    Some(back) => p + (p - self.position(back.index)),
                    None => p + step,
                };
                let radius = self.params.search_radius_rel * step.norm();
                let Some(found) = self.find_near(pred, radius, node.index, &used) else {
                    continue;
                };
                let q = self.position(found);
                if (q - p).norm() < self.params.min_spacing_pix {
                    continue;
                }

                let (mut step_i, mut step_j) = (node.step_i, node.step_j);
                if di != 0 {
                    step_i = (q - p) * di as f32;
                } else {
                    step_j = (q - p) * dj as f32;
                }
                // Refresh the cross step from an already placed side neighbour.
                let (ti, tj) = target;
                if di != 0 {
                    if let Some(side) = nodes.get(&(ti, tj - 1)) {
                        step_j = q - self.position(side.index);
                    } else if let Some(side) = nodes.get(&(ti, tj + 1)) {
                        step_j = self.position(side.index) - q;
                    }
                } else if let Some(side) = nodes.get(&(ti - 1, tj)) {
                    step_i = q - self.position(side.index);
                } else if let Some(side) = nodes.get(&(ti + 1, tj)) {
                    step_i = self.position(side.index) - q;
                }

                used[found] = true;
                nodes.insert(
                    target,
                    Node {
                        index: found,
                        step_i,
                        step_j,
                    },
                );
                queue.push_back(target);
            }

            if nodes.len() > max_cells {
                break;
            }
        }

        GrownGrid {
            cells: nodes.into_iter().map(|(k, n)| (k, n.index)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point2;
    use std::f32::consts::FRAC_PI_4;

    fn lattice(cols: usize, rows: usize, spacing: f32) -> Vec<Corner> {
        let mut corners = Vec::new();
        for j in 0..rows {
            for i in 0..cols {
                let orientation = if (i + j) % 2 == 0 {
                    FRAC_PI_4
                } else {
                    3.0 * FRAC_PI_4
                };
                corners.push(Corner {
                    position: Point2::new(20.0 + i as f32 * spacing, 30.0 + j as f32 * spacing),
                    orientation,
                    strength: 1.0,
                });
            }
        }
        corners
    }

    #[test]
    fn seed_axes_follow_lattice_edges() {
        let corners = lattice(4, 3, 15.0);
        let params = GridParams::default();
        let grower = GridGrower::new(&corners, &params);
        let (u, v) = grower.seed_axes(5).expect("axes");
        assert!((u.norm() - 15.0).abs() < 1e-4);
        assert!((v.norm() - 15.0).abs() < 1e-4);
        assert!(u.dot(&v).abs() < 1e-3);
    }

    #[test]
    fn grows_full_lattice_and_ignores_clutter() {
        let mut corners = lattice(5, 4, 18.0);
        // Far-away clutter and a same-phase point on a diagonal.
        corners.push(Corner {
            position: Point2::new(300.0, 300.0),
            orientation: 0.3,
            strength: 1.0,
        });
        corners.push(Corner {
            position: Point2::new(20.0 + 9.0, 30.0 + 9.0),
            orientation: FRAC_PI_4,
            strength: 1.0,
        });
        let params = GridParams::default();
        let grower = GridGrower::new(&corners, &params);
        let (u, v) = grower.seed_axes(0).expect("axes");
        let grid = grower.grow(0, u, v, 100);
        assert_eq!(grid.len(), 20);
        let (w, h) = grid.extent();
        assert!((w, h) == (5, 4) || (w, h) == (4, 5));
    }

    #[test]
    fn no_axes_without_opposite_phase_neighbours() {
        let mut corners = lattice(3, 3, 15.0);
        for c in &mut corners {
            c.orientation = FRAC_PI_4;
        }
        let params = GridParams::default();
        let grower = GridGrower::new(&corners, &params);
        assert!(grower.seed_axes(4).is_none());
    }

    #[test]
    fn follows_a_curved_lattice() {
        // Barrel-like bending: spacing shrinks away from the centre.
        let mut corners = Vec::new();
        for j in 0..6 {
            for i in 0..9 {
                let x = i as f32 - 4.0;
                let y = j as f32 - 2.5;
                let r2 = x * x + y * y;
                let s = 22.0 * (1.0 - 0.012 * r2);
                let orientation = if (i + j) % 2 == 0 {
                    FRAC_PI_4
                } else {
                    3.0 * FRAC_PI_4
                };
                corners.push(Corner {
                    position: Point2::new(200.0 + x * s, 150.0 + y * s),
                    orientation,
                    strength: 1.0,
                });
            }
        }
        let params = GridParams::default();
        let grower = GridGrower::new(&corners, &params);
        let seed = 4 + 2 * 9;
        let (u, v) = grower.seed_axes(seed).expect("axes");
        let grid = grower.grow(seed, u, v, 200);
        assert_eq!(grid.len(), 54);
    }
}
