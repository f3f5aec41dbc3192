use serde::{Deserialize, Serialize};

/// Integer 2×2 transform on grid indices: `(i', j') = (a*i + b*j, c*i + d*j)`.
///
/// The eight members of the dihedral group `D4` ([`GRID_TRANSFORMS_D4`]) are
/// the relabelings of a square lattice that keep it a lattice; detectors use
/// them to bring an arbitrarily labelled grid into canonical order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridTransform {
    pub a: i32,
    pub b: i32,
    pub c: i32,
    pub d: i32,
}

impl GridTransform {
    pub const IDENTITY: GridTransform = GridTransform::new(1, 0, 0, 1);

    pub const fn new(a: i32, b: i32, c: i32, d: i32) -> Self {
        Self { a, b, c, d }
    }

    #[inline]
    pub fn apply(&self, i: i32, j: i32) -> [i32; 2] {
        [self.a * i + self.b * j, self.c * i + self.d * j]
    }

    /// True when the transform swaps the two grid axes.
    pub fn swaps_axes(&self) -> bool {
        self.a == 0
    }

    /// Map `cells` and shift them so the smallest index along each axis is 0.
    pub fn relabel(&self, cells: &[[i32; 2]]) -> Vec<[i32; 2]> {
        let mapped: Vec<[i32; 2]> = cells.iter().map(|&[i, j]| self.apply(i, j)).collect();
        let min_i = mapped.iter().map(|c| c[0]).min().unwrap_or(0);
        let min_j = mapped.iter().map(|c| c[1]).min().unwrap_or(0);
        mapped
            .into_iter()
            .map(|[i, j]| [i - min_i, j - min_j])
            .collect()
    }
}

/// The 8 dihedral transforms `D4` on the integer grid.
pub const GRID_TRANSFORMS_D4: [GridTransform; 8] = [
    // rotations: 0°, 90°, 180°, 270°
    GridTransform::new(1, 0, 0, 1),
    GridTransform::new(0, 1, -1, 0),
    GridTransform::new(-1, 0, 0, -1),
    GridTransform::new(0, -1, 1, 0),
    // reflections
    GridTransform::new(-1, 0, 0, 1),
    GridTransform::new(1, 0, 0, -1),
    GridTransform::new(0, 1, 1, 0),
    GridTransform::new(0, -1, -1, 0),
];
