use crate::params::SaddleParams;
use crate::response::{chess_response, ring_orientation, ResponseMap, RING_RADIUS};
use fisheye_calib_core::GrayImageView;
use kiddo::{KdTree, SquaredEuclidean};
use log::debug;
use nalgebra::Point2;

/// Saddle-point candidate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Corner {
    /// Sub-pixel position (pixel centres at integer coordinates).
    pub position: Point2<f32>,
    /// Light-square diagonal direction, modulo π.
    pub orientation: f32,
    /// ChESS response at the peak.
    pub strength: f32,
}

fn is_local_max(resp: &ResponseMap, x: usize, y: usize, radius: usize) -> bool {
    let v = resp.at(x, y);
    let idx = y * resp.width + x;
    for yy in y - radius..=y + radius {
        for xx in x - radius..=x + radius {
            let q = resp.at(xx, yy);
            let qidx = yy * resp.width + xx;
            // Plateaus keep only their first pixel in raster order.
            if q > v || (q == v && qidx < idx) {
                return false;
            }
        }
    }
    true
}

fn cluster_size(resp: &ResponseMap, x: usize, y: usize, radius: usize, threshold: f32) -> u32 {
    let mut count = 0;
    for yy in y - radius..=y + radius {
        for xx in x - radius..=x + radius {
            if resp.at(xx, yy) > threshold {
                count += 1;
            }
        }
    }
    count
}

/// Centre of mass of the positive response in a 5×5 window.
fn subpixel_peak(resp: &ResponseMap, x: usize, y: usize) -> Point2<f32> {
    let (mut sw, mut sx, mut sy) = (0.0f32, 0.0f32, 0.0f32);
    for dy in -2i32..=2 {
        for dx in -2i32..=2 {
            let xx = (x as i32 + dx) as usize;
            let yy = (y as i32 + dy) as usize;
            let w = resp.at(xx, yy).max(0.0);
            sw += w;
            sx += w * dx as f32;
            sy += w * dy as f32;
        }
    }
    if sw <= 0.0 {
        return Point2::new(x as f32, y as f32);
    }
    Point2::new(x as f32 + sx / sw, y as f32 + sy / sw)
}

/// Extract saddle candidates, strongest first.
pub fn find_corners(img: &GrayImageView<'_>, params: &SaddleParams) -> Vec<Corner> {
    let resp = chess_response(img);
    let max = resp.max();
    if max < params.threshold_abs {
        debug!("max saddle response {max:.1} below floor {}", params.threshold_abs);
        return Vec::new();
    }
    let threshold = (params.threshold_rel * max).max(params.threshold_abs);

    let nms = params.nms_radius as usize;
    let border = RING_RADIUS + nms.max(2);
    let mut corners = Vec::new();
    if img.width <= 2 * border || img.height <= 2 * border {
        return corners;
    }

    for y in border..img.height - border {
        for x in border..img.width - border {
            let v = resp.at(x, y);
            if v <= threshold || !is_local_max(&resp, x, y, nms) {
                continue;
            }
            if cluster_size(&resp, x, y, nms, threshold) < params.min_cluster_size {
                continue;
            }
            corners.push(Corner {
                position: subpixel_peak(&resp, x, y),
                orientation: ring_orientation(img, x, y),
                strength: v,
            });
        }
    }

    corners.sort_by(|a, b| {
        b.strength
            .total_cmp(&a.strength)
            .then(a.position.y.total_cmp(&b.position.y))
            .then(a.position.x.total_cmp(&b.position.x))
    });
    let kept = suppress_duplicates(corners, params.min_distance_pix);
    debug!("{} saddle candidates (threshold {threshold:.1})", kept.len());
    kept
}

/// Greedy suppression of weaker candidates near stronger ones; input must
/// be sorted strongest first.
fn suppress_duplicates(corners: Vec<Corner>, min_distance: f32) -> Vec<Corner> {
    if corners.len() < 2 || min_distance <= 0.0 {
        return corners;
    }
    let coords: Vec<[f32; 2]> = corners
        .iter()
        .map(|c| [c.position.x, c.position.y])
        .collect();
    let tree: KdTree<f32, 2> = (&coords).into();
    let min_d2 = min_distance * min_distance;

    let mut suppressed = vec![false; corners.len()];
    for i in 0..corners.len() {
        if suppressed[i] {
            continue;
        }
        for nn in tree.nearest_n::<SquaredEuclidean>(&coords[i], 8) {
            let j = nn.item as usize;
            if j > i && nn.distance < min_d2 {
                suppressed[j] = true;
            }
        }
    }
    corners
        .into_iter()
        .zip(suppressed)
        .filter_map(|(c, s)| (!s).then_some(c))
        .collect()
}
