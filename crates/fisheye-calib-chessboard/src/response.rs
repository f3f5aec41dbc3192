use fisheye_calib_core::GrayImageView;
#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Radius of the sampling ring.
pub(crate) const RING_RADIUS: usize = 5;

/// 16 ring offsets `(dx, dy)` in circular order; entry `n + 8` is opposite `n`.
pub(crate) const RING: [(i32, i32); 16] = [
    (0, 5),
    (2, 5),
    (3, 3),
    (5, 2),
    (5, 0),
    (5, -2),
    (3, -3),
    (2, -5),
    (0, -5),
    (-2, -5),
    (-3, -3),
    (-5, -2),
    (-5, 0),
    (-5, 2),
    (-3, 3),
    (-2, 5),
];

/// Dense response map in row-major layout.
#[derive(Clone, Debug)]
pub struct ResponseMap {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl ResponseMap {
    #[inline]
    pub fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    pub fn max(&self) -> f32 {
        self.data.iter().copied().fold(0.0, f32::max)
    }
}

#[inline]
fn ring_samples(img: &GrayImageView<'_>, x: usize, y: usize) -> [f32; 16] {
    let mut ring = [0.0f32; 16];
    for (n, &(dx, dy)) in RING.iter().enumerate() {
        let sx = (x as i32 + dx) as usize;
        let sy = (y as i32 + dy) as usize;
        ring[n] = img.data[sy * img.width + sx] as f32;
    }
    ring
}

/// ChESS response at an interior pixel: sum response minus difference
/// response minus the mean penalty.
#[inline]
fn response_at(img: &GrayImageView<'_>, x: usize, y: usize) -> f32 {
    let i = ring_samples(img, x, y);

    let mut sum_resp = 0.0;
    for n in 0..4 {
        sum_resp += ((i[n] + i[n + 8]) - (i[n + 4] + i[n + 12])).abs();
    }
    let mut diff_resp = 0.0;
    for n in 0..8 {
        diff_resp += (i[n] - i[n + 8]).abs();
    }

    let w = img.width;
    let c = y * w + x;
    let d = img.data;
    let local =
        (d[c] as f32 + d[c - 1] as f32 + d[c + 1] as f32 + d[c - w] as f32 + d[c + w] as f32) / 5.0;
    let ring_sum: f32 = i.iter().sum();

    sum_resp - diff_resp - (ring_sum - 16.0 * local).abs()
}

/// Compute the ChESS response for every pixel; a `RING_RADIUS` border is zero.
pub fn chess_response(img: &GrayImageView<'_>) -> ResponseMap {
    let (w, h) = (img.width, img.height);
    let mut data = vec![0.0f32; w * h];
    let r = RING_RADIUS;
    if w > 2 * r && h > 2 * r {
        #[cfg(feature = "rayon")]
        let rows = data.par_chunks_mut(w);
        #[cfg(not(feature = "rayon"))]
        let rows = data.chunks_mut(w);
        rows.enumerate()
            .skip(r)
            .take(h - 2 * r)
            .for_each(|(y, row)| {
                for (x, out) in row.iter_mut().enumerate().take(w - r).skip(r) {
                    *out = response_at(img, x, y);
                }
            });
    }
    ResponseMap {
        width: w,
        height: h,
        data,
    }
}

/// Direction of the light-square diagonal at an interior pixel, in `[0, π)`.
///
/// Uses the second angular harmonic of the ring so the estimate is defined
/// modulo π.
pub(crate) fn ring_orientation(img: &GrayImageView<'_>, x: usize, y: usize) -> f32 {
    let i = ring_samples(img, x, y);
    let mean = i.iter().sum::<f32>() / 16.0;
    let (mut c, mut s) = (0.0f32, 0.0f32);
    for (n, &(dx, dy)) in RING.iter().enumerate() {
        let phi = (dy as f32).atan2(dx as f32);
        let v = i[n] - mean;
        c += v * (2.0 * phi).cos();
        s += v * (2.0 * phi).sin();
    }
    (0.5 * s.atan2(c)).rem_euclid(std::f32::consts::PI)
}
