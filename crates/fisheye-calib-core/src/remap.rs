//! Undistortion remap tables.
//!
//! A [`RemapTable`] stores, for every pixel of the undistorted output, the
//! sub-pixel location in the distorted source image it is read from. Tables
//! depend only on the camera, the output intrinsics and the output size, so
//! they are immutable once built and can be shared through a [`RemapCache`].

use crate::image::sample_channel;
use crate::{FisheyeCamera, Image, ImageView, Intrinsics};
use log::debug;
use nalgebra::Point2;
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Per-pixel source coordinates for one `(camera, output intrinsics, size)`.
#[derive(Clone, Debug, PartialEq)]
pub struct RemapTable {
    pub width: usize,
    pub height: usize,
    /// Row-major `[x, y]` source coordinates, `width * height` entries.
    pub map: Vec<[f32; 2]>,
}

/// Largest output canvas a table may describe, in pixels.
pub const MAX_OUTPUT_PIXELS: usize = 1 << 28;

impl RemapTable {
    /// Output size for a scale factor; truncates like integer pixel sizes do,
    /// never below one pixel.
    ///
    /// Returns `None` when the result is not finite or exceeds
    /// [`MAX_OUTPUT_PIXELS`].
    pub fn scaled_size(width: usize, height: usize, scale: f64) -> Option<(usize, usize)> {
        let w = (width as f64 * scale).floor().max(1.0);
        let h = (height as f64 * scale).floor().max(1.0);
        let budget = MAX_OUTPUT_PIXELS as f64;
        if !(w.is_finite() && h.is_finite()) || w * h > budget {
            return None;
        }
        let (w, h) = (w as usize, h as usize);
        w.checked_mul(h)
            .filter(|&n| n <= MAX_OUTPUT_PIXELS)
            .map(|_| (w, h))
    }

    /// Output intrinsics for an output canvas of `out` pixels.
    ///
    /// Without `recenter` the source `K` is reused as is, so the optical
    /// centre stays at the same pixel and an enlarged canvas only grows to
    /// the right and bottom. With `recenter` the principal point is shifted
    /// by half the size difference.
    pub fn output_intrinsics(
        camera: &FisheyeCamera,
        src: (usize, usize),
        out: (usize, usize),
        recenter: bool,
    ) -> Intrinsics {
        let mut k = camera.intrinsics;
        if recenter {
            k.cx += (out.0 as f64 - src.0 as f64) * 0.5;
            k.cy += (out.1 as f64 - src.1 as f64) * 0.5;
        }
        k
    }

    /// Build the table: back-project each output pixel with `new_k`, apply
    /// the forward fisheye model and project with the camera's own `K`.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(camera, new_k)))]
    pub fn build(camera: &FisheyeCamera, new_k: &Intrinsics, width: usize, height: usize) -> Self {
        let mut map = vec![[0.0f32; 2]; width * height];
        if width > 0 {
            #[cfg(feature = "rayon")]
            let rows = map.par_chunks_mut(width);
            #[cfg(not(feature = "rayon"))]
            let rows = map.chunks_mut(width);
            rows.enumerate().for_each(|(v, row)| {
                for (u, entry) in row.iter_mut().enumerate() {
                    let p = new_k.normalize(Point2::new(u as f64, v as f64));
                    let src = camera.project_normalized(p);
                    *entry = [src.x as f32, src.y as f32];
                }
            });
        }
        debug!("built {width}x{height} remap table");
        Self { width, height, map }
    }

    /// Bilinearly resample `src` through the table.
    ///
    /// Source taps outside the image contribute zero, so entries that fall
    /// off the source fade to black.
    pub fn apply(&self, src: &ImageView<'_>) -> Image {
        let channels = src.channels;
        let mut out = Image::new(self.width, self.height, channels);
        if self.width == 0 || channels == 0 {
            return out;
        }
        #[cfg(feature = "rayon")]
        let rows = out
            .data
            .par_chunks_mut(self.width * channels)
            .zip(self.map.par_chunks(self.width));
        #[cfg(not(feature = "rayon"))]
        let rows = out
            .data
            .chunks_mut(self.width * channels)
            .zip(self.map.chunks(self.width));
        rows.for_each(|(row, coords)| {
            for (px, &[sx, sy]) in row.chunks_exact_mut(channels).zip(coords) {
                for (c, sample) in px.iter_mut().enumerate() {
                    let v = sample_channel(src, sx, sy, c);
                    *sample = (v + 0.5).clamp(0.0, 255.0) as u8;
                }
            }
        });
        out
    }
}

/// Cache key: bit patterns of every parameter plus the output size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RemapKey {
    params: [u64; 12],
    width: usize,
    height: usize,
}

impl RemapKey {
    pub fn new(camera: &FisheyeCamera, new_k: &Intrinsics, width: usize, height: usize) -> Self {
        let k = camera.intrinsics;
        let d = camera.distortion;
        let values = [
            k.fx, k.fy, k.cx, k.cy, d.k1, d.k2, d.k3, d.k4, new_k.fx, new_k.fy, new_k.cx, new_k.cy,
        ];
        // `+ 0.0` folds -0.0 into +0.0.
        Self {
            params: values.map(|v| (v + 0.0).to_bits()),
            width,
            height,
        }
    }
}

/// Shared store of built remap tables.
#[derive(Debug)]
pub struct RemapCache {
    tables: Mutex<HashMap<RemapKey, Arc<RemapTable>>>,
    capacity: usize,
}

impl Default for RemapCache {
    fn default() -> Self {
        Self::new(8)
    }
}

impl RemapCache {
    /// `capacity` bounds the number of tables kept; the cache is flushed
    /// when it would grow past it.
    pub fn new(capacity: usize) -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn get_or_build(
        &self,
        camera: &FisheyeCamera,
        new_k: &Intrinsics,
        width: usize,
        height: usize,
    ) -> Arc<RemapTable> {
        let key = RemapKey::new(camera, new_k, width, height);
        if let Some(table) = self.lock().get(&key) {
            return Arc::clone(table);
        }

        // Built without holding the lock; a concurrent builder may win the insert.
        let built = Arc::new(RemapTable::build(camera, new_k, width, height));
        let mut tables = self.lock();
        if tables.len() >= self.capacity && !tables.contains_key(&key) {
            debug!("remap cache full ({} tables), flushing", tables.len());
            tables.clear();
        }
        Arc::clone(tables.entry(key).or_insert(built))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RemapKey, Arc<RemapTable>>> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Distortion, GrayImage};

    fn camera(f: f64, w: usize, h: usize, d: [f64; 4]) -> FisheyeCamera {
        FisheyeCamera::new(
            Intrinsics::new(f, f, w as f64 / 2.0 - 0.5, h as f64 / 2.0 - 0.5).unwrap(),
            Distortion::from_array(d).unwrap(),
        )
    }

    fn textured(w: usize, h: usize) -> GrayImage {
        let mut img = GrayImage::new(w, h);
        for y in 0..h {
            for x in 0..w {
                img.data[y * w + x] = ((x * 7 + y * 13) % 251) as u8;
            }
        }
        img
    }

    #[test]
    fn zero_distortion_is_identity_in_narrow_field() {
        // The equidistant model only approaches a pinhole near the axis, so
        // a long focal length keeps the whole image there.
        let (w, h) = (64, 64);
        let cam = camera(10_000.0, w, h, [0.0; 4]);
        let img = textured(w, h);
        let table = RemapTable::build(&cam, &cam.intrinsics, w, h);
        let out = table.apply(&img.view().into());
        assert_eq!(out.data, img.data);
    }

    #[test]
    fn table_entries_follow_forward_model() {
        let cam = camera(200.0, 320, 240, [0.05, -0.01, 0.0, 0.0]);
        let table = RemapTable::build(&cam, &cam.intrinsics, 320, 240);
        let (u, v) = (300usize, 20usize);
        let expected = cam.project_normalized(cam.intrinsics.normalize(Point2::new(u as f64, v as f64)));
        let got = table.map[v * 320 + u];
        assert!((got[0] as f64 - expected.x).abs() < 1e-3);
        assert!((got[1] as f64 - expected.y).abs() < 1e-3);
        // The principal point maps onto itself.
        let c = table.map[120 * 320 + 160];
        assert!((c[0] - 160.0).abs() < 0.6 && (c[1] - 120.0).abs() < 0.6);
    }

    #[test]
    fn build_and_apply_are_deterministic() {
        let cam = camera(150.0, 96, 72, [0.1, -0.05, 0.01, 0.0]);
        let img = textured(96, 72);
        let a = RemapTable::build(&cam, &cam.intrinsics, 96, 72).apply(&img.view().into());
        let b = RemapTable::build(&cam, &cam.intrinsics, 96, 72).apply(&img.view().into());
        assert_eq!(a, b);
    }

    #[test]
    fn scaled_size_truncates() {
        assert_eq!(RemapTable::scaled_size(640, 480, 1.0), Some((640, 480)));
        assert_eq!(RemapTable::scaled_size(641, 481, 1.5), Some((961, 721)));
        assert_eq!(RemapTable::scaled_size(10, 10, 0.01), Some((1, 1)));
    }

    #[test]
    fn scaled_size_rejects_oversized_canvas() {
        assert_eq!(RemapTable::scaled_size(10, 10, 1e12), None);
        assert_eq!(RemapTable::scaled_size(10, 10, f64::MAX), None);
        assert_eq!(RemapTable::scaled_size(usize::MAX, 2, 1.0), None);
        // Exactly at the budget is fine, one row more is not.
        assert_eq!(
            RemapTable::scaled_size(1 << 14, 1 << 14, 1.0),
            Some((1 << 14, 1 << 14))
        );
        assert_eq!(RemapTable::scaled_size(1 << 14, (1 << 14) + 1, 1.0), None);
    }

    #[test]
    fn extreme_distortion_maps_off_image() {
        let cam = camera(100.0, 16, 16, [1e30, 0.0, 0.0, 0.0]);
        let img = GrayImage {
            width: 16,
            height: 16,
            data: vec![200; 16 * 16],
        };
        let out = RemapTable::build(&cam, &cam.intrinsics, 16, 16).apply(&img.view().into());
        assert_eq!((out.width, out.height), (16, 16));
        assert_eq!(out.data[0], 0);
        assert_eq!(out.data[15], 0);
    }

    #[test]
    fn recenter_shifts_principal_point() {
        let cam = camera(100.0, 100, 80, [0.0; 4]);
        let same = RemapTable::output_intrinsics(&cam, (100, 80), (200, 160), false);
        assert_eq!(same, cam.intrinsics);
        let moved = RemapTable::output_intrinsics(&cam, (100, 80), (200, 160), true);
        assert_eq!(moved.cx, cam.intrinsics.cx + 50.0);
        assert_eq!(moved.cy, cam.intrinsics.cy + 40.0);
    }

    #[test]
    fn out_of_bounds_entries_are_zero() {
        let cam = camera(40.0, 32, 32, [0.0; 4]);
        let img = GrayImage {
            width: 32,
            height: 32,
            data: vec![255; 32 * 32],
        };
        let k = RemapTable::output_intrinsics(&cam, (32, 32), (96, 96), true);
        let out = RemapTable::build(&cam, &k, 96, 96).apply(&img.view().into());
        assert_eq!(out.data[0], 0);
        assert_eq!(out.data[48 * 96 + 48], 255);
    }

    #[test]
    fn cache_shares_tables() {
        let cache = RemapCache::new(2);
        let cam = camera(120.0, 40, 30, [0.01, 0.0, 0.0, 0.0]);
        let a = cache.get_or_build(&cam, &cam.intrinsics, 40, 30);
        let b = cache.get_or_build(&cam, &cam.intrinsics, 40, 30);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);

        cache.get_or_build(&cam, &cam.intrinsics, 20, 15);
        cache.get_or_build(&cam, &cam.intrinsics, 10, 5);
        assert!(cache.len() <= 2);
    }
}
