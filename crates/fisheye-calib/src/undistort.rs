use crate::codec::{decode, encode, to_image};
use crate::{Calibration, FisheyeError, UndistortOptions};
use fisheye_calib_core::{
    FisheyeCamera, Image, ImageView, RemapCache, RemapTable, MAX_OUTPUT_PIXELS,
};
use std::sync::{Arc, OnceLock};

#[cfg(feature = "tracing")]
use tracing::instrument;

static REMAP_CACHE: OnceLock<RemapCache> = OnceLock::new();

/// Process-wide cache used by [`crate::undistort`].
pub fn remap_cache() -> &'static RemapCache {
    REMAP_CACHE.get_or_init(RemapCache::default)
}

/// Undistorts decoded images for one camera.
#[derive(Clone, Debug)]
pub struct Undistorter {
    camera: FisheyeCamera,
    scale: f64,
    recenter: bool,
}

impl Undistorter {
    pub fn new(camera: FisheyeCamera, options: &UndistortOptions) -> Result<Self, FisheyeError> {
        options.validate()?;
        Ok(Self {
            camera,
            scale: options.scale,
            recenter: options.recenter,
        })
    }

    /// Remap table for a `width × height` source, shared through `cache`.
    ///
    /// Fails with [`FisheyeError::MalformedParameter`] when the scaled output
    /// would exceed [`MAX_OUTPUT_PIXELS`].
    pub fn table(
        &self,
        cache: &RemapCache,
        width: usize,
        height: usize,
    ) -> Result<Arc<RemapTable>, FisheyeError> {
        let (out_w, out_h) = RemapTable::scaled_size(width, height, self.scale).ok_or_else(|| {
            FisheyeError::MalformedParameter(format!(
                "scale {} turns a {width}x{height} image into more than {MAX_OUTPUT_PIXELS} pixels",
                self.scale
            ))
        })?;
        let new_k =
            RemapTable::output_intrinsics(&self.camera, (width, height), (out_w, out_h), self.recenter);
        Ok(cache.get_or_build(&self.camera, &new_k, out_w, out_h))
    }

    pub fn apply(&self, src: &ImageView<'_>) -> Result<Image, FisheyeError> {
        Ok(self.table(remap_cache(), src.width, src.height)?.apply(src))
    }
}

#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip_all, fields(bytes = image_bytes.len(), scale = options.scale))
)]
pub(crate) fn undistort_bytes(
    image_bytes: &[u8],
    calibration: &Calibration,
    options: &UndistortOptions,
) -> Result<Vec<u8>, FisheyeError> {
    let camera = calibration.camera()?;
    let undistorter = Undistorter::new(camera, options)?;
    let src = to_image(decode(image_bytes, 0)?);
    let out = undistorter.apply(&src.view())?;
    log::debug!(
        "undistorted {}x{} -> {}x{} ({:?})",
        src.width,
        src.height,
        out.width,
        out.height,
        options.format
    );
    encode(&out.view(), options.format, options.effective_quality())
}
