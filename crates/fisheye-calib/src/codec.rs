//! Boundary between compressed containers and the in-memory image buffers.

use crate::{FisheyeError, OutputFormat};
use fisheye_calib_core::{GrayImage, Image, ImageView};
use image::codecs::bmp::BmpEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder};

pub(crate) fn decode(bytes: &[u8], index: usize) -> Result<DynamicImage, FisheyeError> {
    image::load_from_memory(bytes).map_err(|source| FisheyeError::Decode { index, source })
}

/// Grayscale sources stay single-channel; everything else becomes RGB.
pub(crate) fn to_image(img: DynamicImage) -> Image {
    let (width, height) = (img.width() as usize, img.height() as usize);
    match img {
        DynamicImage::ImageLuma8(buf) => Image {
            width,
            height,
            channels: 1,
            data: buf.into_raw(),
        },
        other => Image {
            width,
            height,
            channels: 3,
            data: other.into_rgb8().into_raw(),
        },
    }
}

pub(crate) fn to_gray(img: DynamicImage) -> GrayImage {
    let (width, height) = (img.width() as usize, img.height() as usize);
    GrayImage {
        width,
        height,
        data: img.into_luma8().into_raw(),
    }
}

fn png_compression(level: u8) -> CompressionType {
    match level {
        0..=2 => CompressionType::Fast,
        3..=6 => CompressionType::Default,
        _ => CompressionType::Best,
    }
}

pub(crate) fn encode(
    img: &ImageView<'_>,
    format: OutputFormat,
    quality: Option<u8>,
) -> Result<Vec<u8>, FisheyeError> {
    let color = match img.channels {
        1 => ExtendedColorType::L8,
        3 => ExtendedColorType::Rgb8,
        4 => ExtendedColorType::Rgba8,
        n => {
            return Err(FisheyeError::MalformedParameter(format!(
                "cannot encode {n}-channel image"
            )))
        }
    };
    let too_large = || FisheyeError::MalformedParameter("image dimensions exceed u32".into());
    let width = u32::try_from(img.width).map_err(|_| too_large())?;
    let height = u32::try_from(img.height).map_err(|_| too_large())?;

    let mut out = Vec::new();
    let written = match format {
        OutputFormat::Jpeg => {
            let q = quality.or(format.default_quality()).unwrap_or(95);
            JpegEncoder::new_with_quality(&mut out, q).write_image(img.data, width, height, color)
        }
        OutputFormat::Png => {
            let level = quality.or(format.default_quality()).unwrap_or(3);
            PngEncoder::new_with_quality(&mut out, png_compression(level), FilterType::Adaptive)
                .write_image(img.data, width, height, color)
        }
        OutputFormat::WebP => {
            WebPEncoder::new_lossless(&mut out).write_image(img.data, width, height, color)
        }
        OutputFormat::Bmp => {
            BmpEncoder::new(&mut out).write_image(img.data, width, height, color)
        }
    };
    written.map_err(FisheyeError::Encode)?;
    Ok(out)
}
