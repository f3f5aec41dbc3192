//! Core types and utilities for fisheye calibration.
//!
//! This crate is purely geometric: image buffers with bilinear sampling, the
//! equidistant (Kannala-Brandt) fisheye camera model, planar pattern
//! geometry, homography estimation and the undistortion remap table. It does
//! not know about image containers or corner detectors.

mod camera;
mod error;
mod grid;
mod homography;
mod image;
mod logger;
mod pattern;
mod remap;
pub mod synthetic;

pub use camera::{Distortion, FisheyeCamera, Intrinsics, Pose};
pub use error::ModelError;
pub use grid::{GridTransform, GRID_TRANSFORMS_D4};
pub use homography::{estimate_homography, Homography};
pub use image::{
    sample_bilinear, sample_bilinear_u8, sample_channel, GrayImage, GrayImageView, Image,
    ImageView,
};
pub use pattern::PatternGeometry;
pub use remap::{RemapCache, RemapKey, RemapTable, MAX_OUTPUT_PIXELS};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_from_verbosity, init_with_level, level_from_verbosity};
