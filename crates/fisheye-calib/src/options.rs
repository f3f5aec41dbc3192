//! Typed options for [`crate::undistort`].

use crate::FisheyeError;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::Path;

/// Output container format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
    WebP,
    Bmp,
}

impl OutputFormat {
    /// Parse an extension such as `".jpg"`, `"png"` or `"WEBP"`.
    pub fn from_extension(ext: &str) -> Result<Self, FisheyeError> {
        let trimmed = ext.trim().trim_start_matches('.');
        match trimmed.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            "webp" => Ok(Self::WebP),
            "bmp" => Ok(Self::Bmp),
            _ => Err(FisheyeError::UnsupportedFormat(ext.to_string())),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, FisheyeError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| FisheyeError::UnsupportedFormat(path.display().to_string()))?;
        Self::from_extension(ext)
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => ".jpg",
            Self::Png => ".png",
            Self::WebP => ".webp",
            Self::Bmp => ".bmp",
        }
    }

    /// Accepted quality values; `None` when the encoder has no quality knob.
    pub fn quality_range(self) -> Option<RangeInclusive<u8>> {
        match self {
            Self::Jpeg => Some(1..=100),
            Self::Png => Some(0..=9),
            Self::WebP | Self::Bmp => None,
        }
    }

    pub fn default_quality(self) -> Option<u8> {
        match self {
            Self::Jpeg => Some(95),
            Self::Png => Some(3),
            Self::WebP | Self::Bmp => None,
        }
    }
}

/// Options for [`crate::undistort`].
///
/// `quality` is the JPEG quality (1..=100) or the PNG compression level
/// (0..=9). WebP output is lossless and BMP uncompressed, so the value is
/// ignored for both.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UndistortOptions {
    pub format: OutputFormat,
    pub quality: Option<u8>,
    /// Output size multiplier; `2.0` doubles width and height.
    pub scale: f64,
    /// Keep the optical centre in the middle of a rescaled output.
    pub recenter: bool,
}

impl Default for UndistortOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::Jpeg,
            quality: None,
            scale: 1.0,
            recenter: false,
        }
    }
}

impl UndistortOptions {
    /// Build from the loose `{ extname, quantity, scale }` option bag; any
    /// missing field takes its default.
    pub fn from_parts(
        extname: Option<&str>,
        quantity: Option<i64>,
        scale: Option<f64>,
    ) -> Result<Self, FisheyeError> {
        let format = match extname {
            Some(ext) => OutputFormat::from_extension(ext)?,
            None => OutputFormat::default(),
        };
        let quality = quantity
            .map(|q| {
                u8::try_from(q).map_err(|_| {
                    FisheyeError::MalformedParameter(format!("quality {q} is out of range"))
                })
            })
            .transpose()?;
        let options = Self {
            format,
            quality,
            scale: scale.unwrap_or(1.0),
            recenter: false,
        };
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), FisheyeError> {
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(FisheyeError::MalformedParameter(format!(
                "scale must be a positive finite number, got {}",
                self.scale
            )));
        }
        if let (Some(q), Some(range)) = (self.quality, self.format.quality_range()) {
            if !range.contains(&q) {
                return Err(FisheyeError::MalformedParameter(format!(
                    "quality {q} is outside {}..={} for {:?}",
                    range.start(),
                    range.end(),
                    self.format
                )));
            }
        }
        Ok(())
    }

    /// Quality passed to the encoder.
    pub fn effective_quality(&self) -> Option<u8> {
        self.format.quality_range()?;
        self.quality.or(self.format.default_quality())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_parse_loosely() {
        assert_eq!(OutputFormat::from_extension(".JPG").unwrap(), OutputFormat::Jpeg);
        assert_eq!(OutputFormat::from_extension("jpeg").unwrap(), OutputFormat::Jpeg);
        assert_eq!(OutputFormat::from_extension(".webp").unwrap(), OutputFormat::WebP);
        assert_eq!(
            OutputFormat::from_path(Path::new("out/frame.png")).unwrap(),
            OutputFormat::Png
        );
        assert!(matches!(
            OutputFormat::from_extension(".tiff"),
            Err(FisheyeError::UnsupportedFormat(_))
        ));
        assert!(OutputFormat::from_path(Path::new("noext")).is_err());
    }

    #[test]
    fn defaults_match_empty_bag() {
        let opts = UndistortOptions::from_parts(None, None, None).unwrap();
        assert_eq!(opts, UndistortOptions::default());
        assert_eq!(opts.effective_quality(), Some(95));
    }

    #[test]
    fn quality_is_validated_per_format() {
        assert!(UndistortOptions::from_parts(Some(".png"), Some(9), None).is_ok());
        assert!(matches!(
            UndistortOptions::from_parts(Some(".png"), Some(10), None),
            Err(FisheyeError::MalformedParameter(_))
        ));
        assert!(UndistortOptions::from_parts(Some(".jpg"), Some(0), None).is_err());
        assert!(UndistortOptions::from_parts(Some(".jpg"), Some(-3), None).is_err());
        let webp = UndistortOptions::from_parts(Some(".webp"), Some(200), None).unwrap();
        assert_eq!(webp.effective_quality(), None);
    }

    #[test]
    fn scale_must_be_positive() {
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(UndistortOptions::from_parts(None, None, Some(bad)).is_err());
        }
        assert_eq!(
            UndistortOptions::from_parts(None, None, Some(1.5)).unwrap().scale,
            1.5
        );
    }

    #[test]
    fn serde_uses_defaults() {
        let opts: UndistortOptions = serde_json::from_str(r#"{"format":"png"}"#).unwrap();
        assert_eq!(opts.format, OutputFormat::Png);
        assert_eq!(opts.scale, 1.0);
    }
}
