/// Borrowed single-channel image, row-major.
#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // len = w*h
}

/// Owned single-channel image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0; width * height],
        }
    }

    pub fn view(&self) -> GrayImageView<'_> {
        GrayImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }
}

/// Borrowed interleaved image with `channels` samples per pixel.
#[derive(Clone, Copy, Debug)]
pub struct ImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: &'a [u8], // len = w*h*channels
}

/// Owned interleaved image with 1..=4 channels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Image {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: Vec<u8>,
}

impl Image {
    pub fn new(width: usize, height: usize, channels: usize) -> Self {
        Self {
            width,
            height,
            channels,
            data: vec![0; width * height * channels],
        }
    }

    pub fn view(&self) -> ImageView<'_> {
        ImageView {
            width: self.width,
            height: self.height,
            channels: self.channels,
            data: &self.data,
        }
    }
}

impl<'a> From<GrayImageView<'a>> for ImageView<'a> {
    fn from(src: GrayImageView<'a>) -> Self {
        ImageView {
            width: src.width,
            height: src.height,
            channels: 1,
            data: src.data,
        }
    }
}

impl From<Image> for GrayImage {
    /// Keeps the first channel of a multi-channel image.
    fn from(img: Image) -> Self {
        if img.channels == 1 {
            return GrayImage {
                width: img.width,
                height: img.height,
                data: img.data,
            };
        }
        let data = img.data.chunks_exact(img.channels).map(|px| px[0]).collect();
        GrayImage {
            width: img.width,
            height: img.height,
            data,
        }
    }
}

#[inline]
fn get_sample(src: &ImageView<'_>, x: i64, y: i64, c: usize) -> f32 {
    if x < 0 || y < 0 || x >= src.width as i64 || y >= src.height as i64 {
        return 0.0;
    }
    src.data[(y as usize * src.width + x as usize) * src.channels + c] as f32
}

/// Bilinear sample of channel `c`; taps outside the image read as zero.
///
/// Coordinates whose whole footprint is off the image (including NaN and
/// infinities) return zero before any integer conversion.
#[inline]
pub fn sample_channel(src: &ImageView<'_>, x: f32, y: f32, c: usize) -> f32 {
    if !(x > -1.0 && y > -1.0 && x < src.width as f32 && y < src.height as f32) {
        return 0.0;
    }
    let x0f = x.floor();
    let y0f = y.floor();
    let x0 = x0f as i64;
    let y0 = y0f as i64;
    let fx = x - x0f;
    let fy = y - y0f;

    let p00 = get_sample(src, x0, y0, c);
    let p10 = get_sample(src, x0 + 1, y0, c);
    let p01 = get_sample(src, x0, y0 + 1, c);
    let p11 = get_sample(src, x0 + 1, y0 + 1, c);

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

#[inline]
pub fn sample_bilinear(src: &GrayImageView<'_>, x: f32, y: f32) -> f32 {
    sample_channel(&ImageView::from(*src), x, y, 0)
}

#[inline]
pub fn sample_bilinear_u8(src: &GrayImageView<'_>, x: f32, y: f32) -> u8 {
    (sample_bilinear(src, x, y) + 0.5).clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: usize, height: usize) -> GrayImage {
        let mut img = GrayImage::new(width, height);
        for y in 0..height {
            for x in 0..width {
                img.data[y * width + x] = (10 * x + y) as u8;
            }
        }
        img
    }

    #[test]
    fn bilinear_interpolates_linear_ramp_exactly() {
        let img = ramp(8, 8);
        let v = sample_bilinear(&img.view(), 2.25, 3.5);
        assert!((v - (22.5 + 3.5)).abs() < 1e-4, "got {v}");
        assert_eq!(sample_bilinear_u8(&img.view(), 4.0, 1.0), 41);
    }

    #[test]
    fn outside_taps_read_zero() {
        let img = GrayImage {
            width: 2,
            height: 2,
            data: vec![200; 4],
        };
        assert_eq!(sample_bilinear(&img.view(), -5.0, 0.0), 0.0);
        // Half of the footprint hangs off the right border.
        let edge = sample_bilinear(&img.view(), 1.5, 0.0);
        assert!((edge - 100.0).abs() < 1e-4);
    }

    #[test]
    fn far_and_non_finite_coordinates_read_zero() {
        let img = GrayImage {
            width: 4,
            height: 4,
            data: vec![255; 16],
        };
        let view = img.view();
        for (x, y) in [
            (1e30, 1.0),
            (1.0, -1e30),
            (f32::MAX, f32::MAX),
            (f32::INFINITY, 0.0),
            (f32::NAN, 2.0),
            (-1.0, 2.0),
            (4.0, 2.0),
        ] {
            assert_eq!(sample_bilinear(&view, x, y), 0.0, "({x}, {y})");
        }
        // Just inside the guard band, one tap still lands on the image.
        assert!(sample_bilinear(&view, -0.5, 0.0) > 0.0);
        assert!(sample_bilinear(&view, 3.5, 3.0) > 0.0);
    }

    #[test]
    fn multi_channel_sampling_reads_requested_channel() {
        let img = Image {
            width: 2,
            height: 1,
            channels: 3,
            data: vec![10, 20, 30, 30, 40, 50],
        };
        let view = img.view();
        assert!((sample_channel(&view, 0.5, 0.0, 0) - 20.0).abs() < 1e-4);
        assert!((sample_channel(&view, 0.5, 0.0, 2) - 40.0).abs() < 1e-4);
        let gray: GrayImage = img.into();
        assert_eq!(gray.data, vec![10, 30]);
    }
}
