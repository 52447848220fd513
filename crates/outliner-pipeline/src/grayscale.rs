//! Grayscale conversion with nearest-sample downsampling.
//!
//! The first pipeline stage: an RGBA buffer in, a single-channel
//! luminance image at processing resolution out. Downsampling picks the
//! nearest source pixel with no interpolation, trading quality for a
//! predictable, cheap pass over huge inputs.

use image::{GrayImage, RgbaImage};

/// Luminance of an RGB triple: `0.299*R + 0.587*G + 0.114*B`, rounded to
/// the nearest integer.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
    let l = f64::from(b).mul_add(0.114, f64::from(r).mul_add(0.299, f64::from(g) * 0.587));
    l.round().clamp(0.0, 255.0) as u8
}

/// Convert to luminance at `floor(width / factor) x floor(height / factor)`.
///
/// Each destination pixel samples source pixel
/// `(min(x * factor, width - 1), min(y * factor, height - 1))`. A factor
/// of 0 is treated as 1.
#[must_use = "returns the grayscale image"]
pub fn to_luma_downsampled(image: &RgbaImage, factor: u32) -> GrayImage {
    let factor = factor.max(1);
    let (width, height) = image.dimensions();
    let out_width = width / factor;
    let out_height = height / factor;

    GrayImage::from_fn(out_width, out_height, |x, y| {
        let src_x = (x * factor).min(width - 1);
        let src_y = (y * factor).min(height - 1);
        let [r, g, b, _] = image.get_pixel(src_x, src_y).0;
        image::Luma([luminance(r, g, b)])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn white_and_black() {
        assert_eq!(luminance(255, 255, 255), 255);
        assert_eq!(luminance(0, 0, 0), 0);
    }

    #[test]
    fn weighted_channels() {
        // 0.299 * 255 = 76.245, 0.587 * 255 = 149.685, 0.114 * 255 = 29.07
        assert_eq!(luminance(255, 0, 0), 76);
        assert_eq!(luminance(0, 255, 0), 150);
        assert_eq!(luminance(0, 0, 255), 29);
    }

    #[test]
    fn alpha_is_ignored() {
        let img = RgbaImage::from_pixel(2, 2, image::Rgba([10, 20, 30, 0]));
        let gray = to_luma_downsampled(&img, 1);
        assert_eq!(gray.get_pixel(0, 0).0[0], luminance(10, 20, 30));
    }

    #[test]
    fn factor_one_keeps_dimensions() {
        let img = RgbaImage::new(17, 31);
        let gray = to_luma_downsampled(&img, 1);
        assert_eq!(gray.dimensions(), (17, 31));
    }

    #[test]
    fn downsampled_dimensions_floor() {
        let img = RgbaImage::new(17, 31);
        let gray = to_luma_downsampled(&img, 4);
        assert_eq!(gray.dimensions(), (4, 7));
    }

    #[test]
    fn samples_nearest_source_pixel() {
        // Column x is white when x is a multiple of 3, black otherwise.
        let img = RgbaImage::from_fn(9, 3, |x, _| {
            if x % 3 == 0 {
                image::Rgba([255, 255, 255, 255])
            } else {
                image::Rgba([0, 0, 0, 255])
            }
        });
        let gray = to_luma_downsampled(&img, 3);
        assert_eq!(gray.dimensions(), (3, 1));
        for x in 0..3 {
            assert_eq!(gray.get_pixel(x, 0).0[0], 255);
        }
    }
}
