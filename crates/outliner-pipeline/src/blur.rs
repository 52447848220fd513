//! Separable box blur for noise reduction before thresholding.
//!
//! A horizontal pass followed by a vertical pass, each using a running
//! window sum so the cost is independent of the radius. Samples outside
//! the image reuse the nearest edge pixel.

use image::GrayImage;

/// Apply a `(2 * radius + 1)`-wide box blur.
///
/// A radius of 0 returns the image unchanged. Window averages are
/// rounded to the nearest integer, halves rounding up.
#[must_use = "returns the blurred image"]
pub fn box_blur(image: &GrayImage, radius: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    if radius == 0 || width == 0 || height == 0 {
        return image.clone();
    }

    let (w, h) = (width as usize, height as usize);
    let r = u64::from(radius);

    let mut horizontal = GrayImage::new(width, height);
    for y in 0..h {
        blur_line(image, &mut horizontal, y * w, 1, w, r);
    }

    let mut vertical = GrayImage::new(width, height);
    for x in 0..w {
        blur_line(&horizontal, &mut vertical, x, w, h, r);
    }

    vertical
}

/// Blur one row or column of `len` samples starting at `base`, `step`
/// apart in the flat buffer.
///
/// Sums are `u64`: a window of `2 * u32::MAX + 1` samples of 255 still
/// fits.
#[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
fn blur_line(src: &[u8], dst: &mut [u8], base: usize, step: usize, len: usize, radius: u64) {
    let last = len - 1;
    let sample = |i: i64| -> u64 {
        let clamped = i.clamp(0, last as i64).unsigned_abs() as usize;
        u64::from(src[base + clamped * step])
    };

    // Initial window -r..=r in closed form: r + 1 copies of the first
    // sample, the in-range tail, then copies of the last sample.
    let inside = radius.min(last as u64);
    let mut sum = sample(0) * (radius + 1)
        + (1..=inside).map(|i| sample(i as i64)).sum::<u64>()
        + sample(last as i64) * (radius - inside);
    let count = 2 * radius + 1;
    dst[base] = rounded_mean(sum, count);

    let r = radius as i64;
    for i in 1..len as i64 {
        sum -= sample(i - r - 1);
        sum += sample(i + r);
        dst[base + i.unsigned_abs() as usize * step] = rounded_mean(sum, count);
    }
}

/// `round(sum / count)` with halves rounding up, in integer arithmetic.
#[allow(clippy::cast_possible_truncation)]
fn rounded_mean(sum: u64, count: u64) -> u8 {
    ((2 * sum + count) / (2 * count)).min(255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A sharp black-to-white boundary at x=5.
    fn sharp_edge_image() -> GrayImage {
        GrayImage::from_fn(10, 10, |x, _y| {
            if x < 5 {
                image::Luma([0])
            } else {
                image::Luma([255])
            }
        })
    }

    /// Reference blur: full window average per pixel with clamped edges.
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    fn naive_box_blur(image: &GrayImage, radius: i64) -> GrayImage {
        let (w, h) = image.dimensions();
        let at = |img: &GrayImage, x: i64, y: i64| {
            let cx = x.clamp(0, i64::from(w) - 1) as u32;
            let cy = y.clamp(0, i64::from(h) - 1) as u32;
            u64::from(img.get_pixel(cx, cy).0[0])
        };
        let size = (2 * radius + 1) as u64;
        let horizontal = GrayImage::from_fn(w, h, |x, y| {
            let sum = (-radius..=radius)
                .map(|d| at(image, i64::from(x) + d, i64::from(y)))
                .sum();
            image::Luma([rounded_mean(sum, size)])
        });
        GrayImage::from_fn(w, h, |x, y| {
            let sum = (-radius..=radius)
                .map(|d| at(&horizontal, i64::from(x), i64::from(y) + d))
                .sum();
            image::Luma([rounded_mean(sum, size)])
        })
    }

    #[test]
    fn zero_radius_returns_identical_image() {
        let img = sharp_edge_image();
        assert_eq!(box_blur(&img, 0), img);
    }

    #[test]
    fn output_dimensions_preserved() {
        let img = GrayImage::new(17, 31);
        let blurred = box_blur(&img, 2);
        assert_eq!(blurred.dimensions(), (17, 31));
    }

    #[test]
    fn uniform_image_unchanged_by_blur() {
        let img = GrayImage::from_pixel(10, 10, image::Luma([128]));
        assert_eq!(box_blur(&img, 3), img);
    }

    #[test]
    fn blur_smooths_sharp_edge() {
        let blurred = box_blur(&sharp_edge_image(), 1);
        // Window [3,4,5] = 0,0,255 -> 85; window [4,5,6] = 0,255,255 -> 170.
        assert_eq!(blurred.get_pixel(4, 5).0[0], 85);
        assert_eq!(blurred.get_pixel(5, 5).0[0], 170);
        assert_eq!(blurred.get_pixel(0, 0).0[0], 0);
        assert_eq!(blurred.get_pixel(9, 9).0[0], 255);
    }

    #[test]
    fn halves_round_up() {
        // Window of [0, 0, 1]: mean 1/3 rounds down; [0, 1, 1]: 2/3 up.
        assert_eq!(rounded_mean(1, 3), 0);
        assert_eq!(rounded_mean(2, 3), 1);
        // Exactly .5: 3 / 2 = 1.5 rounds up.
        assert_eq!(rounded_mean(3, 2), 2);
    }

    #[test]
    fn sliding_window_matches_naive_blur() {
        #[allow(clippy::cast_possible_truncation)]
        let img = GrayImage::from_fn(23, 11, |x, y| {
            image::Luma([((x * 37 + y * 91 + x * y * 13) % 256) as u8])
        });
        for radius in 1..=4 {
            assert_eq!(
                box_blur(&img, radius),
                naive_box_blur(&img, i64::from(radius)),
                "radius {radius}",
            );
        }
    }

    #[test]
    fn radius_larger_than_image() {
        let img = GrayImage::from_fn(3, 2, |x, _| image::Luma([if x == 0 { 0 } else { 255 }]));
        let blurred = box_blur(&img, 5);
        assert_eq!(blurred, naive_box_blur(&img, 5));
    }

    #[test]
    fn huge_radius_on_uniform_image_is_identity() {
        let img = GrayImage::from_pixel(2, 2, image::Luma([255]));
        assert_eq!(box_blur(&img, 5_000_000), img);
        assert_eq!(box_blur(&img, u32::MAX), img);
    }

    #[test]
    fn huge_radius_averages_whole_line() {
        // Both passes see windows dominated by clamped edge copies, which
        // split evenly between the two columns.
        let img = GrayImage::from_fn(2, 1, |x, _| image::Luma([if x == 0 { 0 } else { 255 }]));
        let blurred = box_blur(&img, u32::MAX);
        assert_eq!(blurred.get_pixel(0, 0).0[0], 127);
        assert_eq!(blurred.get_pixel(1, 0).0[0], 128);
    }
}
