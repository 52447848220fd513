//! Binarization: reduce a grayscale image to a two-level mask.
//!
//! Foreground ("ink") pixels become 0 and background pixels 255. Global
//! mode compares every pixel to one threshold. Adaptive mode compares
//! each pixel to the mean of its neighborhood minus a constant, which
//! tolerates uneven lighting across the image.

use image::GrayImage;

use crate::config::PipelineConfig;

/// Mask value for foreground pixels.
pub const FOREGROUND: u8 = 0;

/// Mask value for background pixels.
pub const BACKGROUND: u8 = 255;

/// Offset subtracted from the local mean in adaptive mode.
pub const ADAPTIVE_OFFSET: i64 = 10;

/// Global thresholding: `gray < threshold` is foreground.
#[must_use = "returns the binary mask"]
pub fn global(gray: &GrayImage, threshold: u8) -> GrayImage {
    let mut mask = gray.clone();
    for value in mask.iter_mut() {
        *value = if *value < threshold {
            FOREGROUND
        } else {
            BACKGROUND
        };
    }
    mask
}

/// Block size for adaptive mode: `max(3, floor(min(w, h) / 20))`, made
/// odd by adding one when even.
#[must_use]
pub fn adaptive_block_size(width: u32, height: u32) -> u32 {
    let block = (width.min(height) / 20).max(3);
    if block % 2 == 0 { block + 1 } else { block }
}

/// Adaptive thresholding.
///
/// Each pixel is compared against the mean of the `block_size` square
/// window centered on it, restricted to the part of the window inside
/// the image: `gray < mean - offset` is foreground. Window sums come from
/// a summed-area table, so the cost does not grow with the block size.
#[must_use = "returns the binary mask"]
#[allow(clippy::cast_possible_wrap)]
pub fn adaptive(gray: &GrayImage, block_size: u32, offset: i64) -> GrayImage {
    let (width, height) = gray.dimensions();
    let (w, h) = (width as usize, height as usize);
    let radius = (block_size / 2) as usize;
    let table = SummedArea::new(gray);

    let mut mask = GrayImage::new(width, height);
    let out: &mut [u8] = &mut mask;
    for y in 0..h {
        let y0 = y.saturating_sub(radius);
        let y1 = (y + radius).min(h - 1);
        for x in 0..w {
            let x0 = x.saturating_sub(radius);
            let x1 = (x + radius).min(w - 1);
            let sum = table.sum(x0, y0, x1, y1);
            let count = ((x1 - x0 + 1) * (y1 - y0 + 1)) as i64;
            let value = i64::from(gray.as_raw()[y * w + x]);
            // value < sum / count - offset, without the division.
            out[y * w + x] = if value * count < sum - offset * count {
                FOREGROUND
            } else {
                BACKGROUND
            };
        }
    }
    mask
}

/// Binarize with the mode selected by `config`.
#[must_use = "returns the binary mask"]
pub fn binarize(gray: &GrayImage, config: &PipelineConfig) -> GrayImage {
    if config.use_adaptive_threshold {
        let block = adaptive_block_size(gray.width(), gray.height());
        adaptive(gray, block, ADAPTIVE_OFFSET)
    } else {
        global(gray, config.threshold)
    }
}

/// Number of foreground pixels in a mask.
#[must_use]
pub fn foreground_count(mask: &GrayImage) -> u64 {
    mask.iter().map(|&v| u64::from(v == FOREGROUND)).sum()
}

/// Inclusive-rectangle sums over a grayscale image.
struct SummedArea {
    /// `(w + 1) * (h + 1)` prefix sums; row 0 and column 0 are zero.
    table: Vec<i64>,
    stride: usize,
}

impl SummedArea {
    fn new(gray: &GrayImage) -> Self {
        let (w, h) = (gray.width() as usize, gray.height() as usize);
        let stride = w + 1;
        let mut table = vec![0_i64; stride * (h + 1)];
        for y in 0..h {
            let mut row = 0_i64;
            for x in 0..w {
                row += i64::from(gray.as_raw()[y * w + x]);
                table[(y + 1) * stride + x + 1] = table[y * stride + x + 1] + row;
            }
        }
        Self { table, stride }
    }

    /// Sum over `x0..=x1`, `y0..=y1`.
    fn sum(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> i64 {
        let s = self.stride;
        self.table[(y1 + 1) * s + x1 + 1] - self.table[y0 * s + x1 + 1]
            - self.table[(y1 + 1) * s + x0]
            + self.table[y0 * s + x0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(clippy::cast_possible_truncation)]
    fn gradient(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| image::Luma([((x * 11 + y * 7) % 256) as u8]))
    }

    /// Direct window scan with floating-point mean, as a reference.
    #[allow(clippy::cast_possible_wrap, clippy::cast_precision_loss)]
    fn naive_adaptive(gray: &GrayImage, block_size: u32, offset: i64) -> GrayImage {
        let (w, h) = gray.dimensions();
        let r = i64::from(block_size / 2);
        GrayImage::from_fn(w, h, |x, y| {
            let mut sum = 0_i64;
            let mut count = 0_i64;
            for dy in -r..=r {
                for dx in -r..=r {
                    let nx = i64::from(x) + dx;
                    let ny = i64::from(y) + dy;
                    if nx >= 0 && nx < i64::from(w) && ny >= 0 && ny < i64::from(h) {
                        sum += i64::from(gray.get_pixel(nx as u32, ny as u32).0[0]);
                        count += 1;
                    }
                }
            }
            let mean = sum as f64 / count as f64;
            let value = f64::from(gray.get_pixel(x, y).0[0]);
            image::Luma([if value < mean - offset as f64 {
                FOREGROUND
            } else {
                BACKGROUND
            }])
        })
    }

    #[test]
    fn global_splits_at_threshold() {
        let gray = GrayImage::from_fn(4, 1, |x, _| image::Luma([[0, 127, 128, 255][x as usize]]));
        let mask = global(&gray, 128);
        assert_eq!(mask.as_raw(), &vec![0, 0, 255, 255]);
    }

    #[test]
    fn mask_values_are_binary() {
        let mask = global(&gradient(30, 20), 100);
        assert!(mask.iter().all(|&v| v == FOREGROUND || v == BACKGROUND));
        let mask = adaptive(&gradient(30, 20), 5, ADAPTIVE_OFFSET);
        assert!(mask.iter().all(|&v| v == FOREGROUND || v == BACKGROUND));
    }

    #[test]
    fn threshold_monotonic_in_foreground_count() {
        let gray = gradient(40, 25);
        let mut previous = 0;
        for t in 0..=255_u8 {
            let count = foreground_count(&global(&gray, t));
            assert!(count >= previous, "threshold {t} lost foreground");
            previous = count;
        }
    }

    #[test]
    fn block_size_is_odd_and_at_least_three() {
        assert_eq!(adaptive_block_size(10, 10), 3);
        assert_eq!(adaptive_block_size(80, 100), 5);
        assert_eq!(adaptive_block_size(100, 120), 5);
        assert_eq!(adaptive_block_size(1000, 800), 41);
        assert_eq!(adaptive_block_size(1000, 1000) % 2, 1);
    }

    #[test]
    fn adaptive_matches_naive_window_scan() {
        let gray = gradient(37, 23);
        for block in [3, 5, 9, 41] {
            assert_eq!(
                adaptive(&gray, block, ADAPTIVE_OFFSET),
                naive_adaptive(&gray, block, ADAPTIVE_OFFSET),
                "block {block}",
            );
        }
    }

    #[test]
    fn adaptive_ignores_uniform_lighting_gradient() {
        // A dark spot on a smooth left-to-right ramp: global thresholding
        // at 128 marks the whole dark half, adaptive only the spot.
        #[allow(clippy::cast_possible_truncation)]
        let mut gray = GrayImage::from_fn(60, 60, |x, _| image::Luma([(x * 4) as u8]));
        for y in 28..32 {
            for x in 40..44 {
                gray.put_pixel(x, y, image::Luma([60]));
            }
        }
        let mask = adaptive(&gray, 9, ADAPTIVE_OFFSET);
        assert_eq!(mask.get_pixel(41, 29).0[0], FOREGROUND);
        assert_eq!(mask.get_pixel(5, 5).0[0], BACKGROUND);
        assert!(foreground_count(&global(&gray, 128)) > 1000);
        assert!(foreground_count(&mask) < 100);
    }

    #[test]
    fn binarize_dispatches_on_config() {
        let gray = gradient(30, 30);
        let mut config = crate::config::PipelineConfig {
            threshold: 100,
            downsample_factor: 1,
            blur_radius: 0,
            use_adaptive_threshold: false,
            min_contour_length: 5,
            max_contour_length: 1000,
            max_contour_count: 5000,
            time_budget_ms: 1000,
        };
        assert_eq!(binarize(&gray, &config), global(&gray, 100));
        config.use_adaptive_threshold = true;
        assert_eq!(binarize(&gray, &config), adaptive(&gray, 3, ADAPTIVE_OFFSET));
    }
}
