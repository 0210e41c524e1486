use std::collections::BTreeMap;

use image::{Rgba, RgbaImage};
use pxl_image::{Palette, MAX_PALETTE_COLORS};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuantizeError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// How a box of colors is collapsed into its palette entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Aggregation {
    /// Pixel-weighted average of the box members.
    #[default]
    Mean,
    /// Most frequent member color; lowest color value wins ties.
    Mode,
}

#[derive(Debug, Clone, Copy)]
struct ColorCount {
    rgba: [u8; 4],
    count: u64,
}

#[derive(Debug, Clone)]
struct ColorBox {
    colors: Vec<ColorCount>,
}

impl ColorBox {
    /// Widest channel and its range.
    fn range(&self) -> (usize, u8) {
        let mut min = [u8::MAX; 4];
        let mut max = [u8::MIN; 4];
        for c in &self.colors {
            for ch in 0..4 {
                min[ch] = min[ch].min(c.rgba[ch]);
                max[ch] = max[ch].max(c.rgba[ch]);
            }
        }
        let mut channel = 0;
        let mut widest = 0u8;
        for ch in 0..4 {
            let span = max[ch].saturating_sub(min[ch]);
            if span > widest {
                widest = span;
                channel = ch;
            }
        }
        (channel, widest)
    }

    fn can_split(&self) -> bool {
        self.colors.len() > 1
    }

    fn split(mut self) -> (ColorBox, ColorBox) {
        let (channel, _) = self.range();
        self.colors.sort_by_key(|c| c.rgba[channel]);

        let total: u64 = self.colors.iter().map(|c| c.count).sum();
        let mut acc = 0;
        let mut split_idx = 0;
        for (i, c) in self.colors.iter().enumerate() {
            acc += c.count;
            if acc >= total / 2 {
                split_idx = i;
                break;
            }
        }
        // right half keeps at least one color
        split_idx = split_idx.min(self.colors.len() - 2);

        let right = self.colors.split_off(split_idx + 1);
        (self, ColorBox { colors: right })
    }

    fn representative(&self, aggregation: Aggregation) -> Rgba<u8> {
        match aggregation {
            Aggregation::Mean => {
                let mut sums = [0u64; 4];
                let mut total = 0u64;
                for c in &self.colors {
                    for ch in 0..4 {
                        sums[ch] += c.rgba[ch] as u64 * c.count;
                    }
                    total += c.count;
                }
                let total = total.max(1);
                Rgba(sums.map(|s| (s / total) as u8))
            }
            Aggregation::Mode => {
                let mut best = self.colors[0];
                for c in &self.colors[1..] {
                    if c.count > best.count || (c.count == best.count && c.rgba < best.rgba) {
                        best = *c;
                    }
                }
                Rgba(best.rgba)
            }
        }
    }
}

/// Median-cut quantizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct MedianCut {
    pub aggregation: Aggregation,
}

impl MedianCut {
    pub fn new(aggregation: Aggregation) -> Self {
        Self { aggregation }
    }

    /// Reduces `image` to at most `count` representative colors.
    ///
    /// The result is deterministic for a given image and count. Images with
    /// fewer distinct colors than `count` produce a shorter palette. Counts
    /// above [`MAX_PALETTE_COLORS`] are clamped.
    pub fn quantize(&self, image: &RgbaImage, count: usize) -> Result<Palette, QuantizeError> {
        if count == 0 {
            return Err(QuantizeError::InvalidArgument("color count must be positive".to_string()));
        }
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(QuantizeError::InvalidArgument("image is empty".to_string()));
        }
        let count = count.min(MAX_PALETTE_COLORS);

        let histogram = histogram(image);
        let distinct = histogram.len();
        let mut boxes = vec![ColorBox { colors: histogram }];
        while boxes.len() < count {
            let candidate = boxes
                .iter()
                .enumerate()
                .filter(|(_, b)| b.can_split())
                .fold(None, |best: Option<(usize, u8)>, (i, b)| {
                    let (_, range) = b.range();
                    match best {
                        Some((_, r)) if r >= range => best,
                        _ => Some((i, range)),
                    }
                });
            let Some((idx, _)) = candidate else {
                break;
            };
            let target = std::mem::replace(&mut boxes[idx], ColorBox { colors: Vec::new() });
            let (left, right) = target.split();
            boxes[idx] = left;
            boxes.push(right);
        }

        tracing::debug!(distinct, requested = count, boxes = boxes.len(), "median cut finished");
        Ok(boxes.iter().map(|b| b.representative(self.aggregation)).collect())
    }
}

/// Extracts up to `count` colors with the default (mean) aggregation.
pub fn extract_palette(image: &RgbaImage, count: usize) -> Result<Palette, QuantizeError> {
    MedianCut::default().quantize(image, count)
}

fn histogram(image: &RgbaImage) -> Vec<ColorCount> {
    let mut counts: BTreeMap<[u8; 4], u64> = BTreeMap::new();
    for pixel in image.pixels() {
        *counts.entry(pixel.0).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|(rgba, count)| ColorCount { rgba, count })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, ((x + y) % 256) as u8, 255])
        })
    }

    #[test]
    fn zero_count_is_invalid() {
        let err = extract_palette(&gradient(4, 4), 0).unwrap_err();
        assert!(matches!(err, QuantizeError::InvalidArgument(_)));
    }

    #[test]
    fn empty_image_is_invalid() {
        let err = extract_palette(&RgbaImage::new(0, 0), 8).unwrap_err();
        assert!(matches!(err, QuantizeError::InvalidArgument(_)));
        assert!(extract_palette(&RgbaImage::new(10, 0), 8).is_err());
    }

    #[test]
    fn never_returns_more_than_requested() {
        let palette = extract_palette(&gradient(64, 64), 16).expect("quantize");
        assert!(palette.len() <= 16);
        assert!(palette.len() > 1);
    }

    #[test]
    fn few_distinct_colors_yield_short_exact_palette() {
        let colors = [Rgba([255, 0, 0, 255]), Rgba([0, 255, 0, 255]), Rgba([0, 0, 255, 255])];
        let image = RgbaImage::from_fn(9, 9, |x, _| colors[(x % 3) as usize]);
        let palette = extract_palette(&image, 48).expect("quantize");
        assert_eq!(palette.len(), 3);
        for color in colors {
            assert!(palette.contains(&color));
        }
    }

    #[test]
    fn single_color_image_yields_that_color() {
        let image = RgbaImage::from_pixel(5, 5, Rgba([12, 34, 56, 78]));
        let palette = extract_palette(&image, 4).expect("quantize");
        assert_eq!(palette.colors(), &[Rgba([12, 34, 56, 78])]);
    }

    #[test]
    fn quantization_is_deterministic() {
        let image = gradient(50, 30);
        for aggregation in [Aggregation::Mean, Aggregation::Mode] {
            let quantizer = MedianCut::new(aggregation);
            let a = quantizer.quantize(&image, 12).expect("first run");
            let b = quantizer.quantize(&image, 12).expect("second run");
            assert_eq!(a, b);
        }
    }

    #[test]
    fn mode_picks_colors_present_in_image() {
        let image = gradient(32, 32);
        let palette = MedianCut::new(Aggregation::Mode).quantize(&image, 8).expect("quantize");
        for color in palette.colors() {
            assert!(image.pixels().any(|p| p == color));
        }
    }

    #[test]
    fn mean_is_weighted_by_frequency() {
        let image = RgbaImage::from_fn(4, 1, |x, _| {
            if x == 0 {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([200, 0, 0, 255])
            }
        });
        let palette = extract_palette(&image, 1).expect("quantize");
        assert_eq!(palette.colors(), &[Rgba([150, 0, 0, 255])]);
    }

    #[test]
    fn count_is_clamped_to_indexable_range() {
        let image = RgbaImage::from_fn(32, 32, |x, y| Rgba([(x * 8) as u8, (y * 8) as u8, 0, 255]));
        let palette = extract_palette(&image, 1000).expect("quantize");
        assert!(palette.len() <= MAX_PALETTE_COLORS);
    }
}
