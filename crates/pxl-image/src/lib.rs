mod palette;
mod scale;

pub use palette::{map_to_palette, nearest_index, plan9, IndexedImage, Palette, MAX_PALETTE_COLORS};
pub use scale::{scale_to, NearestNeighbor, Resampler, Resampling};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn of(image: &image::RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Upper bound for the output of a conversion. Both sides are strictly
/// positive; an unset constraint is `Option::<MaxSize>::None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxSize {
    width: u32,
    height: u32,
}

impl MaxSize {
    pub fn new(width: i64, height: i64) -> Option<Self> {
        if width <= 0 || height <= 0 {
            return None;
        }
        Some(Self {
            width: u32::try_from(width).unwrap_or(u32::MAX),
            height: u32::try_from(height).unwrap_or(u32::MAX),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Like [`resize_bounds`], except that a non-zero side never shrinks to
    /// zero pixels.
    pub fn fit(&self, size: ImageSize) -> ImageSize {
        let (width, height) = resize_bounds(self.width as i64, self.height as i64, size.width, size.height);
        let keep = |fitted: u32, side: u32| if side == 0 { 0 } else { fitted.max(1) };
        ImageSize {
            width: keep(width, size.width),
            height: keep(height, size.height),
        }
    }
}

/// Shrinks `width` x `height` proportionally so it fits `max_width` x `max_height`.
///
/// Non-positive maxima disable the constraint. When both sides exceed their
/// maximum the height ratio wins, even if the width then still overflows.
pub fn resize_bounds(max_width: i64, max_height: i64, width: u32, height: u32) -> (u32, u32) {
    if max_width <= 0 || max_height <= 0 {
        return (width, height);
    }
    let mut ratio = 1.0_f64;
    if width as i64 > max_width {
        ratio = max_width as f64 / width as f64;
    }
    if height as i64 > max_height {
        ratio = max_height as f64 / height as f64;
    }
    let x = width as f64 * ratio;
    let y = height as f64 * ratio;
    (x as u32, y as u32)
}
