use image::imageops::{self, FilterType};
use image::RgbaImage;

use crate::ImageSize;

/// A resampling policy used to map a source raster onto a target rectangle.
pub trait Resampler {
    fn resample(&self, src: &RgbaImage, size: ImageSize) -> RgbaImage;
}

/// Assigns every output pixel the source pixel under its centre, no blending.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestNeighbor;

impl Resampler for NearestNeighbor {
    fn resample(&self, src: &RgbaImage, size: ImageSize) -> RgbaImage {
        let (sw, sh) = (src.width() as u64, src.height() as u64);
        let (dw2, dh2) = (size.width as u64 * 2, size.height as u64 * 2);
        RgbaImage::from_fn(size.width, size.height, |dx, dy| {
            let sx = (2 * dx as u64 + 1) * sw / dw2;
            let sy = (2 * dy as u64 + 1) * sh / dh2;
            *src.get_pixel(sx as u32, sy as u32)
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Resampling {
    #[default]
    NearestNeighbor,
    Triangle,
    CatmullRom,
    Lanczos3,
}

impl Resampling {
    pub fn label(self) -> &'static str {
        match self {
            Self::NearestNeighbor => "nearest",
            Self::Triangle => "triangle",
            Self::CatmullRom => "catmull-rom",
            Self::Lanczos3 => "lanczos3",
        }
    }

    fn filter(self) -> Option<FilterType> {
        match self {
            Self::NearestNeighbor => None,
            Self::Triangle => Some(FilterType::Triangle),
            Self::CatmullRom => Some(FilterType::CatmullRom),
            Self::Lanczos3 => Some(FilterType::Lanczos3),
        }
    }
}

impl Resampler for Resampling {
    fn resample(&self, src: &RgbaImage, size: ImageSize) -> RgbaImage {
        match self.filter() {
            None => NearestNeighbor.resample(src, size),
            Some(filter) => imageops::resize(src, size.width, size.height, filter),
        }
    }
}

/// Scales `src` to exactly `size`. Empty sources and zero-area targets yield a
/// transparent raster of the requested size instead of sampling.
pub fn scale_to(src: &RgbaImage, size: ImageSize, resampler: &dyn Resampler) -> RgbaImage {
    if size.is_empty() || ImageSize::of(src).is_empty() {
        tracing::debug!(
            src_width = src.width(),
            src_height = src.height(),
            width = size.width,
            height = size.height,
            "degenerate scale request"
        );
        return RgbaImage::new(size.width, size.height);
    }
    resampler.resample(src, size)
}
