use anyhow::Result;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba, RgbaImage};

/// Smooth two-axis gradient with a diagonal stripe, so both the size and the
/// palette of a conversion are observable.
pub fn gradient(width: u32, height: u32) -> RgbaImage {
    ImageBuffer::from_fn(width, height, |x, y| {
        let r = (x * 255 / width.max(1)) as u8;
        let g = (y * 255 / height.max(1)) as u8;
        let b = if (x + y) % 64 < 8 { 255 } else { 40 };
        Rgba([r, g, b, 255])
    })
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    DynamicImage::ImageRgba8(image.clone()).write_to(&mut std::io::Cursor::new(&mut out), ImageFormat::Png)?;
    Ok(out)
}

pub fn decode_png(bytes: &[u8]) -> Result<RgbaImage> {
    Ok(image::load_from_memory_with_format(bytes, ImageFormat::Png)?.to_rgba8())
}
