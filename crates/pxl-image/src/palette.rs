use std::sync::OnceLock;

use image::{Rgba, RgbaImage};

use crate::ImageSize;

/// Indexed rasters address their palette with one byte per pixel.
pub const MAX_PALETTE_COLORS: usize = 256;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Palette {
    colors: Vec<Rgba<u8>>,
}

impl Palette {
    /// Builds a palette keeping the first occurrence of every color, capped at
    /// [`MAX_PALETTE_COLORS`] entries.
    pub fn new(colors: impl IntoIterator<Item = Rgba<u8>>) -> Self {
        let mut out: Vec<Rgba<u8>> = Vec::new();
        let mut dropped = 0usize;
        for color in colors {
            if out.contains(&color) {
                continue;
            }
            if out.len() == MAX_PALETTE_COLORS {
                dropped += 1;
                continue;
            }
            out.push(color);
        }
        if dropped > 0 {
            tracing::warn!(dropped, max = MAX_PALETTE_COLORS, "palette truncated");
        }
        Self { colors: out }
    }

    pub fn colors(&self) -> &[Rgba<u8>] {
        &self.colors
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn contains(&self, color: &Rgba<u8>) -> bool {
        self.colors.contains(color)
    }

    pub fn get(&self, index: u8) -> Option<Rgba<u8>> {
        self.colors.get(index as usize).copied()
    }
}

impl FromIterator<Rgba<u8>> for Palette {
    fn from_iter<I: IntoIterator<Item = Rgba<u8>>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Index of the palette entry closest to `color` by squared RGBA distance.
/// Ties resolve to the lowest index. Returns `None` for an empty palette.
pub fn nearest_index(palette: &Palette, color: Rgba<u8>) -> Option<u8> {
    let mut best: Option<(u8, u32)> = None;
    for (i, entry) in palette.colors.iter().enumerate() {
        let dist = entry
            .0
            .iter()
            .zip(color.0.iter())
            .map(|(a, b)| {
                let d = *a as i32 - *b as i32;
                (d * d) as u32
            })
            .sum::<u32>();
        if best.map_or(true, |(_, d)| dist < d) {
            best = Some((i as u8, dist));
            if dist == 0 {
                break;
            }
        }
    }
    best.map(|(i, _)| i)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedImage {
    size: ImageSize,
    palette: Palette,
    indices: Vec<u8>,
}

impl IndexedImage {
    pub fn size(&self) -> ImageSize {
        self.size
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    pub fn indices(&self) -> &[u8] {
        &self.indices
    }

    pub fn index_at(&self, x: u32, y: u32) -> u8 {
        self.indices[(y as usize) * (self.size.width as usize) + x as usize]
    }

    pub fn to_rgba(&self) -> RgbaImage {
        RgbaImage::from_fn(self.size.width, self.size.height, |x, y| {
            self.palette.get(self.index_at(x, y)).unwrap_or(Rgba([0, 0, 0, 0]))
        })
    }
}

/// Snaps every pixel of `src` to its nearest palette entry.
///
/// An empty palette yields index 0 everywhere, which expands to transparent
/// pixels in [`IndexedImage::to_rgba`].
pub fn map_to_palette(src: &RgbaImage, palette: &Palette) -> IndexedImage {
    let indices = src
        .pixels()
        .map(|p| nearest_index(palette, *p).unwrap_or(0))
        .collect();
    IndexedImage {
        size: ImageSize::of(src),
        palette: palette.clone(),
        indices,
    }
}

static PLAN9: OnceLock<Palette> = OnceLock::new();

/// The 256-color Plan 9 palette: the RGB cube split 4x4x4 with 4 shades per
/// subcube. Built on first use.
pub fn plan9() -> &'static Palette {
    PLAN9.get_or_init(build_plan9)
}

fn build_plan9() -> Palette {
    let mut colors = [Rgba([0u8, 0, 0, 255]); MAX_PALETTE_COLORS];
    let mut i = 0usize;
    for r in 0..4i32 {
        for v in 0..4i32 {
            let mut j = v - r;
            for g in 0..4i32 {
                for b in 0..4i32 {
                    let den = r.max(g).max(b);
                    let c = if den == 0 {
                        [0x11 * v; 3]
                    } else {
                        let num = 17 * (4 * den + v);
                        [r * num / den, g * num / den, b * num / den]
                    };
                    colors[i + (j & 0x0f) as usize] = Rgba([c[0] as u8, c[1] as u8, c[2] as u8, 255]);
                    j += 1;
                }
            }
            i += 16;
        }
    }
    Palette {
        colors: colors.to_vec(),
    }
}
