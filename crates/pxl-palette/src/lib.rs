use std::fs;
use std::path::Path;

use image::Rgba;
use pxl_image::Palette;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_PALETTE_FILE: &str = "colors.json";

#[derive(Debug, Error)]
pub enum PaletteError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed palette: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct ColorEntry {
    #[serde(rename = "R")]
    r: u8,
    #[serde(rename = "G")]
    g: u8,
    #[serde(rename = "B")]
    b: u8,
    #[serde(rename = "A")]
    a: u8,
}

impl From<Rgba<u8>> for ColorEntry {
    fn from(color: Rgba<u8>) -> Self {
        let [r, g, b, a] = color.0;
        Self { r, g, b, a }
    }
}

impl From<ColorEntry> for Rgba<u8> {
    fn from(entry: ColorEntry) -> Self {
        Rgba([entry.r, entry.g, entry.b, entry.a])
    }
}

#[derive(Debug, Serialize)]
struct PaletteDocument {
    palette: Vec<ColorEntry>,
}

/// Accepted on input: the keyed document, or a bare list of colors.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PaletteInput {
    Document { palette: Vec<ColorEntry> },
    Bare(Vec<ColorEntry>),
}

pub fn encode(palette: &Palette) -> Result<String, PaletteError> {
    let doc = PaletteDocument {
        palette: palette.colors().iter().copied().map(ColorEntry::from).collect(),
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

/// Parses a palette. A single malformed entry fails the whole document.
pub fn decode(data: &str) -> Result<Palette, PaletteError> {
    let entries = match serde_json::from_str::<PaletteInput>(data)? {
        PaletteInput::Document { palette } => palette,
        PaletteInput::Bare(entries) => entries,
    };
    Ok(entries.into_iter().map(Rgba::from).collect())
}

pub fn load(path: &Path) -> Result<Palette, PaletteError> {
    let data = fs::read_to_string(path)?;
    decode(&data)
}

pub fn save(path: &Path, palette: &Palette) -> Result<(), PaletteError> {
    let data = encode(palette)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, data)?;
    Ok(())
}
