use std::time::Instant;

use image::RgbaImage;
use pxl_image::{map_to_palette, plan9, scale_to, NearestNeighbor};
use pxl_quantize::{Aggregation, MedianCut, QuantizeError};
use serde::Serialize;
use thiserror::Error;

pub use pxl_image::{ImageSize, MaxSize, Palette, Resampling};

pub const SCALING_FACTOR: f64 = 0.01;
pub const MIN_LEVEL: i32 = 1;
pub const MAX_LEVEL: i32 = 128;
pub const DEFAULT_LEVEL: i32 = 8;

/// Block coarseness: a level in [1,128] scaled by [`SCALING_FACTOR`].
/// Lower values give larger blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Granularity {
    level: u8,
}

impl Granularity {
    pub const BIT8: Self = Self { level: 8 };
    pub const BIT16: Self = Self { level: 16 };
    pub const BIT32: Self = Self { level: 32 };
    pub const BIT64: Self = Self { level: 64 };
    pub const BIT128: Self = Self { level: 128 };

    /// Out-of-range levels fall back to the default.
    pub fn from_level(level: i32) -> Self {
        if Self::is_valid_level(level) {
            Self { level: level as u8 }
        } else {
            tracing::debug!(level, default = DEFAULT_LEVEL, "granularity level out of range");
            Self::default()
        }
    }

    pub fn is_valid_level(level: i32) -> bool {
        (MIN_LEVEL..=MAX_LEVEL).contains(&level)
    }

    pub fn level(self) -> u8 {
        self.level
    }

    pub fn value(self) -> f64 {
        self.level as f64 * SCALING_FACTOR
    }

    /// Scales `size` down, flooring each side. A non-zero side never drops
    /// below one pixel.
    pub fn apply(self, size: ImageSize) -> ImageSize {
        let scale = |side: u32| {
            let scaled = (side as f64 * self.value()) as u32;
            if side == 0 {
                0
            } else {
                scaled.max(1)
            }
        };
        ImageSize {
            width: scale(size.width),
            height: scale(size.height),
        }
    }
}

impl Default for Granularity {
    fn default() -> Self {
        Self::BIT8
    }
}

#[derive(Debug, Clone, Default)]
pub struct PixelizerConfig {
    /// `None` keeps the built-in palette.
    pub palette: Option<Palette>,
    pub level: i32,
    pub max_width: i32,
    pub max_height: i32,
    pub resampling: Resampling,
}

/// Applies the valid parts of `overrides` on top of the defaults.
pub fn resolve_config(overrides: PixelizerConfig) -> PixelizerConfig {
    let mut cfg = PixelizerConfig {
        level: DEFAULT_LEVEL,
        ..PixelizerConfig::default()
    };
    if overrides.palette.as_ref().is_some_and(|p| !p.is_empty()) {
        cfg.palette = overrides.palette;
    }
    if Granularity::is_valid_level(overrides.level) {
        cfg.level = overrides.level;
    }
    if overrides.max_width > 0 && overrides.max_height > 0 {
        cfg.max_width = overrides.max_width;
        cfg.max_height = overrides.max_height;
    }
    cfg.resampling = overrides.resampling;
    cfg
}

/// Sizes involved in one conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionPlan {
    pub source: ImageSize,
    /// Output size after the size constraint.
    pub target: ImageSize,
    /// Size of the blocky image between the two scaling passes.
    pub intermediate: ImageSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    TrueColor,
    /// Snap to the configured palette.
    Palette,
    /// Snap to a palette extracted from the downscaled image.
    Quantized { count: usize, aggregation: Aggregation },
}

impl ColorMode {
    pub fn from_colorize(colorize: bool) -> Self {
        if colorize {
            Self::Palette
        } else {
            Self::TrueColor
        }
    }
}

#[derive(Debug, Clone)]
pub enum TelemetryEventType {
    ConvertStart,
    ConvertSuccess,
    ConvertError,
    ExtractStart,
    ExtractSuccess,
    ExtractError,
}

#[derive(Debug, Clone)]
pub struct TelemetryEvent {
    pub event_type: TelemetryEventType,
    pub width: u32,
    pub height: u32,
    pub duration_ms: Option<u64>,
    pub detail: Option<String>,
}

pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<QuantizeError> for CoreError {
    fn from(err: QuantizeError) -> Self {
        match err {
            QuantizeError::InvalidArgument(message) => Self::InvalidArgument(message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    InvalidArgument,
}

/// Machine-readable form of a [`CoreError`], printed by `pxl` on failure.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl CoreError {
    pub fn as_error_info(&self) -> ErrorInfo {
        match self {
            Self::InvalidArgument(_) => ErrorInfo {
                code: ErrorCode::InvalidArgument,
                message: self.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct Pixelizer {
    palette: Palette,
    granularity: Granularity,
    max_size: Option<MaxSize>,
    resampling: Resampling,
}

impl Default for Pixelizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Pixelizer {
    pub fn new() -> Self {
        Self {
            palette: plan9().clone(),
            granularity: Granularity::default(),
            max_size: None,
            resampling: Resampling::NearestNeighbor,
        }
    }

    pub fn from_config(config: PixelizerConfig) -> Self {
        let cfg = resolve_config(config);
        let mut px = Self::new();
        if let Some(palette) = cfg.palette {
            px.set_palette(palette);
        }
        px.set_max_size(cfg.max_width, cfg.max_height);
        px.set_granularity(cfg.level);
        px.set_resampling(cfg.resampling);
        px
    }

    pub fn set_granularity(&mut self, level: i32) {
        self.granularity = Granularity::from_level(level);
    }

    /// Replaces the palette; an empty palette leaves the current one active.
    pub fn set_palette(&mut self, palette: Palette) {
        if palette.is_empty() {
            return;
        }
        self.palette = palette;
    }

    /// Sets the output bound; ignored unless both sides are positive.
    pub fn set_max_size(&mut self, width: i32, height: i32) {
        if let Some(max) = MaxSize::new(width as i64, height as i64) {
            self.max_size = Some(max);
        }
    }

    /// Policy for the downscale pass. Upscaling is always nearest-neighbor.
    pub fn set_resampling(&mut self, resampling: Resampling) {
        self.resampling = resampling;
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    pub fn max_size(&self) -> Option<MaxSize> {
        self.max_size
    }

    pub fn resampling(&self) -> Resampling {
        self.resampling
    }

    pub fn plan(&self, source: ImageSize) -> ConversionPlan {
        let target = match self.max_size {
            Some(max) => max.fit(source),
            None => source,
        };
        ConversionPlan {
            source,
            target,
            intermediate: self.granularity.apply(target),
        }
    }

    /// Pixelizes `image`, snapping blocks to the configured palette when
    /// `colorize` is set. The output has the size-constrained dimensions.
    pub fn convert(&self, image: &RgbaImage, colorize: bool) -> RgbaImage {
        let (plan, blocky) = self.downscale(image);
        let blocky = if colorize {
            map_to_palette(&blocky, &self.palette).to_rgba()
        } else {
            blocky
        };
        upscale(&blocky, plan)
    }

    /// Pixelizes `image` using a palette of up to `count` colors extracted
    /// from its downscaled version.
    pub fn convert_quantized(&self, image: &RgbaImage, count: usize, aggregation: Aggregation) -> Result<RgbaImage, CoreError> {
        let (plan, blocky) = self.downscale(image);
        let palette = MedianCut::new(aggregation).quantize(&blocky, count)?;
        let blocky = map_to_palette(&blocky, &palette).to_rgba();
        Ok(upscale(&blocky, plan))
    }

    pub fn convert_with(&self, image: &RgbaImage, mode: ColorMode) -> Result<RgbaImage, CoreError> {
        match mode {
            ColorMode::TrueColor => Ok(self.convert(image, false)),
            ColorMode::Palette => Ok(self.convert(image, true)),
            ColorMode::Quantized { count, aggregation } => self.convert_quantized(image, count, aggregation),
        }
    }

    pub fn convert_with_telemetry(
        &self,
        image: &RgbaImage,
        mode: ColorMode,
        telemetry: Option<&dyn TelemetrySink>,
    ) -> Result<RgbaImage, CoreError> {
        let (width, height) = image.dimensions();
        let start = Instant::now();
        emit(telemetry, TelemetryEventType::ConvertStart, width, height, None, None);
        match self.convert_with(image, mode) {
            Ok(result) => {
                emit(
                    telemetry,
                    TelemetryEventType::ConvertSuccess,
                    width,
                    height,
                    Some(start.elapsed().as_millis() as u64),
                    Some(format!(
                        "output={}x{},granularity={},mode={:?}",
                        result.width(),
                        result.height(),
                        self.granularity.value(),
                        mode
                    )),
                );
                Ok(result)
            }
            Err(err) => {
                emit(
                    telemetry,
                    TelemetryEventType::ConvertError,
                    width,
                    height,
                    Some(start.elapsed().as_millis() as u64),
                    Some(err.to_string()),
                );
                Err(err)
            }
        }
    }

    fn downscale(&self, image: &RgbaImage) -> (ConversionPlan, RgbaImage) {
        let plan = self.plan(ImageSize::of(image));
        tracing::debug!(
            source = ?plan.source,
            target = ?plan.target,
            intermediate = ?plan.intermediate,
            resampling = self.resampling.label(),
            "pixelizing"
        );
        let blocky = scale_to(image, plan.intermediate, &self.resampling);
        (plan, blocky)
    }
}

fn upscale(blocky: &RgbaImage, plan: ConversionPlan) -> RgbaImage {
    scale_to(blocky, plan.target, &NearestNeighbor)
}

pub fn extract_palette(image: &RgbaImage, count: usize) -> Result<Palette, CoreError> {
    extract_palette_with_telemetry(image, count, Aggregation::Mean, None)
}

pub fn extract_palette_with_telemetry(
    image: &RgbaImage,
    count: usize,
    aggregation: Aggregation,
    telemetry: Option<&dyn TelemetrySink>,
) -> Result<Palette, CoreError> {
    let (width, height) = image.dimensions();
    let start = Instant::now();
    emit(telemetry, TelemetryEventType::ExtractStart, width, height, None, None);
    match MedianCut::new(aggregation).quantize(image, count) {
        Ok(palette) => {
            emit(
                telemetry,
                TelemetryEventType::ExtractSuccess,
                width,
                height,
                Some(start.elapsed().as_millis() as u64),
                Some(format!("requested={},colors={}", count, palette.len())),
            );
            Ok(palette)
        }
        Err(err) => {
            let err = CoreError::from(err);
            emit(
                telemetry,
                TelemetryEventType::ExtractError,
                width,
                height,
                Some(start.elapsed().as_millis() as u64),
                Some(err.to_string()),
            );
            Err(err)
        }
    }
}

fn emit(
    telemetry: Option<&dyn TelemetrySink>,
    event_type: TelemetryEventType,
    width: u32,
    height: u32,
    duration_ms: Option<u64>,
    detail: Option<String>,
) {
    if let Some(sink) = telemetry {
        sink.emit(TelemetryEvent {
            event_type,
            width,
            height,
            duration_ms,
            detail,
        });
    }
}
