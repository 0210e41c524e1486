use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::builder::StyledStr;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use image::{ImageFormat, RgbaImage};
use pxl_core::{
    extract_palette_with_telemetry, ColorMode, CoreError, Pixelizer, PixelizerConfig, Resampling, DEFAULT_LEVEL,
};
use pxl_quantize::Aggregation;
use pxl_telemetry::sink_from_env;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "PXL_LOG";

#[derive(Parser, Debug)]
#[command(name = "pxl", bin_name = "pxl", version, about = "Pixelize images and extract color palettes")]
struct Cli {
    #[command(subcommand)]
    command: TopLevelCommand,
}

#[derive(Subcommand, Debug)]
enum TopLevelCommand {
    /// Pixelize an image.
    Convert(ConvertArgs),
    /// Extract a color palette from an image into a JSON file.
    Colors(ColorsArgs),
}

impl TopLevelCommand {
    fn name(&self) -> &'static str {
        match self {
            Self::Convert(_) => "convert",
            Self::Colors(_) => "colors",
        }
    }
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Input image (PNG or JPEG).
    file: PathBuf,
    /// Path to the output PNG.
    #[arg(long, short = 'o', default_value = "result.png")]
    output: PathBuf,
    /// Palette JSON file; implies colorizing.
    #[arg(long = "colors", short = 'c')]
    palette: Option<PathBuf>,
    /// Granularity level in [1,128]; anything else means the default.
    #[arg(long, short = 'l', default_value_t = DEFAULT_LEVEL, allow_negative_numbers = true)]
    level: i32,
    /// Maximum output width (needs --max-height as well).
    #[arg(long, short = 'w', default_value_t = 0, allow_negative_numbers = true)]
    max_width: i32,
    /// Maximum output height (needs --max-width as well).
    #[arg(long, short = 'H', default_value_t = 0, allow_negative_numbers = true)]
    max_height: i32,
    /// Colorize with the built-in palette when no palette file is given.
    #[arg(long, default_value_t = false, action = clap::ArgAction::SetTrue, conflicts_with = "quantize")]
    colorize: bool,
    /// Colorize with N colors extracted from the downscaled image.
    #[arg(long, value_name = "N", conflicts_with = "palette")]
    quantize: Option<usize>,
    /// How --quantize picks each palette entry.
    #[arg(long, value_enum, default_value_t = AggregationArg::Mean, requires = "quantize")]
    aggregation: AggregationArg,
    /// Resampling used for the downscale pass.
    #[arg(long, value_enum, default_value_t = ResamplingArg::Nearest)]
    resampling: ResamplingArg,
}

#[derive(Args, Debug)]
struct ColorsArgs {
    /// Input image (PNG or JPEG).
    file: PathBuf,
    /// Path to the output palette file.
    #[arg(long, short = 'o', default_value = pxl_palette::DEFAULT_PALETTE_FILE)]
    output: PathBuf,
    /// Number of colors to extract.
    #[arg(long = "colors", short = 'c', default_value_t = 48)]
    count: usize,
    #[arg(long, value_enum, default_value_t = AggregationArg::Mean)]
    aggregation: AggregationArg,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ResamplingArg {
    Nearest,
    Triangle,
    CatmullRom,
    Lanczos3,
}

impl From<ResamplingArg> for Resampling {
    fn from(arg: ResamplingArg) -> Self {
        match arg {
            ResamplingArg::Nearest => Resampling::NearestNeighbor,
            ResamplingArg::Triangle => Resampling::Triangle,
            ResamplingArg::CatmullRom => Resampling::CatmullRom,
            ResamplingArg::Lanczos3 => Resampling::Lanczos3,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum AggregationArg {
    Mean,
    Mode,
}

impl From<AggregationArg> for Aggregation {
    fn from(arg: AggregationArg) -> Self {
        match arg {
            AggregationArg::Mean => Aggregation::Mean,
            AggregationArg::Mode => Aggregation::Mode,
        }
    }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let subcommand = cli.command.name();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{:#}\n", err);
            if let Some(info) = err.downcast_ref::<CoreError>().map(CoreError::as_error_info) {
                if let Ok(line) = serde_json::to_string(&info) {
                    eprintln!("{}\n", line);
                }
            }
            eprintln!("{}", usage_for(subcommand));
            ExitCode::FAILURE
        }
    }
}

fn usage_for(subcommand: &str) -> StyledStr {
    let mut cmd = Cli::command();
    cmd.build();
    if let Some(sub) = cmd.find_subcommand_mut(subcommand) {
        return sub.render_usage();
    }
    cmd.render_usage()
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(cli: Cli) -> Result<()> {
    let summary = match cli.command {
        TopLevelCommand::Convert(args) => convert_cmd(&args)?,
        TopLevelCommand::Colors(args) => colors_cmd(&args)?,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn convert_cmd(args: &ConvertArgs) -> Result<serde_json::Value> {
    let image = load_image(&args.file).context("unable to load image file")?;
    let palette = match &args.palette {
        Some(path) => Some(
            pxl_palette::load(path).with_context(|| format!("unable to load color palette {}", path.display()))?,
        ),
        None => None,
    };
    let mode = color_mode(args);
    let px = Pixelizer::from_config(PixelizerConfig {
        palette,
        level: args.level,
        max_width: args.max_width,
        max_height: args.max_height,
        resampling: args.resampling.into(),
    });
    let plan = px.plan(pxl_core::ImageSize::of(&image));
    tracing::info!(input = %args.file.display(), ?mode, "converting");

    let telemetry = sink_from_env();
    let telemetry_ref = telemetry.as_ref().map(|sink| sink.as_ref());
    let result = px.convert_with_telemetry(&image, mode, telemetry_ref)?;
    save_image(&result, &args.output).context("unable to save output file")?;

    Ok(serde_json::json!({
        "input": args.file,
        "output": args.output,
        "width": result.width(),
        "height": result.height(),
        "blocks": { "width": plan.intermediate.width, "height": plan.intermediate.height },
        "granularity": px.granularity().value(),
        "colorized": mode != ColorMode::TrueColor,
    }))
}

fn colors_cmd(args: &ColorsArgs) -> Result<serde_json::Value> {
    let image = load_image(&args.file).context("unable to load image file")?;
    let telemetry = sink_from_env();
    let telemetry_ref = telemetry.as_ref().map(|sink| sink.as_ref());
    let palette = extract_palette_with_telemetry(&image, args.count, args.aggregation.into(), telemetry_ref)
        .context("unable to extract colors from image file")?;
    pxl_palette::save(&args.output, &palette).context("unable to save output file")?;

    Ok(serde_json::json!({
        "input": args.file,
        "output": args.output,
        "requested": args.count,
        "colors": palette.len(),
    }))
}

fn color_mode(args: &ConvertArgs) -> ColorMode {
    if let Some(count) = args.quantize {
        return ColorMode::Quantized {
            count,
            aggregation: args.aggregation.into(),
        };
    }
    ColorMode::from_colorize(args.palette.is_some() || args.colorize)
}

fn load_image(path: &Path) -> Result<RgbaImage> {
    let image = image::open(path).with_context(|| format!("failed to decode {}", path.display()))?;
    Ok(image.to_rgba8())
}

fn save_image(image: &RgbaImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    image
        .save_with_format(path, ImageFormat::Png)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args.iter().copied()).expect("arguments should parse")
    }

    fn write_sample(path: &Path) {
        RgbaImage::from_fn(40, 20, |x, y| Rgba([(x * 6) as u8, (y * 12) as u8, 90, 255]))
            .save_with_format(path, ImageFormat::Png)
            .expect("write sample");
    }

    #[test]
    fn convert_defaults() {
        let TopLevelCommand::Convert(args) = parse(&["pxl", "convert", "in.png"]).command else {
            panic!("expected convert");
        };
        assert_eq!(args.output, PathBuf::from("result.png"));
        assert_eq!(args.level, 8);
        assert_eq!((args.max_width, args.max_height), (0, 0));
        assert!(args.palette.is_none());
        assert_eq!(color_mode(&args), ColorMode::TrueColor);
    }

    #[test]
    fn colors_defaults() {
        let TopLevelCommand::Colors(args) = parse(&["pxl", "colors", "in.png"]).command else {
            panic!("expected colors");
        };
        assert_eq!(args.output, PathBuf::from("colors.json"));
        assert_eq!(args.count, 48);
    }

    #[test]
    fn palette_file_implies_colorize() {
        let TopLevelCommand::Convert(args) =
            parse(&["pxl", "convert", "in.png", "-c", "p.json", "-l", "-3", "-w", "64", "-H", "32"]).command
        else {
            panic!("expected convert");
        };
        assert_eq!(color_mode(&args), ColorMode::Palette);
        assert_eq!(args.level, -3);
        assert_eq!((args.max_width, args.max_height), (64, 32));
    }

    #[test]
    fn quantize_conflicts_with_palette_file() {
        assert!(Cli::try_parse_from(["pxl", "convert", "in.png", "-c", "p.json", "--quantize", "4"]).is_err());
        let TopLevelCommand::Convert(args) =
            parse(&["pxl", "convert", "in.png", "--quantize", "4", "--aggregation", "mode"]).command
        else {
            panic!("expected convert");
        };
        assert_eq!(
            color_mode(&args),
            ColorMode::Quantized {
                count: 4,
                aggregation: Aggregation::Mode
            }
        );
    }

    #[test]
    fn quantize_options_are_not_silently_dropped() {
        for args in [
            &["pxl", "convert", "in.png", "--aggregation", "mode"][..],
            &["pxl", "convert", "in.png", "--colorize", "--quantize", "4"][..],
        ] {
            let err = Cli::try_parse_from(args.iter().copied()).expect_err("combination should be rejected");
            assert!(matches!(
                err.kind(),
                clap::error::ErrorKind::MissingRequiredArgument | clap::error::ErrorKind::ArgumentConflict
            ));
        }
        let TopLevelCommand::Convert(args) = parse(&["pxl", "convert", "in.png", "--colorize"]).command else {
            panic!("expected convert");
        };
        assert_eq!(color_mode(&args), ColorMode::Palette);
    }

    #[test]
    fn failure_usage_names_the_subcommand() {
        let usage = usage_for("colors").to_string();
        assert!(usage.contains("pxl colors"), "{usage}");
        assert!(usage_for("convert").to_string().contains("pxl convert"));
    }

    #[test]
    fn colors_then_convert_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("in.png");
        let palette_path = dir.path().join("colors.json");
        let output = dir.path().join("out").join("result.png");
        write_sample(&input);

        let TopLevelCommand::Colors(colors_args) = parse(&[
            "pxl",
            "colors",
            input.to_str().expect("utf-8 path"),
            "-o",
            palette_path.to_str().expect("utf-8 path"),
            "-c",
            "6",
        ])
        .command
        else {
            panic!("expected colors");
        };
        let summary = colors_cmd(&colors_args)?;
        assert!(summary["colors"].as_u64().expect("count") <= 6);

        let TopLevelCommand::Convert(convert_args) = parse(&[
            "pxl",
            "convert",
            input.to_str().expect("utf-8 path"),
            "-o",
            output.to_str().expect("utf-8 path"),
            "-c",
            palette_path.to_str().expect("utf-8 path"),
            "-l",
            "25",
        ])
        .command
        else {
            panic!("expected convert");
        };
        let summary = convert_cmd(&convert_args)?;
        assert_eq!(summary["width"], 40);
        assert_eq!(summary["colorized"], true);

        let palette = pxl_palette::load(&palette_path)?;
        let written = image::open(&output)?.to_rgba8();
        assert_eq!(written.dimensions(), (40, 20));
        assert!(written.pixels().all(|p| palette.contains(p)));
        Ok(())
    }

    #[test]
    fn missing_input_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let TopLevelCommand::Convert(args) =
            parse(&["pxl", "convert", dir.path().join("absent.png").to_str().expect("utf-8 path")]).command
        else {
            panic!("expected convert");
        };
        let err = convert_cmd(&args).unwrap_err();
        assert!(err.to_string().contains("unable to load image file"));
    }
}
