//! svgshot CLI: convert an SVG file into a standalone, style-inlined SVG
//! document or a rasterized PNG/JPEG.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use serde::Deserialize;

use svgshot::{Element, EncoderType, Exporter, ExporterConfig, RenderOptions};

#[derive(Parser)]
#[command(name = "svgshot", version, about = "Standalone-SVG serialization and PNG export")]
struct Cli {
    /// Input SVG file
    input: PathBuf,

    /// Output file (defaults to the input with the format's extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format (inferred from the output extension when omitted)
    #[arg(short, long, value_enum)]
    format: Option<OutputFormat>,

    /// Stylesheet to register: a file path or an http(s) URL. Repeatable.
    #[arg(short = 's', long = "stylesheet")]
    stylesheets: Vec<String>,

    /// Explicit output width
    #[arg(long)]
    width: Option<f32>,

    /// Explicit output height
    #[arg(long)]
    height: Option<f32>,

    /// Output size multiplier
    #[arg(long, default_value_t = 1.0)]
    scale: f32,

    /// Omit explicit dimensions so the output scales to its container
    #[arg(long)]
    responsive: bool,

    /// Background color behind raster output
    #[arg(long, default_value = "transparent")]
    background: String,

    /// JPEG encoder quality (0.0..=1.0)
    #[arg(long, default_value_t = 0.8)]
    quality: f32,

    /// Physical-to-logical pixel ratio for raster output
    #[arg(long, default_value_t = 1.0)]
    pixel_ratio: f32,

    /// Base URL for same-origin checks and relative asset references
    #[arg(long)]
    base_url: Option<String>,

    /// JSON render-options file; replaces the sizing/encoder flags entirely
    #[arg(long)]
    options: Option<PathBuf>,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Svg,
    Png,
    Jpeg,
}

impl OutputFormat {
    fn extension(self) -> &'static str {
        match self {
            OutputFormat::Svg => "svg",
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
        }
    }

    fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "svg" => Some(OutputFormat::Svg),
            "png" => Some(OutputFormat::Png),
            "jpg" | "jpeg" => Some(OutputFormat::Jpeg),
            _ => None,
        }
    }
}

/// Render options accepted via `--options`, mirroring the library defaults.
#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct OptionsFile {
    left: Option<f32>,
    top: Option<f32>,
    width: Option<f32>,
    height: Option<f32>,
    scale: Option<f32>,
    responsive: Option<bool>,
    background_color: Option<String>,
    encoder_type: Option<String>,
    encoder_options: Option<f32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let markup = std::fs::read_to_string(&cli.input)
        .with_context(|| format!("failed to read {}", cli.input.display()))?;
    let el = Element::parse(&markup)
        .with_context(|| format!("failed to parse {}", cli.input.display()))?;

    let format = resolve_format(&cli)?;
    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| cli.input.with_extension(format.extension()));
    let filename = output
        .file_name()
        .and_then(|n| n.to_str())
        .context("output path has no filename")?
        .to_string();

    let config = ExporterConfig {
        base_url: cli.base_url.clone(),
        pixel_ratio: cli.pixel_ratio,
        save_dir: output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf(),
        ..ExporterConfig::default()
    };
    let mut exporter = Exporter::new(config)?;
    register_stylesheets(&mut exporter, &cli.stylesheets)?;

    let options = render_options(&cli, format)?;
    match format {
        OutputFormat::Svg => exporter.save_svg(&el, &filename, &options).await?,
        OutputFormat::Png | OutputFormat::Jpeg => {
            #[cfg(feature = "raster")]
            exporter.save_svg_as_png(&el, &filename, &options).await?;
            #[cfg(not(feature = "raster"))]
            anyhow::bail!("raster output requires building with the `raster` feature");
        }
    }

    println!("Wrote {}", output.display());
    Ok(())
}

fn resolve_format(cli: &Cli) -> anyhow::Result<OutputFormat> {
    if let Some(format) = cli.format {
        return Ok(format);
    }
    let inferred = cli
        .output
        .as_ref()
        .and_then(|o| o.extension())
        .and_then(|e| e.to_str())
        .and_then(OutputFormat::from_extension);
    Ok(inferred.unwrap_or(OutputFormat::Svg))
}

fn register_stylesheets(exporter: &mut Exporter, sheets: &[String]) -> anyhow::Result<()> {
    for sheet in sheets {
        if sheet.starts_with("http://") || sheet.starts_with("https://") {
            exporter.add_stylesheet_url(sheet.clone());
        } else {
            let css = std::fs::read_to_string(sheet)
                .with_context(|| format!("failed to read stylesheet {sheet}"))?;
            exporter.add_stylesheet(&css);
        }
    }
    Ok(())
}

fn render_options(cli: &Cli, format: OutputFormat) -> anyhow::Result<RenderOptions> {
    let mut options = RenderOptions {
        width: cli.width,
        height: cli.height,
        scale: cli.scale,
        responsive: cli.responsive,
        background_color: cli.background.clone(),
        encoder_options: cli.quality,
        ..RenderOptions::default()
    };
    if format == OutputFormat::Jpeg {
        options.encoder_type = EncoderType::Jpeg;
    }

    let Some(path) = &cli.options else {
        return Ok(options);
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read options file {}", path.display()))?;
    let file: OptionsFile = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse options file {}", path.display()))?;

    options.left = file.left.unwrap_or(0.0);
    options.top = file.top.unwrap_or(0.0);
    options.width = file.width;
    options.height = file.height;
    options.scale = file.scale.unwrap_or(1.0);
    options.responsive = file.responsive.unwrap_or(false);
    options.background_color = file
        .background_color
        .unwrap_or_else(|| "transparent".to_string());
    options.encoder_options = file.encoder_options.unwrap_or(0.8);
    if let Some(encoder) = file.encoder_type.as_deref() {
        options.encoder_type = EncoderType::from_mime(encoder)
            .with_context(|| format!("unsupported encoder type {encoder}"))?;
    }
    Ok(options)
}
