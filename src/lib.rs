//! svgshot
//!
//! Serializes an in-memory SVG (or SVG-capable) element tree into a
//! standalone, style-inlined SVG document, and optionally rasterizes that
//! document into a PNG or JPEG image for saving.
//!
//! # Features
//!
//! - **Style inlining**: registered stylesheets are matched against the
//!   source tree and embedded, font-face binaries included
//! - **Self-contained output**: raster image references and fonts become
//!   `data:` URIs, so the document renders anywhere
//! - **Raster backend** (feature `raster`, default): draws the document onto
//!   a pixel canvas and encodes PNG/JPEG
//!
//! # Example
//!
//! ```no_run
//! use svgshot::{Element, Exporter, ExporterConfig, RenderOptions};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut exporter = Exporter::new(ExporterConfig::default())?;
//! exporter.add_stylesheet(".chart rect { fill: steelblue; }");
//!
//! let el = Element::parse(r#"<svg class="chart" width="100" height="50"><rect/></svg>"#)?;
//! let prepared = exporter.prepare_svg(&el, &RenderOptions::default()).await?;
//! println!("{}x{}: {}", prepared.width, prepared.height, prepared.markup);
//!
//! exporter.save_svg_as_png(&el, "chart.png", &RenderOptions::default()).await?;
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

pub mod error;
pub use error::{Error, Result};

pub mod cache;
pub mod css;
pub mod dom;
pub mod platform;

mod inline;
mod normalize;
mod serialize;

// Rasterization backend (feature-gated)
#[cfg(feature = "raster")]
pub mod raster;

pub use cache::AssetCache;
pub use css::{FontAsset, StyleSheet};
pub use dom::Element;
pub use platform::{FileSaveTarget, MemorySaveTarget, SaveTarget};
#[cfg(feature = "raster")]
pub use raster::Canvas;

/// Rewrites a matched selector before it is emitted
pub type SelectorRemapFn = Arc<dyn Fn(&str) -> String + Send + Sync>;
/// Rewrites the declaration block of a matched rule before it is emitted
pub type ModifyStyleFn = Arc<dyn Fn(&str) -> String + Send + Sync>;
/// Replaces the whole rule formatter (selector, declarations) -> CSS text
pub type ModifyCssFn = Arc<dyn Fn(&str, &str) -> String + Send + Sync>;
/// External rasterization callback: receives the canvas and raw SVG markup
#[cfg(feature = "raster")]
pub type RasterizeFn = Arc<dyn Fn(&mut Canvas, &str) -> Result<()> + Send + Sync>;

/// Configuration for an [`Exporter`]
///
/// The defaults are conservative: pixel ratio 1.0 (no high-density scaling),
/// saves landing in the current directory, and no base URL. Without a base
/// URL, relative asset references cannot be resolved and absolute URLs are
/// all treated as external.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    /// User agent sent with stylesheet/font/image fetches
    pub user_agent: String,
    /// The host page URL: reference point for same-origin checks and for
    /// resolving relative asset references
    pub base_url: Option<String>,
    /// Physical-to-logical pixel ratio applied when rasterizing
    pub pixel_ratio: f32,
    /// Directory the default save target writes into
    pub save_dir: PathBuf,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("svgshot/{}", env!("CARGO_PKG_VERSION")),
            base_url: None,
            pixel_ratio: 1.0,
            save_dir: PathBuf::from("."),
        }
    }
}

/// Output encoder for rasterized images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncoderType {
    #[default]
    Png,
    Jpeg,
}

impl EncoderType {
    pub fn mime(self) -> &'static str {
        match self {
            EncoderType::Png => "image/png",
            EncoderType::Jpeg => "image/jpeg",
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "image/png" | "png" => Some(EncoderType::Png),
            "image/jpeg" | "image/jpg" | "jpeg" | "jpg" => Some(EncoderType::Jpeg),
            _ => None,
        }
    }
}

/// Per-conversion options
#[derive(Clone)]
pub struct RenderOptions {
    /// viewBox left offset
    pub left: f32,
    /// viewBox top offset
    pub top: f32,
    /// Explicit output width; resolved from the tree when absent
    pub width: Option<f32>,
    /// Explicit output height; resolved from the tree when absent
    pub height: Option<f32>,
    /// Output size multiplier (ignored in responsive mode)
    pub scale: f32,
    /// Omit explicit dimensions and preserve aspect ratio so the rendered
    /// output scales to its container
    pub responsive: bool,
    /// Background color recorded on the clone and filled behind raster
    /// output ("transparent" leaves the canvas clear)
    pub background_color: String,
    /// Raster output encoder
    pub encoder_type: EncoderType,
    /// Encoder quality in `0.0..=1.0` (JPEG only)
    pub encoder_options: f32,
    /// External rasterization callback; when set, the default SVG drawing
    /// path is skipped and the callback paints the canvas
    #[cfg(feature = "raster")]
    pub rasterizer: Option<RasterizeFn>,
    pub selector_remap: Option<SelectorRemapFn>,
    pub modify_style: Option<ModifyStyleFn>,
    pub modify_css: Option<ModifyCssFn>,
    /// Pre-supplied font list; presence disables font auto-detection
    pub fonts: Option<Vec<FontAsset>>,
}

impl Default for RenderOptions {
    /// The documented defaults: scale 1, transparent background, PNG at
    /// encoder quality 0.8.
    fn default() -> Self {
        Self {
            left: 0.0,
            top: 0.0,
            width: None,
            height: None,
            scale: 1.0,
            responsive: false,
            background_color: "transparent".to_string(),
            encoder_type: EncoderType::Png,
            encoder_options: 0.8,
            #[cfg(feature = "raster")]
            rasterizer: None,
            selector_remap: None,
            modify_style: None,
            modify_css: None,
            fonts: None,
        }
    }
}

impl RenderOptions {
    pub fn new() -> Self {
        Self::default()
    }
}

/// The serialized standalone document and its resolved logical dimensions
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSvg {
    pub markup: String,
    pub width: f32,
    pub height: f32,
}

/// The conversion pipeline: owns the HTTP client, the registered
/// stylesheets, the (shared) asset cache, and the save target.
pub struct Exporter {
    client: reqwest::Client,
    config: ExporterConfig,
    cache: Arc<AssetCache>,
    sheets: Vec<StyleSheet>,
    save_target: Arc<dyn SaveTarget>,
}

impl Exporter {
    /// Create an exporter sharing the process-wide asset cache.
    pub fn new(config: ExporterConfig) -> Result<Self> {
        Self::with_cache(config, AssetCache::shared())
    }

    /// Create an exporter with an injected cache, for callers that need an
    /// isolated cache lifecycle.
    pub fn with_cache(config: ExporterConfig, cache: Arc<AssetCache>) -> Result<Self> {
        // No request timeout: a hung fetch blocks its stage, per contract.
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Initialization(format!("Failed to build HTTP client: {e}")))?;
        let save_target: Arc<dyn SaveTarget> = Arc::new(FileSaveTarget::new(&config.save_dir));

        Ok(Self {
            client,
            config,
            cache,
            sheets: Vec::new(),
            save_target,
        })
    }

    /// Replace the save facility backing [`Exporter::download`].
    pub fn set_save_target(&mut self, target: Arc<dyn SaveTarget>) {
        self.save_target = target;
    }

    pub fn cache(&self) -> &Arc<AssetCache> {
        &self.cache
    }

    /// Register an inline stylesheet (parsed immediately).
    pub fn add_stylesheet(&mut self, css: &str) {
        self.sheets.push(StyleSheet::inline(css));
    }

    /// Register an inline stylesheet excluded from font auto-detection.
    pub fn add_stylesheet_no_font_detection(&mut self, css: &str) {
        self.sheets
            .push(StyleSheet::inline(css).without_font_detection());
    }

    /// Register a linked stylesheet, fetched once on first use.
    pub fn add_stylesheet_url(&mut self, url: impl Into<String>) {
        self.sheets.push(StyleSheet::remote(url));
    }

    /// Register a linked stylesheet excluded from font auto-detection.
    pub fn add_stylesheet_url_no_font_detection(&mut self, url: impl Into<String>) {
        self.sheets
            .push(StyleSheet::remote(url).without_font_detection());
    }

    /// Serialize `el` into a standalone, style-inlined SVG document.
    ///
    /// The element is cloned first and every mutation, including image
    /// inlining, lands on the clone; the caller's tree is never touched.
    pub async fn prepare_svg(&self, el: &Element, options: &RenderOptions) -> Result<PreparedSvg> {
        require_renderable(el)?;

        let mut clone = el.clone();
        inline::images::inline_images(&self.client, self.config.base_url.as_deref(), &mut clone)
            .await?;

        let doc = normalize::normalize_document(el, clone, options)?;

        // Rule matching runs against the source, not the normalized clone.
        let css =
            inline::style::resolve_css(&self.client, &self.cache, &self.sheets, el, options)
                .await;

        let mut root = doc.root;
        normalize::insert_style_defs(&mut root, &css);
        let markup = serialize::repair_namespace_artifacts(&root.to_markup());

        Ok(PreparedSvg {
            markup,
            width: doc.width,
            height: doc.height,
        })
    }

    /// The prepared document as a base64 `data:image/svg+xml` URI with the
    /// SVG doctype preamble.
    pub async fn svg_as_data_uri(&self, el: &Element, options: &RenderOptions) -> Result<String> {
        require_renderable(el)?;
        let prepared = self.prepare_svg(el, options).await?;
        Ok(serialize::svg_data_uri(&prepared.markup))
    }

    /// Rasterize the prepared document and encode it as an image data URI.
    ///
    /// Resolves `None` only when encoding was blocked by a canvas tainted by
    /// the external rasterization callback; that failure is logged, not
    /// raised.
    #[cfg(feature = "raster")]
    pub async fn svg_as_png_uri(
        &self,
        el: &Element,
        options: &RenderOptions,
    ) -> Result<Option<String>> {
        require_renderable(el)?;

        let prepared = self.prepare_svg(el, options).await?;
        let (width, height) = (
            prepared.width * options.scale,
            prepared.height * options.scale,
        );
        if let Some(rasterizer) = &options.rasterizer {
            return raster::rasterize_with_callback(
                rasterizer,
                &prepared.markup,
                width,
                height,
                self.config.pixel_ratio,
                options,
            );
        }
        let uri = serialize::svg_data_uri(&prepared.markup);
        raster::rasterize_data_uri(&uri, width, height, self.config.pixel_ratio, options)
    }

    /// Serialize and save under `filename` through the save target.
    pub async fn save_svg(
        &self,
        el: &Element,
        filename: &str,
        options: &RenderOptions,
    ) -> Result<()> {
        let uri = self.svg_as_data_uri(el, options).await?;
        self.download(filename, &uri)
    }

    /// Rasterize and save under `filename` through the save target. The
    /// logged security-taint path saves nothing and succeeds.
    #[cfg(feature = "raster")]
    pub async fn save_svg_as_png(
        &self,
        el: &Element,
        filename: &str,
        options: &RenderOptions,
    ) -> Result<()> {
        match self.svg_as_png_uri(el, options).await? {
            Some(uri) => self.download(filename, &uri),
            None => Ok(()),
        }
    }

    /// Decode a data URI and hand it to the platform save target.
    pub fn download(&self, filename: &str, data_uri: &str) -> Result<()> {
        let (mime, bytes) = serialize::decode_data_uri(data_uri)?;
        self.save_target.save(filename, &mime, &bytes)
    }
}

/// Reject non-renderable arguments before any asynchronous work starts.
fn require_renderable(el: &Element) -> Result<()> {
    let tag = el.tag();
    let renderable = tag
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if !renderable {
        return Err(Error::InvalidInput(format!("<{tag}>")));
    }
    Ok(())
}
