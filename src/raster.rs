//! Rasterizer: renders a serialized SVG document onto a pixel canvas and
//! encodes it as an image data URI.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{Error, Result};
use crate::serialize::decode_data_uri;
use crate::{EncoderType, RenderOptions};

/// A pixel canvas sized in physical pixels, logical dimensions multiplied by
/// the pixel ratio so output is crisp on high-density displays.
pub struct Canvas {
    pixmap: resvg::tiny_skia::Pixmap,
    pixel_ratio: f32,
    tainted: bool,
}

impl Canvas {
    pub(crate) fn new(
        logical_width: f32,
        logical_height: f32,
        pixel_ratio: f32,
        background_color: &str,
    ) -> Result<Canvas> {
        let width = (logical_width * pixel_ratio).round() as u32;
        let height = (logical_height * pixel_ratio).round() as u32;
        let mut pixmap = resvg::tiny_skia::Pixmap::new(width, height).ok_or_else(|| {
            Error::Encoding(format!("cannot allocate a {width}x{height} canvas"))
        })?;
        if let Some(color) = parse_color(background_color) {
            pixmap.fill(color);
        }
        Ok(Canvas {
            pixmap,
            pixel_ratio,
            tainted: false,
        })
    }

    /// Physical width in pixels
    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    /// Physical height in pixels
    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    /// Physical-to-logical pixel ratio the canvas was sized with. External
    /// rasterizers should scale their drawing transform by this.
    pub fn pixel_ratio(&self) -> f32 {
        self.pixel_ratio
    }

    pub fn pixmap_mut(&mut self) -> &mut resvg::tiny_skia::Pixmap {
        &mut self.pixmap
    }

    pub fn pixmap(&self) -> &resvg::tiny_skia::Pixmap {
        &self.pixmap
    }

    /// Mark the canvas as unreadable. Encoding a tainted canvas fails with a
    /// security error, which the PNG entry point reports as an empty result.
    pub fn mark_tainted(&mut self) {
        self.tainted = true;
    }

    pub fn is_tainted(&self) -> bool {
        self.tainted
    }

    /// Draw parsed SVG markup onto the canvas, scaled by the pixel ratio.
    pub(crate) fn draw_svg(&mut self, svg: &str) -> std::result::Result<(), usvg::Error> {
        let mut opt = usvg::Options::default();
        opt.fontdb_mut().load_system_fonts();
        // Documents without explicit dimensions (responsive mode) fall back
        // to the canvas's logical size.
        opt.default_size = usvg::Size::from_wh(
            self.width() as f32 / self.pixel_ratio,
            self.height() as f32 / self.pixel_ratio,
        )
        .unwrap_or_else(|| usvg::Size::from_wh(1.0, 1.0).unwrap());
        let tree = usvg::Tree::from_str(svg, &opt)?;
        resvg::render(
            &tree,
            resvg::tiny_skia::Transform::from_scale(self.pixel_ratio, self.pixel_ratio),
            &mut self.pixmap.as_mut(),
        );
        Ok(())
    }

    /// Encode the canvas into a `data:` URI under the requested encoder.
    pub(crate) fn encode(&self, encoder: EncoderType, quality: f32) -> Result<String> {
        if self.tainted {
            return Err(Error::Security(
                "canvas was tainted by the rasterization callback".into(),
            ));
        }
        let (mime, bytes) = match encoder {
            EncoderType::Png => {
                let bytes = self
                    .pixmap
                    .encode_png()
                    .map_err(|e| Error::Encoding(format!("PNG encoding failed: {e}")))?;
                ("image/png", bytes)
            }
            EncoderType::Jpeg => ("image/jpeg", self.encode_jpeg(quality)?),
        };
        Ok(format!("data:{mime};base64,{}", BASE64.encode(bytes)))
    }

    fn encode_jpeg(&self, quality: f32) -> Result<Vec<u8>> {
        let mut rgba = image::RgbaImage::new(self.width(), self.height());
        for (pixel, out) in self.pixmap.pixels().iter().zip(rgba.pixels_mut()) {
            let c = pixel.demultiply();
            *out = image::Rgba([c.red(), c.green(), c.blue(), c.alpha()]);
        }
        let rgb = image::DynamicImage::ImageRgba8(rgba).to_rgb8();

        let quality = (quality * 100.0).clamp(1.0, 100.0) as u8;
        let mut bytes = Vec::new();
        let mut cursor = Cursor::new(&mut bytes);
        let encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, quality);
        rgb.write_with_encoder(encoder)
            .map_err(|e| Error::Encoding(format!("JPEG encoding failed: {e}")))?;
        Ok(bytes)
    }
}

/// Render the SVG data URI produced by the serializer and encode it.
///
/// This is the default mode: the standalone document is decoded back to SVG
/// text and drawn, the native counterpart of loading the URI as an image. A
/// parse failure carries the decoded source and the raw URI for diagnostics.
pub(crate) fn rasterize_data_uri(
    uri: &str,
    logical_width: f32,
    logical_height: f32,
    pixel_ratio: f32,
    options: &RenderOptions,
) -> Result<Option<String>> {
    let (_, bytes) = decode_data_uri(uri)?;
    let svg = String::from_utf8(bytes)
        .map_err(|e| Error::load(uri.to_string(), format!("decoded SVG is not UTF-8: {e}")))?;

    let mut canvas = Canvas::new(
        logical_width,
        logical_height,
        pixel_ratio,
        &options.background_color,
    )?;
    canvas.draw_svg(&svg).map_err(|e| Error::Load {
        url: uri.to_string(),
        reason: format!("error loading the data URI as an image: {e}; decoded SVG source:\n{svg}"),
    })?;
    encode_caught(&canvas, options)
}

/// Hand the canvas and raw markup to an external rasterization callback,
/// then encode whatever it drew.
pub(crate) fn rasterize_with_callback(
    rasterizer: &crate::RasterizeFn,
    markup: &str,
    logical_width: f32,
    logical_height: f32,
    pixel_ratio: f32,
    options: &RenderOptions,
) -> Result<Option<String>> {
    let mut canvas = Canvas::new(
        logical_width,
        logical_height,
        pixel_ratio,
        &options.background_color,
    )?;
    rasterizer(&mut canvas, markup)?;
    encode_caught(&canvas, options)
}

/// Encode, converting the security-taint failure into a logged empty result
/// as the contract requires. Other encoding failures propagate.
fn encode_caught(canvas: &Canvas, options: &RenderOptions) -> Result<Option<String>> {
    match canvas.encode(options.encoder_type, options.encoder_options) {
        Ok(uri) => Ok(Some(uri)),
        Err(Error::Security(reason)) => {
            log::error!("Rendered SVG cannot be exported: {reason}");
            Ok(None)
        }
        Err(other) => Err(other),
    }
}

fn parse_color(value: &str) -> Option<resvg::tiny_skia::Color> {
    let value = value.trim().to_ascii_lowercase();
    let rgba = |r: u8, g: u8, b: u8, a: u8| resvg::tiny_skia::Color::from_rgba8(r, g, b, a);
    match value.as_str() {
        "" | "transparent" | "none" => return None,
        "white" => return Some(rgba(255, 255, 255, 255)),
        "black" => return Some(rgba(0, 0, 0, 255)),
        "red" => return Some(rgba(255, 0, 0, 255)),
        "green" => return Some(rgba(0, 128, 0, 255)),
        "blue" => return Some(rgba(0, 0, 255, 255)),
        "yellow" => return Some(rgba(255, 255, 0, 255)),
        "gray" | "grey" => return Some(rgba(128, 128, 128, 255)),
        _ => {}
    }

    if let Some(hex) = value.strip_prefix('#') {
        let expand = |c: u8| (c << 4) | c;
        let nibble = |c: u8| (c as char).to_digit(16).map(|v| v as u8);
        let bytes = hex.as_bytes();
        return match bytes.len() {
            3 => Some(rgba(
                expand(nibble(bytes[0])?),
                expand(nibble(bytes[1])?),
                expand(nibble(bytes[2])?),
                255,
            )),
            6 | 8 => {
                let parse = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
                Some(rgba(
                    parse(0)?,
                    parse(2)?,
                    parse(4)?,
                    if bytes.len() == 8 { parse(6)? } else { 255 },
                ))
            }
            _ => None,
        };
    }

    if let Some(args) = value
        .strip_prefix("rgba(")
        .or_else(|| value.strip_prefix("rgb("))
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let parts: Vec<&str> = args.split(',').map(str::trim).collect();
        if parts.len() < 3 {
            return None;
        }
        let channel = |s: &str| s.parse::<f32>().ok().map(|v| v.clamp(0.0, 255.0) as u8);
        let alpha = parts
            .get(3)
            .and_then(|s| s.parse::<f32>().ok())
            .map(|a| (a.clamp(0.0, 1.0) * 255.0) as u8)
            .unwrap_or(255);
        return Some(rgba(
            channel(parts[0])?,
            channel(parts[1])?,
            channel(parts[2])?,
            alpha,
        ));
    }

    log::warn!("Unrecognized background color \"{value}\"; leaving canvas transparent");
    None
}
