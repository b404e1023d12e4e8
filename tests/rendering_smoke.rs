#![cfg(feature = "raster")]

//! Rasterization paths: default mode, external callback mode, taint, saves.

use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use svgshot::{
    AssetCache, Element, EncoderType, Exporter, ExporterConfig, MemorySaveTarget, RenderOptions,
};

fn exporter_with(config: ExporterConfig) -> Exporter {
    Exporter::with_cache(config, Arc::new(AssetCache::new())).unwrap()
}

fn exporter() -> Exporter {
    exporter_with(ExporterConfig::default())
}

fn red_square() -> Element {
    Element::parse(
        r##"<svg width="4" height="4"><rect width="4" height="4" fill="#ff0000"/></svg>"##,
    )
    .unwrap()
}

fn decode_png(uri: &str) -> image::RgbaImage {
    let payload = uri
        .strip_prefix("data:image/png;base64,")
        .expect("png data uri");
    let bytes = BASE64.decode(payload).unwrap();
    image::load_from_memory(&bytes).unwrap().to_rgba8()
}

#[tokio::test]
async fn default_mode_renders_the_document() {
    let uri = exporter()
        .svg_as_png_uri(&red_square(), &RenderOptions::default())
        .await
        .unwrap()
        .expect("untainted canvas encodes");

    let img = decode_png(&uri);
    assert_eq!(img.dimensions(), (4, 4));
    assert_eq!(img.get_pixel(1, 1).0, [255, 0, 0, 255]);
}

#[tokio::test]
async fn pixel_ratio_scales_the_output() {
    let exporter = exporter_with(ExporterConfig {
        pixel_ratio: 2.0,
        ..ExporterConfig::default()
    });
    let uri = exporter
        .svg_as_png_uri(&red_square(), &RenderOptions::default())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(decode_png(&uri).dimensions(), (8, 8));
}

#[tokio::test]
async fn scale_option_multiplies_the_canvas() {
    let options = RenderOptions {
        scale: 3.0,
        ..RenderOptions::default()
    };
    let uri = exporter()
        .svg_as_png_uri(&red_square(), &options)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(decode_png(&uri).dimensions(), (12, 12));
}

#[tokio::test]
async fn background_color_fills_uncovered_pixels() {
    let el = Element::parse(
        r##"<svg width="4" height="4"><rect width="2" height="2" fill="#ff0000"/></svg>"##,
    )
    .unwrap();
    let options = RenderOptions {
        background_color: "#00ff00".to_string(),
        ..RenderOptions::default()
    };
    let uri = exporter()
        .svg_as_png_uri(&el, &options)
        .await
        .unwrap()
        .unwrap();

    let img = decode_png(&uri);
    assert_eq!(img.get_pixel(0, 0).0, [255, 0, 0, 255]);
    assert_eq!(img.get_pixel(3, 3).0, [0, 255, 0, 255]);
}

#[tokio::test]
async fn jpeg_encoder_type_produces_jpeg_uri() {
    let options = RenderOptions {
        encoder_type: EncoderType::Jpeg,
        background_color: "white".to_string(),
        ..RenderOptions::default()
    };
    let uri = exporter()
        .svg_as_png_uri(&red_square(), &options)
        .await
        .unwrap()
        .unwrap();

    assert!(uri.starts_with("data:image/jpeg;base64,"));
}

#[tokio::test]
async fn external_rasterizer_receives_markup_and_canvas() {
    let seen_markup: Arc<Mutex<Option<String>>> = Arc::default();
    let recorded = seen_markup.clone();

    let rasterizer: svgshot::RasterizeFn = Arc::new(move |canvas, markup| {
        *recorded.lock().unwrap() = Some(markup.to_string());
        canvas
            .pixmap_mut()
            .fill(resvg::tiny_skia::Color::from_rgba8(0, 0, 255, 255));
        Ok(())
    });
    let options = RenderOptions {
        rasterizer: Some(rasterizer),
        ..RenderOptions::default()
    };
    let uri = exporter()
        .svg_as_png_uri(&red_square(), &options)
        .await
        .unwrap()
        .unwrap();

    let markup = seen_markup.lock().unwrap().clone().unwrap();
    assert!(markup.contains("<svg"));
    assert!(markup.contains("<rect"));
    assert_eq!(decode_png(&uri).get_pixel(0, 0).0, [0, 0, 255, 255]);
}

#[tokio::test]
async fn tainted_canvas_resolves_none() {
    let rasterizer: svgshot::RasterizeFn = Arc::new(|canvas, _markup| {
        canvas.mark_tainted();
        Ok(())
    });
    let options = RenderOptions {
        rasterizer: Some(rasterizer),
        ..RenderOptions::default()
    };
    let result = exporter()
        .svg_as_png_uri(&red_square(), &options)
        .await
        .unwrap();

    assert!(result.is_none());
}

#[tokio::test]
async fn save_svg_as_png_writes_through_the_save_target() {
    let mut exporter = exporter();
    let target = Arc::new(MemorySaveTarget::new());
    exporter.set_save_target(target.clone());

    exporter
        .save_svg_as_png(&red_square(), "square.png", &RenderOptions::default())
        .await
        .unwrap();

    let saved = target.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].filename, "square.png");
    assert_eq!(saved[0].mime, "image/png");
    assert_eq!(&saved[0].bytes[1..4], b"PNG");
}

#[tokio::test]
async fn detached_node_with_matching_rules_still_gets_styles() {
    let mut exporter = exporter();
    exporter.add_stylesheet("svg.plot rect { fill: #0000ff; } svg.plot { stroke: none; }");
    let target = Arc::new(MemorySaveTarget::new());
    exporter.set_save_target(target.clone());

    let el = Element::parse(
        r#"<svg class="plot" width="4" height="4"><rect width="4" height="4"/></svg>"#,
    )
    .unwrap();

    let prepared = exporter
        .prepare_svg(&el, &RenderOptions::default())
        .await
        .unwrap();
    assert!(prepared.markup.contains("svg.plot rect{fill: #0000ff;}"));
    assert!(prepared.markup.contains("svg.plot{stroke: none;}"));

    exporter
        .save_svg_as_png(&el, "plot.png", &RenderOptions::default())
        .await
        .unwrap();
    assert_eq!(target.saved().len(), 1);
}
