//! Image inlining over a local HTTP server.

use std::io::Cursor;
use std::sync::Arc;

use svgshot::{AssetCache, Element, Error, Exporter, ExporterConfig, RenderOptions};
use tiny_http::{Response, Server};

fn png_fixture() -> Vec<u8> {
    let mut img = image::RgbaImage::new(2, 2);
    for pixel in img.pixels_mut() {
        *pixel = image::Rgba([0, 0, 255, 255]);
    }
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

struct TestServer {
    base: String,
    requests: Arc<std::sync::Mutex<Vec<String>>>,
}

impl TestServer {
    fn start(png_path: &'static str) -> TestServer {
        let server = Server::http("127.0.0.1:0").unwrap();
        let base = format!("http://{}", server.server_addr());
        let requests: Arc<std::sync::Mutex<Vec<String>>> = Arc::default();
        let png = png_fixture();

        let recorded = requests.clone();
        std::thread::spawn(move || loop {
            let Ok(req) = server.recv() else { break };
            let url = req.url().to_string();
            recorded.lock().unwrap().push(url.clone());
            if url.split('?').next() == Some(png_path) {
                let _ = req.respond(Response::from_data(png.clone()));
            } else {
                let response =
                    Response::from_string("not found").with_status_code(tiny_http::StatusCode(404));
                let _ = req.respond(response);
            }
        });

        TestServer { base, requests }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

fn exporter_with_base(base_url: Option<String>) -> Exporter {
    let config = ExporterConfig {
        base_url,
        ..ExporterConfig::default()
    };
    Exporter::with_cache(config, Arc::new(AssetCache::new())).unwrap()
}

#[tokio::test]
async fn referenced_image_is_inlined_as_png_data_uri() {
    let server = TestServer::start("/img.png");
    let exporter = exporter_with_base(Some(server.base.clone()));

    let el = Element::parse(&format!(
        r#"<svg width="10" height="10"><image xlink:href="{}" width="2" height="2"/></svg>"#,
        server.url("/img.png")
    ))
    .unwrap();
    let prepared = exporter
        .prepare_svg(&el, &RenderOptions::default())
        .await
        .unwrap();

    assert!(prepared.markup.contains("xlink:href=\"data:image/png;base64,"));
}

#[tokio::test]
async fn source_tree_is_never_mutated() {
    let server = TestServer::start("/img.png");
    let exporter = exporter_with_base(Some(server.base.clone()));

    let el = Element::parse(&format!(
        r#"<svg width="10" height="10"><image href="{}"/></svg>"#,
        server.url("/img.png")
    ))
    .unwrap();
    let before = el.to_markup();
    exporter
        .prepare_svg(&el, &RenderOptions::default())
        .await
        .unwrap();

    assert_eq!(el.to_markup(), before);
}

#[tokio::test]
async fn same_origin_fetches_skip_cache_busting() {
    let server = TestServer::start("/img.png");
    let exporter = exporter_with_base(Some(server.base.clone()));

    let el = Element::parse(&format!(
        r#"<svg width="10" height="10"><image href="{}"/></svg>"#,
        server.url("/img.png")
    ))
    .unwrap();
    exporter
        .prepare_svg(&el, &RenderOptions::default())
        .await
        .unwrap();

    let requests = server.requests();
    assert_eq!(requests, vec!["/img.png".to_string()]);
}

#[tokio::test]
async fn external_fetches_carry_cache_busting_parameter() {
    let server = TestServer::start("/img.png");
    // The server listens on 127.0.0.1; a "localhost" base is a different
    // host string, so the reference counts as external.
    let port = server.base.rsplit(':').next().unwrap().to_string();
    let exporter = exporter_with_base(Some(format!("http://localhost:{port}")));

    let el = Element::parse(&format!(
        r#"<svg width="10" height="10"><image href="{}"/></svg>"#,
        server.url("/img.png")
    ))
    .unwrap();
    exporter
        .prepare_svg(&el, &RenderOptions::default())
        .await
        .unwrap();

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].starts_with("/img.png?t="));
}

#[tokio::test]
async fn relative_references_resolve_against_the_base_url() {
    let server = TestServer::start("/assets/img.png");
    let exporter = exporter_with_base(Some(format!("{}/page/", server.base)));

    let el = Element::parse(
        r#"<svg width="10" height="10"><image href="/assets/img.png"/></svg>"#,
    )
    .unwrap();
    let prepared = exporter
        .prepare_svg(&el, &RenderOptions::default())
        .await
        .unwrap();

    assert!(prepared.markup.contains("data:image/png;base64,"));
}

#[tokio::test]
async fn failing_image_aborts_the_conversion_with_load_error() {
    let server = TestServer::start("/img.png");
    let exporter = exporter_with_base(Some(server.base.clone()));

    let el = Element::parse(&format!(
        r#"<svg width="10" height="10"><image href="{}"/></svg>"#,
        server.url("/nope.png")
    ))
    .unwrap();
    let err = exporter
        .prepare_svg(&el, &RenderOptions::default())
        .await
        .unwrap_err();

    match err {
        Error::Load { url, .. } => assert!(url.contains("/nope.png")),
        other => panic!("expected Load error, got {other}"),
    }
}

#[tokio::test]
async fn undecodable_image_bytes_are_a_load_error() {
    // Server answers 200 with non-image bytes for every path.
    let server = Server::http("127.0.0.1:0").unwrap();
    let base = format!("http://{}", server.server_addr());
    std::thread::spawn(move || loop {
        let Ok(req) = server.recv() else { break };
        let _ = req.respond(Response::from_string("this is not a png"));
    });

    let exporter = exporter_with_base(Some(base.clone()));
    let el = Element::parse(&format!(
        r#"<svg width="10" height="10"><image href="{base}/fake.png"/></svg>"#
    ))
    .unwrap();
    let err = exporter
        .prepare_svg(&el, &RenderOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Load { .. }));
}
