//! Image Inliner: rewrites embedded `<image>` references into pixel-data URIs.

use std::io::Cursor;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client;

use crate::dom::Element;
use crate::error::{Error, Result};

/// One `<image>` descendant in pre-order, as found by the collection pass.
enum ImageRef {
    /// No reference, or already a data URI
    Skip,
    Fetch { attr: &'static str, url: String },
}

/// Rewrite every embedded raster image reference under `el` into a
/// `data:image/png;base64,` URI, in place.
///
/// All loads are issued concurrently. Any load or decode failure fails the
/// whole operation with [`Error::Load`] naming the offending URL; rewrites
/// that already succeeded stay applied.
pub(crate) async fn inline_images(
    client: &Client,
    base_url: Option<&str>,
    el: &mut Element,
) -> Result<()> {
    let refs = collect_image_refs(el, base_url);

    let fetched = futures::future::join_all(refs.iter().map(|image| async move {
        match image {
            ImageRef::Skip => None,
            ImageRef::Fetch { url, .. } => Some(load_as_png_uri(client, url).await),
        }
    }))
    .await;

    // Apply successes before reporting the first failure; partial rewrites
    // are part of the contract.
    let mut failure = None;
    let mut pending = refs.into_iter().zip(fetched);
    el.walk_mut(&mut |node| {
        if node.tag() != "image" {
            return;
        }
        match pending.next() {
            Some((ImageRef::Fetch { attr, .. }, Some(Ok(uri)))) => node.set_attr(attr, uri),
            Some((ImageRef::Fetch { .. }, Some(Err(e)))) => {
                if failure.is_none() {
                    failure = Some(e);
                }
            }
            _ => {}
        }
    });

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn collect_image_refs(el: &Element, base_url: Option<&str>) -> Vec<ImageRef> {
    let mut refs = Vec::new();
    el.walk(&mut |node| {
        if node.tag() != "image" {
            return;
        }
        let (attr, href) = if let Some(href) = node.attr("xlink:href") {
            ("xlink:href", href)
        } else if let Some(href) = node.attr("href") {
            ("href", href)
        } else {
            refs.push(ImageRef::Skip);
            return;
        };
        if href.is_empty() || href.starts_with("data:") {
            refs.push(ImageRef::Skip);
            return;
        }
        refs.push(ImageRef::Fetch {
            attr,
            url: fetch_url(href, base_url),
        });
    });
    refs
}

/// Resolve an image reference to its fetch URL. External hosts get a
/// cache-busting timestamp parameter so a stale cached copy is never
/// embedded; same-origin and relative references are left untouched.
fn fetch_url(href: &str, base_url: Option<&str>) -> String {
    let resolved = match base_url.and_then(|b| url::Url::parse(b).ok()) {
        Some(base) if !href.contains("://") => base
            .join(href)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| href.to_string()),
        _ => href.to_string(),
    };

    if !is_external(&resolved, base_url) {
        return resolved;
    }
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let sep = if resolved.contains('?') { '&' } else { '?' };
    format!("{resolved}{sep}t={stamp}")
}

fn is_external(url: &str, base_url: Option<&str>) -> bool {
    if !url.starts_with("http") {
        return false;
    }
    let Some(host) = base_url
        .and_then(|b| url::Url::parse(b).ok())
        .and_then(|b| b.host_str().map(String::from))
    else {
        // Without a base there is no same-origin; treat absolute URLs as
        // external so they still get the cache-busting parameter.
        return true;
    };
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h != host))
        .unwrap_or(false)
}

async fn load_as_png_uri(client: &Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| Error::load(url, format!("could not load image: {e}")))?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| Error::load(url, format!("could not read image body: {e}")))?;

    let decoded = image::load_from_memory(&bytes)
        .map_err(|e| Error::load(url, format!("could not decode image: {e}")))?;
    let mut png = Vec::new();
    decoded
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| Error::load(url, format!("could not re-encode image: {e}")))?;

    Ok(format!("data:image/png;base64,{}", BASE64.encode(&png)))
}
