//! Font Inliner: resolves queued font assets to embeddable CSS fragments.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client;

use crate::cache::AssetCache;
use crate::css::{FontAsset, URL_RE};

/// Resolve every queued font to its data-URI CSS fragment and concatenate
/// the successes in input order.
///
/// All fetches issue in parallel and the call returns only once every fetch
/// has settled. A failed fetch is logged, cached as known-bad, and omitted
/// from the output; it never fails the batch. No timeout is applied.
pub(crate) async fn inline_fonts(
    client: &Client,
    cache: &AssetCache,
    fonts: &[FontAsset],
) -> String {
    let fragments = futures::future::join_all(
        fonts
            .iter()
            .map(|font| cache.font_css(&font.url, fetch_and_render(client, font))),
    )
    .await;

    fragments.into_iter().flatten().collect()
}

async fn fetch_and_render(client: &Client, font: &FontAsset) -> Option<String> {
    let bytes = match fetch_binary(client, &font.url).await {
        Ok(bytes) => bytes,
        Err(e) => {
            log::warn!("Failed to load font from: {} ({e})", font.url);
            return None;
        }
    };

    let data_uri = format!("url(\"data:{};base64,{}\")", font.format, BASE64.encode(&bytes));
    let fragment = URL_RE.replace(&font.rule_text, regex::NoExpand(&data_uri));
    Some(format!("{fragment}\n"))
}

async fn fetch_binary(client: &Client, url: &str) -> reqwest::Result<Vec<u8>> {
    let bytes = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;
    Ok(bytes.to_vec())
}
