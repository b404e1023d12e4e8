//! Process-wide asset cache shared across conversions.
//!
//! The cache memoizes two kinds of fetched assets for the lifetime of the
//! process: rendered font-face CSS fragments keyed by font URL, and parsed
//! rule lists of linked stylesheets keyed by sheet URL. A failed fetch is
//! cached as a known-bad entry (`None`) so the URL is not retried until
//! [`AssetCache::reset`]. Each key holds a single async cell, so concurrent
//! conversions requesting the same uncached URL coalesce onto one in-flight
//! fetch instead of racing.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use tokio::sync::OnceCell;

use crate::css::StyleRule;

static SHARED: Lazy<Arc<AssetCache>> = Lazy::new(|| Arc::new(AssetCache::new()));

type CellMap<T> = Mutex<HashMap<String, Arc<OnceCell<T>>>>;

/// Font and stylesheet caches with an explicit lifecycle
#[derive(Default)]
pub struct AssetCache {
    fonts: CellMap<Option<String>>,
    rules: CellMap<Option<Arc<Vec<StyleRule>>>>,
}

impl AssetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache used by exporters that were not given one.
    pub fn shared() -> Arc<AssetCache> {
        SHARED.clone()
    }

    /// Drop every cached entry, including known-bad markers.
    pub fn reset(&self) {
        self.fonts.lock().unwrap().clear();
        self.rules.lock().unwrap().clear();
    }

    /// Rendered font-face CSS for `url`, fetching via `init` at most once.
    /// `None` is the known-bad marker for a failed fetch.
    pub(crate) async fn font_css<F>(&self, url: &str, init: F) -> Option<String>
    where
        F: Future<Output = Option<String>>,
    {
        get_or_fetch(&self.fonts, url, init).await
    }

    /// Parsed rules of the linked stylesheet at `url`, fetching via `init`
    /// at most once. `None` marks a sheet that could not be loaded.
    pub(crate) async fn sheet_rules<F>(&self, url: &str, init: F) -> Option<Arc<Vec<StyleRule>>>
    where
        F: Future<Output = Option<Arc<Vec<StyleRule>>>>,
    {
        get_or_fetch(&self.rules, url, init).await
    }
}

async fn get_or_fetch<T, F>(map: &CellMap<T>, key: &str, init: F) -> T
where
    T: Clone,
    F: Future<Output = T>,
{
    let cell = map
        .lock()
        .unwrap()
        .entry(key.to_string())
        .or_insert_with(|| Arc::new(OnceCell::new()))
        .clone();
    cell.get_or_init(|| init).await.clone()
}
