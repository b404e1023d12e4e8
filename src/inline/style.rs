//! Style Resolver: matches reachable style rules against the source tree
//! and renders the inlined CSS text.

use std::sync::Arc;

use reqwest::Client;
use scraper::{Html, Selector};

use crate::cache::AssetCache;
use crate::css::{detect_css_font, parse_stylesheet, FontAsset, SheetSource, StyleRule, StyleSheet};
use crate::dom::Element;
use crate::inline::fonts::inline_fonts;
use crate::RenderOptions;

/// Produce the inlined CSS for `el`: every registered rule, matched rules
/// formatted through the caller's hooks, unmatched style rules verbatim,
/// detected fonts fetched and embedded.
///
/// Output preserves sheet registration order and in-sheet rule order. This
/// performs no cascade resolution; matching only selects the formatter.
pub(crate) async fn resolve_css(
    client: &Client,
    cache: &AssetCache,
    sheets: &[StyleSheet],
    el: &Element,
    options: &RenderOptions,
) -> String {
    let mut resolved: Vec<(&StyleSheet, Arc<Vec<StyleRule>>)> = Vec::new();
    for sheet in sheets {
        if let Some(rules) = sheet_rules(client, cache, sheet).await {
            resolved.push((sheet, rules));
        }
    }

    let detect_fonts = options.fonts.is_none();
    let mut font_list: Vec<FontAsset> = options.fonts.clone().unwrap_or_default();
    let mut css: Vec<String> = Vec::new();

    // The matcher holds a parsed fragment that must not live across a
    // suspension point; all matching happens in this block.
    {
        let matcher = SelectorMatcher::for_element(el);
        for (sheet, rules) in &resolved {
            for rule in rules.iter() {
                if rule.is_font_face() {
                    if detect_fonts && sheet.detect_fonts {
                        if let Some(font) = detect_css_font(rule, sheet.href()) {
                            font_list.push(font);
                        }
                    } else {
                        css.push(rule.text.clone());
                    }
                } else if rule.is_at_rule() {
                    // Block/statement at-rules carry no matchable selector.
                } else if matcher.matches(&rule.selector) {
                    css.push(generate_css(options, &rule.selector, &rule.declarations));
                } else {
                    css.push(rule.text.clone());
                }
            }
        }
    }

    let font_css = inline_fonts(client, cache, &font_list).await;
    css.join("\n") + &font_css
}

fn generate_css(options: &RenderOptions, selector: &str, properties: &str) -> String {
    if let Some(modify_css) = &options.modify_css {
        return modify_css(selector, properties);
    }
    let selector = match &options.selector_remap {
        Some(remap) => remap(selector),
        None => selector.to_string(),
    };
    let properties = match &options.modify_style {
        Some(modify) => modify(properties),
        None => properties.to_string(),
    };
    format!("{selector}{{{properties}}}\n")
}

async fn sheet_rules(
    client: &Client,
    cache: &AssetCache,
    sheet: &StyleSheet,
) -> Option<Arc<Vec<StyleRule>>> {
    match &sheet.source {
        SheetSource::Inline(rules) => Some(rules.clone()),
        SheetSource::Remote(url) => {
            cache
                .sheet_rules(url, async {
                    match fetch_sheet(client, url).await {
                        Ok(text) => Some(Arc::new(parse_stylesheet(&text))),
                        Err(e) => {
                            log::warn!("Stylesheet could not be loaded: {url} ({e})");
                            None
                        }
                    }
                })
                .await
        }
    }
}

async fn fetch_sheet(client: &Client, url: &str) -> reqwest::Result<String> {
    client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await
}

/// Tests rule selectors against the source element and its descendants.
///
/// The element's markup is parsed as a fragment rooted at the element
/// itself, so a selector matching the node (not only a descendant) is
/// visible. Detached nodes therefore match the same rules as attached ones.
struct SelectorMatcher {
    fragment: Html,
}

impl SelectorMatcher {
    fn for_element(el: &Element) -> Self {
        SelectorMatcher {
            fragment: Html::parse_fragment(&el.to_markup()),
        }
    }

    fn matches(&self, selector: &str) -> bool {
        let parsed = match Selector::parse(selector) {
            Ok(parsed) => parsed,
            Err(_) => {
                log::warn!("Invalid CSS selector \"{selector}\"");
                return false;
            }
        };
        self.fragment.select(&parsed).next().is_some()
    }
}
