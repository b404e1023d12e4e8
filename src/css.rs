//! Stylesheet rule model and the textual CSS scanner.
//!
//! This is textual inlining, not CSS evaluation: rules are split at the top
//! level, carried around as selector + declaration text, and re-emitted
//! verbatim or through the caller's formatter hooks. No cascade or
//! specificity computation happens anywhere.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

/// Matches the first `url(...)` reference inside a rule.
pub(crate) static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"url\(["']?(.+?)["']?\)"#).unwrap());

static COMMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());

/// Known font container formats, checked in order so `.woff2` wins over the
/// `.woff` substring it contains.
const FONT_FORMATS: &[(&str, &str)] = &[
    ("woff2", "font/woff2"),
    ("woff", "font/woff"),
    ("otf", "application/x-font-opentype"),
    ("ttf", "application/x-font-ttf"),
    ("eot", "application/vnd.ms-fontobject"),
    ("sfnt", "application/font-sfnt"),
    ("svg", "image/svg+xml"),
];

/// A single top-level stylesheet rule
#[derive(Debug, Clone, PartialEq)]
pub struct StyleRule {
    /// Rule prelude: a selector list, or the at-keyword line for at-rules
    pub selector: String,
    /// Declaration-block text (inner nested blocks kept verbatim)
    pub declarations: String,
    /// The original rule text, used for verbatim pass-through
    pub text: String,
}

impl StyleRule {
    pub fn is_font_face(&self) -> bool {
        self.selector.starts_with("@font-face")
    }

    /// At-rules never match an element selector test.
    pub fn is_at_rule(&self) -> bool {
        self.selector.starts_with('@')
    }
}

/// A font binary referenced by a `@font-face` rule
#[derive(Debug, Clone, PartialEq)]
pub struct FontAsset {
    /// Resolved fetch URL
    pub url: String,
    /// MIME type derived from the URL extension
    pub format: String,
    /// The font-face rule text whose `url(...)` gets substituted
    pub rule_text: String,
}

/// A stylesheet registered on the exporter: inline CSS text (parsed at
/// registration) or a linked URL (fetched once, through the rules cache)
#[derive(Debug, Clone)]
pub struct StyleSheet {
    pub(crate) source: SheetSource,
    /// When false, `@font-face` rules in this sheet are excluded from font
    /// auto-detection and passed through verbatim instead.
    pub(crate) detect_fonts: bool,
}

#[derive(Debug, Clone)]
pub(crate) enum SheetSource {
    Inline(Arc<Vec<StyleRule>>),
    Remote(String),
}

impl StyleSheet {
    pub fn inline(css: &str) -> Self {
        StyleSheet {
            source: SheetSource::Inline(Arc::new(parse_stylesheet(css))),
            detect_fonts: true,
        }
    }

    pub fn remote(url: impl Into<String>) -> Self {
        StyleSheet {
            source: SheetSource::Remote(url.into()),
            detect_fonts: true,
        }
    }

    pub fn without_font_detection(mut self) -> Self {
        self.detect_fonts = false;
        self
    }

    /// The sheet URL, for linked sheets. Relative font references resolve
    /// against it.
    pub(crate) fn href(&self) -> Option<&str> {
        match &self.source {
            SheetSource::Remote(url) => Some(url),
            SheetSource::Inline(_) => None,
        }
    }
}

/// Split stylesheet text into top-level rules.
///
/// Comments are stripped first. A rule is either `prelude { block }` (with
/// nested braces balanced into the block, so `@media` bodies stay whole) or
/// a statement at-rule terminated by `;`.
pub fn parse_stylesheet(css: &str) -> Vec<StyleRule> {
    let css = COMMENT_RE.replace_all(css, "");
    let bytes = css.as_bytes();
    let mut rules = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b';') {
            i += 1;
        }
        let start = i;
        while i < bytes.len() && bytes[i] != b'{' && bytes[i] != b';' {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] == b';' {
            // Statement at-rule such as @import or @charset.
            let text = css[start..bytes.len().min(i + 1)].trim();
            if !text.is_empty() {
                rules.push(StyleRule {
                    selector: text.trim_end_matches(';').trim().to_string(),
                    declarations: String::new(),
                    text: text.to_string(),
                });
            }
            i += 1;
            continue;
        }

        let selector = css[start..i].trim().to_string();
        let block_start = i + 1;
        let mut depth = 1usize;
        i += 1;
        while i < bytes.len() && depth > 0 {
            match bytes[i] {
                b'{' => depth += 1,
                b'}' => depth -= 1,
                _ => {}
            }
            i += 1;
        }
        let block_end = if depth == 0 { i - 1 } else { bytes.len() };
        if selector.is_empty() {
            continue;
        }
        let declarations = css[block_start..block_end].trim().to_string();
        rules.push(StyleRule {
            text: format!("{selector}{{{declarations}}}"),
            selector,
            declarations,
        });
    }

    rules
}

/// Map a font URL to a MIME type by extension, in format-priority order.
pub fn font_mime_for_url(font_url: &str) -> &'static str {
    for (ext, mime) in FONT_FORMATS {
        if font_url.contains(&format!(".{ext}")) {
            return mime;
        }
    }
    log::error!("Unknown font format for {font_url}. Fonts may not be working correctly.");
    "application/octet-stream"
}

/// Extract the font reference of a `@font-face` rule, resolving relative
/// URLs against the enclosing stylesheet's URL when one is known.
pub fn detect_css_font(rule: &StyleRule, sheet_href: Option<&str>) -> Option<FontAsset> {
    let url = URL_RE
        .captures(&rule.text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();
    if url.is_empty() || url.starts_with("data:") || url == "about:blank" {
        return None;
    }

    let full_url = match sheet_href {
        Some(href) if !url.contains("://") => url::Url::parse(href)
            .and_then(|base| base.join(&url))
            .map(|u| u.to_string())
            .unwrap_or(url),
        _ => url,
    };

    Some(FontAsset {
        format: font_mime_for_url(&full_url).to_string(),
        rule_text: rule.text.clone(),
        url: full_url,
    })
}
