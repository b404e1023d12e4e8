//! Document Normalizer: turns the pipeline's clone into a standalone,
//! namespaced SVG document with concrete dimensions and viewBox.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::dom::{parse_length, Element, XmlNode};
use crate::error::{Error, Result};
use crate::RenderOptions;

pub(crate) const SVG_NS: &str = "http://www.w3.org/2000/svg";
pub(crate) const XLINK_NS: &str = "http://www.w3.org/1999/xlink";
const XHTML_NS: &str = "http://www.w3.org/1999/xhtml";

static TRANSLATE_STRIP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"translate\(.*?\)").unwrap());

/// A normalized standalone document and its resolved logical dimensions
#[derive(Debug)]
pub(crate) struct NormalizedDoc {
    pub root: Element,
    pub width: f32,
    pub height: f32,
}

/// Normalize `clone` into a standalone SVG document.
///
/// `source` is consulted read-only for dimension resolution and for the
/// wrappability check; every mutation lands on the clone.
pub(crate) fn normalize_document(
    source: &Element,
    clone: Element,
    options: &RenderOptions,
) -> Result<NormalizedDoc> {
    let mut clone = clone;
    clone.set_style_property("background-color", &options.background_color);

    let (width, height) = resolve_dimensions(source, &clone, options)?;
    let mut root = wrap_if_needed(source, clone)?;

    root.set_attr("version", "1.1");
    root.set_attr(
        "viewBox",
        format!(
            "{} {} {} {}",
            fmt_num(options.left),
            fmt_num(options.top),
            fmt_num(width),
            fmt_num(height)
        ),
    );
    if root.attr("xmlns").is_none() {
        root.set_attr("xmlns", SVG_NS);
    }
    if root.attr("xmlns:xlink").is_none() {
        root.set_attr("xmlns:xlink", XLINK_NS);
    }

    if options.responsive {
        root.remove_attr("width");
        root.remove_attr("height");
        root.set_attr("preserveAspectRatio", "xMinYMin meet");
    } else {
        root.set_attr("width", fmt_num(width * options.scale));
        root.set_attr("height", fmt_num(height * options.scale));
    }

    declare_foreign_namespaces(&mut root);

    Ok(NormalizedDoc {
        root,
        width,
        height,
    })
}

/// Insert the resolved inline CSS as `<defs><style>` before everything else.
pub(crate) fn insert_style_defs(root: &mut Element, css: &str) {
    let mut style = Element::new("style");
    style.set_attr("type", "text/css");
    style.append_child(XmlNode::CData(format!("\n{css}\n")));

    let mut defs = Element::new("defs");
    defs.append_child(XmlNode::Element(style));
    root.prepend_child(XmlNode::Element(defs));
}

/// Resolve the target logical dimensions. Caller-supplied values win; an
/// SVG root falls through viewBox, attributes, content bounds, and inline
/// style; a non-SVG node uses its content bounding box offset + extent.
fn resolve_dimensions(
    source: &Element,
    clone: &Element,
    options: &RenderOptions,
) -> Result<(f32, f32)> {
    if source.tag() == "svg" {
        let width = options
            .width
            .unwrap_or_else(|| dimension(source, clone, Dim::Width));
        let height = options
            .height
            .unwrap_or_else(|| dimension(source, clone, Dim::Height));
        return Ok((width, height));
    }
    match source.content_bbox() {
        Some(b) => Ok((b.x + b.width, b.y + b.height)),
        None => {
            log::error!("Attempted to render non-SVG element <{}>", source.tag());
            Err(Error::Structural(source.tag().to_string()))
        }
    }
}

#[derive(Clone, Copy)]
enum Dim {
    Width,
    Height,
}

impl Dim {
    fn name(self) -> &'static str {
        match self {
            Dim::Width => "width",
            Dim::Height => "height",
        }
    }
}

fn dimension(source: &Element, clone: &Element, dim: Dim) -> f32 {
    // Zero counts as unresolved at every stage, so each source falls
    // through to the next instead of pinning the dimension at 0.
    let usable = |v: f32| (v != 0.0 && v.is_finite()).then_some(v);
    let from_view_box = source.view_box().and_then(|vb| {
        usable(match dim {
            Dim::Width => vb[2],
            Dim::Height => vb[3],
        })
    });
    from_view_box
        .or_else(|| clone.numeric_attr(dim.name()).and_then(usable))
        .or_else(|| {
            source.content_bbox().and_then(|b| {
                usable(match dim {
                    Dim::Width => b.width,
                    Dim::Height => b.height,
                })
            })
        })
        .or_else(|| {
            clone
                .style_property(dim.name())
                .as_deref()
                .and_then(parse_length)
                .and_then(usable)
        })
        .unwrap_or(0.0)
}

/// Wrap a non-SVG graphical node in a fresh namespaced SVG root, stripping
/// any translate so the content re-anchors at the origin.
fn wrap_if_needed(source: &Element, mut clone: Element) -> Result<Element> {
    if source.tag() == "svg" {
        return Ok(clone);
    }
    if source.content_bbox().is_none() {
        log::error!("Attempted to render non-SVG element <{}>", source.tag());
        return Err(Error::Structural(source.tag().to_string()));
    }
    if let Some(transform) = clone.attr("transform") {
        let stripped = TRANSLATE_STRIP_RE.replace(transform, "").into_owned();
        clone.set_attr("transform", stripped);
    }
    let mut svg = Element::new("svg");
    svg.set_attr("xmlns", SVG_NS);
    svg.append_child(XmlNode::Element(clone));
    Ok(svg)
}

/// Foreign-markup islands inside `<foreignObject>` need their own namespace.
fn declare_foreign_namespaces(root: &mut Element) {
    root.walk_mut(&mut |el| {
        if el.tag() != "foreignObject" {
            return;
        }
        for child in el.child_elements_mut() {
            if child.attr("xmlns").is_none() {
                child.set_attr("xmlns", XHTML_NS);
            }
        }
    });
}

fn fmt_num(n: f32) -> String {
    if n.fract() == 0.0 && n.abs() < 1e9 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}
