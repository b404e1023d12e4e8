//! Owned XML element tree used as the document model.
//!
//! The pipeline operates on a deep-cloneable tree of elements with ordered
//! attributes and mixed element/text/CDATA children. Trees are parsed from
//! markup text and serialized back through [`Element::to_markup`]; a clone of
//! the caller's element is the unit of mutation for one conversion.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

/// A child of an [`Element`]
#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(Element),
    Text(String),
    /// Raw character data, serialized inside `<![CDATA[ ... ]]>`
    CData(String),
}

/// A tree element with a tag name, ordered attributes, and children
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    tag: String,
    attrs: Vec<(String, String)>,
    children: Vec<XmlNode>,
}

/// Axis-aligned content bounds in local user units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Element {
            tag: tag.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Parse a single element (and its subtree) from markup text.
    ///
    /// Comments, processing instructions, and the XML declaration are
    /// skipped. Exactly one top-level element is required.
    pub fn parse(markup: &str) -> Result<Element> {
        use quick_xml::events::Event;

        let mut reader = quick_xml::reader::Reader::from_reader(markup.as_bytes());
        reader.config_mut().trim_text(false);

        let mut buf = Vec::with_capacity(64);
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    if root.is_some() && stack.is_empty() {
                        return Err(Error::InvalidInput(
                            "markup with multiple root elements".into(),
                        ));
                    }
                    stack.push(element_from_start(&reader, &e));
                }
                Ok(Event::Empty(e)) => {
                    if root.is_some() && stack.is_empty() {
                        return Err(Error::InvalidInput(
                            "markup with multiple root elements".into(),
                        ));
                    }
                    let el = element_from_start(&reader, &e);
                    attach(&mut stack, &mut root, el);
                }
                Ok(Event::End(_)) => {
                    let el = stack.pop().ok_or_else(|| {
                        Error::InvalidInput("markup with unbalanced closing tag".into())
                    })?;
                    attach(&mut stack, &mut root, el);
                }
                Ok(Event::Text(t)) => {
                    if let Some(parent) = stack.last_mut() {
                        let raw = reader.decoder().decode(&t).unwrap_or_default();
                        let text = quick_xml::escape::unescape(&raw)
                            .map(|c| c.into_owned())
                            .unwrap_or_else(|_| raw.into_owned());
                        if !text.is_empty() {
                            parent.children.push(XmlNode::Text(text));
                        }
                    }
                }
                Ok(Event::CData(t)) => {
                    if let Some(parent) = stack.last_mut() {
                        let text = reader.decoder().decode(&t).unwrap_or_default();
                        parent.children.push(XmlNode::CData(text.into_owned()));
                    }
                }
                Ok(Event::GeneralRef(r)) => {
                    if let Some(parent) = stack.last_mut() {
                        let raw = reader.decoder().decode(&r).unwrap_or_default();
                        // Entity references arrive as their own event in quick-xml;
                        // resolve them the same way the Text unescaper does so values
                        // like `&amp;` round-trip through serialization.
                        let text = if let Some(ch) = r.resolve_char_ref().ok().flatten() {
                            ch.to_string()
                        } else if let Some(s) =
                            quick_xml::escape::resolve_predefined_entity(&raw)
                        {
                            s.to_string()
                        } else {
                            format!("&{raw};")
                        };
                        if !text.is_empty() {
                            parent.children.push(XmlNode::Text(text));
                        }
                    }
                }
                Ok(Event::Comment(_))
                | Ok(Event::Decl(_))
                | Ok(Event::PI(_))
                | Ok(Event::DocType(_)) => {}
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(Error::InvalidInput(format!("markup is not well-formed: {e}")));
                }
            }
            buf.clear();
        }

        if !stack.is_empty() {
            return Err(Error::InvalidInput("markup with unclosed element".into()));
        }
        root.ok_or_else(|| Error::InvalidInput("markup without an element".into()))
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set an attribute, replacing an existing value in place so declaration
    /// order is preserved.
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((name, value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) {
        self.attrs.retain(|(k, _)| k != name);
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn children(&self) -> &[XmlNode] {
        &self.children
    }

    pub fn append_child(&mut self, child: XmlNode) {
        self.children.push(child);
    }

    pub fn prepend_child(&mut self, child: XmlNode) {
        self.children.insert(0, child);
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|c| match c {
            XmlNode::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn child_elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|c| match c {
            XmlNode::Element(e) => Some(e),
            _ => None,
        })
    }

    /// Pre-order visit of this element and every descendant element.
    pub fn walk(&self, visit: &mut impl FnMut(&Element)) {
        visit(self);
        for child in self.child_elements() {
            child.walk(visit);
        }
    }

    /// Pre-order mutable visit of this element and every descendant element.
    pub fn walk_mut(&mut self, visit: &mut impl FnMut(&mut Element)) {
        visit(self);
        for child in self.child_elements_mut() {
            child.walk_mut(visit);
        }
    }

    /// A property value from the inline `style` attribute, if declared.
    pub fn style_property(&self, name: &str) -> Option<String> {
        let style = self.attr("style")?;
        for decl in style.split(';') {
            let mut parts = decl.splitn(2, ':');
            let key = parts.next()?.trim();
            if key.eq_ignore_ascii_case(name) {
                return Some(parts.next().unwrap_or("").trim().to_string());
            }
        }
        None
    }

    /// Set a property on the inline `style` attribute, replacing any
    /// existing declaration of the same name.
    pub fn set_style_property(&mut self, name: &str, value: &str) {
        let mut decls: Vec<String> = self
            .attr("style")
            .map(|s| {
                s.split(';')
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .filter(|d| {
                        d.splitn(2, ':')
                            .next()
                            .map(|k| !k.trim().eq_ignore_ascii_case(name))
                            .unwrap_or(true)
                    })
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        decls.push(format!("{name}: {value}"));
        self.set_attr("style", decls.join("; "));
    }

    /// The `viewBox` attribute parsed as `[min-x, min-y, width, height]`.
    pub fn view_box(&self) -> Option<[f32; 4]> {
        let raw = self.attr("viewBox")?;
        let mut parts = raw
            .split(|c: char| c.is_ascii_whitespace() || c == ',')
            .filter(|p| !p.is_empty())
            .map(|p| p.parse::<f32>());
        let vb = [
            parts.next()?.ok()?,
            parts.next()?.ok()?,
            parts.next()?.ok()?,
            parts.next()?.ok()?,
        ];
        Some(vb)
    }

    /// A numeric attribute value, skipping percentages. A trailing `px` unit
    /// is accepted; any other unit is rejected.
    pub fn numeric_attr(&self, name: &str) -> Option<f32> {
        parse_length(self.attr(name)?)
    }

    /// Serialize this element and its subtree as markup text.
    pub fn to_markup(&self) -> String {
        let mut out = String::with_capacity(256);
        self.write_markup(&mut out);
        out
    }

    fn write_markup(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.tag);
        for (name, value) in &self.attrs {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            out.push_str(&quick_xml::escape::escape(value.as_str()));
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            match child {
                XmlNode::Element(e) => e.write_markup(out),
                XmlNode::Text(t) => out.push_str(&quick_xml::escape::escape(t.as_str())),
                XmlNode::CData(t) => {
                    out.push_str("<![CDATA[");
                    out.push_str(t);
                    out.push_str("]]>");
                }
            }
        }
        out.push_str("</");
        out.push_str(&self.tag);
        out.push('>');
    }

    /// Content bounds of this element in its local user space, covering the
    /// common graphical elements. Returns `None` for elements whose extent
    /// is unknowable without a layout engine (e.g. `<text>`).
    pub fn content_bbox(&self) -> Option<BBox> {
        content_bbox(self)
    }
}

impl std::fmt::Display for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_markup())
    }
}

fn element_from_start<R>(
    reader: &quick_xml::reader::Reader<R>,
    e: &quick_xml::events::BytesStart<'_>,
) -> Element {
    let tag = reader
        .decoder()
        .decode(e.name().as_ref())
        .unwrap_or_default()
        .into_owned();
    let mut el = Element::new(tag);
    for attr in e.attributes().flatten() {
        let name = reader
            .decoder()
            .decode(attr.key.as_ref())
            .unwrap_or_default()
            .into_owned();
        let raw = reader
            .decoder()
            .decode(attr.value.as_ref())
            .unwrap_or_default();
        let value = quick_xml::escape::unescape(&raw)
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| raw.into_owned());
        el.attrs.push((name, value));
    }
    el
}

fn attach(stack: &mut Vec<Element>, root: &mut Option<Element>, el: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(XmlNode::Element(el)),
        None => {
            if root.is_none() {
                *root = Some(el);
            }
        }
    }
}

/// Parse a CSS/SVG length, skipping percentage values.
pub(crate) fn parse_length(raw: &str) -> Option<f32> {
    let raw = raw.trim();
    if raw.ends_with('%') {
        return None;
    }
    let raw = raw.strip_suffix("px").unwrap_or(raw).trim();
    raw.parse::<f32>().ok()
}

static TRANSLATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"translate\(\s*(-?[0-9.]+)(?:[\s,]+(-?[0-9.]+))?\s*\)").unwrap()
});

/// The `(tx, ty)` of a `translate(...)` in a transform list, if present.
fn transform_translate(transform: &str) -> Option<(f32, f32)> {
    let caps = TRANSLATE_RE.captures(transform)?;
    let tx = caps.get(1)?.as_str().parse().ok()?;
    let ty = caps
        .get(2)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0.0);
    Some((tx, ty))
}

fn content_bbox(el: &Element) -> Option<BBox> {
    let num = |name: &str| el.numeric_attr(name).unwrap_or(0.0);
    match el.tag() {
        "rect" | "image" | "use" | "foreignObject" => {
            let (w, h) = (num("width"), num("height"));
            if w <= 0.0 && h <= 0.0 {
                return None;
            }
            Some(BBox {
                x: num("x"),
                y: num("y"),
                width: w,
                height: h,
            })
        }
        "circle" => {
            let r = num("r");
            Some(BBox {
                x: num("cx") - r,
                y: num("cy") - r,
                width: 2.0 * r,
                height: 2.0 * r,
            })
        }
        "ellipse" => {
            let (rx, ry) = (num("rx"), num("ry"));
            Some(BBox {
                x: num("cx") - rx,
                y: num("cy") - ry,
                width: 2.0 * rx,
                height: 2.0 * ry,
            })
        }
        "line" => {
            let (x1, x2) = (num("x1"), num("x2"));
            let (y1, y2) = (num("y1"), num("y2"));
            Some(from_extrema(x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2)))
        }
        "polyline" | "polygon" => points_bbox(el.attr("points")?),
        "path" => path_bbox(el.attr("d")?),
        "g" | "svg" | "a" => {
            let mut acc: Option<(f32, f32, f32, f32)> = None;
            for child in el.child_elements() {
                let Some(b) = content_bbox(child) else { continue };
                // A child's own translate offsets its box in this space.
                let (tx, ty) = child
                    .attr("transform")
                    .and_then(transform_translate)
                    .unwrap_or((0.0, 0.0));
                let (min_x, min_y) = (b.x + tx, b.y + ty);
                let (max_x, max_y) = (min_x + b.width, min_y + b.height);
                acc = Some(match acc {
                    None => (min_x, min_y, max_x, max_y),
                    Some((ax, ay, bx, by)) => {
                        (ax.min(min_x), ay.min(min_y), bx.max(max_x), by.max(max_y))
                    }
                });
            }
            acc.map(|(ax, ay, bx, by)| from_extrema(ax, ay, bx, by))
        }
        _ => None,
    }
}

fn from_extrema(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> BBox {
    BBox {
        x: min_x,
        y: min_y,
        width: max_x - min_x,
        height: max_y - min_y,
    }
}

fn points_bbox(points: &str) -> Option<BBox> {
    let coords: Vec<f32> = points
        .split(|c: char| c.is_ascii_whitespace() || c == ',')
        .filter(|p| !p.is_empty())
        .filter_map(|p| p.parse().ok())
        .collect();
    if coords.len() < 2 {
        return None;
    }
    let (mut min_x, mut min_y) = (f32::MAX, f32::MAX);
    let (mut max_x, mut max_y) = (f32::MIN, f32::MIN);
    for pair in coords.chunks_exact(2) {
        min_x = min_x.min(pair[0]);
        max_x = max_x.max(pair[0]);
        min_y = min_y.min(pair[1]);
        max_y = max_y.max(pair[1]);
    }
    Some(from_extrema(min_x, min_y, max_x, max_y))
}

static PATH_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-DF-Za-df-z]|-?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?").unwrap());

/// Conservative path bounds: every endpoint and control point is included,
/// which can overestimate curve extents but never underestimates them.
fn path_bbox(d: &str) -> Option<BBox> {
    let tokens: Vec<&str> = PATH_TOKEN_RE.find_iter(d).map(|m| m.as_str()).collect();
    let mut i = 0;
    let mut cmd = b'M';
    let (mut cx, mut cy) = (0.0f32, 0.0f32);
    let (mut sx, mut sy) = (0.0f32, 0.0f32);
    let mut points: Vec<(f32, f32)> = Vec::new();

    let number = |tokens: &[&str], i: &mut usize| -> Option<f32> {
        let n = tokens.get(*i)?.parse().ok()?;
        *i += 1;
        Some(n)
    };

    while i < tokens.len() {
        let tok = tokens[i];
        if tok.len() == 1 && tok.as_bytes()[0].is_ascii_alphabetic() {
            cmd = tok.as_bytes()[0];
            i += 1;
            if cmd.eq_ignore_ascii_case(&b'z') {
                cx = sx;
                cy = sy;
                continue;
            }
        }
        let relative = cmd.is_ascii_lowercase();
        let (ox, oy) = if relative { (cx, cy) } else { (0.0, 0.0) };
        match cmd.to_ascii_uppercase() {
            b'M' | b'L' | b'T' => {
                let x = ox + number(&tokens, &mut i)?;
                let y = oy + number(&tokens, &mut i)?;
                if cmd.eq_ignore_ascii_case(&b'm') {
                    sx = x;
                    sy = y;
                    // Subsequent implicit pairs are line-tos.
                    cmd = if relative { b'l' } else { b'L' };
                }
                cx = x;
                cy = y;
                points.push((x, y));
            }
            b'H' => {
                cx = ox + number(&tokens, &mut i)?;
                points.push((cx, cy));
            }
            b'V' => {
                cy = oy + number(&tokens, &mut i)?;
                points.push((cx, cy));
            }
            b'C' | b'S' | b'Q' => {
                let count = if cmd.eq_ignore_ascii_case(&b'c') { 3 } else { 2 };
                for _ in 0..count {
                    let x = ox + number(&tokens, &mut i)?;
                    let y = oy + number(&tokens, &mut i)?;
                    cx = x;
                    cy = y;
                    points.push((x, y));
                }
            }
            b'A' => {
                // rx ry rotation large-arc sweep x y; only the endpoint
                // contributes to the bounds estimate.
                for _ in 0..5 {
                    number(&tokens, &mut i)?;
                }
                cx = ox + number(&tokens, &mut i)?;
                cy = oy + number(&tokens, &mut i)?;
                points.push((cx, cy));
            }
            _ => return None,
        }
    }

    if points.is_empty() {
        return None;
    }
    let (mut min_x, mut min_y) = (f32::MAX, f32::MAX);
    let (mut max_x, mut max_y) = (f32::MIN, f32::MIN);
    for (x, y) in points {
        min_x = min_x.min(x);
        max_x = max_x.max(x);
        min_y = min_y.min(y);
        max_y = max_y.max(y);
    }
    Some(from_extrema(min_x, min_y, max_x, max_y))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrip_preserves_structure() {
        let markup = r#"<svg width="100" height="50"><rect x="1" y="2" width="10" height="20"/><text>hi &amp; bye</text></svg>"#;
        let el = Element::parse(markup).unwrap();
        assert_eq!(el.tag(), "svg");
        assert_eq!(el.attr("width"), Some("100"));
        assert_eq!(el.to_markup(), markup);
    }

    #[test]
    fn parse_keeps_cdata_verbatim() {
        let markup = "<style><![CDATA[.a > .b { fill: red; }]]></style>";
        let el = Element::parse(markup).unwrap();
        assert_eq!(el.to_markup(), markup);
    }

    #[test]
    fn parse_rejects_non_element_markup() {
        assert!(matches!(
            Element::parse("just text"),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            Element::parse("<a/><b/>"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn set_attr_preserves_order() {
        let mut el = Element::parse(r#"<svg a="1" b="2" c="3"/>"#).unwrap();
        el.set_attr("b", "9");
        assert_eq!(el.to_markup(), r#"<svg a="1" b="9" c="3"/>"#);
    }

    #[test]
    fn style_property_set_and_get() {
        let mut el = Element::new("svg");
        el.set_style_property("background-color", "red");
        assert_eq!(el.style_property("background-color").as_deref(), Some("red"));
        el.set_style_property("background-color", "blue");
        assert_eq!(el.style_property("background-color").as_deref(), Some("blue"));
        assert_eq!(el.attr("style"), Some("background-color: blue"));
    }

    #[test]
    fn numeric_attr_skips_percentages() {
        let el = Element::parse(r#"<svg width="100%" height="40px"/>"#).unwrap();
        assert_eq!(el.numeric_attr("width"), None);
        assert_eq!(el.numeric_attr("height"), Some(40.0));
    }

    #[test]
    fn view_box_parses_commas_and_spaces() {
        let el = Element::parse(r#"<svg viewBox="0,0 120 60"/>"#).unwrap();
        assert_eq!(el.view_box(), Some([0.0, 0.0, 120.0, 60.0]));
    }

    #[test]
    fn bbox_of_shapes() {
        let rect = Element::parse(r#"<rect x="5" y="10" width="20" height="30"/>"#).unwrap();
        let b = rect.content_bbox().unwrap();
        assert_eq!((b.x, b.y, b.width, b.height), (5.0, 10.0, 20.0, 30.0));

        let circle = Element::parse(r#"<circle cx="10" cy="10" r="4"/>"#).unwrap();
        let b = circle.content_bbox().unwrap();
        assert_eq!((b.x, b.y, b.width, b.height), (6.0, 6.0, 8.0, 8.0));

        let poly = Element::parse(r#"<polygon points="0,0 10,0 10,8"/>"#).unwrap();
        let b = poly.content_bbox().unwrap();
        assert_eq!((b.width, b.height), (10.0, 8.0));
    }

    #[test]
    fn bbox_of_group_applies_child_translate() {
        let g = Element::parse(
            r#"<g><rect width="10" height="10" transform="translate(5, 5)"/><circle cx="2" cy="2" r="2"/></g>"#,
        )
        .unwrap();
        let b = g.content_bbox().unwrap();
        assert_eq!((b.x, b.y), (0.0, 0.0));
        assert_eq!((b.width, b.height), (15.0, 15.0));
    }

    #[test]
    fn bbox_of_path_endpoints() {
        let path = Element::parse(r#"<path d="M10 10 L30 10 L30 25 Z"/>"#).unwrap();
        let b = path.content_bbox().unwrap();
        assert_eq!((b.x, b.y, b.width, b.height), (10.0, 10.0, 20.0, 15.0));
    }

    #[test]
    fn bbox_of_relative_path() {
        let path = Element::parse(r#"<path d="m10 10 l20 0 l0 15"/>"#).unwrap();
        let b = path.content_bbox().unwrap();
        assert_eq!((b.x, b.y, b.width, b.height), (10.0, 10.0, 20.0, 15.0));
    }

    #[test]
    fn text_has_no_bbox() {
        let text = Element::parse("<text>hello</text>").unwrap();
        assert!(text.content_bbox().is_none());
    }
}
