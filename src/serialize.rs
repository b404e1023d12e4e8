//! Serializer: flattens the normalized tree into markup text and data URIs.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};
use crate::normalize::XLINK_NS;

/// Doctype preamble prepended to every standalone document.
pub(crate) const DOCTYPE: &str = "<?xml version=\"1.0\" standalone=\"no\"?><!DOCTYPE svg PUBLIC \"-//W3C//DTD SVG 1.1//EN\" \"http://www.w3.org/Graphics/SVG/1.1/DTD/svg11.dtd\" [<!ENTITY nbsp \"&#160;\">]>";

/// Browser serializers emit auto-generated `NS#:href` prefixes for xlink
/// attributes set through the namespace API.
static NS_HREF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)NS\d+:href").unwrap());

/// Rewrite `NS#:href` artifacts in markup captured from a browser into
/// canonical `xlink:href` with the namespace declared in place.
pub(crate) fn repair_namespace_artifacts(markup: &str) -> String {
    NS_HREF_RE
        .replace_all(markup, format!("xmlns:xlink=\"{XLINK_NS}\" xlink:href"))
        .into_owned()
}

/// A standalone `data:image/svg+xml;base64,` URI for the given markup,
/// doctype preamble included.
pub(crate) fn svg_data_uri(markup: &str) -> String {
    let document = format!("{DOCTYPE}{markup}");
    format!("data:image/svg+xml;base64,{}", BASE64.encode(document))
}

/// Decode a data URI into its MIME type and payload bytes.
pub(crate) fn decode_data_uri(uri: &str) -> Result<(String, Vec<u8>)> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| Error::InvalidInput(format!("not a data URI: {}", truncate(uri))))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| Error::InvalidInput(format!("malformed data URI: {}", truncate(uri))))?;

    let (mime, is_base64) = match meta.strip_suffix(";base64") {
        Some(mime) => (mime, true),
        None => (meta, false),
    };
    let bytes = if is_base64 {
        BASE64
            .decode(payload)
            .map_err(|e| Error::InvalidInput(format!("undecodable data URI payload: {e}")))?
    } else {
        payload.as_bytes().to_vec()
    };
    Ok((mime.to_string(), bytes))
}

fn truncate(uri: &str) -> &str {
    match uri.char_indices().nth(64) {
        Some((i, _)) => &uri[..i],
        None => uri,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ns_artifacts_become_xlink_href() {
        let markup = r#"<image NS1:href="a.png"/><image ns12:href="b.png"/>"#;
        let repaired = repair_namespace_artifacts(markup);
        assert_eq!(
            repaired,
            r#"<image xmlns:xlink="http://www.w3.org/1999/xlink" xlink:href="a.png"/><image xmlns:xlink="http://www.w3.org/1999/xlink" xlink:href="b.png"/>"#
        );
    }

    #[test]
    fn clean_markup_is_left_alone() {
        let markup = r#"<image xlink:href="a.png"/>"#;
        assert_eq!(repair_namespace_artifacts(markup), markup);
    }

    #[test]
    fn data_uri_roundtrip_starts_with_doctype() {
        let uri = svg_data_uri("<svg/>");
        assert!(uri.starts_with("data:image/svg+xml;base64,"));
        let (mime, bytes) = decode_data_uri(&uri).unwrap();
        assert_eq!(mime, "image/svg+xml");
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with(DOCTYPE));
        assert!(text.ends_with("<svg/>"));
    }

    #[test]
    fn non_ascii_markup_survives_the_uri() {
        let uri = svg_data_uri("<svg><text>héllo — ✓</text></svg>");
        let (_, bytes) = decode_data_uri(&uri).unwrap();
        assert!(String::from_utf8(bytes)
            .unwrap()
            .contains("<text>héllo — ✓</text>"));
    }

    #[test]
    fn rejects_non_data_uris() {
        assert!(matches!(
            decode_data_uri("http://host/x.png"),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            decode_data_uri("data:image/png;base64"),
            Err(Error::InvalidInput(_))
        ));
    }
}
