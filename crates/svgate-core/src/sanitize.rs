//! Allow-list sanitizer for SVG produced by an external diagram engine.
//!
//! The engine output is treated as untrusted even when the engine itself runs in a "strict"
//! mode. Elements, attributes and URI schemes are checked against explicit allow-lists:
//!
//! - SVG shapes, text, gradients, markers, filters and `<style>`
//! - the HTML tags Mermaid-style engines put inside `<foreignObject>` for wrapped labels
//! - link (`href`, `xlink:href`, `target`) and namespace (`xmlns*`) attributes
//!
//! Anything else is dropped without an error. Markup that cannot be tokenized at all sanitizes
//! to the empty string.

use crate::dimensions::{Dimensions, resolve_dimensions};
use lol_html::html_content::ContentType;
use lol_html::{RewriteStrSettings, element, rewrite_str, text};
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::OnceLock;

const XHTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

const SVG_TAGS: &[&str] = &[
    "svg",
    "a",
    "circle",
    "clippath",
    "defs",
    "desc",
    "ellipse",
    "foreignobject",
    "g",
    "image",
    "line",
    "lineargradient",
    "marker",
    "mask",
    "metadata",
    "path",
    "pattern",
    "polygon",
    "polyline",
    "radialgradient",
    "rect",
    "stop",
    "style",
    "switch",
    "symbol",
    "text",
    "textpath",
    "title",
    "tspan",
    "use",
    "view",
];

const SVG_FILTER_TAGS: &[&str] = &[
    "filter",
    "feblend",
    "fecolormatrix",
    "fecomponenttransfer",
    "fecomposite",
    "feconvolvematrix",
    "fediffuselighting",
    "fedisplacementmap",
    "fedistantlight",
    "fedropshadow",
    "feflood",
    "fefunca",
    "fefuncb",
    "fefuncg",
    "fefuncr",
    "fegaussianblur",
    "femerge",
    "femergenode",
    "femorphology",
    "feoffset",
    "fepointlight",
    "fespecularlighting",
    "fespotlight",
    "fetile",
    "feturbulence",
];

/// HTML used by wrapped labels inside `<foreignObject>`.
const LABEL_HTML_TAGS: &[&str] = &[
    "div", "span", "p", "br", "b", "i", "em", "strong", "u", "s", "small", "sub", "sup", "code",
    "pre", "ul", "ol", "li", "hr",
];

/// Removed together with everything inside them. Includes every tag whose content the HTML
/// tokenizer reads as raw text: unwrapping one would turn that text into live markup.
const DROP_WITH_CONTENT_TAGS: &[&str] = &[
    "script",
    "iframe",
    "xmp",
    "noframes",
    "plaintext",
    "frame",
    "frameset",
    "object",
    "embed",
    "applet",
    "noscript",
    "noembed",
    "template",
    "form",
    "input",
    "textarea",
    "select",
    "button",
    "audio",
    "video",
    "set",
    "animate",
    "animatemotion",
    "animatetransform",
    "animatecolor",
    "handler",
    "listener",
    "feimage",
];

const ALLOWED_ATTRS: &[&str] = &[
    // core
    "id",
    "class",
    "style",
    "lang",
    "role",
    "title",
    // namespaces
    "xmlns",
    "xmlns:xlink",
    "xml:space",
    "xml:lang",
    // links
    "href",
    "xlink:href",
    "xlink:title",
    "target",
    "rel",
    // geometry
    "version",
    "viewbox",
    "preserveaspectratio",
    "width",
    "height",
    "x",
    "y",
    "x1",
    "y1",
    "x2",
    "y2",
    "cx",
    "cy",
    "r",
    "rx",
    "ry",
    "fx",
    "fy",
    "fr",
    "d",
    "points",
    "pathlength",
    "transform",
    // paint
    "color",
    "fill",
    "fill-opacity",
    "fill-rule",
    "stroke",
    "stroke-width",
    "stroke-dasharray",
    "stroke-dashoffset",
    "stroke-linecap",
    "stroke-linejoin",
    "stroke-miterlimit",
    "stroke-opacity",
    "opacity",
    "display",
    "visibility",
    "overflow",
    "clip-path",
    "clip-rule",
    "clippathunits",
    "mask",
    "maskunits",
    "maskcontentunits",
    "vector-effect",
    "shape-rendering",
    "text-rendering",
    "image-rendering",
    "color-interpolation-filters",
    // text
    "font-family",
    "font-size",
    "font-weight",
    "font-style",
    "font-variant",
    "text-anchor",
    "text-decoration",
    "dominant-baseline",
    "alignment-baseline",
    "baseline-shift",
    "letter-spacing",
    "word-spacing",
    "writing-mode",
    "dx",
    "dy",
    "rotate",
    "textlength",
    "lengthadjust",
    "startoffset",
    "align",
    // markers, gradients, patterns
    "marker-start",
    "marker-mid",
    "marker-end",
    "markerwidth",
    "markerheight",
    "markerunits",
    "refx",
    "refy",
    "orient",
    "offset",
    "stop-color",
    "stop-opacity",
    "gradientunits",
    "gradienttransform",
    "spreadmethod",
    "patternunits",
    "patterncontentunits",
    "patterntransform",
    // filters
    "filter",
    "filterunits",
    "primitiveunits",
    "in",
    "in2",
    "result",
    "stddeviation",
    "mode",
    "operator",
    "k1",
    "k2",
    "k3",
    "k4",
    "values",
    "type",
    "tablevalues",
    "slope",
    "intercept",
    "amplitude",
    "exponent",
    "flood-color",
    "flood-opacity",
    "lighting-color",
    "scale",
    "xchannelselector",
    "ychannelselector",
    "radius",
    "basefrequency",
    "numoctaves",
    "seed",
    "stitchtiles",
    "surfacescale",
    "specularconstant",
    "specularexponent",
    "diffuseconstant",
    "kernelmatrix",
    "order",
    "divisor",
    "bias",
    "edgemode",
    "azimuth",
    "elevation",
    "pointsatx",
    "pointsaty",
    "pointsatz",
    "limitingconeangle",
];

fn allowed_tags() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| {
        SVG_TAGS
            .iter()
            .chain(SVG_FILTER_TAGS)
            .chain(LABEL_HTML_TAGS)
            .copied()
            .collect()
    })
}

fn drop_with_content_tags() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| DROP_WITH_CONTENT_TAGS.iter().copied().collect())
}

fn allowed_attrs() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| ALLOWED_ATTRS.iter().copied().collect())
}

fn data_attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^data-[\-\w.\u{00B7}-\u{FFFF}]+$").expect("valid regex"))
}

fn aria_attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^aria-[\-\w]+$").expect("valid regex"))
}

fn attr_whitespace_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[\u{0000}-\u{0020}\u{00A0}\u{1680}\u{180E}\u{2000}-\u{2029}\u{205F}\u{3000}]")
            .expect("valid regex")
    })
}

fn allowed_uri_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:(?:https?|mailto|tel):|[^a-z]|[a-z+.\-]+(?:[^a-z+.\-:]|$))")
            .expect("valid regex")
    })
}

fn char_reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)&(?:#x([0-9a-f]+)|#([0-9]+)|(colon|tab|newline|amp|lpar|rpar|sol|period));?")
            .expect("valid regex")
    })
}

fn css_import_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)@import[^;]*;?").expect("valid regex"))
}

fn css_expression_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)expression\s*\(").expect("valid regex"))
}

fn css_binding_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(?:-moz-binding|behavior)\s*:").expect("valid regex"))
}

fn css_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^)]*?))\s*\)"#).expect("valid regex")
    })
}

fn css_escape_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\\(?:([0-9a-fA-F]{1,6})\s?|(.))").expect("valid regex"))
}

/// Decodes the character references a browser would resolve before looking at a URI scheme.
fn decode_char_references(input: &str) -> Cow<'_, str> {
    if !input.contains('&') {
        return Cow::Borrowed(input);
    }
    char_reference_regex().replace_all(input, |caps: &Captures<'_>| {
        let code = if let Some(hex) = caps.get(1) {
            u32::from_str_radix(hex.as_str(), 16).ok()
        } else if let Some(dec) = caps.get(2) {
            dec.as_str().parse::<u32>().ok()
        } else {
            None
        };
        if let Some(code) = code {
            return char::from_u32(code)
                .map(String::from)
                .unwrap_or_else(|| "\u{FFFD}".to_string());
        }
        let named = caps.get(3).map(|m| m.as_str().to_ascii_lowercase());
        match named.as_deref() {
            Some("colon") => ":",
            Some("tab") => "\t",
            Some("newline") => "\n",
            Some("amp") => "&",
            Some("lpar") => "(",
            Some("rpar") => ")",
            Some("sol") => "/",
            Some("period") => ".",
            _ => "",
        }
        .to_string()
    })
}

fn is_allowed_uri(lc_tag: &str, value: &str) -> bool {
    let decoded = decode_char_references(value);
    let compact = attr_whitespace_regex().replace_all(&decoded, "");
    if compact.is_empty() || compact.starts_with('#') {
        return true;
    }
    match lc_tag {
        "a" => allowed_uri_regex().is_match(&compact),
        "image" => compact.to_ascii_lowercase().starts_with("data:image/"),
        // Everything else (`use`, gradients, patterns, `textPath`, filters) may only point into
        // the same document; an external reference makes the viewer fetch it.
        _ => false,
    }
}

fn unescape_css(css: &str) -> Cow<'_, str> {
    if !css.contains('\\') {
        return Cow::Borrowed(css);
    }
    css_escape_regex().replace_all(css, |caps: &Captures<'_>| {
        if let Some(hex) = caps.get(1) {
            u32::from_str_radix(hex.as_str(), 16)
                .ok()
                .and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_else(|| "\u{FFFD}".to_string())
        } else {
            caps.get(2)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default()
        }
    })
}

/// Neutralizes CSS constructs that load or execute something: `@import`, non-fragment `url()`,
/// `expression()` and binding properties. Returns the input unchanged when nothing matched.
pub fn sanitize_css(css: &str) -> Cow<'_, str> {
    let plain = unescape_css(css);

    let mut out = css_import_regex().replace_all(&plain, "").into_owned();
    out = css_url_regex()
        .replace_all(&out, |caps: &Captures<'_>| {
            let target = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map(|m| m.as_str().trim())
                .unwrap_or_default();
            if target.starts_with('#') {
                caps[0].to_string()
            } else {
                "none".to_string()
            }
        })
        .into_owned();
    out = css_expression_regex()
        .replace_all(&out, "invalid(")
        .into_owned();
    out = css_binding_regex()
        .replace_all(&out, "x-blocked:")
        .into_owned();

    if out == plain.as_ref() {
        return Cow::Borrowed(css);
    }
    // Deleting text may have stitched together a closing tag; `<` has no place in CSS outside
    // strings, where the escape keeps its meaning.
    Cow::Owned(out.replace('<', "\\3c "))
}

#[derive(Debug, PartialEq, Eq)]
enum AttrVerdict {
    Keep,
    Drop,
    Rewrite(String),
}

fn attribute_verdict(lc_tag: &str, lc_name: &str, value: &str) -> AttrVerdict {
    if data_attr_regex().is_match(lc_name) || aria_attr_regex().is_match(lc_name) {
        return AttrVerdict::Keep;
    }
    if !allowed_attrs().contains(lc_name) {
        return AttrVerdict::Drop;
    }

    match lc_name {
        "xmlns" => {
            if value == crate::markup::SVG_NAMESPACE || value == XHTML_NAMESPACE {
                AttrVerdict::Keep
            } else {
                AttrVerdict::Drop
            }
        }
        "xmlns:xlink" => {
            if value == crate::markup::XLINK_NAMESPACE {
                AttrVerdict::Keep
            } else {
                AttrVerdict::Drop
            }
        }
        "href" | "xlink:href" => {
            if is_allowed_uri(lc_tag, value) {
                AttrVerdict::Keep
            } else {
                AttrVerdict::Drop
            }
        }
        _ => {
            let needs_css_check = lc_name == "style"
                || value.contains('\\')
                || value.to_ascii_lowercase().contains("url(");
            if !needs_css_check {
                return AttrVerdict::Keep;
            }
            match sanitize_css(value) {
                Cow::Borrowed(_) => AttrVerdict::Keep,
                Cow::Owned(clean) => AttrVerdict::Rewrite(clean),
            }
        }
    }
}

/// Returns `raw` with everything outside the allow-lists removed.
///
/// Bytes that need no change are passed through untouched, so sanitizing the same input twice
/// yields identical output.
pub fn sanitize_svg(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }

    let mut style_buf = String::new();

    let handlers = vec![
        element!("*", |el| {
            let lc_tag = el.tag_name().to_ascii_lowercase();

            if drop_with_content_tags().contains(lc_tag.as_str()) {
                el.remove();
                return Ok(());
            }
            if !allowed_tags().contains(lc_tag.as_str()) {
                el.remove_and_keep_content();
                return Ok(());
            }

            let attrs: Vec<(String, String)> = el
                .attributes()
                .iter()
                .map(|a| (a.name(), a.value()))
                .collect();

            for (name, value) in attrs {
                let lc_name = name.to_ascii_lowercase();
                match attribute_verdict(&lc_tag, &lc_name, &value) {
                    AttrVerdict::Keep => {}
                    AttrVerdict::Drop => el.remove_attribute(&name),
                    AttrVerdict::Rewrite(clean) => el.set_attribute(&name, &clean)?,
                }
            }

            if lc_tag == "a" && el.get_attribute("target").as_deref() == Some("_blank") {
                el.set_attribute("rel", "noopener")?;
            }
            Ok(())
        }),
        text!("style", |chunk| {
            // Chunks of one text node are buffered so rules split across chunks are seen whole.
            style_buf.push_str(chunk.as_str());
            if !chunk.last_in_text_node() {
                chunk.remove();
                return Ok(());
            }
            let css = std::mem::take(&mut style_buf);
            let clean = sanitize_css(&css).into_owned();
            chunk.replace(&clean, ContentType::Html);
            Ok(())
        }),
    ];

    match rewrite_str(
        raw,
        RewriteStrSettings {
            element_content_handlers: handlers,
            ..RewriteStrSettings::new()
        },
    ) {
        Ok(clean) => clean,
        Err(err) => {
            tracing::warn!(error = %err, "discarding markup that could not be sanitized");
            String::new()
        }
    }
}

/// A sanitized SVG element, ready to be placed in a live view or exported.
///
/// The only constructor runs [`sanitize_svg`], so holding an `SvgElement` means the markup went
/// through the allow-list. Cloning is how export takes a private duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SvgElement {
    markup: String,
}

impl SvgElement {
    pub fn sanitize(raw: &str) -> Self {
        Self {
            markup: sanitize_svg(raw),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.markup
    }

    pub fn into_string(self) -> String {
        self.markup
    }

    pub fn is_empty(&self) -> bool {
        self.markup.trim().is_empty()
    }

    pub fn dimensions(&self) -> Dimensions {
        resolve_dimensions(&self.markup)
    }
}

impl AsRef<str> for SvgElement {
    fn as_ref(&self) -> &str {
        &self.markup
    }
}

impl std::fmt::Display for SvgElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.markup)
    }
}
