// Cheap, non-validating scan. The input has already been through the sanitizer, so tags are
// balanced and attribute values are quoted.

const OPEN_TAG: &str = "<foreignObject";
const CLOSE_TAG: &str = "</foreignObject>";
const FONT_SIZE: f64 = 16.0;

/// Replaces every `<foreignObject>` label with an equivalent `<text>` element.
///
/// The rasterizer cannot lay out HTML, so without this HTML labels would export as blank boxes.
/// The replacement is emitted in place, inheriting the label's ancestor transforms; text is
/// centered on the foreignObject box (or anchored per its `text-anchor`) with `<br>` splitting
/// lines.
pub(crate) fn foreign_object_text_fallback(svg: &str, font_family: &str) -> String {
    if !svg.contains(OPEN_TAG) {
        return svg.to_string();
    }

    let mut out = String::with_capacity(svg.len());
    let mut rest = svg;
    while let Some(start) = rest.find(OPEN_TAG) {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];

        let Some(tag_end) = tail.find('>') else {
            out.push_str(tail);
            return out;
        };
        let tag = &tail[..=tag_end];
        let (inner, consumed) = if tag.trim_end_matches('>').trim_end().ends_with('/') {
            ("", tag_end + 1)
        } else {
            match tail[tag_end + 1..].find(CLOSE_TAG) {
                Some(close) => (
                    &tail[tag_end + 1..tag_end + 1 + close],
                    tag_end + 1 + close + CLOSE_TAG.len(),
                ),
                None => {
                    out.push_str(tail);
                    return out;
                }
            }
        };

        out.push_str(&text_element(tag, inner, font_family));
        rest = &tail[consumed..];
    }
    out.push_str(rest);
    out
}

fn text_element(tag: &str, inner: &str, font_family: &str) -> String {
    let width = attr_f64(tag, "width").unwrap_or(0.0);
    let height = attr_f64(tag, "height").unwrap_or(0.0);
    let lines = html_to_lines(inner);
    if width <= 0.0 || height <= 0.0 || lines.is_empty() {
        return String::new();
    }

    let x = attr_f64(tag, "x").unwrap_or(0.0);
    let y = attr_f64(tag, "y").unwrap_or(0.0);
    let (anchor, text_x) = match attr(tag, "text-anchor") {
        Some("start") => ("start", x),
        Some("end") => ("end", x + width),
        _ => ("middle", x + width / 2.0),
    };
    let text_y = y + height / 2.0;
    let first_dy = -FONT_SIZE * (lines.len() as f64 - 1.0) / 2.0;

    let mut text = format!(
        r##"<text x="{}" y="{}" text-anchor="{anchor}" dominant-baseline="central" font-family="{}" font-size="{FONT_SIZE}" fill="#000">"##,
        fmt_num(text_x),
        fmt_num(text_y),
        escape_xml(font_family),
    );
    for (idx, line) in lines.iter().enumerate() {
        let dy = if idx == 0 { first_dy } else { FONT_SIZE };
        text.push_str(&format!(
            r#"<tspan x="{}" dy="{}">{}</tspan>"#,
            fmt_num(text_x),
            fmt_num(dy),
            escape_xml(line)
        ));
    }
    text.push_str("</text>");
    text
}

/// Value of `key="…"` in a start tag, matching the name only on an attribute boundary.
fn attr<'a>(tag: &'a str, key: &str) -> Option<&'a str> {
    let mut from = 0;
    while let Some(rel) = tag[from..].find(key) {
        let at = from + rel;
        from = at + key.len();
        let on_boundary = tag[..at].ends_with(|c: char| c.is_ascii_whitespace());
        if !on_boundary {
            continue;
        }
        let Some(value) = tag[from..].trim_start().strip_prefix('=') else {
            continue;
        };
        let value = value.trim_start();
        let quote = value.chars().next().filter(|c| *c == '"' || *c == '\'')?;
        let body = &value[1..];
        let end = body.find(quote)?;
        return Some(body[..end].trim());
    }
    None
}

fn attr_f64(tag: &str, key: &str) -> Option<f64> {
    let raw = attr(tag, key)?;
    let raw = raw.strip_suffix("px").unwrap_or(raw);
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn html_to_lines(html: &str) -> Vec<String> {
    let mut text = String::with_capacity(html.len());
    let mut rest = html;
    while let Some(lt) = rest.find('<') {
        text.push_str(&rest[..lt]);
        let Some(gt) = rest[lt..].find('>') else {
            rest = "";
            break;
        };
        let tag = rest[lt + 1..lt + gt].trim().to_ascii_lowercase();
        if tag == "br" || tag.starts_with("br ") || tag.starts_with("br/") || tag == "/br" {
            text.push('\n');
        }
        rest = &rest[lt + gt + 1..];
    }
    text.push_str(rest);

    decode_entities(&text)
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect()
}

/// Decodes the handful of entities labels actually carry; anything else stays literal and is
/// re-escaped on output.
fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let decoded = after.find(';').filter(|end| *end <= 10).and_then(|end| {
            let name = &after[..end];
            let ch = match name {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" | "#39" => Some('\''),
                "nbsp" => Some(' '),
                _ => {
                    let code = if let Some(hex) = name.strip_prefix("#x").or(name.strip_prefix("#X")) {
                        u32::from_str_radix(hex, 16).ok()
                    } else {
                        name.strip_prefix('#').and_then(|dec| dec.parse::<u32>().ok())
                    };
                    code.and_then(char::from_u32)
                }
            };
            ch.map(|c| (c, end))
        });
        match decoded {
            Some((ch, end)) => {
                out.push(ch);
                rest = &after[end + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

fn fmt_num(v: f64) -> String {
    let rounded = (v * 1000.0).round() / 1000.0;
    if rounded == 0.0 {
        "0".to_string()
    } else {
        rounded.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_is_replaced_by_centered_text() {
        let svg = r#"<svg viewBox="0 0 200 100"><g transform="translate(50, 20)"><foreignObject width="40" height="24"><div xmlns="http://www.w3.org/1999/xhtml"><span class="nodeLabel"><p>Todo</p></span></div></foreignObject></g></svg>"#;
        let out = foreign_object_text_fallback(svg, "Arial");
        assert!(!out.contains("foreignObject"));
        assert!(out.contains(r#"<g transform="translate(50, 20)"><text x="20" y="12""#));
        assert!(out.contains(r#"<tspan x="20" dy="0">Todo</tspan>"#));
        assert!(roxmltree::Document::parse(&out).is_ok());
    }

    #[test]
    fn breaks_split_lines_and_entities_survive() {
        let svg = r#"<svg><foreignObject x="10" y="0" width="100" height="40"><div>A &amp; B<br/>C&nbsp;&lt;D&gt;</div></foreignObject></svg>"#;
        let out = foreign_object_text_fallback(svg, "Arial");
        assert!(out.contains(r#"<tspan x="60" dy="-8">A &amp; B</tspan>"#));
        assert!(out.contains(r#"<tspan x="60" dy="16">C &lt;D&gt;</tspan>"#));
    }

    #[test]
    fn attribute_names_match_on_boundaries_only() {
        let tag = r#"<foreignObject data-width="99" width="12" stroke-width="3">"#;
        assert_eq!(attr(tag, "width"), Some("12"));
        assert_eq!(attr(tag, "height"), None);
    }

    #[test]
    fn empty_or_degenerate_labels_are_dropped() {
        let svg = r#"<svg><foreignObject width="0" height="0"><div>x</div></foreignObject><foreignObject width="10" height="10"/><rect/></svg>"#;
        assert_eq!(foreign_object_text_fallback(svg, "Arial"), "<svg><rect/></svg>");
    }

    #[test]
    fn markup_without_labels_is_untouched() {
        let svg = r#"<svg><text>plain</text></svg>"#;
        assert_eq!(foreign_object_text_fallback(svg, "Arial"), svg);
    }
}
