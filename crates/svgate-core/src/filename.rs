/// Derives a download filename from a display title.
///
/// Runs of characters outside `[A-Za-z0-9]` collapse into a single `_`, leading and trailing
/// separators are dropped, the rest is lower-cased and `.png` is appended. A title with no
/// usable characters becomes `diagram.png`.
pub fn export_filename(title: &str) -> String {
    let mut stem = String::with_capacity(title.len());
    let mut pending_sep = false;
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !stem.is_empty() {
                stem.push('_');
            }
            pending_sep = false;
            stem.push(ch.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }

    if stem.is_empty() {
        stem.push_str("diagram");
    }
    stem.push_str(".png");
    stem
}

#[cfg(test)]
mod tests {
    use super::export_filename;

    #[test]
    fn collapses_and_lowercases() {
        assert_eq!(export_filename("Order Flow #1!"), "order_flow_1.png");
        assert_eq!(export_filename("  API -- Gateway  "), "api_gateway.png");
        assert_eq!(export_filename("already_snake"), "already_snake.png");
    }

    #[test]
    fn non_ascii_is_a_separator() {
        assert_eq!(export_filename("Café Über"), "caf_ber.png");
    }

    #[test]
    fn empty_title_gets_a_stem() {
        assert_eq!(export_filename(""), "diagram.png");
        assert_eq!(export_filename("#!?"), "diagram.png");
        assert_eq!(export_filename("../../etc/passwd"), "etc_passwd.png");
    }
}
