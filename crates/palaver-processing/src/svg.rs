//! SVG structural validation and dimension probing.
//!
//! SVG is XML, so the unsafe constructs are structural: script elements,
//! event-handler attributes, external entity declarations, and references
//! that reach outside the document. There is no re-encode remediation for
//! SVG; a file failing these checks is rejected outright.

use regex::Regex;
use std::sync::OnceLock;

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("svg pattern compiles"))
}

/// Structural validation; Ok(()) means the document is acceptable.
pub fn validate(data: &[u8]) -> Result<(), &'static str> {
    let text = String::from_utf8_lossy(data);

    static SVG_TAG: OnceLock<Regex> = OnceLock::new();
    if !regex(&SVG_TAG, r"(?is)<svg[\s>]").is_match(&text) {
        return Err("not an svg document");
    }

    static SCRIPT: OnceLock<Regex> = OnceLock::new();
    if regex(&SCRIPT, r"(?is)<\s*script").is_match(&text) {
        return Err("script element");
    }

    static HANDLER: OnceLock<Regex> = OnceLock::new();
    if regex(&HANDLER, r#"(?is)\son[a-z]+\s*="#).is_match(&text) {
        return Err("event handler attribute");
    }

    static ENTITY: OnceLock<Regex> = OnceLock::new();
    if regex(&ENTITY, r"(?is)<!ENTITY").is_match(&text) {
        return Err("entity declaration");
    }

    static EXTERNAL: OnceLock<Regex> = OnceLock::new();
    if regex(
        &EXTERNAL,
        r#"(?is)(?:href|src)\s*=\s*["']\s*(?:https?:|ftp:|//|javascript:)"#,
    )
    .is_match(&text)
    {
        return Err("external reference");
    }

    Ok(())
}

/// Dimensions from the root element's width/height attributes, falling back
/// to the viewBox. SVGs carry no thumbnail asset, so this is the display
/// geometry source for them.
pub fn dimensions(data: &[u8]) -> Option<(u32, u32)> {
    let text = String::from_utf8_lossy(data);

    static ROOT: OnceLock<Regex> = OnceLock::new();
    let root = regex(&ROOT, r"(?is)<svg[^>]*>").find(&text)?.as_str();

    static WIDTH: OnceLock<Regex> = OnceLock::new();
    static HEIGHT: OnceLock<Regex> = OnceLock::new();
    let width = attr_px(regex(&WIDTH, r#"(?i)\swidth\s*=\s*["']\s*([0-9.]+)\s*(?:px)?\s*["']"#), root);
    let height = attr_px(
        regex(&HEIGHT, r#"(?i)\sheight\s*=\s*["']\s*([0-9.]+)\s*(?:px)?\s*["']"#),
        root,
    );
    if let (Some(w), Some(h)) = (width, height) {
        return Some((w, h));
    }

    static VIEWBOX: OnceLock<Regex> = OnceLock::new();
    let caps = regex(
        &VIEWBOX,
        r#"(?i)viewBox\s*=\s*["']\s*[0-9.-]+[\s,]+[0-9.-]+[\s,]+([0-9.]+)[\s,]+([0-9.]+)\s*["']"#,
    )
    .captures(root)?;
    let w = caps.get(1)?.as_str().parse::<f64>().ok()?;
    let h = caps.get(2)?.as_str().parse::<f64>().ok()?;
    Some((w.round() as u32, h.round() as u32))
}

fn attr_px(re: &Regex, root: &str) -> Option<u32> {
    let caps = re.captures(root)?;
    let v = caps.get(1)?.as_str().parse::<f64>().ok()?;
    Some(v.round() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_svg_validates() {
        let svg = br#"<svg xmlns="http://www.w3.org/2000/svg" width="10" height="20"><rect/></svg>"#;
        assert_eq!(validate(svg), Ok(()));
        assert_eq!(dimensions(svg), Some((10, 20)));
    }

    #[test]
    fn scripts_and_handlers_are_rejected() {
        assert!(validate(br#"<svg><script>alert(1)</script></svg>"#).is_err());
        assert!(validate(br#"<svg onload="alert(1)"><rect/></svg>"#).is_err());
    }

    #[test]
    fn external_entities_and_references_are_rejected() {
        let entity = br#"<!DOCTYPE svg [<!ENTITY x SYSTEM "file:///etc/passwd">]><svg>&x;</svg>"#;
        assert!(validate(entity).is_err());
        let external = br#"<svg><image href="https://evil.example/x.png"/></svg>"#;
        assert!(validate(external).is_err());
    }

    #[test]
    fn non_svg_is_rejected() {
        assert!(validate(b"<html><body/></html>").is_err());
    }

    #[test]
    fn viewbox_fallback_provides_dimensions() {
        let svg = br#"<svg viewBox="0 0 300 150"><rect/></svg>"#;
        assert_eq!(dimensions(svg), Some((300, 150)));
    }

    #[test]
    fn px_suffix_is_accepted() {
        let svg = br#"<svg width="64px" height="32px"></svg>"#;
        assert_eq!(dimensions(svg), Some((64, 32)));
    }
}
