//! Embedded-payload safety scan.
//!
//! Browsers can be tricked into executing content smuggled inside an image
//! body (script tags in trailing bytes, PHP fragments in comment segments).
//! The scan flags files whose raw bytes contain executable-looking markers;
//! the remediation path is a full re-encode which keeps only pixel data
//! (see [`crate::image::reencode`]).

use regex::bytes::RegexSet;
use std::sync::OnceLock;

fn patterns() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new([
            r"(?i)<\s*script",
            r"(?i)<\?\s*php",
            r"(?i)javascript\s*:",
            r"(?i)vbscript\s*:",
            r"(?i)<\s*iframe",
            r"(?i)<body\s+onload",
            r"(?i)\beval\s*\(",
        ])
        .expect("payload patterns compile")
    })
}

/// True when the raw bytes look clean. A false result means the file must be
/// re-encoded or rejected.
pub fn image_payload_is_safe(data: &[u8]) -> bool {
    !patterns().is_match(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_pixel_data_passes() {
        // PNG signature plus arbitrary binary noise.
        let mut data = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
        data.extend_from_slice(&[0x00, 0x42, 0xff, 0x13, 0x37]);
        assert!(image_payload_is_safe(&data));
    }

    #[test]
    fn smuggled_script_is_flagged() {
        let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
        data.extend_from_slice(b"...<script>alert(1)</script>");
        assert!(!image_payload_is_safe(&data));
    }

    #[test]
    fn php_fragment_is_flagged() {
        assert!(!image_payload_is_safe(b"GIF89a<?php system($_GET['c']); ?>"));
    }

    #[test]
    fn case_and_whitespace_do_not_evade() {
        assert!(!image_payload_is_safe(b"xx< ScRiPt yy"));
        assert!(!image_payload_is_safe(b"JAVASCRIPT : void(0)"));
    }
}
