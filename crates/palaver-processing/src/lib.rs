//! Palaver processing library
//!
//! Pure image/content handling, free of storage and database concerns:
//! dimension probing with EXIF orientation, thumbnail renditions, the
//! lossless re-encode remediation, the embedded-payload safety scan, and
//! SVG structural validation.

pub mod image;
pub mod safety;
pub mod svg;
