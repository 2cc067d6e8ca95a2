//! Raster image handling: probing, orientation, thumbnails, re-encode.

use image::{imageops, DynamicImage, ImageFormat, ImageReader};
use palaver_core::AppError;
use std::io::Cursor;

/// Recorded dimensions of a probed raster, already corrected for EXIF
/// orientation (a 90°/270° turn swaps the axes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbedImage {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
}

/// MIME type for a sniffed format.
pub fn mime_of(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "image/png",
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Gif => "image/gif",
        ImageFormat::WebP => "image/webp",
        ImageFormat::Bmp => "image/bmp",
        ImageFormat::Tiff => "image/tiff",
        _ => "application/octet-stream",
    }
}

/// Canonical extension for a sniffed format.
pub fn extension_of(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "png",
        ImageFormat::Jpeg => "jpg",
        ImageFormat::Gif => "gif",
        ImageFormat::WebP => "webp",
        ImageFormat::Bmp => "bmp",
        ImageFormat::Tiff => "tiff",
        _ => "bin",
    }
}

/// Sniff the container format from magic bytes; None for non-images.
pub fn sniff_format(data: &[u8]) -> Option<ImageFormat> {
    image::guess_format(data).ok()
}

/// Probe dimensions without a full decode, swapping width/height when the
/// EXIF orientation implies a 90°/270° turn. None for non-images.
pub fn probe(data: &[u8]) -> Option<ProbedImage> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?;
    let format = reader.format()?;
    let (mut width, mut height) = reader.into_dimensions().ok()?;
    if orientation_swaps_axes(read_exif_orientation(data)) {
        std::mem::swap(&mut width, &mut height);
    }
    Some(ProbedImage {
        width,
        height,
        format,
    })
}

/// Read the EXIF orientation tag (1–8); 1 (normal) when absent.
pub fn read_exif_orientation(data: &[u8]) -> u8 {
    let mut cursor = Cursor::new(data);
    let Ok(exif) = exif::Reader::new().read_from_container(&mut cursor) else {
        return 1;
    };
    exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .map(|v| v as u8)
        .unwrap_or(1)
}

/// Orientations 5–8 rotate by 90° or 270° and therefore swap the axes.
pub fn orientation_swaps_axes(orientation: u8) -> bool {
    (5..=8).contains(&orientation)
}

/// Rotation and flips needed to display a given EXIF orientation upright:
/// (clockwise angle, flip horizontal, flip vertical).
fn orientation_transforms(orientation: u8) -> (Option<u16>, bool, bool) {
    match orientation {
        2 => (None, true, false),
        3 => (Some(180), false, false),
        4 => (None, false, true),
        5 => (Some(270), true, false),
        6 => (Some(90), false, false),
        7 => (Some(90), true, false),
        8 => (Some(270), false, false),
        _ => (None, false, false),
    }
}

fn apply_orientation(mut img: DynamicImage, orientation: u8) -> DynamicImage {
    let (rotate, flip_h, flip_v) = orientation_transforms(orientation);
    if let Some(angle) = rotate {
        img = match angle {
            90 => DynamicImage::ImageRgba8(imageops::rotate90(&img.to_rgba8())),
            180 => DynamicImage::ImageRgba8(imageops::rotate180(&img.to_rgba8())),
            270 => DynamicImage::ImageRgba8(imageops::rotate270(&img.to_rgba8())),
            _ => img,
        };
    }
    if flip_h {
        img = DynamicImage::ImageRgba8(imageops::flip_horizontal(&img.to_rgba8()));
    }
    if flip_v {
        img = DynamicImage::ImageRgba8(imageops::flip_vertical(&img.to_rgba8()));
    }
    img
}

fn decode(data: &[u8]) -> Result<(DynamicImage, ImageFormat), AppError> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| AppError::ImageProcessing(e.to_string()))?;
    let format = reader
        .format()
        .ok_or_else(|| AppError::ImageProcessing("unrecognized image format".into()))?;
    let img = reader
        .decode()
        .map_err(|e| AppError::ImageProcessing(e.to_string()))?;
    Ok((img, format))
}

/// A derived rendition produced by [`thumbnail`] or [`reencode`].
#[derive(Debug, Clone)]
pub struct Rendition {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub mime: &'static str,
    pub extension: &'static str,
}

/// Render a thumbnail fitting inside `max_width` x `max_height`, aspect
/// preserved, upright per the source's EXIF orientation.
pub fn thumbnail(data: &[u8], max_width: u32, max_height: u32) -> Result<Rendition, AppError> {
    let (img, _) = decode(data)?;
    let img = apply_orientation(img, read_exif_orientation(data));
    let thumb = img.thumbnail(max_width, max_height);
    let (width, height) = (thumb.width(), thumb.height());

    let mut out = Vec::new();
    thumb
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .map_err(|e| AppError::ImageProcessing(e.to_string()))?;
    Ok(Rendition {
        data: out,
        width,
        height,
        mime: "image/png",
        extension: "png",
    })
}

/// Re-encode remediation for images that failed the payload scan: a full
/// decode/encode pass drops everything that is not pixel data (metadata,
/// trailing bytes, smuggled segments). JPEG stays JPEG; every other input
/// comes back as PNG, so the caller must record the format change.
pub fn reencode(data: &[u8]) -> Result<Rendition, AppError> {
    let (img, format) = decode(data)?;
    let img = apply_orientation(img, read_exif_orientation(data));
    let (width, height) = (img.width(), img.height());

    let (target, mime, extension) = match format {
        ImageFormat::Jpeg => (ImageFormat::Jpeg, "image/jpeg", "jpg"),
        _ => (ImageFormat::Png, "image/png", "png"),
    };
    let mut out = Vec::new();
    // JPEG encoding needs RGB8; PNG handles RGBA.
    let img = match target {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8()),
        _ => img,
    };
    img.write_to(&mut Cursor::new(&mut out), target)
        .map_err(|e| AppError::ImageProcessing(e.to_string()))?;
    Ok(Rendition {
        data: out,
        width,
        height,
        mime,
        extension,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([255, 0, 0, 255]));
        let mut out = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn probe_reads_dimensions_and_format() {
        let probed = probe(&png_bytes(40, 30)).unwrap();
        assert_eq!((probed.width, probed.height), (40, 30));
        assert_eq!(probed.format, ImageFormat::Png);
    }

    #[test]
    fn probe_rejects_non_images() {
        assert!(probe(b"just some text").is_none());
    }

    #[test]
    fn orientation_axis_swap_table() {
        for o in 1..=4u8 {
            assert!(!orientation_swaps_axes(o));
        }
        for o in 5..=8u8 {
            assert!(orientation_swaps_axes(o));
        }
    }

    #[test]
    fn missing_exif_reads_as_normal_orientation() {
        assert_eq!(read_exif_orientation(&png_bytes(2, 2)), 1);
    }

    #[test]
    fn thumbnail_fits_bounds_and_keeps_aspect() {
        let thumb = thumbnail(&png_bytes(800, 400), 100, 100).unwrap();
        assert_eq!((thumb.width, thumb.height), (100, 50));
        // The rendition itself decodes to the reported size.
        let reprobed = probe(&thumb.data).unwrap();
        assert_eq!((reprobed.width, reprobed.height), (100, 50));
    }

    #[test]
    fn reencode_preserves_dimensions_and_reports_png() {
        let out = reencode(&png_bytes(10, 20)).unwrap();
        assert_eq!((out.width, out.height), (10, 20));
        assert_eq!(out.mime, "image/png");
        assert_eq!(out.extension, "png");
        assert!(probe(&out.data).is_some());
    }
}
