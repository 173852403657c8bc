//! Aspect-preserving thumbnails.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageResult};

/// Target dimensions for an image of `source` size inside `target_box`.
///
/// Landscape images take the box width, portrait and square images take the
/// box height; the other side follows the aspect ratio, rounded, at least 1.
#[must_use]
pub fn fit_within(source: (u32, u32), target_box: (u32, u32)) -> (u32, u32) {
    let (width, height) = source;
    let (box_w, box_h) = target_box;
    if width == 0 || height == 0 {
        return (box_w.max(1), box_h.max(1));
    }
    let aspect = f64::from(width) / f64::from(height);
    if aspect > 1.0 {
        let h = (f64::from(box_w) / aspect).round().max(1.0) as u32;
        (box_w, h)
    } else {
        let w = (f64::from(box_h) * aspect).round().max(1.0) as u32;
        (w, box_h)
    }
}

/// Resize `image` into `target_box` with a Lanczos3 filter.
#[must_use]
pub fn render(image: &DynamicImage, target_box: (u32, u32)) -> DynamicImage {
    let (w, h) = fit_within((image.width(), image.height()), target_box);
    image.resize_exact(w, h, FilterType::Lanczos3)
}

/// Encode as baseline JPEG, dropping any alpha channel.
pub fn encode_jpeg(image: &DynamicImage) -> ImageResult<Vec<u8>> {
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    let mut buf = Cursor::new(Vec::new());
    rgb.write_to(&mut buf, ImageFormat::Jpeg)?;
    Ok(buf.into_inner())
}
