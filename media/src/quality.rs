//! Selfie sharpness and quality scoring.

use image::GrayImage;

/// Variance of the 4-neighbour Laplacian response over `image`.
///
/// Borders are mirrored without repeating the edge pixel, so a uniform image
/// scores exactly zero. Higher means sharper.
#[must_use]
pub fn laplacian_variance(image: &GrayImage) -> f64 {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return 0.0;
    }
    let (w, h) = (i64::from(width), i64::from(height));
    let at = |x: i64, y: i64| f64::from(image.get_pixel(mirror(x, w), mirror(y, h))[0]);

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for y in 0..h {
        for x in 0..w {
            let response = at(x, y - 1) + at(x, y + 1) + at(x - 1, y) + at(x + 1, y) - 4.0 * at(x, y);
            sum += response;
            sum_sq += response * response;
        }
    }

    let n = (w * h) as f64;
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

fn mirror(i: i64, len: i64) -> u32 {
    let mirrored = if len == 1 {
        0
    } else if i < 0 {
        -i
    } else if i >= len {
        2 * len - 2 - i
    } else {
        i
    };
    mirrored.clamp(0, len - 1) as u32
}

/// `clamp(sharpness / scale, 0, 1)` when exactly one face is present, else 0.
#[must_use]
pub fn quality_score(sharpness: f64, face_count: usize, scale: f64) -> f64 {
    if face_count != 1 || scale <= 0.0 || !sharpness.is_finite() {
        return 0.0;
    }
    (sharpness / scale).clamp(0.0, 1.0)
}
