use image::imageops::FilterType;
use image::DynamicImage;

use crate::transform::TransformSpec;

const FILTER: FilterType = FilterType::Lanczos3;

/// Resolves the output size for the requested axes.
///
/// With both axes set the image is stretched to fill them exactly, otherwise
/// the missing axis follows the source aspect ratio. Neither axis of the
/// result exceeds `max_dimension`, an oversized pair is scaled down as a whole.
pub fn target_dimensions(
    (src_width, src_height): (u32, u32),
    width: Option<u32>,
    height: Option<u32>,
    max_dimension: u32,
) -> Option<(u32, u32)> {
    let scale = |value: u32, num: u32, den: u32| -> u32 {
        if den == 0 {
            return value.max(1);
        }
        ((value as f64 * num as f64 / den as f64).round() as u32).max(1)
    };

    let target = match (width, height) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => (w, scale(w, src_height, src_width)),
        (None, Some(h)) => (scale(h, src_width, src_height), h),
        (None, None) => return None,
    };

    Some(fit_within(target, max_dimension))
}

fn fit_within((width, height): (u32, u32), max_dimension: u32) -> (u32, u32) {
    let max_dimension = max_dimension.max(1);
    let largest = width.max(height);
    if largest <= max_dimension {
        return (width, height);
    }

    let ratio = max_dimension as f64 / largest as f64;
    let shrink = |value: u32| ((value as f64 * ratio).round() as u32).clamp(1, max_dimension);
    (shrink(width), shrink(height))
}

pub fn resize(spec: &TransformSpec, img: DynamicImage, max_dimension: u32) -> DynamicImage {
    let source = (img.width(), img.height());
    match target_dimensions(source, spec.width, spec.height, max_dimension) {
        Some((w, h)) if (w, h) != (img.width(), img.height()) => img.resize_exact(w, h, FILTER),
        _ => img,
    }
}
