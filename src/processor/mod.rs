use bytes::Bytes;
use image::{load_from_memory_with_format, DynamicImage};

use crate::transform::TransformSpec;
use crate::validation::ImageKind;

pub mod encoder;
pub mod resizer;

/// Applies every requested step in its fixed order.
///
/// Resizing always happens before any filter as the order changes the
/// resulting pixels.
pub fn apply_steps(
    spec: &TransformSpec,
    mut img: DynamicImage,
    max_dimension: u32,
) -> DynamicImage {
    if spec.resizes() {
        img = resizer::resize(spec, img, max_dimension);
    }

    if spec.flip {
        img = img.flipv();
    }

    if spec.flop {
        img = img.fliph();
    }

    if let Some(sigma) = spec.blur {
        img = img.blur(sigma);
    }

    if let Some(sigma) = spec.sharpen {
        img = img.unsharpen(sigma, 0);
    }

    if spec.greyscale {
        img = img.grayscale();
    }

    img
}

/// Decodes the raw payload, transforms it and re-encodes it as `kind`.
///
/// The output never exceeds `max_dimension` on either axis.
pub fn transform(
    raw: &[u8],
    spec: &TransformSpec,
    kind: ImageKind,
    max_dimension: u32,
) -> anyhow::Result<Bytes> {
    let img = load_from_memory_with_format(raw, kind.into())?;
    let img = apply_steps(spec, img, max_dimension);
    encoder::encode_to(&img, kind)
}
