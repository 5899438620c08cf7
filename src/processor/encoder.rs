use std::io::Cursor;

use bytes::Bytes;
use image::DynamicImage;

use crate::validation::ImageKind;

/// Encodes the image back into the format it was stored in.
#[inline]
pub fn encode_to(img: &DynamicImage, kind: ImageKind) -> anyhow::Result<Bytes> {
    let mut buff = Cursor::new(Vec::new());

    if kind == ImageKind::Jpeg && img.color().has_alpha() {
        // JPEG has no alpha channel.
        DynamicImage::ImageRgb8(img.to_rgb8()).write_to(&mut buff, image::ImageFormat::Jpeg)?;
    } else {
        img.write_to(&mut buff, image::ImageFormat::from(kind))?;
    }

    Ok(Bytes::from(buff.into_inner()))
}
