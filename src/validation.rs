use strum::AsRefStr;

/// The raster formats the server accepts, derived from the name's extension.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ImageKind {
    Png,
    Jpeg,
}

impl ImageKind {
    /// Resolves the kind from a name's extension, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            _ => None,
        }
    }
}

impl From<ImageKind> for image::ImageFormat {
    fn from(kind: ImageKind) -> Self {
        match kind {
            ImageKind::Png => image::ImageFormat::Png,
            ImageKind::Jpeg => image::ImageFormat::Jpeg,
        }
    }
}

/// Whether the request intends to write the named image.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Access {
    Write,
    Read,
}

/// How a malformed name is reported back to the client.
///
/// Writes are refused outright while every other verb pretends the
/// resource simply doesn't exist.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Rejection {
    Forbidden,
    NotFound,
}

/// Checks the name against the extension whitelist before any store access.
pub fn validate(name: &str, access: Access) -> Result<ImageKind, Rejection> {
    match ImageKind::from_name(name) {
        Some(kind) => Ok(kind),
        None => match access {
            Access::Write => Err(Rejection::Forbidden),
            Access::Read => Err(Rejection::NotFound),
        },
    }
}

/// The response content type for a stored name, `image/<ext>`.
pub fn content_type(name: &str) -> String {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    format!("image/{}", ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_whitelisted_extensions() {
        assert_eq!(ImageKind::from_name("cat.png"), Some(ImageKind::Png));
        assert_eq!(ImageKind::from_name("cat.PNG"), Some(ImageKind::Png));
        assert_eq!(ImageKind::from_name("cat.jpg"), Some(ImageKind::Jpeg));
        assert_eq!(ImageKind::from_name("cat.JpEg"), Some(ImageKind::Jpeg));
        assert_eq!(ImageKind::from_name("archive.tar.png"), Some(ImageKind::Png));
    }

    #[test]
    fn rejects_everything_else() {
        for name in ["cat", "cat.gif", "cat.png.txt", "png", ".pngx", "cat.webp"] {
            assert_eq!(ImageKind::from_name(name), None, "{}", name);
        }
    }

    #[test]
    fn rejection_depends_on_access() {
        assert_eq!(validate("cat.gif", Access::Write), Err(Rejection::Forbidden));
        assert_eq!(validate("cat.gif", Access::Read), Err(Rejection::NotFound));
        assert_eq!(validate("cat.jpg", Access::Write), Ok(ImageKind::Jpeg));
    }

    #[test]
    fn content_type_uses_extension() {
        assert_eq!(content_type("a.PNG"), "image/png");
        assert_eq!(content_type("a.jpg"), "image/jpg");
        assert_eq!(content_type("a.jpeg"), "image/jpeg");
    }
}
