use std::sync::Arc;

use anyhow::anyhow;
use bytes::Bytes;
use hashbrown::HashMap;
use image::{DynamicImage, RgbaImage};
use once_cell::sync::Lazy;
use resvg::tiny_skia;
use resvg::usvg;

use crate::processor::encoder;
use crate::utils::coerce_number;
use crate::validation::ImageKind;

const DEFAULT_WIDTH: f64 = 300.0;
const DEFAULT_HEIGHT: f64 = 200.0;
const DEFAULT_BORDER: f64 = 5.0;
const DEFAULT_TEXT_SIZE: f64 = 24.0;
const DEFAULT_BG_COLOR: &str = "#fcfcfc";
const DEFAULT_FG_COLOR: &str = "#ddd";
const DEFAULT_TEXT_COLOR: &str = "#aaa";

static FONTS: Lazy<Arc<usvg::fontdb::Database>> = Lazy::new(|| {
    let mut db = usvg::fontdb::Database::new();
    db.load_system_fonts();
    debug!("Loaded {} font faces for placeholders", db.len());
    Arc::new(db)
});

/// Everything that shapes a placeholder image.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceholderParams {
    pub width: u32,
    pub height: u32,
    pub border: u32,
    pub bg_color: String,
    pub fg_color: String,
    pub text_color: String,
    pub text_size: u32,
    pub format: ImageKind,
}

impl Default for PlaceholderParams {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH as u32,
            height: DEFAULT_HEIGHT as u32,
            border: DEFAULT_BORDER as u32,
            bg_color: DEFAULT_BG_COLOR.to_string(),
            fg_color: DEFAULT_FG_COLOR.to_string(),
            text_color: DEFAULT_TEXT_COLOR.to_string(),
            text_size: DEFAULT_TEXT_SIZE as u32,
            format: ImageKind::Jpeg,
        }
    }
}

impl PlaceholderParams {
    /// Reads the thumbnail query, zero or unparseable numbers fall back to
    /// their defaults.
    pub fn from_query(
        format: ImageKind,
        query: &HashMap<String, String>,
        max_dimension: u32,
    ) -> Self {
        let get = |key: &str| query.get(key).map(String::as_str);
        let max_dimension = max_dimension.max(1) as f64;

        let width = number_or(get("width"), DEFAULT_WIDTH).clamp(1.0, max_dimension) as u32;
        let height = number_or(get("height"), DEFAULT_HEIGHT).clamp(1.0, max_dimension) as u32;
        let border = number_or(get("border"), DEFAULT_BORDER)
            .clamp(0.0, (width.min(height) / 2) as f64) as u32;
        let text_size =
            number_or(get("textsize"), DEFAULT_TEXT_SIZE).clamp(1.0, height as f64) as u32;

        Self {
            width,
            height,
            border,
            bg_color: color_or(get("bgcolor"), DEFAULT_BG_COLOR),
            fg_color: color_or(get("fgcolor"), DEFAULT_FG_COLOR),
            text_color: color_or(get("textcolor"), DEFAULT_TEXT_COLOR),
            text_size,
            format,
        }
    }

    /// A bordered box with two crossing diagonals and the size as a caption.
    pub fn to_svg(&self) -> String {
        let (width, height) = (self.width as f64, self.height as f64);
        let border = self.border as f64;
        let text_size = self.text_size as f64;

        format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}">
    <rect x="0" y="0" width="{width}" height="{height}" fill="{fg}" />
    <rect x="{border}" y="{border}" width="{inner_w}" height="{inner_h}" fill="{bg}" />
    <line x1="{b2}" y1="{b2}" x2="{inner_w}" y2="{inner_h}" stroke-width="{border}" stroke="{fg}" />
    <line x1="{inner_w}" y1="{b2}" x2="{b2}" y2="{inner_h}" stroke-width="{border}" stroke="{fg}" />
    <rect x="{border}" y="{text_y}" width="{inner_w}" height="{text_size}" fill="{bg}" />
    <text x="{mid_x}" y="{mid_y}" dy="8" font-family="Helvetica, Arial, sans-serif" font-size="{text_size}" fill="{text}" text-anchor="middle">{width} x {height}</text>
</svg>"#,
            width = width,
            height = height,
            border = border,
            b2 = border * 2.0,
            inner_w = width - border * 2.0,
            inner_h = height - border * 2.0,
            text_y = (height - text_size) / 2.0,
            text_size = text_size,
            mid_x = width / 2.0,
            mid_y = height / 2.0,
            fg = self.fg_color,
            bg = self.bg_color,
            text = self.text_color,
        )
    }
}

fn number_or(raw: Option<&str>, default: f64) -> f64 {
    raw.and_then(coerce_number)
        .filter(|v| *v != 0.0)
        .unwrap_or(default)
        .round()
}

/// Keeps colour values to characters that can't break out of an attribute.
fn color_or(raw: Option<&str>, default: &str) -> String {
    let is_safe = |value: &str| {
        !value.is_empty()
            && value.len() <= 32
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "#(),.% ".contains(c))
    };

    match raw {
        Some(value) if is_safe(value) => value.to_string(),
        _ => default.to_string(),
    }
}

/// Rasterises the placeholder onto an opaque black canvas and encodes it.
pub fn render(params: &PlaceholderParams) -> anyhow::Result<Bytes> {
    let svg = params.to_svg();

    let mut options = usvg::Options::default();
    options.fontdb = FONTS.clone();
    let tree = usvg::Tree::from_str(&svg, &options)?;

    let mut pixmap = tiny_skia::Pixmap::new(params.width, params.height)
        .ok_or_else(|| anyhow!("invalid placeholder size"))?;
    pixmap.fill(tiny_skia::Color::BLACK);
    resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());

    // Fully opaque, so the premultiplied pixels are already straight RGBA.
    let img = RgbaImage::from_raw(params.width, params.height, pixmap.take())
        .ok_or_else(|| anyhow!("pixmap size does not match the placeholder"))?;

    encoder::encode_to(&DynamicImage::ImageRgba8(img), params.format)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply() {
        let params = PlaceholderParams::from_query(ImageKind::Jpeg, &query(&[]), 8192);
        assert_eq!(params, PlaceholderParams::default());
    }

    #[test]
    fn zero_and_garbage_fall_back() {
        let params = PlaceholderParams::from_query(
            ImageKind::Png,
            &query(&[("width", "0"), ("height", "tall"), ("border", "0")]),
            8192,
        );
        assert_eq!(params.width, 300);
        assert_eq!(params.height, 200);
        assert_eq!(params.border, 5);
    }

    #[test]
    fn sizes_are_bounded() {
        let params = PlaceholderParams::from_query(
            ImageKind::Png,
            &query(&[("width", "100000"), ("height", "-4"), ("textsize", "500")]),
            1024,
        );
        assert_eq!(params.width, 1024);
        assert_eq!(params.height, 1);
        assert_eq!(params.text_size, 1);
        assert_eq!(params.border, 0);
    }

    #[test]
    fn unsafe_colours_are_dropped() {
        let params = PlaceholderParams::from_query(
            ImageKind::Png,
            &query(&[("bgcolor", "red\"/><script>"), ("fgcolor", "rgb(1, 2, 3)")]),
            8192,
        );
        assert_eq!(params.bg_color, DEFAULT_BG_COLOR);
        assert_eq!(params.fg_color, "rgb(1, 2, 3)");
    }

    #[test]
    fn caption_shows_dimensions() {
        let params = PlaceholderParams {
            width: 640,
            height: 480,
            ..Default::default()
        };
        assert!(params.to_svg().contains(">640 x 480</text>"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let params = PlaceholderParams {
            width: 120,
            height: 80,
            format: ImageKind::Png,
            ..Default::default()
        };

        let first = render(&params).unwrap();
        let second = render(&params).unwrap();
        assert_eq!(first, second);

        let img = image::load_from_memory_with_format(&first, image::ImageFormat::Png).unwrap();
        assert_eq!((img.width(), img.height()), (120, 80));
    }

    #[test]
    fn renders_requested_format() {
        let jpeg = render(&PlaceholderParams::default()).unwrap();
        assert_eq!(image::guess_format(&jpeg).unwrap(), image::ImageFormat::Jpeg);
    }
}
