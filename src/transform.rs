use hashbrown::{HashMap, HashSet};
use serde::Deserialize;

use crate::utils::positive_number;

/// The query parameters that select the processed response path.
pub const TRANSFORM_PARAMS: [&str; 7] = [
    "width",
    "height",
    "blur",
    "sharpen",
    "greyscale",
    "flip",
    "flop",
];

/// The smallest gaussian blur sigma applied.
const MIN_BLUR_SIGMA: f32 = 0.3;
const MAX_SIGMA: f32 = 1000.0;

/// The set of raw values that read as `true` for boolean parameters.
///
/// Matching is case-sensitive.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct TruthyTokens(HashSet<String>);

impl TruthyTokens {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(tokens.into_iter().map(Into::into).collect())
    }

    #[inline]
    pub fn is_truthy(&self, raw: Option<&str>) -> bool {
        raw.map_or(false, |v| self.0.contains(v))
    }
}

impl Default for TruthyTokens {
    fn default() -> Self {
        Self::new(["y", "yes", "true", "1", "on"])
    }
}

/// The normalized set of manipulations requested for one download.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TransformSpec {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub blur: Option<f32>,
    pub sharpen: Option<f32>,
    pub greyscale: bool,
    pub flip: bool,
    pub flop: bool,
}

impl TransformSpec {
    /// Builds the transform from the request query.
    ///
    /// Returns `None` when no recognised transform parameter is present, which
    /// selects the passthrough path. Parsing itself never fails, bad values
    /// simply fall back to their unset state.
    pub fn from_query(
        query: &HashMap<String, String>,
        truthy: &TruthyTokens,
        max_dimension: u32,
    ) -> Option<Self> {
        if !TRANSFORM_PARAMS.iter().any(|key| query.contains_key(*key)) {
            return None;
        }

        let get = |key: &str| query.get(key).map(String::as_str);

        Some(Self {
            width: dimension(get("width"), max_dimension),
            height: dimension(get("height"), max_dimension),
            blur: positive_number(get("blur")).map(|v| (v as f32).clamp(MIN_BLUR_SIGMA, MAX_SIGMA)),
            sharpen: positive_number(get("sharpen")).map(|v| (v as f32).min(MAX_SIGMA)),
            greyscale: truthy.is_truthy(get("greyscale")),
            flip: truthy.is_truthy(get("flip")),
            flop: truthy.is_truthy(get("flop")),
        })
    }

    /// Folds dimensions taken from the request path over this spec.
    pub fn with_dimensions(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        if width.is_some() {
            self.width = width;
        }
        if height.is_some() {
            self.height = height;
        }
        self
    }

    #[inline]
    pub fn resizes(&self) -> bool {
        self.width.is_some() || self.height.is_some()
    }

    /// Both axes given, the image is stretched to exactly `width x height`.
    #[inline]
    pub fn is_fill(&self) -> bool {
        self.width.is_some() && self.height.is_some()
    }
}

fn dimension(raw: Option<&str>, max_dimension: u32) -> Option<u32> {
    positive_number(raw)
        .map(|v| v.round().min(max_dimension as f64) as u32)
        .filter(|v| *v > 0)
}

/// A name carrying its target size as a path prefix, e.g. `120x80-cat.png`,
/// `_x80-cat.png` or `120x_-cat.png`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizedName<'a> {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub name: &'a str,
}

impl<'a> SizedName<'a> {
    pub fn parse(raw: &'a str, max_dimension: u32) -> Option<Self> {
        let (size, name) = raw.split_once('-')?;
        let (width, height) = size.split_once('x')?;

        if name.is_empty() {
            return None;
        }

        let width = axis(width, max_dimension)?;
        let height = axis(height, max_dimension)?;

        // `_x_-name` would just be the plain image.
        if width.is_none() && height.is_none() {
            return None;
        }

        Some(Self { width, height, name })
    }
}

/// `_` leaves the axis unset, anything else must be a positive integer.
fn axis(raw: &str, max_dimension: u32) -> Option<Option<u32>> {
    if raw == "_" {
        return Some(None);
    }

    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let value: u32 = raw.parse().ok()?;
    if value == 0 {
        return None;
    }

    Some(Some(value.min(max_dimension)))
}
