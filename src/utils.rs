/// Loose numeric coercion for query values.
///
/// Blank input reads as `0`, unsigned `0x`, `0o` and `0b` literals are read in
/// their radix, anything else that isn't a finite decimal yields `None`.
/// Radix literals beyond `u64` are rejected rather than rounded.
pub fn coerce_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Some(0.0);
    }

    if let Some(literal) = radix_literal(trimmed) {
        return literal;
    }

    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// `None` if the input has no radix prefix at all.
fn radix_literal(raw: &str) -> Option<Option<f64>> {
    let radix = match raw.get(..2)? {
        "0x" | "0X" => 16,
        "0o" | "0O" => 8,
        "0b" | "0B" => 2,
        _ => return None,
    };

    let digits = &raw[2..];
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return Some(None);
    }

    Some(u64::from_str_radix(digits, radix).ok().map(|v| v as f64))
}

/// Reads a query value as a positive number, treating zero and garbage as unset.
pub fn positive_number(raw: Option<&str>) -> Option<f64> {
    raw.and_then(coerce_number).filter(|v| *v > 0.0)
}
