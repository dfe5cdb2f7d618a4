use std::borrow::Cow;

/// Lossy UTF-8 view of a text point file; borrows when the input is valid.
pub(crate) fn decode_text(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}

fn tokens(line: &str) -> impl Iterator<Item = &str> {
    line.split(|c: char| c.is_ascii_whitespace() || c == ',')
        .filter(|token| !token.is_empty())
}

/// Fills `out` with the leading numeric tokens of `line`.
///
/// Stops at the first token that is not a number.
pub(crate) fn parse_numbers(line: &str, out: &mut Vec<f64>) {
    out.clear();
    for token in tokens(line) {
        match token.parse::<f64>() {
            Ok(value) => out.push(value),
            Err(_) => break,
        }
    }
}

pub(crate) fn token_count(line: &str) -> usize {
    tokens(line).count()
}

/// `Some(n)` when the line is exactly one non-negative integer.
pub(crate) fn single_integer(line: &str) -> Option<u64> {
    let mut iter = tokens(line);
    let first = iter.next()?;
    if iter.next().is_some() {
        return None;
    }
    first.parse::<u64>().ok()
}

/// `Some(value)` when the line is exactly one number.
pub(crate) fn single_number(line: &str) -> Option<f64> {
    let mut iter = tokens(line);
    let first = iter.next()?;
    if iter.next().is_some() {
        return None;
    }
    first.parse::<f64>().ok()
}

pub(crate) fn channel_from_u8(value: f64) -> f32 {
    if value.is_finite() {
        (value / 255.0).clamp(0.0, 1.0) as f32
    } else {
        0.0
    }
}

/// Maps a scanner intensity onto a `[0, 1]` gray level.
///
/// Negative values are Leica signed 12-bit intensities, values up to 1 are
/// already normalized, values up to 255 are 8-bit and anything larger is
/// treated as 16-bit.
pub(crate) fn intensity_to_gray(value: f64) -> f32 {
    if !value.is_finite() {
        return 0.0;
    }
    let gray = if value < 0.0 {
        (value + 2048.0) / 4095.0
    } else if value <= 1.0 {
        value
    } else if value <= 255.0 {
        value / 255.0
    } else {
        value / 65535.0
    };
    gray.clamp(0.0, 1.0) as f32
}
