//! Bounded parser for numeric list settings such as fixed histogram bins.
use crate::error::{DetectionError, Result};

/// Parse `"1, 2.5,3e2"` (optionally wrapped in one pair of square brackets)
/// into numbers. Only decimal float literals separated by commas are
/// accepted; an empty list is allowed, empty items are not.
pub fn parse_number_list(text: &str) -> Result<Vec<f64>> {
    let mut body = text.trim();
    if let Some(inner) = body.strip_prefix('[') {
        body = inner
            .strip_suffix(']')
            .ok_or_else(|| DetectionError::Parse(format!("unbalanced brackets in {text:?}")))?
            .trim();
    }
    if body.is_empty() {
        return Ok(Vec::new());
    }
    body.split(',')
        .map(|item| {
            let item = item.trim();
            if !is_float_literal(item) {
                return Err(DetectionError::Parse(format!(
                    "expected a number, found {item:?} in {text:?}"
                )));
            }
            item.parse::<f64>()
                .map_err(|e| DetectionError::Parse(format!("{item:?}: {e}")))
        })
        .collect()
}

/// `[+-]? (digits [. digits?] | . digits) ([eE] [+-]? digits)?`
fn is_float_literal(s: &str) -> bool {
    let b = s.as_bytes();
    let mut i = 0;
    let digits = |i: &mut usize| {
        let start = *i;
        while *i < b.len() && b[*i].is_ascii_digit() {
            *i += 1;
        }
        *i - start
    };
    if i < b.len() && (b[i] == b'+' || b[i] == b'-') {
        i += 1;
    }
    let mut mantissa = digits(&mut i);
    if i < b.len() && b[i] == b'.' {
        i += 1;
        mantissa += digits(&mut i);
    }
    if mantissa == 0 {
        return false;
    }
    if i < b.len() && (b[i] == b'e' || b[i] == b'E') {
        i += 1;
        if i < b.len() && (b[i] == b'+' || b[i] == b'-') {
            i += 1;
        }
        if digits(&mut i) == 0 {
            return false;
        }
    }
    i == b.len()
}
