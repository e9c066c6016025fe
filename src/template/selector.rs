//! Segment selectors (`N`, `N:`, `:N`, `N:M`, `:`) over path or subject tokens.
//!
//! Bounds are validated against `[0, len + 1]` and only then clamped into
//! `[0, len]`. Tolerating `len + 1` keeps common off-by-one ranges working,
//! anything further out (or negative) selects nothing.

/// Apply `expr` to `segments`.
///
/// Returns `None` when the expression is malformed or out of range.
pub fn select<'a>(segments: &'a [&'a str], expr: &str) -> Option<&'a [&'a str]> {
    let len = segments.len() as i64;
    let (start_str, end_str, is_range) = match expr.split_once(':') {
        Some((a, b)) => (a, b, true),
        None => (expr, "", false),
    };

    let start = parse_bound(start_str, 0)?;
    let end = parse_bound(end_str, len)?;

    let out_of_bounds = |i: i64| i < 0 || i > len + 1;
    if out_of_bounds(start) || out_of_bounds(end) {
        return None;
    }

    let start = start.clamp(0, len) as usize;
    let end = end.clamp(0, len) as usize;

    if is_range {
        if start > end {
            return None;
        }
        Some(&segments[start..end])
    } else {
        segments.get(start..start + 1)
    }
}

fn parse_bound(raw: &str, default: i64) -> Option<i64> {
    if raw.is_empty() {
        return Some(default);
    }
    raw.parse::<i64>().ok()
}
