// Utility helpers for parsing and formatting.
//
// This module centralizes the "dirty" number handling of spreadsheet
// exports so the rest of the code can work with typed values.
use num_format::{Locale, ToFormattedString};

/// Parse a string-like value into `f64` while being forgiving about the
/// formatting found in Finnish exports.
///
/// - Accepts `Option<&str>` so callers can pass through optional cells.
/// - Removes spaces, including the non-breaking thousands separator.
/// - Treats a lone `,` as the decimal separator; when both `,` and `.`
///   occur, the last one is the decimal separator.
/// - Rejects values that contain alphabetic characters.
pub fn parse_f64_safe(s: Option<&str>) -> Option<f64> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    if s.chars().any(|c| c.is_alphabetic()) {
        return None;
    }
    let s: String = s
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .collect();
    let normalized = match (s.rfind(','), s.rfind('.')) {
        (Some(c), Some(d)) if c > d => s.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => s.replace(',', ""),
        (Some(_), None) => s.replace(',', "."),
        _ => s,
    };
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn parse_i64_safe(s: Option<&str>) -> Option<i64> {
    // `?` propagates `None` early if the cell is missing.
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<i64>().ok()
}

/// Compare two identifier-like values: numerically when both are
/// integers (so "091" equals "91"), otherwise case-insensitively.
pub fn values_equal(a: &str, b: &str) -> bool {
    match (parse_i64_safe(Some(a)), parse_i64_safe(Some(b))) {
        (Some(x), Some(y)) => x == y,
        _ => a.trim().to_lowercase() == b.trim().to_lowercase(),
    }
}

/// Key used for hash lookups with the same semantics as `values_equal`.
pub fn match_key(v: &str) -> String {
    match parse_i64_safe(Some(v)) {
        Some(n) => n.to_string(),
        None => v.trim().to_lowercase(),
    }
}

/// `true` when the value is a finite number in [0, 1].
pub fn is_percentage(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

pub fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

/// Render a float without a trailing `.0` for whole numbers, keeping at
/// most two decimals for computed sums.
pub fn format_amount(v: f64) -> String {
    let rounded = (v * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{:.0}", rounded)
    } else {
        let s = format!("{:.2}", rounded);
        s.trim_end_matches('0').to_string()
    }
}

pub fn format_int<T>(n: T) -> String
where
    T: ToFormattedString,
{
    // Thin wrapper around `num-format` for counts in console messages
    // (e.g., `9,855 rows loaded`).
    n.to_formatted_string(&Locale::en)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_finnish_numbers() {
        assert_eq!(parse_f64_safe(Some("10,30")), Some(10.3));
        assert_eq!(parse_f64_safe(Some("1 234,50")), Some(1234.5));
        assert_eq!(parse_f64_safe(Some("1.234,50")), Some(1234.5));
        assert_eq!(parse_f64_safe(Some("1,234.50")), Some(1234.5));
        assert_eq!(parse_f64_safe(Some("-5")), Some(-5.0));
        assert_eq!(parse_f64_safe(Some("12 eur")), None);
        assert_eq!(parse_f64_safe(Some("  ")), None);
        assert_eq!(parse_f64_safe(None), None);
    }

    #[test]
    fn compares_identifiers() {
        assert!(values_equal("091", "91"));
        assert!(values_equal("Turku", "turku "));
        assert!(!values_equal("0135202-4", "0135202-5"));
        assert_eq!(match_key("049"), "49");
        assert_eq!(match_key(" Espoo"), "espoo");
    }

    #[test]
    fn checks_percentages() {
        assert!(is_percentage(0.0));
        assert!(is_percentage(1.0));
        assert!(is_percentage(0.5));
        assert!(!is_percentage(-0.5));
        assert!(!is_percentage(2.0));
        assert!(!is_percentage(f64::NAN));
    }

    #[test]
    fn formats_amounts() {
        assert_eq!(format_amount(11.5), "11.5");
        assert_eq!(format_amount(12.0), "12");
        assert_eq!(format_amount(0.1 + 0.2), "0.3");
        assert_eq!(format_int(9855), "9,855");
    }
}
