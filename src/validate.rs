// Identifier and value pattern checks.
//
// These are the building blocks for both column-name guessing (what kind
// of values does an unnamed column hold?) and cleaning (are the values of
// a named column valid?).
use crate::util::is_digits;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static BID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{7}-\d$").expect("valid BID regex"));

const BID_WEIGHTS: [u32; 7] = [7, 9, 10, 5, 8, 4, 2];

// EU VAT number formats, country prefix included.
static VAT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    let patterns = [
        r"FI\d{8}",
        r"BE\d{10}",
        r"BG\d{9,10}",
        r"ES[A-Z0-9]\d{7}[A-Z0-9]",
        r"NL\d{9}B\d{2}",
        r"IE\d[A-Z0-9+*]\d{5}[A-Z]{1,2}",
        r"GB\d{9}",
        r"GB\d{12}",
        r"GBGD\d{3}",
        r"GBHA\d{3}",
        r"XI\d{9}",
        r"XI\d{12}",
        r"XIGD\d{3}",
        r"XIHA\d{3}",
        r"IT\d{11}",
        r"ATU\d{8}",
        r"EL\d{9}",
        r"HR\d{11}",
        r"CY\d{8}[A-Z]",
        r"LV\d{11}",
        r"LT\d{9}",
        r"LT\d{12}",
        r"LU\d{8}",
        r"MT\d{8}",
        r"PT\d{9}",
        r"PL\d{10}",
        r"FR[A-Z0-9]{2}\d{9}",
        r"RO\d{2,10}",
        r"SE\d{10}01",
        r"DE\d{9}",
        r"SK\d{10}",
        r"SI\d{8}",
        r"DK\d{8}",
        r"CZ\d{8,10}",
        r"HU\d{8}",
        r"EE\d{9}",
    ];
    let joined = patterns
        .iter()
        .map(|p| format!("^{}$", p))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("(?i){}", joined)).expect("valid VAT regex")
});

static DATE_WITH_SEP: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"^\d{1,2}[-/.]\d{1,2}[-/.]\d{4}$").expect("valid date regex"),
        Regex::new(r"^\d{4}[-/.]\d{1,2}[-/.]\d{1,2}$").expect("valid date regex"),
        Regex::new(r"^\d{1,2}[-/.]\d{1,2}[-/.]\d{2}$").expect("valid date regex"),
    ]
});

static VOUCHER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z]{0,3}-?\d+$").expect("valid voucher regex"));

/// Check a Finnish business ID (y-tunnus): seven digits, a dash and a
/// check digit computed with weights 7,9,10,5,8,4,2 modulo 11.
pub fn is_valid_bid(value: &str) -> bool {
    let value = value.trim();
    if !BID_PATTERN.is_match(value) {
        return false;
    }
    let (body, check) = value.split_at(7);
    let sum: u32 = body
        .chars()
        .zip(BID_WEIGHTS)
        .filter_map(|(c, w)| c.to_digit(10).map(|d| d * w))
        .sum();
    let expected = match sum % 11 {
        0 => 0,
        // A remainder of 1 is never issued.
        1 => return false,
        r => 11 - r,
    };
    check[1..].parse::<u32>().map(|c| c == expected).unwrap_or(false)
}

/// Check whether a value has the format of an EU VAT number. Spaces are
/// ignored and the match is case-insensitive.
pub fn is_valid_vat_number(value: &str) -> bool {
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    VAT_PATTERN.is_match(&compact)
}

/// Share of `values` satisfying `pred`, relative to `total` rows.
pub fn share<F>(values: &[&str], total: usize, pred: F) -> f64
where
    F: Fn(&str) -> bool,
{
    if total == 0 {
        return 0.0;
    }
    values.iter().filter(|v| pred(**v)).count() as f64 / total as f64
}

/// Digits-only date without separators: DDMMYYYY/YYYYMMDD (8 characters)
/// or DDMMYY/YYMMDD (6 characters), with a plausible year at either end.
fn looks_like_compact_date(v: &str) -> bool {
    if !is_digits(v) {
        return false;
    }
    let in_range = |s: &str, lo: u32, hi: u32| {
        s.parse::<u32>().map(|y| (lo..hi).contains(&y)).unwrap_or(false)
    };
    match v.len() {
        8 => in_range(&v[..4], 1970, 2050) || in_range(&v[4..], 1970, 2050),
        6 => in_range(&v[..2], 15, 50) || in_range(&v[4..], 15, 50),
        _ => false,
    }
}

/// Does every non-empty value look like a date?
pub fn test_if_date(values: &[&str]) -> bool {
    !values.is_empty()
        && values.iter().all(|v| {
            looks_like_compact_date(v) || DATE_WITH_SEP.iter().any(|re| re.is_match(v))
        })
}

/// Does the column look like voucher (document) numbers: short prefixed
/// or plain running numbers, mostly distinct, and not VAT numbers or BIDs.
pub fn test_if_voucher(values: &[&str]) -> bool {
    if values.is_empty() {
        return false;
    }
    let fits = values.iter().all(|v| {
        VOUCHER_PATTERN.is_match(v) && !is_valid_vat_number(v) && !is_valid_bid(v)
    });
    if !fits {
        return false;
    }
    let unique = values.iter().collect::<HashSet<_>>().len();
    unique as f64 / values.len() as f64 > 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_business_ids() {
        assert!(is_valid_bid("0135202-4"));
        assert!(is_valid_bid("0201256-6"));
        assert!(is_valid_bid("0040009-8"));
        assert!(!is_valid_bid("0135202-5"));
        // Remainder 1 has no valid check digit.
        assert!(!is_valid_bid("7000009-7"));
        assert!(!is_valid_bid("0135dd2-4"));
        assert!(!is_valid_bid("01352024"));
        assert!(!is_valid_bid("01345202-4"));
    }

    #[test]
    fn validates_vat_numbers() {
        assert!(is_valid_vat_number("FI01352024"));
        assert!(is_valid_vat_number("fi 0135 2024"));
        assert!(is_valid_vat_number("SE556677889901"));
        assert!(is_valid_vat_number("ATU12345678"));
        assert!(!is_valid_vat_number("FI0135202"));
        assert!(!is_valid_vat_number("0135202-4"));
        assert!(!is_valid_vat_number("XX12345678"));
    }

    #[test]
    fn detects_dates() {
        assert!(test_if_date(&["01022022", "1.2.2022", "02/2/2022"]));
        assert!(test_if_date(&["02012023", "2-1-2023", "20.1.2023"]));
        assert!(test_if_date(&["2023-01-31", "2023-2-1"]));
        assert!(!test_if_date(&["0122", "1.2.2", "02/22"]));
        assert!(!test_if_date(&["12345678"]));
        assert!(!test_if_date(&[]));
    }

    #[test]
    fn detects_vouchers() {
        assert!(test_if_voucher(&["A1", "A2", "A3"]));
        assert!(test_if_voucher(&["1001", "1002", "1002"]));
        assert!(test_if_voucher(&["1", "2", "3"]));
        assert!(!test_if_voucher(&["FI01352024", "FI01352024", "FI01354424"]));
        assert!(!test_if_voucher(&["10", "10", "10"]));
        assert!(!test_if_voucher(&["1,5", "2,5"]));
    }

    #[test]
    fn computes_shares() {
        let v = ["FI", "FI", "x"];
        assert!((share(&v, 3, |s| s == "FI") - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(share(&v, 0, |_| true), 0.0);
    }
}
