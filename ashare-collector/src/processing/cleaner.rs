//! Text, code, number and date normalization for raw source fields.

use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;

/// "sh600000", "SZ.000001", "600000.SH", "600000"
static CODE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:[a-z]{1,2}\.?)?(\d{6})(?:\.(?:sh|sz|ss|bj))?$").expect("code pattern is valid")
});

/// Parenthesized annotations in half- or full-width brackets
static ANNOTATION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^)]*\)|（[^）]*）").expect("annotation pattern is valid"));

/// Placeholders sources use for "no value".
const PLACEHOLDERS: &[&str] = &["-", "--", "---", "—", "——", "N/A", "n/a", "NA", "null", "NULL", "None", "nan", "NaN"];

/// Strip exchange prefixes/suffixes and return the six-digit code.
pub fn normalize_code(raw: &str) -> Option<String> {
    let caps = CODE_PATTERN.captures(raw.trim())?;
    caps.get(1).map(|m| m.as_str().to_string())
}

/// Trim, collapse whitespace runs, and map placeholders to `None`.
pub fn clean_text(raw: &str) -> Option<String> {
    let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() || PLACEHOLDERS.contains(&text.as_str()) {
        return None;
    }
    Some(text)
}

/// Clean a company name and drop parenthesized annotations.
pub fn clean_name(raw: &str) -> Option<String> {
    let text = clean_text(raw)?;
    let stripped = ANNOTATION_PATTERN.replace_all(&text, "");
    clean_text(&stripped)
}

/// Parse numeric text such as "1,234.5", "3.2万" or "1.5亿".
///
/// Placeholders and unparseable text give `None`, never zero.
pub fn parse_number(raw: &str) -> Option<f64> {
    let text = clean_text(raw)?.replace([',', '，', ' '], "");
    let text = text.trim_end_matches('元');

    let (digits, scale) = if let Some(rest) = text.strip_suffix("万亿") {
        (rest, 1e12)
    } else if let Some(rest) = text.strip_suffix('亿') {
        (rest, 1e8)
    } else if let Some(rest) = text.strip_suffix('万') {
        (rest, 1e4)
    } else {
        (text, 1.0)
    };

    if PLACEHOLDERS.contains(&digits) {
        return None;
    }
    let value: f64 = digits.parse().ok()?;
    let value = value * scale;
    value.is_finite().then_some(value)
}

/// Parse a report date: "20240331", "2024/03/31", "2024-03-31" or
/// "2024-03-31 00:00:00".
pub fn parse_report_date(raw: &str) -> Option<NaiveDate> {
    let text = raw.trim();
    let date_part = text.split([' ', 'T']).next().unwrap_or(text);
    ["%Y-%m-%d", "%Y%m%d", "%Y/%m/%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("600000").as_deref(), Some("600000"));
        assert_eq!(normalize_code("sh600000").as_deref(), Some("600000"));
        assert_eq!(normalize_code(" SZ000001 ").as_deref(), Some("000001"));
        assert_eq!(normalize_code("bj830799").as_deref(), Some("830799"));
        assert_eq!(normalize_code("600000.SH").as_deref(), Some("600000"));
        assert_eq!(normalize_code("600000.ss").as_deref(), Some("600000"));
        assert_eq!(normalize_code("60000"), None);
        assert_eq!(normalize_code("6000001"), None);
        assert_eq!(normalize_code("-"), None);
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  万科\u{3000}A  ").as_deref(), Some("万科 A"));
        assert_eq!(clean_text("a \t\n b").as_deref(), Some("a b"));
        assert_eq!(clean_text("--"), None);
        assert_eq!(clean_text("   "), None);
        assert_eq!(clean_text("None"), None);
    }

    #[test]
    fn test_clean_name_drops_annotations() {
        assert_eq!(clean_name("平安银行(退市整理)").as_deref(), Some("平安银行"));
        assert_eq!(clean_name("万科Ａ（A股）").as_deref(), Some("万科Ａ"));
        assert_eq!(clean_name("(空)"), None);
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("1,234.5"), Some(1234.5));
        assert_eq!(parse_number("3.2万"), Some(32_000.0));
        assert_eq!(parse_number("1.5亿"), Some(150_000_000.0));
        assert_eq!(parse_number("2万亿"), Some(2e12));
        assert_eq!(parse_number("-12.5"), Some(-12.5));
        assert_eq!(parse_number("0"), Some(0.0));
        assert_eq!(parse_number("--"), None);
        assert_eq!(parse_number("-"), None);
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("inf"), None);
    }

    #[test]
    fn test_parse_report_date() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 31);
        assert_eq!(parse_report_date("20240331"), expected);
        assert_eq!(parse_report_date("2024/03/31"), expected);
        assert_eq!(parse_report_date("2024-03-31"), expected);
        assert_eq!(parse_report_date("2024-03-31 00:00:00"), expected);
        assert_eq!(parse_report_date("2024-03-31T00:00:00"), expected);
        assert_eq!(parse_report_date("2024-13-01"), None);
    }
}
