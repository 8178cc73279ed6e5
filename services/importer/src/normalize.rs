//! Field normalizers.
//!
//! Every function here is total: any input, however malformed, yields
//! either a canonical value or `None`, never an error. That lets the
//! row cleaner treat "missing/invalid field" uniformly as data.

use chrono::{Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::DEFAULT_COUNTRY;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9._%+\-]*@[a-z0-9][a-z0-9.\-]*\.[a-z]{2,}$").unwrap()
});

/// Values the POS operators type in when a customer has no email.
const EMAIL_PLACEHOLDERS: &[&str] = &[
    "noemail",
    "no email",
    "noemail@noemail.com",
    "test@test",
    "test@test.com",
    "n/a",
    "na",
    "nil",
    "none",
    "-",
];

/// Excel serial day 1 is 1900-01-01; the epoch is offset by two days to
/// absorb the fictitious 1900-02-29.
const EXCEL_EPOCH: (i32, u32, u32) = (1899, 12, 30);
const MAX_EXCEL_SERIAL: f64 = 109_574.0; // 2199-12-31

/// Normalize a Malaysian phone number to local `0…` digits.
///
/// Accepts mobile (`01`, 10-11 digits) and landline (9-10 digits)
/// shapes, with `+60`/`60` country prefixes folded to a leading `0`.
pub fn phone(raw: &str) -> Option<String> {
    let mut digits: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();

    if let Some(rest) = digits.strip_prefix("+60") {
        digits = format!("0{rest}");
    } else if let Some(rest) = digits.strip_prefix("60") {
        // Local numbers never start with 6, so a 60 prefix is always
        // the country code.
        if rest.len() >= 8 {
            digits = format!("0{rest}");
        }
    }

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let len = digits.len();
    let mobile = digits.starts_with("01") && (10..=11).contains(&len);
    // 01 numbers are mobiles only; an undersized one must not slip
    // through the landline arm.
    let landline =
        digits.starts_with('0') && !digits.starts_with("01") && (9..=10).contains(&len);
    (mobile || landline).then_some(digits)
}

/// Lowercased, trimmed email, or `None` for placeholders and anything
/// that fails the shape check.
pub fn email(raw: &str) -> Option<String> {
    let value = raw.trim().to_lowercase();
    if value.is_empty() || EMAIL_PLACEHOLDERS.contains(&value.as_str()) {
        return None;
    }
    EMAIL_RE.is_match(&value).then_some(value)
}

/// Parse a date cell: Excel serial first, then `DD/MM/YYYY`,
/// `DD-MM-YYYY`, `YYYY-MM-DD`.
pub fn date(raw: &str) -> Option<NaiveDate> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(serial) = value.parse::<f64>() {
        return excel_serial_date(serial);
    }
    for format in ["%d/%m/%Y", "%d-%m-%Y", "%Y-%m-%d"] {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, format) {
            return Some(parsed);
        }
    }
    None
}

fn excel_serial_date(serial: f64) -> Option<NaiveDate> {
    if !(1.0..=MAX_EXCEL_SERIAL).contains(&serial) {
        return None;
    }
    let (y, m, d) = EXCEL_EPOCH;
    NaiveDate::from_ymd_opt(y, m, d)?.checked_add_signed(Duration::days(serial.trunc() as i64))
}

/// Expand a state abbreviation to the full name; unknown values pass
/// through unchanged.
pub fn state(raw: &str) -> String {
    let value = raw.trim();
    let expanded = match value.to_uppercase().as_str() {
        "KL" | "WP" | "WPKL" | "W.P." => "Kuala Lumpur",
        "SGR" | "SEL" => "Selangor",
        "JHR" => "Johor",
        "KDH" => "Kedah",
        "KTN" => "Kelantan",
        "MLK" => "Melaka",
        "NSN" | "N9" => "Negeri Sembilan",
        "PHG" => "Pahang",
        "PRK" => "Perak",
        "PLS" => "Perlis",
        "PNG" | "PP" => "Pulau Pinang",
        "SBH" => "Sabah",
        "SWK" => "Sarawak",
        "TRG" | "TGN" => "Terengganu",
        "LBN" => "Labuan",
        "PJY" => "Putrajaya",
        _ => return value.to_string(),
    };
    expanded.to_string()
}

/// Malaysian postcodes are exactly five digits.
pub fn postcode(raw: &str) -> Option<String> {
    let value = raw.trim();
    (value.len() == 5 && value.bytes().all(|b| b.is_ascii_digit())).then(|| value.to_string())
}

/// Country cell, defaulting when the export leaves it blank.
pub fn country(raw: &str) -> String {
    let value = raw.trim();
    if value.is_empty() {
        DEFAULT_COUNTRY.to_string()
    } else {
        value.to_string()
    }
}

/// Parse a money/number cell: strips an `RM` prefix, thousands
/// separators and whitespace.
pub fn amount(raw: &str) -> Option<f64> {
    let mut value = raw.trim().to_string();
    let lowered = value.to_lowercase();
    if let Some(rest) = lowered.strip_prefix("rm") {
        value = rest.to_string();
    }
    let cleaned: String = value
        .chars()
        .filter(|c| !matches!(c, ',' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    // "nan" and "inf" parse as valid f64 and would poison sums.
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

// =============================================================================
// TESTS
// =============================================================================
