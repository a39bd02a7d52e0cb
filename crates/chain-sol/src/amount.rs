//! Decimal amount normalization.
//!
//! Users type amounts as decimal strings ("1.5"); the ledger only knows
//! integer base units (lamports for the native unit, mint-specific units
//! for tokens). Conversion is done on the digit string itself so no value
//! ever passes through floating point.
//!
//! Rounding rule: the value is rounded half-up at the first digit beyond
//! the precision. `normalize("0.0000000015", 9) == 2` and
//! `normalize("0.0000000014", 9) == 1`.

use crate::error::SolError;

/// Decimals of the native unit.
pub const NATIVE_DECIMALS: u8 = 9;

/// Base units (lamports) in one whole native unit.
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Largest precision whose scale factor still fits in a `u64`.
pub const MAX_DECIMALS: u8 = 19;

/// Convert a decimal string into base units for the given precision.
pub fn normalize(input: &str, decimals: u8) -> Result<u64, SolError> {
    let scale = scale_for(decimals)?;
    let text = input.trim();

    if text.is_empty() {
        return Err(SolError::InvalidAmount("amount is empty".into()));
    }
    if text.starts_with('-') {
        return Err(SolError::InvalidAmount(format!(
            "negative amounts are not allowed: {text}"
        )));
    }

    let (whole, frac) = text.split_once('.').unwrap_or((text, ""));
    if whole.is_empty() && frac.is_empty() {
        return Err(SolError::InvalidAmount(format!("not a decimal number: {text}")));
    }
    if !is_digits(whole) || !is_digits(frac) {
        return Err(SolError::InvalidAmount(format!("not a decimal number: {text}")));
    }

    let precision = decimals as usize;
    let kept = &frac[..frac.len().min(precision)];
    let padding = 10u64.pow((precision - kept.len()) as u32);

    let whole_units = parse_digits(whole)?
        .checked_mul(scale)
        .ok_or_else(|| overflow(text))?;
    let frac_units = parse_digits(kept)?
        .checked_mul(padding)
        .ok_or_else(|| overflow(text))?;
    let round_up = frac
        .as_bytes()
        .get(precision)
        .is_some_and(|digit| *digit >= b'5');

    whole_units
        .checked_add(frac_units)
        .and_then(|units| units.checked_add(u64::from(round_up)))
        .ok_or_else(|| overflow(text))
}

/// Render base units as the shortest decimal string that normalizes back
/// to the same value.
pub fn format_amount(base_units: u64, decimals: u8) -> Result<String, SolError> {
    let scale = scale_for(decimals)?;
    let whole = base_units / scale;
    let frac = base_units % scale;

    if frac == 0 {
        return Ok(whole.to_string());
    }

    let width = decimals as usize;
    let digits = format!("{frac:0width$}");
    Ok(format!("{whole}.{}", digits.trim_end_matches('0')))
}

fn scale_for(decimals: u8) -> Result<u64, SolError> {
    if decimals > MAX_DECIMALS {
        return Err(SolError::InvalidAmount(format!(
            "precision of {decimals} decimals is not supported (max {MAX_DECIMALS})"
        )));
    }
    Ok(10u64.pow(u32::from(decimals)))
}

fn is_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

fn parse_digits(digits: &str) -> Result<u64, SolError> {
    digits.bytes().try_fold(0u64, |acc, b| {
        acc.checked_mul(10)
            .and_then(|v| v.checked_add(u64::from(b - b'0')))
            .ok_or_else(|| overflow(digits))
    })
}

fn overflow(text: &str) -> SolError {
    SolError::InvalidAmount(format!("amount does not fit in 64-bit base units: {text}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- normalize ----------------------------------------------------------

    #[test]
    fn smallest_native_unit() {
        assert_eq!(normalize("0.000000001", 9).unwrap(), 1);
    }

    #[test]
    fn one_and_a_half_native() {
        assert_eq!(normalize("1.5", 9).unwrap(), 1_500_000_000);
    }

    #[test]
    fn whole_number_without_point() {
        assert_eq!(normalize("2", 6).unwrap(), 2_000_000);
    }

    #[test]
    fn leading_and_trailing_point_forms() {
        assert_eq!(normalize(".5", 6).unwrap(), 500_000);
        assert_eq!(normalize("3.", 6).unwrap(), 3_000_000);
    }

    #[test]
    fn zero_decimals_rounds_fraction() {
        assert_eq!(normalize("7.4", 0).unwrap(), 7);
        assert_eq!(normalize("7.5", 0).unwrap(), 8);
    }

    #[test]
    fn rounds_half_up_at_first_dropped_digit() {
        assert_eq!(normalize("0.0000000015", 9).unwrap(), 2);
        assert_eq!(normalize("0.0000000014", 9).unwrap(), 1);
        assert_eq!(normalize("0.00000000149999", 9).unwrap(), 1);
    }

    #[test]
    fn dust_below_half_unit_rounds_to_zero() {
        assert_eq!(normalize("0.0000000004", 9).unwrap(), 0);
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        assert_eq!(normalize("  1.25 ", 2).unwrap(), 125);
    }

    #[test]
    fn negative_is_rejected() {
        let err = normalize("-1", 9).unwrap_err();
        assert!(matches!(err, SolError::InvalidAmount(_)));
    }

    #[test]
    fn empty_and_lone_point_are_rejected() {
        assert!(normalize("", 9).is_err());
        assert!(normalize("   ", 9).is_err());
        assert!(normalize(".", 9).is_err());
    }

    #[test]
    fn non_numeric_forms_are_rejected() {
        for input in ["abc", "1.2.3", "1e9", "+1", "1,5", "0x10", "NaN", "1 000"] {
            assert!(normalize(input, 9).is_err(), "{input} should be rejected");
        }
    }

    #[test]
    fn overflow_is_rejected() {
        assert!(normalize("18446744074", 9).is_err());
        assert!(normalize("99999999999999999999999", 0).is_err());
    }

    #[test]
    fn rounding_into_overflow_is_rejected() {
        // u64::MAX followed by a fraction that rounds up.
        assert!(normalize("18446744073709551615.5", 0).is_err());
    }

    #[test]
    fn largest_representable_value() {
        assert_eq!(normalize("18446744073709551615", 0).unwrap(), u64::MAX);
    }

    #[test]
    fn unsupported_precision_is_rejected() {
        assert!(normalize("1", 20).is_err());
        assert_eq!(normalize("1", 19).unwrap(), 10_000_000_000_000_000_000);
    }

    // -- format_amount ------------------------------------------------------

    #[test]
    fn format_strips_trailing_zeros() {
        assert_eq!(format_amount(1_500_000_000, 9).unwrap(), "1.5");
        assert_eq!(format_amount(2_000_000, 6).unwrap(), "2");
        assert_eq!(format_amount(1, 9).unwrap(), "0.000000001");
        assert_eq!(format_amount(0, 9).unwrap(), "0");
    }

    #[test]
    fn renormalizing_formatted_output_is_stable() {
        let cases = [
            ("0.000000001", 9),
            ("1.5", 9),
            ("123.456789", 6),
            ("0.0000000015", 9),
            ("42", 0),
            ("7.5", 0),
            ("18446744073.709551615", 9),
        ];
        for (input, decimals) in cases {
            let once = normalize(input, decimals).unwrap();
            let formatted = format_amount(once, decimals).unwrap();
            assert_eq!(normalize(&formatted, decimals).unwrap(), once, "{input}");
        }
    }

    #[test]
    fn lamports_per_sol_matches_native_decimals() {
        assert_eq!(normalize("1", NATIVE_DECIMALS).unwrap(), LAMPORTS_PER_SOL);
    }
}
