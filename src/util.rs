//! This is an internal module that contains utility functionality used by other modules.

use num_traits::ToPrimitive;

use crate::{notation, variable::Status};

/// Is `name` usable as a C identifier in generated code? `%` characters are template
/// placeholders and are ignored.
pub fn is_valid_c_identifier(name: &str) -> bool {
    let mut chars = name.chars().filter(|c| *c != '%');
    match chars.next() {
        Some(first) if first == '_' || first.is_ascii_alphabetic() => {
            chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
        }
        _ => false,
    }
}

/// Round a frequency or count to an integer, saturating at the `i64` range. NaN maps to 0.
pub fn round_i64(value: f64) -> i64 {
    if value.is_nan() {
        return 0;
    }
    value.round().to_i64().unwrap_or(if value > 0.0 { i64::MAX } else { i64::MIN })
}

/// `value >> shift` for register-encoded power-of-two dividers, tolerating silly shift values.
pub fn shift_divide(value: i64, shift: i64) -> i64 {
    match u32::try_from(shift) {
        Ok(s) if s < 63 => value >> s,
        Ok(_) => 0,
        Err(_) => value,
    }
}

/// `1 << shift`, or `None` when the shift does not fit.
pub fn power_of_two(shift: i64) -> Option<i64> {
    u32::try_from(shift).ok().filter(|s| *s < 63).map(|s| 1_i64 << s)
}

/// Append `text` to a provenance chain, on a new line.
pub fn chain(origin: &str, text: &str) -> String {
    if origin.is_empty() {
        text.to_owned()
    } else {
        format!("{origin}\n{text}")
    }
}

/// Count register value giving `duration` at `tick` seconds per count, for counters that
/// run `count + 1` ticks. Never negative; 0 when there is no clock.
pub fn ticks(duration: f64, tick: f64) -> i64 {
    if tick <= 0.0 {
        return 0;
    }
    round_i64(duration / tick - 1.0).max(0)
}

/// WARNING for a computed value outside its legal `[min, max]`.
pub fn range_status(value: f64, min: f64, max: f64) -> Option<Status> {
    if (min..=max).contains(&value) {
        return None;
    }
    Some(Status::warning(format!(
        "Value {} not in legal range [{}, {}]",
        notation::format(value, 3),
        notation::format(min, 3),
        notation::format(max, 3)
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c_identifiers() {
        assert!(is_valid_c_identifier("ClockConfig_RUN"));
        assert!(is_valid_c_identifier("_fast48"));
        assert!(is_valid_c_identifier("%clock%Config"));
        assert!(!is_valid_c_identifier("48MHz"));
        assert!(!is_valid_c_identifier("fast clock"));
        assert!(!is_valid_c_identifier(""));
        assert!(!is_valid_c_identifier("%%"));
    }

    #[test]
    fn shifts() {
        assert_eq!(shift_divide(48_000_000, 2), 12_000_000);
        assert_eq!(shift_divide(48_000_000, -1), 48_000_000);
        assert_eq!(power_of_two(5), Some(32));
        assert_eq!(power_of_two(70), None);
        assert_eq!(round_i64(2.5), 3);
        assert_eq!(round_i64(f64::NAN), 0);
    }

    #[test]
    fn counter_ticks() {
        // 1ms at 1MHz is 1000 ticks, so the register holds 999
        assert_eq!(ticks(1e-3, 1e-6), 999);
        assert_eq!(ticks(0.0, 1e-6), 0);
        assert_eq!(ticks(1e-3, 0.0), 0);
    }
}
