//! Engineering notation: SI-prefixed formatting of frequencies and periods, and the matching
//! parser used for choice substitutions and user-entered values.

use num_traits::ToPrimitive;

use crate::variable::ValueError;

const PREFIXES: [&str; 10] = ["f", "p", "n", "u", "m", "", "k", "M", "G", "T"];
/// Position of the empty prefix in `PREFIXES`.
const PREFIX_OFFSET: i32 = 5;

/// Format `value` with an SI prefix and `sig_digits` significant digits, eg 32768 -> "32.8k".
/// Values outside the prefix table fall back to plain formatting.
pub fn format(value: f64, sig_digits: u32) -> String {
    if value == 0.0 {
        return "0.0".to_owned();
    }
    if !value.is_finite() {
        return value.to_string();
    }
    if value < 0.0 {
        return format!("-{}", format(-value, sig_digits));
    }
    let sig = sig_digits.clamp(1, 9) as i32;

    let mut pow10 = value.log10().floor() as i32;
    let mut mantissa = scaled_mantissa(value, pow10, sig);
    // Rounding can carry into an extra digit, eg 9.996 at 3 digits.
    if mantissa >= 10_i64.pow(sig as u32) {
        pow10 += 1;
        mantissa = scaled_mantissa(value, pow10, sig);
    }

    let slot = pow10 + 3 * PREFIX_OFFSET;
    if slot < 0 || slot / 3 >= PREFIXES.len() as i32 {
        return value.to_string();
    }
    let suffix = PREFIXES[(slot / 3) as usize];

    let decimals = sig - 1 - (24 + pow10).rem_euclid(3);
    let digits = if decimals < 1 {
        (mantissa * 10_i64.pow((-decimals) as u32)).to_string()
    } else {
        let divisor = 10_i64.pow(decimals as u32);
        format!(
            "{}.{:0width$}",
            mantissa / divisor,
            mantissa % divisor,
            width = decimals as usize
        )
    };
    digits + suffix
}

fn scaled_mantissa(value: f64, pow10: i32, sig: i32) -> i64 {
    (value / 10f64.powi(pow10) * 10f64.powi(sig - 1))
        .round()
        .to_i64()
        .unwrap_or(0)
}

/// Format a frequency in Hz at three significant digits, eg "24.0MHz".
pub fn hz(frequency: f64) -> String {
    format(frequency, 3) + "Hz"
}

/// Format a period in seconds at three significant digits, eg "1.00ms".
pub fn seconds(period: f64) -> String {
    format(period, 3) + "s"
}

fn multiplier(suffix: &str) -> Option<f64> {
    let factor = match suffix {
        "" => 1.0,
        "f" => 1e-15,
        "p" => 1e-12,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "ki" | "kiB" => 1024.0,
        "Mi" | "MiB" => 1024.0 * 1024.0,
        _ => return None,
    };
    Some(factor)
}

/// Parse a number in engineering notation: optional `-`, then binary (`0b101`), hex (`0x1F`)
/// or decimal (`1.5`, `2E-3`), then optional whitespace or `_`, an optional multiplier
/// (`k`, `M`, `ki` ...) and an optional unit (`Hz`, `s`).
pub fn parse(text: &str) -> Result<f64, ValueError> {
    let illegal = || ValueError::NotANumber(text.to_owned());
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("infinity") {
        return Ok(f64::INFINITY);
    }

    let (negative, rest) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let (magnitude, rest) = if let Some(bits) = rest.strip_prefix("0b") {
        let end = bits.find(|c: char| c != '0' && c != '1').unwrap_or(bits.len());
        let value = i64::from_str_radix(&bits[..end], 2).map_err(|_| illegal())?;
        (value as f64, &bits[end..])
    } else if let Some(hex) = rest.strip_prefix("0x") {
        let end = hex
            .find(|c: char| !c.is_ascii_hexdigit())
            .unwrap_or(hex.len());
        let value = i64::from_str_radix(&hex[..end], 16).map_err(|_| illegal())?;
        (value as f64, &hex[end..])
    } else {
        let end = decimal_len(rest);
        if !rest[..end].chars().any(|c| c.is_ascii_digit()) {
            return Err(illegal());
        }
        let value = rest[..end].parse::<f64>().map_err(|_| illegal())?;
        (value, &rest[end..])
    };

    let rest = rest.trim_start_matches([' ', '\t', '\n', '_']);
    let rest = rest
        .strip_suffix("Hz")
        .or_else(|| rest.strip_suffix("hz"))
        .or_else(|| rest.strip_suffix('s').filter(|r| !r.ends_with("Mi") && !r.ends_with("ki")))
        .unwrap_or(rest);
    let factor = multiplier(rest).ok_or_else(illegal)?;

    let value = magnitude * factor;
    Ok(if negative { -value } else { value })
}

/// Length of the leading `digits[.digits][E[-]digits]` run.
fn decimal_len(text: &str) -> usize {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i < bytes.len() && (bytes[i] == b'E' || bytes[i] == b'e') {
        let mut j = i + 1;
        if j < bytes.len() && bytes[j] == b'-' {
            j += 1;
        }
        let digits_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > digits_start {
            i = j;
        }
    }
    i
}

/// As [`parse`], rounded to the nearest integer.
pub fn parse_long(text: &str) -> Result<i64, ValueError> {
    parse(text)?
        .round()
        .to_i64()
        .ok_or_else(|| ValueError::NotANumber(text.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_prefixes() {
        assert_eq!(format(24_000_000.0, 3), "24.0M");
        assert_eq!(format(32_768.0, 3), "32.8k");
        assert_eq!(format(3_000_000.0, 3), "3.00M");
        assert_eq!(format(750_000.0, 3), "750k");
        assert_eq!(format(23_986_176.0, 5), "23.986M");
        assert_eq!(format(0.001, 3), "1.00m");
        assert_eq!(format(0.0, 3), "0.0");
        assert_eq!(format(-48e6, 2), "-48M");
        assert_eq!(hz(48e6), "48.0MHz");
    }

    #[test]
    fn rounding_carry_moves_to_next_decade() {
        assert_eq!(format(99_960.0, 3), "100k");
        assert_eq!(format(999_600.0, 3), "1.00M");
    }

    #[test]
    fn parses_numbers_and_suffixes() {
        assert_eq!(parse("12"), Ok(12.0));
        assert_eq!(parse("0b0110"), Ok(6.0));
        assert_eq!(parse("0x1F"), Ok(31.0));
        assert_eq!(parse("-3"), Ok(-3.0));
        assert_eq!(parse("8MHz"), Ok(8e6));
        assert_eq!(parse("32.5 kHz"), Ok(32_500.0));
        assert!((parse("1.5ms").unwrap() - 1.5e-3).abs() < 1e-15);
        assert_eq!(parse("2E-3s"), Ok(2e-3));
        assert_eq!(parse("4ki"), Ok(4096.0));
        assert_eq!(parse("Infinity"), Ok(f64::INFINITY));
        assert_eq!(parse_long("0b11"), Ok(3));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse("").is_err());
        assert!(parse("MHz").is_err());
        assert!(parse("12 apples").is_err());
        assert!(parse("McgClockMode_FEI").is_err());
        assert!(parse("0b").is_err());
    }
}
