//! Parsing of timeout values such as `30s`, `250ms` or `1h15m`.
//!
//! A duration is a sequence of decimal numbers, each with an optional fraction
//! and a mandatory unit suffix. Valid units are `ns`, `us` (or `µs`), `ms`,
//! `s`, `m` and `h`. The bare string `0` is accepted as zero.

use std::time::Duration;

use crate::error::ParseDurationError;

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SEC: u128 = 1_000_000_000;

fn unit_nanos(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" | "μs" => Some(NANOS_PER_MICRO),
        "ms" => Some(NANOS_PER_MILLI),
        "s" => Some(NANOS_PER_SEC),
        "m" => Some(60 * NANOS_PER_SEC),
        "h" => Some(3_600 * NANOS_PER_SEC),
        _ => None,
    }
}

/// Parse a duration string. Usable directly as a clap `value_parser`.
pub fn parse_duration(value: &str) -> Result<Duration, ParseDurationError> {
    let input = value.trim();
    if input.is_empty() {
        return Err(ParseDurationError::Empty);
    }
    if input == "0" {
        return Ok(Duration::ZERO);
    }

    let invalid = || ParseDurationError::InvalidNumber {
        value: value.to_string(),
    };
    let overflow = || ParseDurationError::Overflow {
        value: value.to_string(),
    };

    let mut rest = input;
    let mut total: u128 = 0;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, after) = rest.split_at(number_len);

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
            return Err(invalid());
        }

        let unit_len = after
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(after.len());
        let (unit, tail) = after.split_at(unit_len);
        if unit.is_empty() {
            return Err(ParseDurationError::MissingUnit {
                value: value.to_string(),
            });
        }
        let scale = unit_nanos(unit).ok_or_else(|| ParseDurationError::UnknownUnit {
            value: value.to_string(),
            unit: unit.to_string(),
        })?;

        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| overflow())?
        };
        let mut nanos = whole.checked_mul(scale).ok_or_else(overflow)?;

        if !fraction.is_empty() {
            // Digits past nanosecond precision cannot change the result.
            let digits = &fraction[..fraction.len().min(18)];
            let numerator: u128 = digits.parse().map_err(|_| invalid())?;
            let denominator = 10u128.pow(digits.len() as u32);
            nanos = nanos
                .checked_add(numerator * scale / denominator)
                .ok_or_else(overflow)?;
        }

        total = total.checked_add(nanos).ok_or_else(overflow)?;
        rest = tail;
    }

    let nanos: u64 = total.try_into().map_err(|_| overflow())?;
    Ok(Duration::from_nanos(nanos))
}
