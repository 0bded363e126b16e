//! Human readable size parsing
//!
//! Sizes are written as a magnitude followed by a single unit symbol
//! (`10G`, `512M`, `1.5T`). Bare numbers are taken to already be in the
//! caller's unit and are passed through untouched.

use crate::error::{MkvmError, MkvmResult};

/// Binary size units, each expressed as a multiple of one KiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeUnit {
    K,
    M,
    G,
    T,
}

impl SizeUnit {
    pub fn from_symbol(symbol: char) -> Option<Self> {
        match symbol {
            'K' => Some(SizeUnit::K),
            'M' => Some(SizeUnit::M),
            'G' => Some(SizeUnit::G),
            'T' => Some(SizeUnit::T),
            _ => None,
        }
    }

    pub fn symbol(self) -> char {
        match self {
            SizeUnit::K => 'K',
            SizeUnit::M => 'M',
            SizeUnit::G => 'G',
            SizeUnit::T => 'T',
        }
    }

    pub fn kib_factor(self) -> u64 {
        match self {
            SizeUnit::K => 1,
            SizeUnit::M => 1024,
            SizeUnit::G => 1_048_576,
            SizeUnit::T => 1_073_741_824,
        }
    }
}

fn is_plain_number(size: &str) -> bool {
    !size.is_empty() && size.chars().all(|c| c.is_ascii_digit() || c == '.')
}

fn parse_magnitude(raw: &str, size: &str) -> MkvmResult<f64> {
    let value: f64 = raw
        .parse()
        .map_err(|_| MkvmError::configuration(format!("Invalid size '{}'", size)))?;
    if !value.is_finite() || value < 0.0 {
        return Err(MkvmError::configuration(format!("Invalid size '{}'", size)));
    }
    Ok(value)
}

fn to_count(value: f64, size: &str) -> MkvmResult<u64> {
    let value = value.trunc();
    if value >= u64::MAX as f64 {
        return Err(MkvmError::configuration(format!("Size '{}' is too large", size)));
    }
    Ok(value as u64)
}

/// Convert a size string into an integer count of `target` units.
///
/// When the input unit equals the target the magnitude is returned as is;
/// otherwise it goes through KiB and the result is truncated toward zero.
pub fn convert(size: &str, target: SizeUnit) -> MkvmResult<u64> {
    let size = size.trim();

    if is_plain_number(size) {
        return to_count(parse_magnitude(size, size)?, size);
    }

    let symbol = size
        .chars()
        .last()
        .ok_or_else(|| MkvmError::configuration("Empty size"))?;
    let magnitude = parse_magnitude(&size[..size.len() - symbol.len_utf8()], size)?;

    if symbol == target.symbol() {
        return to_count(magnitude, size);
    }

    let unit = SizeUnit::from_symbol(symbol)
        .ok_or_else(|| MkvmError::configuration(format!("Unit {} makes no sense!", symbol)))?;

    let kib = magnitude * unit.kib_factor() as f64;
    to_count(kib / target.kib_factor() as f64, size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use test_case::test_case;

    #[test_case("10G", SizeUnit::K, 10_485_760 ; "gibibytes to kibibytes")]
    #[test_case("2G", SizeUnit::M, 2048 ; "gibibytes to mebibytes")]
    #[test_case("15G", SizeUnit::K, 15_728_640 ; "template disk")]
    #[test_case("1T", SizeUnit::G, 1024 ; "tebibytes to gibibytes")]
    #[test_case("1536K", SizeUnit::M, 1 ; "truncates toward zero")]
    #[test_case("1.5G", SizeUnit::M, 1536 ; "fractional magnitude")]
    #[test_case("5M", SizeUnit::M, 5 ; "same unit is returned directly")]
    #[test_case("1024", SizeUnit::K, 1024 ; "bare number passes through")]
    #[test_case("1024", SizeUnit::M, 1024 ; "bare number ignores target")]
    #[test_case("12.9", SizeUnit::K, 12 ; "bare decimal truncates")]
    fn test_convert(size: &str, target: SizeUnit, expected: u64) {
        assert_eq!(convert(size, target).unwrap(), expected);
    }

    #[test]
    fn test_unknown_unit_names_the_unit() {
        let err = convert("7X", SizeUnit::K).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("Unit X"), "got: {}", err);
    }

    #[test]
    fn test_malformed_sizes() {
        for bad in ["", "G", "abcG", "-5G", "1.2.3"] {
            let err = convert(bad, SizeUnit::K).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Configuration, "input {:?}", bad);
        }
    }

    #[test]
    fn test_oversized_values_are_rejected() {
        for huge in ["1e30G", "1e30K", "99999999999999999999999"] {
            let err = convert(huge, SizeUnit::K).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Configuration, "input {:?}", huge);
            assert!(err.to_string().contains("too large"), "got: {}", err);
        }
        assert_eq!(convert("16777216T", SizeUnit::T).unwrap(), 16_777_216);
    }

    #[test]
    fn test_symbol_lookup() {
        assert_eq!(SizeUnit::from_symbol('T'), Some(SizeUnit::T));
        assert_eq!(SizeUnit::from_symbol('k'), None);
        for unit in [SizeUnit::K, SizeUnit::M, SizeUnit::G, SizeUnit::T] {
            assert_eq!(SizeUnit::from_symbol(unit.symbol()), Some(unit));
        }
        assert_eq!(SizeUnit::T.kib_factor(), 1024 * SizeUnit::G.kib_factor());
    }
}
