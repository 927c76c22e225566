//! Coordinate parsing for SVG length attributes.
//!
//! Units are stripped, not converted. A document mixing `mm` and `px`
//! produces inconsistent geometry; keep one unit per document.

use std::fmt;

/// Suffixes accepted on coordinate values.
const UNIT_SUFFIXES: [&str; 6] = ["px", "pt", "cm", "mm", "in", "%"];

/// A coordinate value whose unit suffix is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedUnit(pub String);

impl fmt::Display for UnsupportedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "coordinate value `{}` has unrecognised units", self.0)
    }
}

impl std::error::Error for UnsupportedUnit {}

/// Strips the unit from a coordinate and returns the magnitude.
///
/// `"10px"`, `"10pt"` and `"10"` all yield `10.0`.
///
/// # Errors
///
/// Returns [`UnsupportedUnit`] for unknown suffixes and non-numeric values.
pub fn parse_coordinate(value: &str) -> Result<f64, UnsupportedUnit> {
    let trimmed = value.trim();
    let magnitude = UNIT_SUFFIXES
        .iter()
        .find_map(|suffix| trimmed.strip_suffix(suffix))
        .unwrap_or(trimmed)
        .trim_end();

    match magnitude.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(UnsupportedUnit(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffixes_are_stripped_not_converted() {
        for value in ["10px", "10pt", "10cm", "10mm", "10in", "10%", "10"] {
            assert_eq!(parse_coordinate(value), Ok(10.0), "{value}");
        }
    }

    #[test]
    fn test_fractional_and_negative_values() {
        assert_eq!(parse_coordinate("-2.5px"), Ok(-2.5));
        assert_eq!(parse_coordinate(" 0.125 "), Ok(0.125));
    }

    #[test]
    fn test_unknown_unit_is_rejected() {
        assert_eq!(
            parse_coordinate("3em"),
            Err(UnsupportedUnit("3em".to_string()))
        );
        assert!(parse_coordinate("px").is_err());
        assert!(parse_coordinate("").is_err());
        assert!(parse_coordinate("nan").is_err());
    }
}
