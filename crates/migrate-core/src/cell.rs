//! Cell value representation.
//!
//! Provides the [`CellValue`] enum which represents the typed value of a
//! single cell as resolved by the streaming reader, before it is bound
//! onto an application row type by the row mapper.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Represents the value of a cell once its type has been resolved from the
/// worksheet XML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    /// No value (empty cell, or a column absent from a sparse row).
    Empty,
    /// Boolean value.
    Bool(bool),
    /// Numeric value (integers are stored as f64 in the source format).
    Number(f64),
    /// String value (shared string or inline string).
    String(String),
    /// A numeric cell whose style resolved to a date/time number format.
    /// Carries the Excel serial value; conversion to a calendar date is
    /// done on demand via [`crate::numfmt::serial_to_date`].
    Date(f64),
    /// Formula with its cached result, as written by the producing
    /// application. The expression itself is never evaluated.
    Formula {
        expr: String,
        result: Option<Box<CellValue>>,
    },
    /// Error value (e.g. #DIV/0!, #N/A, #VALUE!).
    Error(String),
}

impl Default for CellValue {
    fn default() -> Self {
        Self::Empty
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => write!(f, ""),
            CellValue::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            CellValue::Number(n) => write!(f, "{}", format_plain_number(*n)),
            CellValue::String(s) => write!(f, "{s}"),
            CellValue::Date(serial) => match crate::numfmt::serial_to_date(*serial) {
                Some(date) => write!(f, "{}", date.format("%Y-%m-%d")),
                None => write!(f, "{}", format_plain_number(*serial)),
            },
            CellValue::Formula { result, expr, .. } => {
                if let Some(result) = result {
                    write!(f, "{result}")
                } else {
                    write!(f, "={expr}")
                }
            }
            CellValue::Error(e) => write!(f, "{e}"),
        }
    }
}

/// Formats a number the way the migration pipeline needs identifiers
/// formatted: no scientific notation, no lost leading precision for
/// integral values.
pub(crate) fn format_plain_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e18 {
        format!("{n:.0}")
    } else {
        format!("{n}")
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::String(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::String(s)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_value_default_is_empty() {
        assert_eq!(CellValue::default(), CellValue::Empty);
    }

    #[test]
    fn test_cell_value_display_number() {
        assert_eq!(CellValue::Number(42.0).to_string(), "42");
        assert_eq!(CellValue::Number(3.14).to_string(), "3.14");
    }

    #[test]
    fn test_cell_value_display_large_integral_has_no_scientific_notation() {
        // This is the identifier-preservation case: a long numeric code
        // must never render as 1.234567e11.
        assert_eq!(CellValue::Number(123_456_700_000.0).to_string(), "123456700000");
    }

    #[test]
    fn test_cell_value_display_date() {
        // 45000 is 2023-03-15 under the 1900 epoch.
        let s = CellValue::Date(45000.0).to_string();
        assert_eq!(s, "2023-03-15");
    }

    #[test]
    fn test_cell_value_display_formula_with_cached_result() {
        let v = CellValue::Formula {
            expr: "A1+B1".to_string(),
            result: Some(Box::new(CellValue::Number(42.0))),
        };
        assert_eq!(v.to_string(), "42");
    }

    #[test]
    fn test_cell_value_display_formula_without_cached_result() {
        let v = CellValue::Formula {
            expr: "A1+B1".to_string(),
            result: None,
        };
        assert_eq!(v.to_string(), "=A1+B1");
    }

    #[test]
    fn test_cell_value_display_bool_and_error() {
        assert_eq!(CellValue::Bool(true).to_string(), "TRUE");
        assert_eq!(CellValue::Bool(false).to_string(), "FALSE");
        assert_eq!(CellValue::Error("#DIV/0!".to_string()).to_string(), "#DIV/0!");
    }

    #[test]
    fn test_cell_value_from_conversions() {
        let v: CellValue = "hello".into();
        assert_eq!(v, CellValue::String("hello".to_string()));
        let v: CellValue = 3.14.into();
        assert_eq!(v, CellValue::Number(3.14));
        let v: CellValue = true.into();
        assert_eq!(v, CellValue::Bool(true));
    }
}
