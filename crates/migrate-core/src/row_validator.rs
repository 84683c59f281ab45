//! Row Validator: runs an ordered list of rules over a mapped row,
//! accumulating `(errorCode, message)` pairs without ever aborting
//! ingestion. A row with errors is still staged, error attached.

use std::collections::HashMap;

use crate::cell::CellValue;
use crate::row_mapper::MappedRow;

/// One validation rule. Returns `None` when the row passes, or
/// `Some((errorCode, message))` when it fails.
pub type Rule = Box<dyn Fn(&HashMap<String, CellValue>) -> Option<(String, String)> + Send + Sync>;

/// An ordered list of rules applied to every mapped row.
pub struct RowValidator {
    rules: Vec<Rule>,
}

impl RowValidator {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Requires `field` to be present and non-empty.
    pub fn require(self, field: impl Into<String> + 'static) -> Self {
        let field = field.into();
        self.add_rule(Box::new(move |row| match row.get(&field) {
            Some(CellValue::Empty) | None => Some((
                format!("REQUIRED_{}", field.to_uppercase()),
                format!("{field} is required"),
            )),
            _ => None,
        }))
    }

    /// Rejects string fields whose length falls outside `[min, max]`.
    pub fn length_between(self, field: impl Into<String> + 'static, min: usize, max: usize) -> Self {
        let field = field.into();
        self.add_rule(Box::new(move |row| {
            let len = match row.get(&field) {
                Some(value) => value.to_string().chars().count(),
                None => return None,
            };
            if len == 0 || (min..=max).contains(&len) {
                None
            } else {
                Some((
                    format!("INVALID_{}_LENGTH", field.to_uppercase()),
                    format!("{field} length {len} is outside [{min}, {max}]"),
                ))
            }
        }))
    }

    /// Requires `start_field` to be on or before `end_field` when both are
    /// present Excel serial dates.
    pub fn date_order(self, start_field: impl Into<String> + 'static, end_field: impl Into<String> + 'static) -> Self {
        let (start_field, end_field) = (start_field.into(), end_field.into());
        self.add_rule(Box::new(move |row| {
            let (Some(CellValue::Date(start)), Some(CellValue::Date(end))) =
                (row.get(&start_field), row.get(&end_field))
            else {
                return None;
            };
            if start <= end {
                None
            } else {
                Some((
                    "INVALID_DATE_LOGIC".to_string(),
                    format!("{end_field} precedes {start_field}"),
                ))
            }
        }))
    }

    /// Requires `field`'s string value (case-insensitive) to be one of
    /// `allowed`.
    pub fn one_of(self, field: impl Into<String> + 'static, allowed: &'static [&'static str]) -> Self {
        let field = field.into();
        self.add_rule(Box::new(move |row| {
            let value = match row.get(&field) {
                Some(CellValue::Empty) | None => return None,
                Some(v) => v.to_string(),
            };
            if allowed.iter().any(|a| a.eq_ignore_ascii_case(&value)) {
                None
            } else {
                Some((
                    format!("INVALID_{}_VALUE", field.to_uppercase()),
                    format!("{field} value '{value}' is not one of {allowed:?}"),
                ))
            }
        }))
    }

    /// Runs every rule against a mapped row's fields, folding in any
    /// coercion errors the row mapper already recorded, and returns the
    /// joined `(errorCode, message)` strings per §4.D.
    pub fn validate(&self, row: &MappedRow) -> ValidationOutcome {
        let mut codes: Vec<String> = row.coercion_errors.iter().map(|(c, _)| c.clone()).collect();
        let mut messages: Vec<String> = row.coercion_errors.iter().map(|(_, m)| m.clone()).collect();

        for rule in &self.rules {
            if let Some((code, message)) = rule(&row.fields) {
                codes.push(code);
                messages.push(message);
            }
        }

        if codes.is_empty() {
            ValidationOutcome { error_code: None, message: None }
        } else {
            ValidationOutcome {
                error_code: Some(codes.join(",")),
                message: Some(messages.join("; ")),
            }
        }
    }
}

impl Default for RowValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// The joined error code/message a row carries into staging, or `None`
/// when every rule passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub error_code: Option<String>,
    pub message: Option<String>,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        self.error_code.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapped(fields: &[(&str, CellValue)]) -> MappedRow {
        MappedRow {
            fields: fields.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            coercion_errors: Vec::new(),
        }
    }

    #[test]
    fn test_passing_row_has_no_error() {
        let validator = RowValidator::new().require("name");
        let row = mapped(&[("name", CellValue::String("Alice".to_string()))]);
        assert!(validator.validate(&row).is_valid());
    }

    #[test]
    fn test_required_field_missing_is_flagged() {
        let validator = RowValidator::new().require("name");
        let row = mapped(&[]);
        let outcome = validator.validate(&row);
        assert_eq!(outcome.error_code.as_deref(), Some("REQUIRED_NAME"));
    }

    #[test]
    fn test_multiple_failed_rules_join_codes_and_messages() {
        let validator = RowValidator::new().require("name").length_between("code", 5, 10);
        let row = mapped(&[("code", CellValue::String("ab".to_string()))]);
        let outcome = validator.validate(&row);
        assert_eq!(outcome.error_code.as_deref(), Some("REQUIRED_NAME,INVALID_CODE_LENGTH"));
        assert!(outcome.message.unwrap().contains("; "));
    }

    #[test]
    fn test_date_order_rule_flags_end_before_start() {
        let validator = RowValidator::new().date_order("start", "end");
        let row = mapped(&[("start", CellValue::Date(100.0)), ("end", CellValue::Date(50.0))]);
        let outcome = validator.validate(&row);
        assert_eq!(outcome.error_code.as_deref(), Some("INVALID_DATE_LOGIC"));
    }

    #[test]
    fn test_date_order_rule_passes_when_ordered() {
        let validator = RowValidator::new().date_order("start", "end");
        let row = mapped(&[("start", CellValue::Date(50.0)), ("end", CellValue::Date(100.0))]);
        assert!(validator.validate(&row).is_valid());
    }

    #[test]
    fn test_one_of_rule_rejects_unknown_enum_value() {
        let validator = RowValidator::new().one_of("status", &["ACTIVE", "INACTIVE"]);
        let row = mapped(&[("status", CellValue::String("PENDING".to_string()))]);
        let outcome = validator.validate(&row);
        assert_eq!(outcome.error_code.as_deref(), Some("INVALID_STATUS_VALUE"));
    }

    #[test]
    fn test_one_of_rule_is_case_insensitive() {
        let validator = RowValidator::new().one_of("status", &["ACTIVE", "INACTIVE"]);
        let row = mapped(&[("status", CellValue::String("active".to_string()))]);
        assert!(validator.validate(&row).is_valid());
    }

    #[test]
    fn test_coercion_errors_from_mapper_are_folded_in() {
        let validator = RowValidator::new();
        let mut row = mapped(&[]);
        row.coercion_errors.push(("CONVERSION_ERROR".to_string(), "bad value".to_string()));
        let outcome = validator.validate(&row);
        assert_eq!(outcome.error_code.as_deref(), Some("CONVERSION_ERROR"));
    }

    #[test]
    fn test_validator_never_short_circuits_on_first_failure() {
        let validator = RowValidator::new().require("a").require("b").require("c");
        let outcome = validator.validate(&mapped(&[]));
        assert_eq!(outcome.error_code.as_deref(), Some("REQUIRED_A,REQUIRED_B,REQUIRED_C"));
    }
}
