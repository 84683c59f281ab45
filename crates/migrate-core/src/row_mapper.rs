//! Row Mapper: resolves a worksheet header row against a declarative set
//! of field descriptors, then coerces each raw cell into a typed value
//! for every subsequent row.

use std::collections::HashMap;

use unicode_normalization::UnicodeNormalization;

use crate::cell::CellValue;
use crate::cell_ref::column_name_to_number;
use crate::error::{Error, Result};
use crate::numfmt::parse_input_date;

/// How a field declares which source column it reads from.
#[derive(Debug, Clone)]
pub enum ColumnHint {
    /// Exact header text, matched before normalization.
    Name(String),
    /// 1-based column position (e.g. `3` for column `C`), used only when
    /// no header match is found.
    Position(u32),
    /// A1-style column letter (`"C"`), converted to a position.
    Letter(String),
}

/// The coercion family applied to a field's raw text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    /// A string field carrying an identifier: scientific notation is
    /// expanded back to the full integer string and leading zeros kept.
    Identifier,
    Date,
    Number,
    Boolean,
}

/// A single field's binding declaration, supplied by the caller at
/// schema-build time.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub field_name: String,
    pub column_hint: ColumnHint,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldDescriptor {
    pub fn new(field_name: impl Into<String>, column_hint: ColumnHint, kind: FieldKind) -> Self {
        Self {
            field_name: field_name.into(),
            column_hint,
            kind,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// A compiled binding: which 1-based column index feeds which field, and
/// how to coerce it. Built once per job and reused for every row.
#[derive(Debug, Clone)]
struct ResolvedBinding {
    field_name: String,
    column: u32,
    kind: FieldKind,
    required: bool,
}

/// The compiled field-binding table for one worksheet header.
#[derive(Debug, Clone)]
pub struct RowSchema {
    bindings: Vec<ResolvedBinding>,
}

impl RowSchema {
    /// Resolves each descriptor against `header`, a 1-based column-index
    /// -> header-text map produced by the streaming reader's first row.
    ///
    /// Returns `Error::AmbiguousHeaderBinding` if two distinct headers
    /// normalize to the same key; this check runs once here, never per
    /// row.
    pub fn build(descriptors: &[FieldDescriptor], header: &HashMap<u32, String>) -> Result<Self> {
        check_no_ambiguous_headers(header)?;

        let normalized: HashMap<String, u32> = header
            .iter()
            .map(|(col, text)| (normalize_header(text), *col))
            .collect();
        let exact: HashMap<&str, u32> = header.iter().map(|(col, text)| (text.as_str(), *col)).collect();

        let mut bindings = Vec::with_capacity(descriptors.len());
        for d in descriptors {
            let column = resolve_column(d, &exact, &normalized);
            if let Some(column) = column {
                bindings.push(ResolvedBinding {
                    field_name: d.field_name.clone(),
                    column,
                    kind: d.kind,
                    required: d.required,
                });
            }
            // Unresolved columns are dropped silently: a missing source
            // column is a validation-time concern (REQUIRED_<FIELD>), not
            // a mapping-time error.
        }

        Ok(Self { bindings })
    }

    /// Maps one raw row (1-based column -> cell) into named, coerced
    /// fields. Coercion failures are recorded per field rather than
    /// aborting the row.
    pub fn map_row(&self, raw: &HashMap<u32, CellValue>) -> MappedRow {
        let mut fields = HashMap::with_capacity(self.bindings.len());
        let mut errors = Vec::new();

        for binding in &self.bindings {
            let raw_value = raw.get(&binding.column);
            match raw_value {
                None | Some(CellValue::Empty) => {
                    if binding.required {
                        errors.push((
                            format!("REQUIRED_{}", binding.field_name.to_uppercase()),
                            format!("{} is required", binding.field_name),
                        ));
                    }
                    fields.insert(binding.field_name.clone(), CellValue::Empty);
                }
                Some(value) => match coerce(value, binding.kind) {
                    Ok(coerced) => {
                        fields.insert(binding.field_name.clone(), coerced);
                    }
                    Err(message) => {
                        errors.push(("CONVERSION_ERROR".to_string(), message));
                        fields.insert(binding.field_name.clone(), value.clone());
                    }
                },
            }
        }

        MappedRow { fields, coercion_errors: errors }
    }
}

/// The result of mapping one raw row against a [`RowSchema`].
#[derive(Debug, Clone)]
pub struct MappedRow {
    pub fields: HashMap<String, CellValue>,
    /// `(errorCode, message)` pairs raised during coercion, destined for
    /// the row validator's accumulated error list.
    pub coercion_errors: Vec<(String, String)>,
}

fn resolve_column(
    descriptor: &FieldDescriptor,
    exact: &HashMap<&str, u32>,
    normalized: &HashMap<String, u32>,
) -> Option<u32> {
    if let ColumnHint::Name(name) = &descriptor.column_hint {
        if let Some(&col) = exact.get(name.as_str()) {
            return Some(col);
        }
        if let Some(&col) = normalized.get(&normalize_header(name)) {
            return Some(col);
        }
    }
    match &descriptor.column_hint {
        ColumnHint::Position(pos) => Some(*pos),
        ColumnHint::Letter(letter) => column_name_to_number(letter).ok(),
        ColumnHint::Name(_) => None,
    }
}

fn check_no_ambiguous_headers(header: &HashMap<u32, String>) -> Result<()> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for text in header.values() {
        let key = normalize_header(text);
        if let Some(existing) = seen.get(&key) {
            if *existing != text.as_str() {
                return Err(Error::AmbiguousHeaderBinding {
                    header_a: existing.to_string(),
                    header_b: text.clone(),
                    normalized: key,
                });
            }
        } else {
            seen.insert(key, text.as_str());
        }
    }
    Ok(())
}

/// Strips diacritics, collapses whitespace, and lowercases a header for
/// comparison purposes.
fn normalize_header(header: &str) -> String {
    let stripped: String = header
        .nfd()
        .filter(|c| !(0x0300..=0x036F).contains(&(*c as u32)))
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn coerce(value: &CellValue, kind: FieldKind) -> std::result::Result<CellValue, String> {
    match kind {
        // Scientific-notation expansion is driven by the value's own
        // shape (an integral mantissa with >=10 significant digits), not
        // by the field's declared kind or name, so a plain `Text` field
        // still gets its identifier-looking values rewritten correctly.
        FieldKind::Text | FieldKind::Identifier => Ok(CellValue::String(expand_identifier(&cell_text(value)))),
        FieldKind::Date => coerce_date(value),
        FieldKind::Number => coerce_number(value),
        FieldKind::Boolean => coerce_boolean(value),
    }
}

fn cell_text(value: &CellValue) -> String {
    value.to_string()
}

/// Rewrites a scientific-notation identifier (`1.2345E+11`) back into its
/// full integer string, leaving ordinary text untouched.
fn expand_identifier(text: &str) -> String {
    if let Some(expanded) = expand_scientific_notation(text) {
        return expanded;
    }
    text.to_string()
}

fn expand_scientific_notation(text: &str) -> Option<String> {
    let lower = text.to_ascii_lowercase();
    if !lower.contains('e') {
        return None;
    }
    let parsed: f64 = text.parse().ok()?;
    if parsed.fract() != 0.0 || !parsed.is_finite() {
        return None;
    }
    let digits = format!("{:.0}", parsed.abs());
    if digits.len() < 10 {
        return None;
    }
    Some(if parsed.is_sign_negative() {
        format!("-{digits}")
    } else {
        digits
    })
}

fn coerce_date(value: &CellValue) -> std::result::Result<CellValue, String> {
    match value {
        CellValue::Date(serial) => Ok(CellValue::Date(*serial)),
        CellValue::Number(n) => Ok(CellValue::Date(*n)),
        CellValue::String(s) => {
            let date = parse_input_date(s).ok_or_else(|| format!("'{s}' is not a recognized date"))?;
            Ok(CellValue::Date(crate::numfmt::date_to_serial(date)))
        }
        other => Err(format!("cannot coerce {other} to a date")),
    }
}

fn coerce_number(value: &CellValue) -> std::result::Result<CellValue, String> {
    match value {
        CellValue::Number(n) => Ok(CellValue::Number(*n)),
        CellValue::String(s) if s.trim().is_empty() => Ok(CellValue::Empty),
        CellValue::String(s) => {
            if s.contains(',') {
                return Err(format!("'{s}' contains a thousands separator"));
            }
            s.trim()
                .parse::<f64>()
                .map(CellValue::Number)
                .map_err(|_| format!("'{s}' is not a valid number"))
        }
        other => Err(format!("cannot coerce {other} to a number")),
    }
}

fn coerce_boolean(value: &CellValue) -> std::result::Result<CellValue, String> {
    match value {
        CellValue::Bool(b) => Ok(CellValue::Bool(*b)),
        CellValue::Number(n) => Ok(CellValue::Bool(*n != 0.0)),
        CellValue::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(CellValue::Bool(true)),
            "false" | "0" | "no" => Ok(CellValue::Bool(false)),
            other => Err(format!("'{other}' is not a recognized boolean")),
        },
        other => Err(format!("cannot coerce {other} to a boolean")),
    }
}
