//! Early Validator: rejects oversized files before any row is parsed.
//!
//! Reads only as far as the worksheet's `<dimension>` element (or, failing
//! that, gives up and defers the decision to the streaming row counter —
//! it never falls back to scanning rows itself).

use std::io::BufRead;

use migrate_xml::Dimension;
use quick_xml::events::Event;
use quick_xml::name::QName;

use crate::error::Result;

/// Row/cell ceilings enforced before ingestion proceeds.
#[derive(Debug, Clone, Copy)]
pub struct SizePolicy {
    pub max_rows: u64,
    pub max_cells: u64,
}

impl Default for SizePolicy {
    fn default() -> Self {
        Self {
            max_rows: 1_000_000,
            max_cells: 5_000_000,
        }
    }
}

/// Outcome of the early, dimension-only size check.
#[derive(Debug, Clone, PartialEq)]
pub struct EarlyValidation {
    pub valid: bool,
    /// -1 when the dimension could not be resolved; the caller should then
    /// rely on the streaming reader's row counter instead of this estimate.
    pub estimated_rows: i64,
    pub estimated_cells: i64,
    pub reason: Option<String>,
}

/// Scans only the worksheet's `<dimension>` element (bailing out as soon as
/// it is found, or as soon as the first `<row>` appears without one) and
/// checks the declared used-range against `policy`.
pub fn validate_dimension<R: BufRead>(source: R, policy: SizePolicy) -> Result<EarlyValidation> {
    let mut reader = quick_xml::Reader::from_reader(source);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::with_capacity(1024);

    loop {
        buf.clear();
        match reader.read_event_into(&mut buf)? {
            Event::Empty(ref e) | Event::Start(ref e) if e.name() == QName(b"dimension") => {
                let reference = e
                    .attributes()
                    .flatten()
                    .find(|a| a.key == QName(b"ref"))
                    .and_then(|a| std::str::from_utf8(&a.value).ok().map(str::to_string));
                let Some(reference) = reference else {
                    return Ok(deferred());
                };
                let dim = Dimension { reference };
                return Ok(evaluate(dim.bounds(), policy));
            }
            Event::Start(ref e) if e.name() == QName(b"row") => {
                // No dimension element before the first row: defer.
                return Ok(deferred());
            }
            Event::Eof => return Ok(deferred()),
            _ => {}
        }
    }
}

fn deferred() -> EarlyValidation {
    EarlyValidation {
        valid: true,
        estimated_rows: -1,
        estimated_cells: -1,
        reason: None,
    }
}

fn evaluate(bounds: Option<(u32, u32, u32, u32)>, policy: SizePolicy) -> EarlyValidation {
    let Some((first_row, first_col, last_row, last_col)) = bounds else {
        return deferred();
    };
    let rows = (last_row - first_row + 1) as u64;
    let cols = (last_col - first_col + 1) as u64;
    let cells = rows.saturating_mul(cols);

    if rows > policy.max_rows {
        return EarlyValidation {
            valid: false,
            estimated_rows: rows as i64,
            estimated_cells: cells as i64,
            reason: Some(format!(
                "{rows} rows exceeds max {}",
                policy.max_rows
            )),
        };
    }
    if cells > policy.max_cells {
        return EarlyValidation {
            valid: false,
            estimated_rows: rows as i64,
            estimated_cells: cells as i64,
            reason: Some(format!(
                "{cells} cells exceeds max {}",
                policy.max_cells
            )),
        };
    }

    EarlyValidation {
        valid: true,
        estimated_rows: rows as i64,
        estimated_cells: cells as i64,
        reason: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn policy(max_rows: u64, max_cells: u64) -> SizePolicy {
        SizePolicy { max_rows, max_cells }
    }

    #[test]
    fn test_within_limits_is_valid() {
        let xml = r#"<worksheet><dimension ref="A1:D100"/><sheetData/></worksheet>"#;
        let result = validate_dimension(Cursor::new(xml.as_bytes()), policy(1000, 10000)).unwrap();
        assert!(result.valid);
        assert_eq!(result.estimated_rows, 100);
        assert_eq!(result.estimated_cells, 400);
    }

    #[test]
    fn test_exceeds_max_rows_is_rejected() {
        let xml = r#"<worksheet><dimension ref="A1:C2000001"/><sheetData/></worksheet>"#;
        let result = validate_dimension(Cursor::new(xml.as_bytes()), SizePolicy::default()).unwrap();
        assert!(!result.valid);
        assert!(result.reason.unwrap().contains("rows exceeds max"));
    }

    #[test]
    fn test_exceeds_max_cells_is_rejected() {
        let xml = r#"<worksheet><dimension ref="A1:ZZ900000"/><sheetData/></worksheet>"#;
        let result = validate_dimension(Cursor::new(xml.as_bytes()), SizePolicy::default()).unwrap();
        assert!(!result.valid);
        assert!(result.reason.unwrap().contains("cells exceeds max"));
    }

    #[test]
    fn test_missing_dimension_defers_to_streaming_counter() {
        let xml = r#"<worksheet><sheetData><row r="1"><c r="A1"><v>1</v></c></row></sheetData></worksheet>"#;
        let result = validate_dimension(Cursor::new(xml.as_bytes()), SizePolicy::default()).unwrap();
        assert!(result.valid);
        assert_eq!(result.estimated_rows, -1);
    }

    #[test]
    fn test_malformed_dimension_ref_defers() {
        let xml = r#"<worksheet><dimension ref="not-a-ref"/><sheetData/></worksheet>"#;
        let result = validate_dimension(Cursor::new(xml.as_bytes()), SizePolicy::default()).unwrap();
        assert!(result.valid);
        assert_eq!(result.estimated_rows, -1);
    }

    #[test]
    fn test_single_cell_dimension() {
        let xml = r#"<worksheet><dimension ref="A1"/><sheetData/></worksheet>"#;
        let result = validate_dimension(Cursor::new(xml.as_bytes()), SizePolicy::default()).unwrap();
        assert_eq!(result.estimated_rows, 1);
        assert_eq!(result.estimated_cells, 1);
    }
}
