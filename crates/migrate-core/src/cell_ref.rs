//! A1-style cell reference parsing.

use crate::error::{Error, Result};

pub const MAX_COLUMNS: u32 = 16_384;
pub const MAX_ROWS: u32 = 1_048_576;

/// Converts a column name (`A`, `AA`, ...) to a 1-based column number.
pub fn column_name_to_number(name: &str) -> Result<u32> {
    if name.is_empty() {
        return Err(Error::Internal("empty column name".to_string()));
    }

    let mut result: u32 = 0;
    for c in name.chars() {
        if !c.is_ascii_alphabetic() {
            return Err(Error::Internal(format!(
                "non-alphabetic character in column name: '{c}'"
            )));
        }
        let digit = (c.to_ascii_uppercase() as u32) - ('A' as u32) + 1;
        result = result
            .checked_mul(26)
            .and_then(|r| r.checked_add(digit))
            .ok_or_else(|| Error::Internal("column number overflow".to_string()))?;
    }

    if result > MAX_COLUMNS {
        return Err(Error::Internal(format!("column number {result} exceeds max")));
    }
    Ok(result)
}

/// Parses an A1-style cell reference (e.g. `B7`) into 1-based `(col, row)`.
pub fn cell_name_to_coordinates(cell: &str) -> Result<(u32, u32)> {
    let cell = cell.replace('$', "");
    if cell.is_empty() {
        return Err(Error::Internal("empty cell reference".to_string()));
    }

    let mut col_end = 0;
    for (i, c) in cell.char_indices() {
        if c.is_ascii_alphabetic() {
            col_end = i + c.len_utf8();
        } else {
            break;
        }
    }
    if col_end == 0 {
        return Err(Error::Internal(format!("no column letters in '{cell}'")));
    }

    let col_str = &cell[..col_end];
    let row_str = &cell[col_end..];
    if row_str.is_empty() {
        return Err(Error::Internal(format!("no row number in '{cell}'")));
    }

    let col = column_name_to_number(col_str)?;
    let row: u32 = row_str
        .parse()
        .map_err(|_| Error::Internal(format!("invalid row number in '{cell}'")))?;

    if !(1..=MAX_ROWS).contains(&row) {
        return Err(Error::Internal(format!("row {row} out of range")));
    }

    Ok((col, row))
}
