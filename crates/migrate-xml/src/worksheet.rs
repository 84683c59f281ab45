//! Worksheet XML schema structures, trimmed to what the early validator and
//! streaming reader consult directly. Row/cell data itself is walked with
//! the event-driven reader in `migrate-core`, not deserialized through here.

use serde::{Deserialize, Serialize};

/// The `<dimension>` element of a worksheet: the declared used-range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    #[serde(rename = "@ref")]
    pub reference: String,
}

impl Dimension {
    /// Parses an `A1:Z999`-style reference into zero-based
    /// `(first_row, first_col, last_row, last_col)`, or a single-cell
    /// reference like `A1` (both corners equal).
    pub fn bounds(&self) -> Option<(u32, u32, u32, u32)> {
        let mut parts = self.reference.split(':');
        let first = parts.next()?;
        let last = parts.next().unwrap_or(first);
        let (fr, fc) = parse_cell_ref(first)?;
        let (lr, lc) = parse_cell_ref(last)?;
        Some((fr, fc, lr, lc))
    }
}

fn parse_cell_ref(r: &str) -> Option<(u32, u32)> {
    let split_at = r.find(|c: char| c.is_ascii_digit())?;
    let (col_part, row_part) = r.split_at(split_at);
    let row: u32 = row_part.parse().ok()?;
    let mut col: u32 = 0;
    for c in col_part.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        col = col * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
    }
    Some((row.saturating_sub(1), col.saturating_sub(1)))
}
