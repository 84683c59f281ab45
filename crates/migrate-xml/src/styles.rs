//! Styles XML schema structures.
//!
//! Represents `xl/styles.xml` in the OOXML package. Only the parts the
//! reader needs to resolve a cell's number format are modeled; fonts,
//! fills, borders and the rest of the stylesheet are irrelevant to
//! migration and are skipped during deserialization.

use serde::{Deserialize, Serialize};

use crate::namespaces;

/// Stylesheet root element (`xl/styles.xml`), trimmed to number formats and
/// cell format records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "styleSheet")]
pub struct StyleSheet {
    #[serde(rename = "@xmlns")]
    pub xmlns: String,

    #[serde(rename = "numFmts", skip_serializing_if = "Option::is_none")]
    pub num_fmts: Option<NumFmts>,

    #[serde(rename = "cellXfs", skip_serializing_if = "Option::is_none")]
    pub cell_xfs: Option<CellXfs>,
}

/// Number formats container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumFmts {
    #[serde(rename = "@count", skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,

    #[serde(rename = "numFmt", default)]
    pub num_fmts: Vec<NumFmt>,
}

/// Individual (custom) number format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumFmt {
    #[serde(rename = "@numFmtId")]
    pub num_fmt_id: u32,

    #[serde(rename = "@formatCode")]
    pub format_code: String,
}

/// Cell XFs container (applied cell formats, indexed by `s` attribute on
/// a `<c>` element).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellXfs {
    #[serde(rename = "@count", skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,

    #[serde(rename = "xf", default)]
    pub xfs: Vec<Xf>,
}

/// Cell format entry. Only `num_fmt_id` drives date/time detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Xf {
    #[serde(rename = "@numFmtId", skip_serializing_if = "Option::is_none")]
    pub num_fmt_id: Option<u32>,
}

impl Default for StyleSheet {
    fn default() -> Self {
        Self {
            xmlns: namespaces::SPREADSHEET_ML.to_string(),
            num_fmts: None,
            cell_xfs: None,
        }
    }
}

impl StyleSheet {
    /// Resolves the numFmtId applied to style index `style_idx` (the `s`
    /// attribute on a worksheet `<c>` element), if any.
    pub fn num_fmt_id_for_style(&self, style_idx: u32) -> Option<u32> {
        self.cell_xfs
            .as_ref()?
            .xfs
            .get(style_idx as usize)?
            .num_fmt_id
    }

    /// Resolves a custom format code registered for `num_fmt_id`, if any.
    pub fn custom_format_code(&self, num_fmt_id: u32) -> Option<&str> {
        self.num_fmts
            .as_ref()?
            .num_fmts
            .iter()
            .find(|f| f.num_fmt_id == num_fmt_id)
            .map(|f| f.format_code.as_str())
    }
}
