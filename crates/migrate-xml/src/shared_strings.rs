//! Shared Strings XML schema structures.
//!
//! Represents `xl/sharedStrings.xml` in the OOXML package.

use serde::{Deserialize, Serialize};

use crate::namespaces;

/// Shared String Table root element (`xl/sharedStrings.xml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "sst")]
pub struct Sst {
    #[serde(rename = "@xmlns")]
    pub xmlns: String,

    /// Total reference count of shared strings in the workbook.
    #[serde(rename = "@count", skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,

    /// Number of unique string entries.
    #[serde(rename = "@uniqueCount", skip_serializing_if = "Option::is_none")]
    pub unique_count: Option<u32>,

    /// Shared string items.
    #[serde(rename = "si", default)]
    pub items: Vec<Si>,
}

/// Shared String Item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Si {
    /// Plain text content.
    #[serde(rename = "t", skip_serializing_if = "Option::is_none")]
    pub t: Option<T>,

    /// Rich text runs (formatted text).
    #[serde(rename = "r", default)]
    pub r: Vec<R>,
}

/// Text element with optional space preservation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct T {
    #[serde(
        rename = "@xml:space",
        alias = "@space",
        skip_serializing_if = "Option::is_none"
    )]
    pub xml_space: Option<String>,

    #[serde(rename = "$value", default)]
    pub value: String,
}

/// Rich text run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct R {
    #[serde(rename = "rPr", skip_serializing_if = "Option::is_none")]
    pub r_pr: Option<RPr>,

    #[serde(rename = "t")]
    pub t: T,
}

/// Run properties (text formatting within a rich text run). Only the fields
/// the reader needs to skip over cleanly are modeled; styling is never
/// re-applied downstream of ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RPr {
    #[serde(rename = "b", skip_serializing_if = "Option::is_none")]
    pub b: Option<BoolVal>,

    #[serde(rename = "i", skip_serializing_if = "Option::is_none")]
    pub i: Option<BoolVal>,

    #[serde(rename = "sz", skip_serializing_if = "Option::is_none")]
    pub sz: Option<FontSize>,

    #[serde(rename = "rFont", skip_serializing_if = "Option::is_none")]
    pub r_font: Option<FontName>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoolVal {
    #[serde(rename = "@val", skip_serializing_if = "Option::is_none")]
    pub val: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontSize {
    #[serde(rename = "@val")]
    pub val: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontName {
    #[serde(rename = "@val")]
    pub val: String,
}

impl Default for Sst {
    fn default() -> Self {
        Self {
            xmlns: namespaces::SPREADSHEET_ML.to_string(),
            count: Some(0),
            unique_count: Some(0),
            items: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sst_default() {
        let sst = Sst::default();
        assert_eq!(sst.xmlns, namespaces::SPREADSHEET_ML);
        assert_eq!(sst.count, Some(0));
        assert!(sst.items.is_empty());
    }

    #[test]
    fn test_parse_real_excel_shared_strings() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="4" uniqueCount="3">
  <si><t>Name</t></si>
  <si><t>Value</t></si>
  <si><t>Description</t></si>
</sst>"#;

        let parsed: Sst = quick_xml::de::from_str(xml).unwrap();
        assert_eq!(parsed.count, Some(4));
        assert_eq!(parsed.unique_count, Some(3));
        assert_eq!(parsed.items.len(), 3);
        assert_eq!(parsed.items[0].t.as_ref().unwrap().value, "Name");
        assert_eq!(parsed.items[1].t.as_ref().unwrap().value, "Value");
        assert_eq!(parsed.items[2].t.as_ref().unwrap().value, "Description");
    }

    #[test]
    fn test_parse_real_excel_rich_text_shared_strings() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="1" uniqueCount="1">
  <si>
    <r>
      <rPr><b/><sz val="11"/><rFont val="Calibri"/></rPr>
      <t>Bold</t>
    </r>
    <r>
      <t> text</t>
    </r>
  </si>
</sst>"#;

        let parsed: Sst = quick_xml::de::from_str(xml).unwrap();
        assert_eq!(parsed.items.len(), 1);
        let item = &parsed.items[0];
        assert!(item.t.is_none());
        assert_eq!(item.r.len(), 2);
        assert!(item.r[0].r_pr.is_some());
        assert_eq!(item.r[0].t.value, "Bold");
        assert_eq!(item.r[1].t.value, "text");
    }

    #[test]
    fn test_empty_sst_roundtrip() {
        let sst = Sst::default();
        let xml = quick_xml::se::to_string(&sst).unwrap();
        let parsed: Sst = quick_xml::de::from_str(&xml).unwrap();
        assert!(parsed.items.is_empty());
        assert_eq!(parsed.count, Some(0));
    }
}
