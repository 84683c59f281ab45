//! Spreadsheet container access: opens the ZIP package, resolves part
//! paths through the standard relationship chain, and exposes the raw
//! worksheet XML bytes as a forward-only reader.
//!
//! Only a single source sheet is modeled per job: the first worksheet
//! relationship declared in `xl/_rels/workbook.xml.rels`. A migration job
//! always targets one input file holding one data sheet; multi-sheet
//! workbooks are read from their first sheet only.

use std::io::{Cursor, Read};

use migrate_xml::relationships::rel_types;
use migrate_xml::{Relationships, Sst, StyleSheet};

use crate::error::{Error, Result};
use crate::sst::SharedStringTable;

/// An opened spreadsheet package, holding the parts needed to stream the
/// first worksheet: the shared string table, the style sheet, and the raw
/// worksheet XML bytes.
pub struct Container {
    pub shared_strings: SharedStringTable,
    pub styles: StyleSheet,
    sheet_xml: Vec<u8>,
}

impl Container {
    /// Reads a spreadsheet package from in-memory bytes.
    pub fn open(data: Vec<u8>) -> Result<Self> {
        let cursor = Cursor::new(data);
        let mut archive = zip::ZipArchive::new(cursor)?;

        let package_rels: Relationships = read_xml_part(&mut archive, "_rels/.rels")?;
        let workbook_target = package_rels
            .target_for_type(rel_types::OFFICE_DOCUMENT)
            .unwrap_or("xl/workbook.xml");

        let workbook_rels_path = format!(
            "xl/_rels/{}.rels",
            workbook_target
                .rsplit('/')
                .next()
                .unwrap_or("workbook.xml")
        );
        let workbook_rels: Relationships = read_xml_part(&mut archive, &workbook_rels_path)?;

        let sheet_target = workbook_rels
            .relationships
            .iter()
            .find(|r| r.rel_type == rel_types::WORKSHEET)
            .map(|r| r.target.clone())
            .ok_or_else(|| Error::FileCorrupt("workbook has no worksheet relationship".to_string()))?;
        let sheet_path = resolve_relationship_target(workbook_target, &sheet_target);

        let styles_target = workbook_rels
            .target_for_type(rel_types::STYLES)
            .map(|t| resolve_relationship_target(workbook_target, t));
        let styles: StyleSheet = match styles_target {
            Some(path) => read_xml_part(&mut archive, &path).unwrap_or_default(),
            None => StyleSheet::default(),
        };

        let sst_target = workbook_rels
            .target_for_type(rel_types::SHARED_STRINGS)
            .map(|t| resolve_relationship_target(workbook_target, t));
        let shared_strings_xml: Sst = match sst_target {
            Some(path) => read_xml_part(&mut archive, &path).unwrap_or_default(),
            None => Sst::default(),
        };
        let shared_strings = SharedStringTable::from_sst(&shared_strings_xml);

        let sheet_xml = read_bytes_part(&mut archive, &sheet_path)?;

        Ok(Self {
            shared_strings,
            styles,
            sheet_xml,
        })
    }

    /// A fresh `Read` cursor over the raw worksheet XML, for the early
    /// validator or the streaming reader to consume.
    pub fn sheet_reader(&self) -> Cursor<&[u8]> {
        Cursor::new(&self.sheet_xml)
    }
}

fn read_xml_part<T: serde::de::DeserializeOwned, R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<T> {
    let mut entry = archive.by_name(name)?;
    let mut content = String::new();
    entry.read_to_string(&mut content)?;
    quick_xml::de::from_str(&content).map_err(Error::XmlDeserialize)
}

fn read_bytes_part<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<Vec<u8>> {
    let mut entry = archive.by_name(name)?;
    let mut content = Vec::new();
    entry.read_to_end(&mut content)?;
    Ok(content)
}

/// Resolves a relationship target (relative to the directory of `from`)
/// into a full archive-rooted path.
fn resolve_relationship_target(from: &str, target: &str) -> String {
    if target.starts_with('/') {
        return target.trim_start_matches('/').to_string();
    }
    let base_dir = from.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
    let joined = if base_dir.is_empty() {
        target.to_string()
    } else {
        format!("{base_dir}/{target}")
    };
    normalize_path(&joined)
}

fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "." | "" => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relationship_target_sibling() {
        assert_eq!(
            resolve_relationship_target("xl/workbook.xml", "worksheets/sheet1.xml"),
            "xl/worksheets/sheet1.xml"
        );
    }

    #[test]
    fn test_resolve_relationship_target_absolute() {
        assert_eq!(
            resolve_relationship_target("xl/workbook.xml", "/xl/styles.xml"),
            "xl/styles.xml"
        );
    }

    #[test]
    fn test_resolve_relationship_target_parent_dir() {
        assert_eq!(
            resolve_relationship_target("xl/worksheets/sheet1.xml", "../styles.xml"),
            "xl/styles.xml"
        );
    }
}
