//! A minimal, forward-only `.xlsx` writer for the error-file case: one
//! row at a time, raw ZIP entries with hand-written sheet XML, no
//! shared strings, no styles, no charts or pivots. This is deliberately
//! narrower than a general-purpose writer — it exists only to stream
//! `staging_error` rows plus `errorMessage`/`errorCode` trailing columns
//! back out as a spreadsheet.

use std::io::Write;

use zip::write::{FileOptions, ZipWriter};
use zip::CompressionMethod;

use crate::error::Result;

/// Writes one worksheet of plain string cells to `sink`, where row 1 is
/// `columns` and every subsequent row comes from `rows`.
pub fn write_error_workbook<W: Write + std::io::Seek>(
    sink: W,
    columns: &[String],
    rows: impl IntoIterator<Item = Vec<String>>,
) -> Result<()> {
    let mut zip = ZipWriter::new(sink);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file("[Content_Types].xml", options)?;
    zip.write_all(CONTENT_TYPES.as_bytes())?;

    zip.start_file("_rels/.rels", options)?;
    zip.write_all(ROOT_RELS.as_bytes())?;

    zip.start_file("xl/_rels/workbook.xml.rels", options)?;
    zip.write_all(WORKBOOK_RELS.as_bytes())?;

    zip.start_file("xl/workbook.xml", options)?;
    zip.write_all(WORKBOOK_XML.as_bytes())?;

    zip.start_file("xl/worksheets/sheet1.xml", options)?;
    write_sheet_xml(&mut zip, columns, rows)?;

    zip.finish()?;
    Ok(())
}

fn write_sheet_xml<W: Write>(
    out: &mut W,
    columns: &[String],
    rows: impl IntoIterator<Item = Vec<String>>,
) -> Result<()> {
    out.write_all(br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#)?;
    out.write_all(br#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#)?;

    write_row(out, 1, columns.iter().map(String::as_str))?;

    let mut row_number = 2u32;
    for row in rows {
        write_row(out, row_number, row.iter().map(String::as_str))?;
        row_number += 1;
    }

    out.write_all(b"</sheetData></worksheet>")?;
    Ok(())
}

fn write_row<'a, W: Write>(out: &mut W, row_number: u32, cells: impl Iterator<Item = &'a str>) -> Result<()> {
    write!(out, r#"<row r="{row_number}">"#)?;
    for (i, value) in cells.enumerate() {
        let col = column_letter(i as u32 + 1);
        write!(out, r#"<c r="{col}{row_number}" t="inlineStr"><is><t>"#)?;
        write_escaped(out, value)?;
        write!(out, "</t></is></c>")?;
    }
    write!(out, "</row>")?;
    Ok(())
}

fn write_escaped<W: Write>(out: &mut W, text: &str) -> Result<()> {
    for ch in text.chars() {
        match ch {
            '&' => out.write_all(b"&amp;")?,
            '<' => out.write_all(b"&lt;")?,
            '>' => out.write_all(b"&gt;")?,
            '"' => out.write_all(b"&quot;")?,
            _ => write!(out, "{ch}")?,
        }
    }
    Ok(())
}

fn column_letter(mut col: u32) -> String {
    let mut letters = Vec::new();
    while col > 0 {
        let rem = (col - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        col = (col - 1) / 26;
    }
    letters.iter().rev().collect()
}

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

const WORKBOOK_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheets><sheet name="Errors" sheetId="1" r:id="rId1" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"/></sheets></workbook>"#;

/// Appends `errorMessage`/`errorCode` to an existing set of source
/// columns, per the error-file column contract.
pub fn error_file_columns(source_columns: &[String]) -> Vec<String> {
    let mut columns = source_columns.to_vec();
    columns.push("errorMessage".to_string());
    columns.push("errorCode".to_string());
    columns
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_column_letter_conversion() {
        assert_eq!(column_letter(1), "A");
        assert_eq!(column_letter(26), "Z");
        assert_eq!(column_letter(27), "AA");
    }

    #[test]
    fn test_error_file_columns_appends_trailing_columns() {
        let columns = error_file_columns(&["name".to_string(), "dob".to_string()]);
        assert_eq!(columns, vec!["name", "dob", "errorMessage", "errorCode"]);
    }

    #[test]
    fn test_write_error_workbook_produces_a_valid_zip() {
        let mut buf = Vec::new();
        {
            let cursor = Cursor::new(&mut buf);
            let columns = vec!["name".to_string(), "errorMessage".to_string()];
            let rows = vec![vec!["Alice".to_string(), "REQUIRED_NAME".to_string()]];
            write_error_workbook(cursor, &columns, rows).unwrap();
        }
        let mut archive = zip::ZipArchive::new(Cursor::new(buf)).unwrap();
        assert!(archive.by_name("xl/worksheets/sheet1.xml").is_ok());
    }

    #[test]
    fn test_escapes_special_characters_in_cell_text() {
        let mut buf = Vec::new();
        let cursor = Cursor::new(&mut buf);
        write_error_workbook(cursor, &["note".to_string()], vec![vec!["<a> & \"b\"".to_string()]]).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(buf)).unwrap();
        let mut sheet = archive.by_name("xl/worksheets/sheet1.xml").unwrap();
        let mut content = String::new();
        std::io::Read::read_to_string(&mut sheet, &mut content).unwrap();
        assert!(content.contains("&lt;a&gt; &amp; &quot;b&quot;"));
    }
}
