//! Minimal SpreadsheetML writer: inline-string cells, one bold header style.

use crate::error::ConversionError;
use quick_xml::escape::escape;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const MAX_SHEET_NAME_LEN: usize = 31;
pub const MAX_CELL_CHARS: usize = 32_767;

const SHEET_NAME_FORBIDDEN: &[char] = &[':', '\\', '/', '?', '*', '[', ']'];

const CONTENT_TYPES_HEAD: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><fonts count="2"><font><sz val="11"/><name val="Calibri"/></font><font><b/><sz val="11"/><name val="Calibri"/></font></fonts><fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills><borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders><cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs><cellXfs count="2"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/><xf numFmtId="0" fontId="1" fillId="0" borderId="0" xfId="0" applyFont="1"/></cellXfs><cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles></styleSheet>"#;

const HEADER_STYLE: u8 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    name: String,
    header: Option<Vec<String>>,
    rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bold first row.
    pub fn set_header<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.header = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn push_row(&mut self, row: Vec<String>) -> &mut Self {
        self.rows.push(row);
        self
    }

    pub fn row_count(&self) -> usize {
        self.rows.len() + usize::from(self.header.is_some())
    }

    fn to_xml(&self) -> String {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
        );

        let header = self.header.iter().map(|row| (row, Some(HEADER_STYLE)));
        let body = self.rows.iter().map(|row| (row, None));

        for (index, (row, style)) in header.chain(body).enumerate() {
            let row_number = index + 1;
            let _ = write!(xml, r#"<row r="{}">"#, row_number);
            for (col, value) in row.iter().enumerate() {
                let text = cell_text(value);
                if text.is_empty() {
                    continue;
                }
                let _ = write!(
                    xml,
                    r#"<c r="{}{}" t="inlineStr"{}><is><t xml:space="preserve">{}</t></is></c>"#,
                    column_name(col),
                    row_number,
                    style.map(|s| format!(r#" s="{}""#, s)).unwrap_or_default(),
                    escape(text.as_str()),
                );
            }
            xml.push_str("</row>");
        }

        xml.push_str("</sheetData></worksheet>");
        xml
    }
}

/// In-memory workbook serialized as an XLSX (OOXML zip) archive.
#[derive(Debug, Default)]
pub struct Workbook {
    sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sheet. The name is made valid and unique within the workbook.
    pub fn add_sheet(&mut self, name: &str) -> &mut Sheet {
        let taken: HashSet<String> = self.sheets.iter().map(|s| s.name.to_lowercase()).collect();
        let name = unique_sheet_name(&sanitize_sheet_name(name), &taken);
        self.sheets.push(Sheet {
            name,
            header: None,
            rows: Vec::new(),
        });
        let last = self.sheets.len() - 1;
        &mut self.sheets[last]
    }

    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ConversionError> {
        self.write().map_err(ConversionError::Write)
    }

    fn write(&self) -> anyhow::Result<Vec<u8>> {
        let placeholder;
        let sheets: &[Sheet] = if self.sheets.is_empty() {
            placeholder = [Sheet {
                name: "Sheet1".to_string(),
                header: None,
                rows: Vec::new(),
            }];
            &placeholder
        } else {
            &self.sheets
        };

        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

        let mut content_types = String::from(CONTENT_TYPES_HEAD);
        let mut workbook = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>"#,
        );
        let mut workbook_rels = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
        );

        for (index, sheet) in sheets.iter().enumerate() {
            let n = index + 1;
            let _ = write!(
                content_types,
                r#"<Override PartName="/xl/worksheets/sheet{}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
                n
            );
            let _ = write!(
                workbook,
                r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
                escape(sheet.name.as_str()),
                n,
                n
            );
            let _ = write!(
                workbook_rels,
                r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{}.xml"/>"#,
                n, n
            );
        }
        let styles_rel = sheets.len() + 1;
        let _ = write!(
            workbook_rels,
            r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#,
            styles_rel
        );
        content_types.push_str("</Types>");
        workbook.push_str("</sheets></workbook>");

        let parts = [
            ("[Content_Types].xml", content_types),
            ("_rels/.rels", ROOT_RELS.to_string()),
            ("xl/workbook.xml", workbook),
            ("xl/_rels/workbook.xml.rels", workbook_rels),
            ("xl/styles.xml", STYLES.to_string()),
        ];
        for (name, body) in parts {
            zip.start_file(name, options)?;
            zip.write_all(body.as_bytes())?;
        }

        for (index, sheet) in sheets.iter().enumerate() {
            zip.start_file(format!("xl/worksheets/sheet{}.xml", index + 1), options)?;
            zip.write_all(sheet.to_xml().as_bytes())?;
        }

        Ok(zip.finish()?.into_inner())
    }
}

/// Spreadsheet column name for a zero-based index: 0 -> A, 25 -> Z, 26 -> AA.
pub fn column_name(mut index: usize) -> String {
    let mut name = Vec::new();
    loop {
        name.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    name.reverse();
    String::from_utf8_lossy(&name).into_owned()
}

/// Drop characters XML 1.0 cannot carry and cap at the cell limit.
fn cell_text(value: &str) -> String {
    value
        .chars()
        .filter(|&c| is_xml_char(c))
        .take(MAX_CELL_CHARS)
        .collect()
}

fn is_xml_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r')
        || (c >= '\u{20}' && c != '\u{FFFE}' && c != '\u{FFFF}')
}

fn sanitize_sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|&c| is_xml_char(c) && !c.is_control())
        .map(|c| if SHEET_NAME_FORBIDDEN.contains(&c) { '_' } else { c })
        .collect();
    let trimmed = cleaned.trim().trim_matches('\'');
    if trimmed.is_empty() {
        return "Sheet".to_string();
    }
    trimmed.chars().take(MAX_SHEET_NAME_LEN).collect()
}

fn unique_sheet_name(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(&base.to_lowercase()) {
        return base.to_string();
    }
    (2..)
        .map(|n| {
            let suffix = format!(" ({})", n);
            let keep = MAX_SHEET_NAME_LEN - suffix.chars().count();
            let stem: String = base.chars().take(keep).collect();
            format!("{}{}", stem.trim_end(), suffix)
        })
        .find(|candidate| !taken.contains(&candidate.to_lowercase()))
        .unwrap_or_else(|| base.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn part(bytes: &[u8], name: &str) -> String {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut file = archive.by_name(name).unwrap();
        let mut out = String::new();
        file.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn column_names() {
        assert_eq!(column_name(0), "A");
        assert_eq!(column_name(25), "Z");
        assert_eq!(column_name(26), "AA");
        assert_eq!(column_name(27), "AB");
        assert_eq!(column_name(701), "ZZ");
        assert_eq!(column_name(702), "AAA");
    }

    #[test]
    fn sheet_names_are_sanitized_and_unique() {
        let mut workbook = Workbook::new();
        workbook.add_sheet("Q1/Q2 [draft]");
        workbook.add_sheet("a very long sheet name that keeps going");
        workbook.add_sheet("A VERY LONG SHEET NAME THAT KEEPS GOING");
        workbook.add_sheet("   ");

        let names: Vec<_> = workbook.sheets().iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names[0], "Q1_Q2 _draft_");
        assert_eq!(names[1], "a very long sheet name that kee");
        assert_eq!(names[2], "A VERY LONG SHEET NAME THAT (2)");
        assert_eq!(names[3], "Sheet");
        assert!(names.iter().all(|n| n.chars().count() <= MAX_SHEET_NAME_LEN));
    }

    #[test]
    fn writes_a_complete_package() {
        let mut workbook = Workbook::new();
        workbook
            .add_sheet("Paragraphs")
            .set_header(["content", "style"])
            .push_row(vec!["Fish & <Chips>".to_string(), "Normal".to_string()]);
        workbook.add_sheet("Table 1").push_row(vec!["x".to_string()]);

        let bytes = workbook.to_bytes().unwrap();

        let types = part(&bytes, "[Content_Types].xml");
        assert!(types.contains("/xl/worksheets/sheet2.xml"));

        let book = part(&bytes, "xl/workbook.xml");
        assert!(book.contains(r#"<sheet name="Paragraphs" sheetId="1" r:id="rId1"/>"#));
        assert!(book.contains(r#"<sheet name="Table 1" sheetId="2" r:id="rId2"/>"#));

        let rels = part(&bytes, "xl/_rels/workbook.xml.rels");
        assert!(rels.contains(r#"Id="rId3""#) && rels.contains("styles.xml"));

        let sheet = part(&bytes, "xl/worksheets/sheet1.xml");
        assert!(sheet.contains(r#"<c r="A1" t="inlineStr" s="1"><is><t xml:space="preserve">content</t></is></c>"#));
        assert!(sheet.contains("Fish &amp; &lt;Chips&gt;"));
        assert!(sheet.contains(r#"<c r="B2" t="inlineStr">"#));
    }

    #[test]
    fn strips_characters_xml_cannot_carry() {
        let mut workbook = Workbook::new();
        workbook
            .add_sheet("S")
            .push_row(vec!["bell\u{7}tab\tend\u{FFFF}".to_string()]);
        let bytes = workbook.to_bytes().unwrap();
        let sheet = part(&bytes, "xl/worksheets/sheet1.xml");
        assert!(sheet.contains("belltab\tend<"));
    }

    #[test]
    fn truncates_oversized_cells() {
        assert_eq!(cell_text(&"x".repeat(MAX_CELL_CHARS + 10)).len(), MAX_CELL_CHARS);
    }

    #[test]
    fn empty_workbook_still_has_a_sheet() {
        let bytes = Workbook::new().to_bytes().unwrap();
        assert!(part(&bytes, "xl/workbook.xml").contains(r#"name="Sheet1""#));
        part(&bytes, "xl/worksheets/sheet1.xml");
    }
}
