use super::docx::{read_docx, DocxContent};
use super::xlsx::Workbook;
use super::{Converter, XLSX_CONTENT_TYPE};
use crate::error::ConversionError;

pub const PARAGRAPHS_SHEET: &str = "Paragraphs";

/// Word document to spreadsheet: one sheet of styled paragraphs plus one
/// sheet per body-level table.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocxToXlsx;

impl DocxToXlsx {
    pub fn new() -> Self {
        Self
    }
}

/// Lay out extracted DOCX content as a workbook.
pub fn build_workbook(content: &DocxContent) -> Workbook {
    let mut workbook = Workbook::new();

    let paragraphs = workbook.add_sheet(PARAGRAPHS_SHEET);
    paragraphs.set_header(["content", "style"]);
    for paragraph in &content.paragraphs {
        paragraphs.push_row(vec![paragraph.text.clone(), paragraph.style.clone()]);
    }

    for (index, table) in content.tables.iter().enumerate() {
        let sheet = workbook.add_sheet(&format!("Table {}", index + 1));
        for row in &table.rows {
            sheet.push_row(row.clone());
        }
    }

    workbook
}

impl Converter for DocxToXlsx {
    fn name(&self) -> &'static str {
        "docx-to-xlsx"
    }

    fn source_extensions(&self) -> &'static [&'static str] {
        &["docx"]
    }

    fn source_mime_types(&self) -> &'static [&'static str] {
        &["application/vnd.openxmlformats-officedocument.wordprocessingml.document"]
    }

    fn output_extension(&self) -> &'static str {
        "xlsx"
    }

    fn output_content_type(&self) -> &'static str {
        XLSX_CONTENT_TYPE
    }

    fn convert(&self, input: &[u8]) -> Result<Vec<u8>, ConversionError> {
        let content = read_docx(input)?;
        tracing::debug!(
            paragraphs = content.paragraphs.len(),
            tables = content.tables.len(),
            "Extracted DOCX content"
        );
        build_workbook(&content).to_bytes()
    }
}
