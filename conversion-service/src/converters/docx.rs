use crate::error::ConversionError;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::{Cursor, Read};

const MAIN_DOCUMENT_PART: &str = "word/document.xml";
const DEFAULT_STYLE: &str = "Normal";

/// Upper bound on the decompressed main document part. Uploads are capped in
/// compressed size only, so this is what stops a zip bomb.
pub const MAX_DOCUMENT_XML_BYTES: u64 = 64 * 1024 * 1024;

/// Text content extracted from a DOCX body, in document order per kind.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DocxContent {
    /// Non-blank body-level paragraphs.
    pub paragraphs: Vec<Paragraph>,
    /// Body-level tables. Nested tables are flattened into their cell text.
    pub tables: Vec<Table>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Paragraph {
    pub text: String,
    pub style: String,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Table {
    pub rows: Vec<Vec<String>>,
}

impl Table {
    fn flatten(&self) -> String {
        self.rows
            .iter()
            .map(|row| row.join(" | "))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Open a DOCX archive and extract its paragraphs and tables.
pub fn read_docx(bytes: &[u8]) -> Result<DocxContent, ConversionError> {
    read_docx_with_limit(bytes, MAX_DOCUMENT_XML_BYTES)
}

pub fn read_docx_with_limit(bytes: &[u8], max_xml_bytes: u64) -> Result<DocxContent, ConversionError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(ConversionError::NotAnArchive)?;

    let part = archive.by_name(MAIN_DOCUMENT_PART).map_err(|e| match e {
        zip::result::ZipError::FileNotFound => ConversionError::MissingDocumentPart,
        other => ConversionError::NotAnArchive(other),
    })?;
    let declared = part.size();

    let xml = read_bounded(part, declared, max_xml_bytes)?;
    parse_document_xml(&xml)
}

/// Read at most `limit` bytes. The declared size comes from the archive and
/// is only trusted for an early rejection, never for allocation.
fn read_bounded(reader: impl Read, declared: u64, limit: u64) -> Result<Vec<u8>, ConversionError> {
    if declared > limit {
        return Err(ConversionError::TooLarge(limit));
    }

    let mut xml = Vec::with_capacity(declared.min(limit) as usize);
    reader
        .take(limit.saturating_add(1))
        .read_to_end(&mut xml)
        .map_err(|e| ConversionError::NotAnArchive(e.into()))?;

    if xml.len() as u64 > limit {
        return Err(ConversionError::TooLarge(limit));
    }
    Ok(xml)
}

#[derive(Default)]
struct TableBuilder {
    table: Table,
    row: Option<Vec<String>>,
    cell: Option<Vec<String>>,
}

impl TableBuilder {
    fn push_line(&mut self, line: String) {
        if let Some(cell) = self.cell.as_mut() {
            cell.push(line);
        }
    }

    fn end_cell(&mut self) {
        if let (Some(row), Some(cell)) = (self.row.as_mut(), self.cell.take()) {
            row.push(cell.join("\n"));
        }
    }

    fn end_row(&mut self) {
        if let Some(row) = self.row.take() {
            self.table.rows.push(row);
        }
    }
}

#[derive(Default)]
struct ParagraphBuilder {
    text: String,
    style: Option<String>,
}

/// Walks `word/document.xml` events.
///
/// Only `w:t` text inside a run is kept. `w:tab`, `w:br` and `w:cr` count only
/// inside runs; elsewhere they are tab stops and layout hints.
#[derive(Default)]
struct BodyParser {
    content: DocxContent,
    in_body: bool,
    saw_body: bool,
    tables: Vec<TableBuilder>,
    paragraph: Option<ParagraphBuilder>,
    paragraph_depth: usize,
    run_depth: usize,
    in_text: bool,
    in_paragraph_props: bool,
}

impl BodyParser {
    fn start(&mut self, e: &BytesStart<'_>, empty: bool) {
        match e.local_name().as_ref() {
            b"body" => {
                self.in_body = !empty;
                self.saw_body = true;
            }
            _ if !self.in_body => {}
            b"tbl" if !empty => self.tables.push(TableBuilder::default()),
            b"tr" if !empty => {
                if let Some(table) = self.tables.last_mut() {
                    table.row = Some(Vec::new());
                }
            }
            b"tc" => {
                if let Some(table) = self.tables.last_mut() {
                    table.cell = Some(Vec::new());
                    if empty {
                        table.end_cell();
                    }
                }
            }
            b"p" => {
                if self.paragraph_depth == 0 {
                    self.paragraph = Some(ParagraphBuilder::default());
                }
                if empty {
                    if self.paragraph_depth == 0 {
                        self.end_paragraph();
                    }
                } else {
                    self.paragraph_depth += 1;
                }
            }
            b"pPr" if !empty => self.in_paragraph_props = true,
            b"pStyle" if self.in_paragraph_props && self.paragraph_depth == 1 => {
                if let Some(style) = attribute(e, b"val") {
                    if let Some(paragraph) = self.paragraph.as_mut() {
                        paragraph.style = Some(style);
                    }
                }
            }
            b"r" if !empty => self.run_depth += 1,
            b"t" if !empty && self.run_depth > 0 => self.in_text = true,
            b"tab" if self.run_depth > 0 => self.push_text("\t"),
            b"br" | b"cr" if self.run_depth > 0 => self.push_text("\n"),
            _ => {}
        }
    }

    fn end(&mut self, local_name: &[u8]) {
        match local_name {
            b"body" => self.in_body = false,
            _ if !self.in_body => {}
            b"t" => self.in_text = false,
            b"r" => self.run_depth = self.run_depth.saturating_sub(1),
            b"pPr" => self.in_paragraph_props = false,
            b"p" => {
                self.paragraph_depth = self.paragraph_depth.saturating_sub(1);
                if self.paragraph_depth == 0 {
                    self.end_paragraph();
                } else {
                    // Text box paragraph inside a run: keep it on its own line.
                    self.push_text("\n");
                }
            }
            b"tc" => {
                if let Some(table) = self.tables.last_mut() {
                    table.end_cell();
                }
            }
            b"tr" => {
                if let Some(table) = self.tables.last_mut() {
                    table.end_row();
                }
            }
            b"tbl" => {
                if let Some(mut finished) = self.tables.pop() {
                    finished.end_row();
                    match self.tables.last_mut() {
                        Some(outer) => outer.push_line(finished.table.flatten()),
                        None => self.content.tables.push(finished.table),
                    }
                }
            }
            _ => {}
        }
    }

    fn push_text(&mut self, text: &str) {
        if let Some(paragraph) = self.paragraph.as_mut() {
            paragraph.text.push_str(text);
        }
    }

    fn end_paragraph(&mut self) {
        let Some(paragraph) = self.paragraph.take() else {
            return;
        };
        self.in_paragraph_props = false;
        self.run_depth = 0;
        self.in_text = false;

        match self.tables.last_mut() {
            Some(table) => table.push_line(paragraph.text),
            None => {
                if !paragraph.text.trim().is_empty() {
                    self.content.paragraphs.push(Paragraph {
                        text: paragraph.text,
                        style: paragraph
                            .style
                            .unwrap_or_else(|| DEFAULT_STYLE.to_string()),
                    });
                }
            }
        }
    }
}

fn attribute(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == name)
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
}

/// Extract paragraphs and tables from the main document part.
pub fn parse_document_xml(xml: &[u8]) -> Result<DocxContent, ConversionError> {
    let mut reader = Reader::from_reader(xml);
    let mut parser = BodyParser::default();
    let mut buf = Vec::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(ConversionError::MalformedXml)?
        {
            Event::Start(ref e) => parser.start(e, false),
            Event::Empty(ref e) => parser.start(e, true),
            Event::End(ref e) => parser.end(e.local_name().as_ref()),
            Event::Text(e) if parser.in_text => {
                let text = e.decode().unwrap_or_default();
                parser.push_text(&text);
            }
            Event::GeneralRef(e) if parser.in_text => {
                if let Ok(Some(ch)) = e.resolve_char_ref() {
                    let mut utf8 = [0u8; 4];
                    parser.push_text(ch.encode_utf8(&mut utf8));
                } else if let Ok(name) = e.decode() {
                    if let Some(resolved) = resolve_predefined_entity(&name) {
                        parser.push_text(resolved);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !parser.saw_body {
        return Err(ConversionError::MissingBody);
    }
    Ok(parser.content)
}
