//! Format converters. Conversion is a pure function of the input bytes and
//! [`CONVERTER_VERSION`].

pub mod docx;
pub mod docx_to_xlsx;
pub mod file;
pub mod xlsx;

use crate::error::ConversionError;
use std::sync::Arc;

pub use docx_to_xlsx::DocxToXlsx;
pub use file::convert_file;

/// Bumped whenever converter output changes for the same input.
pub const CONVERTER_VERSION: &str = "1.0.0";

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Synchronous, CPU-bound transformation. Callers run it on the blocking pool.
pub trait Converter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lower-case extensions without the dot.
    fn source_extensions(&self) -> &'static [&'static str];

    fn source_mime_types(&self) -> &'static [&'static str];

    fn output_extension(&self) -> &'static str;

    fn output_content_type(&self) -> &'static str;

    fn convert(&self, input: &[u8]) -> Result<Vec<u8>, ConversionError>;
}

pub struct ConverterRegistry {
    converters: Vec<Arc<dyn Converter>>,
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::with_converters(vec![Arc::new(DocxToXlsx::new())])
    }

    pub fn with_converters(converters: Vec<Arc<dyn Converter>>) -> Self {
        Self { converters }
    }

    pub fn find_by_extension(&self, extension: &str) -> Option<Arc<dyn Converter>> {
        let extension = extension.to_ascii_lowercase();
        self.converters
            .iter()
            .find(|c| c.source_extensions().contains(&extension.as_str()))
            .cloned()
    }

    pub fn find_by_mime_type(&self, mime_type: &str) -> Option<Arc<dyn Converter>> {
        self.converters
            .iter()
            .find(|c| c.source_mime_types().contains(&mime_type))
            .cloned()
    }

    /// Converter for a stored or uploaded filename, by its extension.
    pub fn for_filename(&self, filename: &str) -> Option<Arc<dyn Converter>> {
        extension_of(filename).and_then(|ext| self.find_by_extension(&ext))
    }

    pub fn supported_extensions(&self) -> Vec<&'static str> {
        self.converters
            .iter()
            .flat_map(|c| c.source_extensions().iter().copied())
            .collect()
    }
}

/// Lower-cased extension of the final path segment, if any.
pub fn extension_of(filename: &str) -> Option<String> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
