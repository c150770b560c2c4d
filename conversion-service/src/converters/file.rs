//! One-shot conversion of a file on disk, used by the `convert` binary.

use super::ConverterRegistry;
use anyhow::Context;
use std::path::{Path, PathBuf};

/// Input path with its extension swapped for the converter's output one.
pub fn default_output_path(input: &Path, output_extension: &str) -> PathBuf {
    input.with_extension(output_extension)
}

/// Convert `input` and write the result to `output`, or next to the input
/// when no output is given. Returns the path written.
pub fn convert_file(
    converters: &ConverterRegistry,
    input: &Path,
    output: Option<&Path>,
) -> anyhow::Result<PathBuf> {
    let name = input.to_string_lossy();
    let converter = converters.for_filename(&name).with_context(|| {
        format!(
            "no converter for {} (supported: {})",
            name,
            converters.supported_extensions().join(", ")
        )
    })?;

    let source =
        std::fs::read(input).with_context(|| format!("failed to read {}", input.display()))?;
    let converted = converter
        .convert(&source)
        .with_context(|| format!("failed to convert {}", input.display()))?;

    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_output_path(input, converter.output_extension()));
    std::fs::write(&output, converted)
        .with_context(|| format!("failed to write {}", output.display()))?;

    tracing::info!(
        input = %input.display(),
        output = %output.display(),
        converter = converter.name(),
        "File converted"
    );
    Ok(output)
}
