//! Convert a single document on disk without running the service.

use anyhow::Result;
use clap::Parser;
use conversion_service::converters::{convert_file, ConverterRegistry};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "convert", version, about = "Convert a Word document to an Excel workbook")]
struct Cli {
    /// Document to convert.
    input: PathBuf,

    /// Where to write the workbook. Defaults to the input path with the
    /// output extension.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log level for diagnostics on stderr.
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let written = convert_file(&ConverterRegistry::new(), &cli.input, cli.output.as_deref())?;
    println!("Conversion complete. Workbook saved to: {}", written.display());
    Ok(())
}
