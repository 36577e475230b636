use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::Parser;
use log::info;

use vehicle_registry_ocr::processing::batch::plate_from_path;
use vehicle_registry_ocr::FieldExtractor;

/// Parse already-recognized registry text and print the record as JSON.
#[derive(Parser, Debug)]
#[command(name = "vr-parse")]
struct Cli {
    /// Text file holding OCR output
    text_file: PathBuf,

    /// Plate used when the text has none (defaults to the file name)
    #[arg(short, long)]
    plate: Option<String>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let text = fs::read_to_string(&cli.text_file)?;
    let plate = cli
        .plate
        .clone()
        .unwrap_or_else(|| plate_from_path(&cli.text_file));

    let record = FieldExtractor::parse(&text, &plate);
    info!("{} fields found", record.populated_fields());

    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
