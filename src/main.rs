// Vehicle registry extraction: screenshots in, CSV/JSON records out

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Local;
use clap::Parser;
use log::{error, warn};

use vehicle_registry_ocr::{
    models::BatchResult,
    processing::{export::ExportPaths, write_exports},
    BatchProcessor, EnhancedOcrProcessor, ExtractorConfig, ImageProcessor, RegistryError,
    TesseractEngine,
};

#[derive(Parser, Debug)]
#[command(name = "vr-extract")]
#[command(about = "Extract vehicle records from registry result screenshots", long_about = None)]
struct Cli {
    /// JSON config file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Folder with <plate>_resultado.<ext> screenshots
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Full CSV output path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Tesseract data directory
    #[arg(long)]
    tessdata: Option<PathBuf>,

    /// Tesseract languages, e.g. "spa+eng"
    #[arg(long)]
    lang: Option<String>,

    /// Images processed concurrently
    #[arg(short, long)]
    workers: Option<usize>,

    /// Per-call OCR timeout in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply(&self, config: &mut ExtractorConfig) {
        if let Some(input) = &self.input {
            config.input_folder = input.clone();
        }
        if let Some(output) = &self.output {
            config.output_file = output.clone();
        }
        if let Some(tessdata) = &self.tessdata {
            config.tessdata_dir = Some(tessdata.clone());
        }
        if let Some(lang) = &self.lang {
            config.languages = lang.clone();
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(timeout) = self.timeout {
            config.ocr_timeout_secs = Some(timeout);
        }
    }
}

fn print_summary(result: &BatchResult, exports: Option<&ExportPaths>) {
    println!("\n============================================================");
    println!("  EXTRACTION SUMMARY ({})", Local::now().format("%Y-%m-%d %H:%M:%S"));
    println!("============================================================");
    println!("  Images processed: {}", result.processed());
    println!("  Successful:       {}", result.successful);
    println!("  Failed:           {}", result.failed);

    if !result.failures.is_empty() {
        println!("\nFAILED IMAGES:");
        for failure in &result.failures {
            println!("  - [{}] {}: {}", failure.kind, failure.file.display(), failure.message);
        }
    }

    if let Some(paths) = exports {
        println!("\nOUTPUT FILES:");
        println!("  {}", paths.full_csv.display());
        println!("  {}", paths.simple_csv.display());
        println!("  {}", paths.json.display());
    }
    println!("============================================================");
}

fn run(cli: &Cli) -> Result<(), RegistryError> {
    let mut config = ExtractorConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    let engine = TesseractEngine::new(config.tessdata_dir.clone(), &config.languages)?;
    let ocr = EnhancedOcrProcessor::new(Arc::new(engine), ImageProcessor::new(config.crop_margins()))
        .with_timeout(config.ocr_timeout());
    let batch = BatchProcessor::new(ocr).with_workers(config.workers);

    let result = batch.run_batch(&config.input_folder)?;

    let exports = write_exports(&result.records, &config.output_file)?;
    if exports.is_none() {
        warn!("No records extracted; no output files written");
    }

    print_summary(&result, exports.as_ref());
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
