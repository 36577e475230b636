use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::models::{BatchFailure, BatchResult, VehicleRecord};
use crate::processing::enhanced_ocr::{panic_message, EnhancedOcrProcessor};
use crate::processing::extractors::FieldExtractor;
use crate::processing::image_processor::ImageProcessor;
use crate::utils::RegistryError;

/// Extensions accepted for result screenshots (compared case-insensitively).
pub const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff", "webp"];

const RESULT_SUFFIX: &str = "_resultado";
const ERROR_MARKER: &str = "ERROR";

/// What happened to one screenshot.
#[derive(Debug)]
pub enum ImageOutcome {
    Parsed(VehicleRecord),
    /// Every OCR attempt came back empty; the record only carries the
    /// plate from the file name.
    NoText(VehicleRecord),
    Failed(RegistryError),
}

/// Runs normalize, recognize and parse over every result screenshot in a folder.
pub struct BatchProcessor {
    ocr: EnhancedOcrProcessor,
    workers: usize,
}

impl BatchProcessor {
    pub fn new(ocr: EnhancedOcrProcessor) -> Self {
        Self { ocr, workers: 1 }
    }

    /// Number of images processed concurrently. Values below 1 mean 1.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn run_batch<P: AsRef<Path>>(&self, input_folder: P) -> Result<BatchResult, RegistryError> {
        let folder = input_folder.as_ref();
        let images = eligible_images(folder)?;

        if images.is_empty() {
            warn!(
                "No *{}.<image> files found in {}",
                RESULT_SUFFIX,
                folder.display()
            );
            return Ok(BatchResult::default());
        }
        info!("Found {} result images in {}", images.len(), folder.display());

        let outcomes = if self.workers > 1 && images.len() > 1 {
            self.process_parallel(&images)
        } else {
            self.process_sequential(&images)
        };

        let mut result = BatchResult {
            eligible: images.len(),
            ..Default::default()
        };
        for (path, outcome) in images.iter().zip(outcomes) {
            match outcome {
                ImageOutcome::Parsed(record) => {
                    result.successful += 1;
                    result.records.push(record);
                }
                ImageOutcome::NoText(record) => {
                    let error = RegistryError::NoTextExtracted(path.clone());
                    result.failed += 1;
                    result.failures.push(failure_for(path, &error));
                    result.records.push(record);
                }
                ImageOutcome::Failed(error) => {
                    result.failed += 1;
                    result.failures.push(failure_for(path, &error));
                }
            }
        }

        info!(
            "Batch finished: {} processed, {} successful, {} failed",
            result.processed(),
            result.successful,
            result.failed
        );
        Ok(result)
    }

    /// Process one screenshot end to end. Every problem, including a panic
    /// in any stage, is reported through the outcome for this image only.
    pub fn process_image(&self, path: &Path) -> ImageOutcome {
        contain_panic(path, || self.analyze_image(path))
    }

    fn analyze_image(&self, path: &Path) -> ImageOutcome {
        let plate = plate_from_path(path);

        let raw = match ImageProcessor::load_raw_image(path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                return ImageOutcome::Failed(e);
            }
        };

        let recognition = self.ocr.recognize(&raw);
        if recognition.is_blank() {
            warn!("No text extracted from {}", path.display());
            return ImageOutcome::NoText(FieldExtractor::parse("", &plate));
        }

        let record = FieldExtractor::parse(&recognition.text, &plate);
        info!(
            "{}: {} chars via {} preprocessing, {} fields (marca: {}, modelo: {})",
            record.placa,
            recognition.char_count(),
            recognition.variant,
            record.populated_fields(),
            display_or_na(&record.marca),
            display_or_na(&record.modelo)
        );
        ImageOutcome::Parsed(record)
    }

    fn process_sequential(&self, images: &[PathBuf]) -> Vec<ImageOutcome> {
        images
            .iter()
            .enumerate()
            .map(|(index, path)| {
                info!("[{}/{}] Processing {}", index + 1, images.len(), path.display());
                self.process_image(path)
            })
            .collect()
    }

    // Indexed parallel iteration collects outcomes in input order.
    fn process_parallel(&self, images: &[PathBuf]) -> Vec<ImageOutcome> {
        let workers = self.workers.min(images.len());
        let pool = match ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => pool,
            Err(e) => {
                warn!("Could not start {} OCR workers ({}); processing sequentially", workers, e);
                return self.process_sequential(images);
            }
        };
        debug!("Processing {} images on {} workers", images.len(), workers);

        pool.install(|| {
            images
                .par_iter()
                .enumerate()
                .map(|(index, path)| {
                    info!("[{}/{}] Processing {}", index + 1, images.len(), path.display());
                    self.process_image(path)
                })
                .collect()
        })
    }
}

fn contain_panic<F>(path: &Path, analyze: F) -> ImageOutcome
where
    F: FnOnce() -> ImageOutcome,
{
    panic::catch_unwind(AssertUnwindSafe(analyze)).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        warn!("Processing {} panicked: {}", path.display(), message);
        ImageOutcome::Failed(RegistryError::Processing {
            path: path.to_path_buf(),
            message,
        })
    })
}

/// Sorted list of result screenshots in `folder`.
pub fn eligible_images(folder: &Path) -> Result<Vec<PathBuf>, RegistryError> {
    let entries = fs::read_dir(folder).map_err(|e| RegistryError::InputFolder {
        path: folder.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut images: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map_or(false, is_eligible)
        })
        .collect();
    images.sort();
    Ok(images)
}

/// `<plate>_resultado.<image ext>`, without the ERROR marker anywhere in the name.
pub fn is_eligible(file_name: &str) -> bool {
    if file_name.to_uppercase().contains(ERROR_MARKER) {
        return false;
    }
    let lower = file_name.to_lowercase();
    match lower.rsplit_once('.') {
        Some((stem, ext)) => stem.ends_with(RESULT_SUFFIX) && IMAGE_EXTENSIONS.iter().any(|e| *e == ext),
        None => false,
    }
}

/// Plate id encoded in the file name: the stem without `_resultado`.
pub fn plate_from_path(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    match stem.len().checked_sub(RESULT_SUFFIX.len()) {
        Some(split)
            if stem.is_char_boundary(split) && stem[split..].eq_ignore_ascii_case(RESULT_SUFFIX) =>
        {
            stem[..split].to_string()
        }
        _ => stem.to_string(),
    }
}

fn failure_for(path: &Path, error: &RegistryError) -> BatchFailure {
    BatchFailure {
        file: path.to_path_buf(),
        kind: error.failure_kind(),
        message: error.to_string(),
    }
}

fn display_or_na(value: &str) -> &str {
    if value.is_empty() {
        "N/A"
    } else {
        value
    }
}
