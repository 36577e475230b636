//! Run configuration.
//!
//! Settings come from an optional JSON file; every key may be omitted and
//! falls back to its default. Command-line flags are applied on top by the
//! binary.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;

use crate::processing::image_processor::{CropMargins, BOTTOM_CROP, TOP_CROP};
use crate::utils::RegistryError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Folder holding the `<plate>_resultado.<ext>` screenshots
    pub input_folder: PathBuf,
    /// Full CSV output; the simplified CSV and JSON are written next to it
    pub output_file: PathBuf,
    /// Tesseract data directory (None: TESSDATA_PREFIX or the built-in default)
    pub tessdata_dir: Option<PathBuf>,
    /// Tesseract language string, e.g. "spa+eng"
    pub languages: String,
    /// Images processed concurrently
    pub workers: usize,
    /// Limit for a single engine call, in seconds
    pub ocr_timeout_secs: Option<u64>,
    pub top_crop: u32,
    pub bottom_crop: u32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            input_folder: PathBuf::from("output_images"),
            output_file: PathBuf::from("vehicle_data_extracted.csv"),
            tessdata_dir: None,
            languages: "spa+eng".to_string(),
            workers: 1,
            ocr_timeout_secs: None,
            top_crop: TOP_CROP,
            bottom_crop: BOTTOM_CROP,
        }
    }
}

impl ExtractorConfig {
    /// Read a JSON config file. Unlike a missing optional file, a file that
    /// exists but cannot be read or parsed is an error.
    pub fn from_file(path: &Path) -> Result<Self, RegistryError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            RegistryError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&contents).map_err(|e| {
            RegistryError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        info!("Config loaded from {}", path.display());
        config.validate()?;
        Ok(config)
    }

    /// Defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, RegistryError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.languages.trim().is_empty() {
            return Err(RegistryError::Config("languages must not be empty".to_string()));
        }
        if self.workers == 0 {
            return Err(RegistryError::Config("workers must be at least 1".to_string()));
        }
        if self.ocr_timeout_secs == Some(0) {
            return Err(RegistryError::Config("ocr_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn crop_margins(&self) -> CropMargins {
        CropMargins {
            top: self.top_crop,
            bottom: self.bottom_crop,
        }
    }

    pub fn ocr_timeout(&self) -> Option<Duration> {
        self.ocr_timeout_secs.map(Duration::from_secs)
    }
}
