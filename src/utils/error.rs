use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Image read error for {path:?}: {message}")]
    ImageRead { path: PathBuf, message: String },

    #[error("Image too small to crop: height {height}px does not exceed the {margins}px of margins")]
    ImageTooSmall { height: u32, margins: u32 },

    #[error("OCR engine error: {0}")]
    OcrEngine(String),

    #[error("No text extracted from {0:?}")]
    NoTextExtracted(PathBuf),

    #[error("Processing aborted for {path:?}: {message}")]
    Processing { path: PathBuf, message: String },

    #[error("OCR engine initialization failed: {0}")]
    EngineInit(String),

    #[error("Input folder error for {path:?}: {message}")]
    InputFolder { path: PathBuf, message: String },

    #[error("Export error: {0}")]
    Export(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Per-image failure categories reported in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ImageRead,
    OcrEngine,
    NoTextExtracted,
    Processing,
    Other,
}

impl RegistryError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            RegistryError::ImageRead { .. } => FailureKind::ImageRead,
            RegistryError::OcrEngine(_) => FailureKind::OcrEngine,
            RegistryError::NoTextExtracted(_) => FailureKind::NoTextExtracted,
            RegistryError::Processing { .. } => FailureKind::Processing,
            _ => FailureKind::Other,
        }
    }

    /// Errors after which no further image can be processed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RegistryError::EngineInit(_) | RegistryError::InputFolder { .. }
        )
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let label = match self {
            FailureKind::ImageRead => "image-read",
            FailureKind::OcrEngine => "ocr-engine",
            FailureKind::NoTextExtracted => "no-text",
            FailureKind::Processing => "processing",
            FailureKind::Other => "other",
        };
        write!(f, "{}", label)
    }
}
