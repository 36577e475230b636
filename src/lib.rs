pub mod config;
pub mod models;
pub mod processing;
pub mod utils;

pub use config::ExtractorConfig;
pub use models::{BatchResult, VehicleRecord};
pub use processing::{
    BatchProcessor, EnhancedOcrProcessor, FieldExtractor, ImageProcessor, OcrEngine, TesseractEngine,
};
pub use utils::RegistryError;
