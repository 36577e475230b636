pub mod batch;
pub mod enhanced_ocr;
pub mod export;
pub mod extractors;
pub mod image_processor;
pub mod ocr;

pub use batch::BatchProcessor;
pub use enhanced_ocr::EnhancedOcrProcessor;
pub use export::write_exports;
pub use extractors::FieldExtractor;
pub use image_processor::ImageProcessor;
pub use ocr::{OcrEngine, RecognitionParams, TesseractEngine};
