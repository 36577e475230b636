use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use image::{GrayImage, ImageFormat};
use log::{debug, info};
use tesseract::{InitializeError, PageSegMode, Tesseract};

use crate::utils::RegistryError;

/// Knobs passed to the engine for a single recognition call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecognitionParams {
    /// Words recognized below this confidence (0-100) are dropped.
    pub min_confidence: f32,
}

impl Default for RecognitionParams {
    fn default() -> Self {
        Self { min_confidence: 30.0 }
    }
}

/// Text recognition capability: pixels in, text fragments out, in approximate
/// reading order.
///
/// Implementations are shared across worker threads and must not keep
/// per-call mutable state.
pub trait OcrEngine: Send + Sync {
    fn recognize(
        &self,
        image: &GrayImage,
        params: &RecognitionParams,
    ) -> Result<Vec<String>, RegistryError>;
}

/// Idle handles kept for reuse. A handle is checked out for the length of one
/// call, so concurrent callers never share one.
struct HandlePool<T> {
    idle: Mutex<Vec<T>>,
}

impl<T> HandlePool<T> {
    fn new() -> Self {
        Self { idle: Mutex::new(Vec::new()) }
    }

    /// An idle handle, or a new one from `create` when all are in use.
    fn take_or_create<E>(&self, create: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        let idle = self.lock().pop();
        match idle {
            Some(handle) => Ok(handle),
            None => create(),
        }
    }

    fn put_back(&self, handle: T) {
        self.lock().push(handle);
    }

    #[cfg(test)]
    fn idle_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Tesseract-backed engine. Language data is loaded once per handle and
/// handles are reused across calls; a handle that fails mid-call is dropped.
pub struct TesseractEngine {
    datapath: Option<String>,
    languages: String,
    handles: HandlePool<Tesseract>,
}

impl TesseractEngine {
    /// Loads the language data once; the loaded handle serves the first call.
    pub fn new(datapath: Option<PathBuf>, languages: &str) -> Result<Self, RegistryError> {
        let datapath = match datapath {
            Some(path) => Some(
                path.to_str()
                    .ok_or_else(|| {
                        RegistryError::EngineInit(format!("Tessdata path is not valid UTF-8: {:?}", path))
                    })?
                    .to_string(),
            ),
            None => None,
        };

        let first = load_handle(datapath.as_deref(), languages).map_err(|e| {
            RegistryError::EngineInit(format!("Failed to load Tesseract languages '{}': {}", languages, e))
        })?;

        info!(
            "Tesseract ready (languages: {}, data: {})",
            languages,
            datapath.as_deref().unwrap_or("default")
        );
        let handles = HandlePool::new();
        handles.put_back(first);
        Ok(Self {
            datapath,
            languages: languages.to_string(),
            handles,
        })
    }
}

fn load_handle(datapath: Option<&str>, languages: &str) -> Result<Tesseract, InitializeError> {
    let mut tess = Tesseract::new(datapath, Some(languages))?;
    tess.set_page_seg_mode(PageSegMode::PsmAuto);
    Ok(tess)
}

impl OcrEngine for TesseractEngine {
    fn recognize(
        &self,
        image: &GrayImage,
        params: &RecognitionParams,
    ) -> Result<Vec<String>, RegistryError> {
        // Tesseract reads from a file path, so hand it a temporary PNG
        let temp_file = tempfile::Builder::new()
            .suffix(".png")
            .tempfile()
            .map_err(|e| RegistryError::OcrEngine(format!("Failed to create temp file: {}", e)))?;

        image
            .save_with_format(temp_file.path(), ImageFormat::Png)
            .map_err(|e| RegistryError::OcrEngine(format!("Failed to write temp image: {}", e)))?;

        let path_str = temp_file
            .path()
            .to_str()
            .ok_or_else(|| RegistryError::OcrEngine("Could not convert path to string".to_string()))?;

        let tess = self
            .handles
            .take_or_create(|| {
                debug!("All Tesseract handles busy; loading another");
                load_handle(self.datapath.as_deref(), &self.languages)
            })
            .map_err(|e| RegistryError::OcrEngine(format!("Failed to initialize Tesseract: {}", e)))?;

        let mut tess = tess
            .set_image(path_str)
            .map_err(|e| RegistryError::OcrEngine(format!("Failed to set image: {}", e)))?
            .recognize()
            .map_err(|e| RegistryError::OcrEngine(format!("Recognition failed: {}", e)))?;

        let tsv = tess
            .get_tsv_text(0)
            .map_err(|e| RegistryError::OcrEngine(format!("Failed to read TSV output: {}", e)))?;
        self.handles.put_back(tess);

        let fragments = parse_tsv_fragments(&tsv, params.min_confidence);
        debug!(
            "Tesseract returned {} fragments at min confidence {}",
            fragments.len(),
            params.min_confidence
        );
        Ok(fragments)
    }
}

/// Group Tesseract TSV words into text lines, dropping words below
/// `min_confidence`. One fragment per line that keeps at least one word.
pub fn parse_tsv_fragments(tsv: &str, min_confidence: f32) -> Vec<String> {
    let mut fragments = Vec::new();
    let mut current_key: Option<(i32, i32, i32)> = None;
    let mut current_words: Vec<&str> = Vec::new();

    for line in tsv.lines() {
        // level, page_num, block_num, par_num, line_num, word_num,
        // left, top, width, height, conf, text
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }

        // Header row and non-word levels
        let level: i32 = match fields[0].parse() {
            Ok(level) => level,
            Err(_) => continue,
        };
        if level != 5 {
            continue;
        }

        let key = (
            fields[2].parse().unwrap_or(-1),
            fields[3].parse().unwrap_or(-1),
            fields[4].parse().unwrap_or(-1),
        );
        if current_key != Some(key) {
            if !current_words.is_empty() {
                fragments.push(current_words.join(" "));
                current_words.clear();
            }
            current_key = Some(key);
        }

        let conf: f32 = fields[10].trim().parse().unwrap_or(-1.0);
        let text = fields[11].trim();
        if text.is_empty() || conf < min_confidence {
            continue;
        }
        current_words.push(text);
    }

    if !current_words.is_empty() {
        fragments.push(current_words.join(" "));
    }
    fragments
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn word(block: i32, par: i32, line: i32, word: i32, conf: f32, text: &str) -> String {
        format!("5\t1\t{}\t{}\t{}\t{}\t0\t0\t10\t10\t{}\t{}", block, par, line, word, conf, text)
    }

    #[test]
    fn test_parse_tsv_groups_words_into_lines() {
        let tsv = [
            "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext".to_string(),
            "1\t1\t0\t0\t0\t0\t0\t0\t800\t600\t-1\t".to_string(),
            word(1, 1, 1, 1, 95.0, "PLACA:"),
            word(1, 1, 1, 2, 91.5, "ABC-123"),
            word(1, 1, 2, 1, 88.0, "MARCA:"),
            word(1, 1, 2, 2, 12.0, "T0Y0TA"),
            word(2, 1, 1, 1, 70.0, "ESTADO:"),
            word(2, 1, 1, 2, 65.0, "EN"),
            word(2, 1, 1, 3, 66.0, "CIRCULACION"),
        ]
        .join("\n");

        let fragments = parse_tsv_fragments(&tsv, 30.0);
        assert_eq!(
            fragments,
            vec!["PLACA: ABC-123", "MARCA:", "ESTADO: EN CIRCULACION"]
        );

        // A lower threshold keeps the faint word
        let fragments = parse_tsv_fragments(&tsv, 10.0);
        assert_eq!(fragments[1], "MARCA: T0Y0TA");
    }

    #[test]
    fn test_parse_tsv_skips_lines_without_confident_words() {
        let tsv = [word(1, 1, 1, 1, 5.0, "~~"), word(1, 1, 2, 1, 80.0, "SEDE: LIMA")].join("\n");
        assert_eq!(parse_tsv_fragments(&tsv, 20.0), vec!["SEDE: LIMA"]);
        assert!(parse_tsv_fragments("", 20.0).is_empty());
    }

    #[test]
    fn test_handle_pool_reuses_idle_handles() {
        let pool: HandlePool<u32> = HandlePool::new();
        let created = Cell::new(0);
        let create = || -> Result<u32, String> {
            created.set(created.get() + 1);
            Ok(created.get())
        };

        let first = pool.take_or_create(create).unwrap();
        pool.put_back(first);
        for _ in 0..3 {
            let handle = pool.take_or_create(create).unwrap();
            assert_eq!(handle, 1);
            pool.put_back(handle);
        }
        assert_eq!(created.get(), 1);

        // Two handles checked out at once: the second one is new
        let a = pool.take_or_create(create).unwrap();
        let b = pool.take_or_create(create).unwrap();
        assert_eq!((a, b), (1, 2));
        pool.put_back(a);
        pool.put_back(b);
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn test_handle_pool_reports_create_failure() {
        let pool: HandlePool<u32> = HandlePool::new();
        let result = pool.take_or_create(|| Err::<u32, _>("no traineddata".to_string()));
        assert_eq!(result, Err("no traineddata".to_string()));
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_default_params() {
        assert_eq!(RecognitionParams::default().min_confidence, 30.0);
    }
}
