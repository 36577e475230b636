use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use image::GrayImage;
use log::{debug, warn};

use crate::models::{RawImage, RecognitionResult, Variant};
use crate::processing::image_processor::ImageProcessor;
use crate::processing::ocr::{OcrEngine, RecognitionParams};
use crate::utils::RegistryError;

/// Minimum word confidence for the first, fully processed attempt.
pub const PRIMARY_MIN_CONFIDENCE: f32 = 30.0;
/// Minimum word confidence for the fallback attempts.
pub const FALLBACK_MIN_CONFIDENCE: f32 = 20.0;
/// Below this many fragments an attempt is considered sparse.
pub const MIN_FRAGMENTS: usize = 5;
/// Below this many characters the primary attempt is considered sparse.
pub const MIN_CHARS: usize = 50;

/// Runs the OCR engine over up to three preprocessing variants of the same
/// screenshot and keeps the richest extraction.
///
/// Recognition never fails: engine errors, panics and timeouts turn into an
/// empty candidate and the ladder moves on.
pub struct EnhancedOcrProcessor {
    engine: Arc<dyn OcrEngine>,
    normalizer: ImageProcessor,
    timeout: Option<Duration>,
}

impl EnhancedOcrProcessor {
    pub fn new(engine: Arc<dyn OcrEngine>, normalizer: ImageProcessor) -> Self {
        Self {
            engine,
            normalizer,
            timeout: None,
        }
    }

    /// Bound every engine call to `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn recognize(&self, raw: &RawImage) -> RecognitionResult {
        let mut candidates = vec![self.attempt(raw, Variant::Primary, PRIMARY_MIN_CONFIDENCE)];

        let first = &candidates[0];
        if first.fragment_count() < MIN_FRAGMENTS || first.char_count() < MIN_CHARS {
            debug!(
                "Primary attempt sparse ({} fragments, {} chars), trying alternative preprocessing",
                first.fragment_count(),
                first.char_count()
            );
            candidates.push(self.attempt(raw, Variant::Alternative, FALLBACK_MIN_CONFIDENCE));
        }

        let best_fragments = select_best(&candidates).map_or(0, |c| c.fragment_count());
        if best_fragments < MIN_FRAGMENTS {
            debug!(
                "Best attempt still has {} fragments, trying the unprocessed frame",
                best_fragments
            );
            candidates.push(self.attempt(raw, Variant::Unprocessed, FALLBACK_MIN_CONFIDENCE));
        }

        let best = select_best(&candidates)
            .cloned()
            .unwrap_or_else(|| RecognitionResult::empty(Variant::Primary));
        debug!(
            "Selected {} attempt with {} chars out of {} attempts",
            best.variant,
            best.char_count(),
            candidates.len()
        );
        best
    }

    fn attempt(&self, raw: &RawImage, variant: Variant, min_confidence: f32) -> RecognitionResult {
        let normalized = self.normalizer.normalize(raw, variant);
        let params = RecognitionParams { min_confidence };

        match self.run_engine(normalized.image, params) {
            Ok(fragments) => {
                let fragments: Vec<String> = fragments
                    .into_iter()
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty())
                    .collect();
                let result = RecognitionResult::new(fragments, variant);
                debug!(
                    "{} attempt: {} fragments, {} chars",
                    variant,
                    result.fragment_count(),
                    result.char_count()
                );
                result
            }
            Err(e) => {
                warn!("{} attempt failed: {}", variant, e);
                RecognitionResult::empty(variant)
            }
        }
    }

    fn run_engine(
        &self,
        image: GrayImage,
        params: RecognitionParams,
    ) -> Result<Vec<String>, RegistryError> {
        let limit = match self.timeout {
            Some(limit) => limit,
            None => return call_guarded(self.engine.as_ref(), &image, &params),
        };

        // The helper thread is left to finish on its own after a timeout;
        // its result is discarded when the receiver is gone.
        let (tx, rx) = mpsc::channel();
        let engine = Arc::clone(&self.engine);
        thread::Builder::new()
            .name("ocr-attempt".to_string())
            .spawn(move || {
                let _ = tx.send(call_guarded(engine.as_ref(), &image, &params));
            })
            .map_err(|e| RegistryError::OcrEngine(format!("Failed to spawn OCR thread: {}", e)))?;

        match rx.recv_timeout(limit) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(RegistryError::OcrEngine(format!(
                "engine call timed out after {:?}",
                limit
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(RegistryError::OcrEngine(
                "engine thread exited without a result".to_string(),
            )),
        }
    }
}

fn call_guarded(
    engine: &dyn OcrEngine,
    image: &GrayImage,
    params: &RecognitionParams,
) -> Result<Vec<String>, RegistryError> {
    panic::catch_unwind(AssertUnwindSafe(|| engine.recognize(image, params))).unwrap_or_else(
        |payload| {
            Err(RegistryError::OcrEngine(format!(
                "engine panicked: {}",
                panic_message(payload.as_ref())
            )))
        },
    )
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// The candidate with the most text; the earliest one wins a tie.
pub fn select_best(candidates: &[RecognitionResult]) -> Option<&RecognitionResult> {
    let mut best: Option<&RecognitionResult> = None;
    for candidate in candidates {
        match best {
            Some(current) if candidate.char_count() <= current.char_count() => {}
            _ => best = Some(candidate),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Instant;

    /// Replays canned engine responses in call order and records the
    /// confidence each call was made with.
    struct ScriptedEngine {
        responses: Mutex<VecDeque<Result<Vec<String>, RegistryError>>>,
        calls: Mutex<Vec<f32>>,
    }

    impl ScriptedEngine {
        fn new(responses: Vec<Result<Vec<String>, RegistryError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<f32> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl OcrEngine for ScriptedEngine {
        fn recognize(
            &self,
            _image: &GrayImage,
            params: &RecognitionParams,
        ) -> Result<Vec<String>, RegistryError> {
            self.calls.lock().unwrap().push(params.min_confidence);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    struct PanickingEngine;

    impl OcrEngine for PanickingEngine {
        fn recognize(&self, _: &GrayImage, _: &RecognitionParams) -> Result<Vec<String>, RegistryError> {
            panic!("leptonica exploded");
        }
    }

    struct SlowEngine(Duration);

    impl OcrEngine for SlowEngine {
        fn recognize(&self, _: &GrayImage, _: &RecognitionParams) -> Result<Vec<String>, RegistryError> {
            thread::sleep(self.0);
            Ok(vec!["PLACA: LATE-001".to_string()])
        }
    }

    fn screenshot() -> RawImage {
        ImageBuffer::from_pixel(60, 200, Rgb([255, 255, 255]))
    }

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn processor(engine: Arc<dyn OcrEngine>) -> EnhancedOcrProcessor {
        EnhancedOcrProcessor::new(engine, ImageProcessor::default())
    }

    fn candidate(chars: usize, variant: Variant) -> RecognitionResult {
        RecognitionResult::new(vec!["X".repeat(chars)], variant)
    }

    #[test]
    fn test_rich_primary_stops_the_ladder() {
        let engine = ScriptedEngine::new(vec![Ok(lines(&[
            "PLACA: ABC-123",
            "N° SERIE: 9BWZZZ377VT004251",
            "MARCA: TOYOTA",
            "MODELO: COROLLA",
            "COLOR: BLANCO",
        ]))]);
        let result = processor(engine.clone()).recognize(&screenshot());

        assert_eq!(result.variant, Variant::Primary);
        assert_eq!(result.fragment_count(), 5);
        assert_eq!(engine.calls(), vec![PRIMARY_MIN_CONFIDENCE]);
    }

    #[test]
    fn test_sparse_primary_falls_back_to_alternative() {
        let engine = ScriptedEngine::new(vec![
            Ok(lines(&["PLACA ABC", "MARCA"])),
            Ok(lines(&[
                "PLACA: ABC-123",
                "MARCA: TOYOTA",
                "MODELO: COROLLA",
                "COLOR: BLANCO",
                "ESTADO: EN CIRCULACION",
                "SEDE: LIMA",
            ])),
        ]);
        let result = processor(engine.clone()).recognize(&screenshot());

        assert_eq!(result.variant, Variant::Alternative);
        assert!(result.text.contains("SEDE: LIMA"));
        assert_eq!(
            engine.calls(),
            vec![PRIMARY_MIN_CONFIDENCE, FALLBACK_MIN_CONFIDENCE]
        );
    }

    #[test]
    fn test_third_attempt_uses_unprocessed_frame() {
        let engine = ScriptedEngine::new(vec![
            Ok(lines(&["PLACA"])),
            Err(RegistryError::OcrEngine("bad image".to_string())),
            Ok(lines(&["PLACA: ABC-123", "MARCA: KIA"])),
        ]);
        let result = processor(engine.clone()).recognize(&screenshot());

        assert_eq!(result.variant, Variant::Unprocessed);
        assert_eq!(result.text, "PLACA: ABC-123\nMARCA: KIA");
        assert_eq!(
            engine.calls(),
            vec![PRIMARY_MIN_CONFIDENCE, FALLBACK_MIN_CONFIDENCE, FALLBACK_MIN_CONFIDENCE]
        );
    }

    #[test]
    fn test_earlier_attempt_kept_when_fallbacks_are_not_longer() {
        let engine = ScriptedEngine::new(vec![
            Ok(lines(&["PLACA: ABC-123"])),
            Ok(lines(&["PLACA"])),
            Ok(lines(&["ABC-123 PLACA:"])),
        ]);
        let result = processor(engine).recognize(&screenshot());
        assert_eq!(result.variant, Variant::Primary);
        assert_eq!(result.text, "PLACA: ABC-123");
    }

    #[test]
    fn test_blank_fragments_are_dropped() {
        let engine = ScriptedEngine::new(vec![Ok(lines(&["  ", "PLACA: ABC-123 ", ""]))]);
        let result = processor(engine).recognize(&screenshot());
        assert_eq!(result.fragments, vec!["PLACA: ABC-123"]);
    }

    #[test]
    fn test_panicking_engine_degrades_to_empty() {
        let result = processor(Arc::new(PanickingEngine)).recognize(&screenshot());
        assert!(result.is_blank());
        assert_eq!(result.fragment_count(), 0);
    }

    #[test]
    fn test_timeout_degrades_to_empty() {
        let slow = Arc::new(SlowEngine(Duration::from_millis(400)));
        let processor = processor(slow).with_timeout(Some(Duration::from_millis(20)));

        let started = Instant::now();
        let result = processor.recognize(&screenshot());
        assert!(result.is_blank());
        // Three attempts, each abandoned at the timeout
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[test]
    fn test_timeout_not_hit_returns_text() {
        let slow = Arc::new(SlowEngine(Duration::from_millis(1)));
        let processor = processor(slow).with_timeout(Some(Duration::from_secs(5)));
        let result = processor.recognize(&screenshot());
        assert_eq!(result.text, "PLACA: LATE-001");
    }

    #[test]
    fn test_select_best_picks_longest_in_any_order() {
        let orders = [[10, 80, 40], [80, 10, 40], [40, 10, 80], [10, 40, 80]];
        for order in orders {
            let candidates: Vec<RecognitionResult> =
                order.iter().map(|&n| candidate(n, Variant::Primary)).collect();
            assert_eq!(select_best(&candidates).unwrap().char_count(), 80);
        }
    }

    #[test]
    fn test_select_best_tie_goes_to_earliest() {
        let candidates = vec![
            candidate(30, Variant::Primary),
            candidate(30, Variant::Alternative),
        ];
        assert_eq!(select_best(&candidates).unwrap().variant, Variant::Primary);
        assert!(select_best(&[]).is_none());
    }
}
