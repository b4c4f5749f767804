//! Verification session orchestration
//!
//! State machine tying the camera, the OCR engine, region classification
//! and text comparison into one verification cycle. Live capture and
//! static images are mutually exclusive inputs; a recognize request
//! snapshots its input, runs the pipeline, records history and - in live
//! mode - pauses on the frozen, annotated frame for operator inspection.

use anyhow::{Context, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::capture::{CameraEvent, CameraState, CapturedFrame, FrameSource};
use crate::compare::{ComparisonResult, TextComparator};
use crate::config::AppConfig;
use crate::storage::{HistoryRecord, HistoryStore, VerifyResult};
use crate::vision::{
    self, ClassifiedRegions, OcrOutcome, OcrSettings, RegionClassifier, TextOcr,
};

/// Verification session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No input source active
    Idle,
    /// Camera running, frames flowing to the display
    LiveCapturing,
    /// A verification cycle is executing
    Recognizing,
    /// Live mode frozen on an annotated frame after a cycle
    Paused,
    /// A file image is loaded and ready for verification
    StaticImageLoaded,
}

/// Session-level failures
#[derive(Debug, Error)]
pub enum SessionError {
    /// Recognize requested with no frame and no file loaded
    #[error("nothing to recognize: start the camera or load an image first")]
    NoInput,

    /// Live mode active but the camera has not delivered a frame yet
    #[error("no camera frame available yet")]
    NoFrame,

    /// The requested transition is not allowed from the current state
    #[error("operation not valid while {0:?}")]
    InvalidState(SessionState),

    /// The recognition pipeline failed; the cycle was aborted
    #[error(transparent)]
    Pipeline(#[from] anyhow::Error),
}

/// Everything one completed verification cycle produced
#[derive(Debug)]
pub struct VerificationOutcome {
    /// Classified label/print regions with their crops
    pub regions: ClassifiedRegions,
    /// Recognition result for the label region
    pub label: OcrOutcome,
    /// Recognition result for the print region
    pub print: OcrOutcome,
    /// Similarity, diff and verdict
    pub comparison: ComparisonResult,
    /// Input image with the region boxes drawn on it
    pub annotated: RgbImage,
    /// History record for this cycle (present when both texts were non-empty)
    pub record: Option<HistoryRecord>,
}

/// Orchestrates verification cycles over a camera or a loaded file
pub struct VerifySession {
    state: SessionState,
    source: FrameSource,
    camera_index: u32,
    static_image: Option<(PathBuf, RgbImage)>,
    frozen: Option<RgbImage>,
    classifier: RegionClassifier,
    comparator: TextComparator,
    ocr: Box<dyn TextOcr>,
    ocr_settings: OcrSettings,
    history: HistoryStore,
    captures_dir: Option<PathBuf>,
}

impl VerifySession {
    /// Create a session using the camera backends compiled into this build
    pub fn new(config: &AppConfig, ocr: Box<dyn TextOcr>, history: HistoryStore) -> Self {
        let source = FrameSource::with_default_backends(config.capture.clone());
        Self::with_source(config, ocr, history, source)
    }

    /// Create a session over an explicit frame source
    pub fn with_source(
        config: &AppConfig,
        ocr: Box<dyn TextOcr>,
        history: HistoryStore,
        source: FrameSource,
    ) -> Self {
        Self {
            state: SessionState::Idle,
            source,
            camera_index: config.capture.camera_index,
            static_image: None,
            frozen: None,
            classifier: RegionClassifier::new(config.regions.clone()),
            comparator: TextComparator::new(config.compare.clone()),
            ocr,
            ocr_settings: config.ocr.clone(),
            history,
            captures_dir: None,
        }
    }

    /// Directory where live-mode snapshots are saved; none disables saving
    pub fn set_captures_dir(&mut self, dir: Option<PathBuf>) {
        self.captures_dir = dir;
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current camera lifecycle state
    pub fn camera_state(&self) -> CameraState {
        self.source.state()
    }

    /// Most recent live frame, for preview display
    pub fn latest_frame(&self) -> Option<Arc<CapturedFrame>> {
        self.source.latest_frame()
    }

    /// The annotated frame held while paused
    pub fn frozen_frame(&self) -> Option<&RgbImage> {
        self.frozen.as_ref()
    }

    /// History store backing this session
    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Start live capture from the configured camera
    ///
    /// Clears any loaded file: live capture and file input are mutually
    /// exclusive. A no-op when already capturing.
    pub fn start_live(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::LiveCapturing => return Ok(()),
            SessionState::Idle | SessionState::StaticImageLoaded => {}
            other => return Err(SessionError::InvalidState(other)),
        }

        self.static_image = None;
        self.frozen = None;
        self.source.start(self.camera_index)?;
        self.state = SessionState::LiveCapturing;
        info!("Live capture started on camera {}", self.camera_index);
        Ok(())
    }

    /// Load a file image for verification, stopping the camera if running
    pub fn load_image(&mut self, path: &Path) -> Result<(), SessionError> {
        if self.state == SessionState::Recognizing {
            return Err(SessionError::InvalidState(self.state));
        }

        if self.source.is_active() {
            info!("Stopping live capture to load a file image");
            self.source.stop();
        }

        let image = image::open(path)
            .with_context(|| format!("failed to load image {:?}", path))?
            .to_rgb8();
        info!(
            "Loaded image {:?} ({}x{})",
            path,
            image.width(),
            image.height()
        );

        self.static_image = Some((path.to_path_buf(), image));
        self.frozen = None;
        self.state = SessionState::StaticImageLoaded;
        Ok(())
    }

    /// Resume live frame delivery after a paused cycle
    pub fn resume(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Paused {
            return Err(SessionError::InvalidState(self.state));
        }
        self.frozen = None;
        self.state = SessionState::LiveCapturing;
        debug!("Resumed live capture after pause");
        Ok(())
    }

    /// Stop all input and return to Idle
    pub fn stop(&mut self) {
        self.source.stop();
        self.static_image = None;
        self.frozen = None;
        self.state = SessionState::Idle;
    }

    /// Drain pending camera events, ending the live session on a fatal one
    ///
    /// Returns the drained events so the display can surface them.
    pub fn poll_camera(&mut self) -> Vec<CameraEvent> {
        let events: Vec<CameraEvent> = self.source.events().try_iter().collect();
        for event in &events {
            if let CameraEvent::Error(message) = event {
                warn!("Camera session failed: {}", message);
                if matches!(
                    self.state,
                    SessionState::LiveCapturing | SessionState::Paused
                ) {
                    self.frozen = None;
                    self.state = SessionState::Idle;
                }
            }
        }
        events
    }

    /// Run one verification cycle on the current input
    ///
    /// Live mode snapshots the most recent frame (a copy, never a view into
    /// the producer's buffer) and pauses on success; file mode returns to
    /// `StaticImageLoaded`. A pipeline failure aborts only this cycle and
    /// restores the pre-recognition state.
    pub fn recognize(&mut self) -> Result<VerificationOutcome, SessionError> {
        let (image, source_path, return_state) = match self.state {
            SessionState::LiveCapturing => {
                let frame = self.source.latest_frame().ok_or(SessionError::NoFrame)?;
                (frame.image.clone(), None, SessionState::LiveCapturing)
            }
            SessionState::StaticImageLoaded => {
                let (path, image) = self.static_image.as_ref().ok_or(SessionError::NoInput)?;
                (
                    image.clone(),
                    Some(path.clone()),
                    SessionState::StaticImageLoaded,
                )
            }
            SessionState::Idle => return Err(SessionError::NoInput),
            other => return Err(SessionError::InvalidState(other)),
        };

        self.state = SessionState::Recognizing;
        let started = std::time::Instant::now();

        let mut outcome = match self.run_pipeline(&image) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Verification cycle aborted: {:#}", e);
                self.state = return_state;
                return Err(e.into());
            }
        };

        debug!(
            "Verification cycle complete in {:?}: similarity {:.3}",
            started.elapsed(),
            outcome.comparison.similarity
        );

        // Record the cycle when both regions produced text
        if !outcome.label.text.is_empty() && !outcome.print.text.is_empty() {
            let image_path = match &source_path {
                Some(path) => path.display().to_string(),
                None => self.save_snapshot(&outcome.annotated),
            };
            let verdict = if outcome.comparison.is_match {
                VerifyResult::Pass
            } else {
                VerifyResult::Fail
            };
            let record = HistoryRecord::new(
                image_path,
                outcome.label.text.as_str(),
                outcome.print.text.as_str(),
                outcome.comparison.similarity,
                verdict,
            );
            match self.history.insert_if_absent(&record) {
                Ok(true) => debug!("History record written"),
                Ok(false) => debug!("Identical verification already recorded"),
                Err(e) => warn!("Failed to write history record: {:#}", e),
            }
            outcome.record = Some(record);
        }

        self.state = match return_state {
            SessionState::LiveCapturing => {
                self.frozen = Some(outcome.annotated.clone());
                SessionState::Paused
            }
            other => other,
        };

        Ok(outcome)
    }

    /// detect -> classify -> recognize per region -> compare
    fn run_pipeline(&mut self, image: &RgbImage) -> Result<VerificationOutcome> {
        let boxes = vision::detect_boxes(self.ocr.as_mut(), image)?;
        let regions = self.classifier.classify(&boxes, image);

        let label = match &regions.label {
            Some(region) => {
                vision::recognize_region(self.ocr.as_mut(), &region.image, &self.ocr_settings)?
            }
            None => OcrOutcome::default(),
        };
        let print = match &regions.print {
            Some(region) => {
                vision::recognize_region(self.ocr.as_mut(), &region.image, &self.ocr_settings)?
            }
            None => OcrOutcome::default(),
        };

        let comparison = self.comparator.compare(&label.text, &print.text);
        let annotated = vision::annotate_regions(image, &regions);

        Ok(VerificationOutcome {
            regions,
            label,
            print,
            comparison,
            annotated,
            record: None,
        })
    }

    /// Save a live-mode snapshot; returns "" when saving is off or failed
    fn save_snapshot(&self, image: &RgbImage) -> String {
        let Some(dir) = &self.captures_dir else {
            return String::new();
        };
        let path = dir.join(format!("{}.png", Uuid::new_v4()));
        match image.save(&path) {
            Ok(()) => path.display().to_string(),
            Err(e) => {
                warn!("Failed to save capture snapshot: {}", e);
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::backend::testing::{ReadStep, ScriptedBackend};
    use crate::capture::CaptureSettings;
    use crate::compare::OpKind;
    use crate::vision::RecognizedLine;
    use std::collections::VecDeque;
    use std::time::{Duration, Instant};

    struct StubOcr {
        quads: Vec<Vec<(f32, f32)>>,
        recognitions: VecDeque<Vec<RecognizedLine>>,
        fail_detect: bool,
    }

    impl StubOcr {
        fn with_regions(texts: &[&str]) -> Self {
            let quads = vec![quad(50.0, 10.0, 200.0, 40.0), quad(50.0, 200.0, 200.0, 40.0)];
            let recognitions = texts
                .iter()
                .map(|t| {
                    vec![RecognizedLine {
                        text: t.to_string(),
                        confidence: 0.95,
                    }]
                })
                .collect();
            Self {
                quads,
                recognitions,
                fail_detect: false,
            }
        }

        fn detecting_nothing() -> Self {
            Self {
                quads: Vec::new(),
                recognitions: VecDeque::new(),
                fail_detect: false,
            }
        }

        fn broken() -> Self {
            Self {
                quads: Vec::new(),
                recognitions: VecDeque::new(),
                fail_detect: true,
            }
        }
    }

    impl TextOcr for StubOcr {
        fn detect(&mut self, _image: &RgbImage) -> Result<Vec<Vec<(f32, f32)>>> {
            if self.fail_detect {
                anyhow::bail!("detection engine failure");
            }
            Ok(self.quads.clone())
        }

        fn recognize(&mut self, _image: &RgbImage) -> Result<Vec<RecognizedLine>> {
            Ok(self.recognitions.pop_front().unwrap_or_default())
        }
    }

    fn quad(x: f32, y: f32, w: f32, h: f32) -> Vec<(f32, f32)> {
        vec![(x, y), (x + w, y), (x + w, y + h), (x, y + h)]
    }

    fn fast_capture() -> CaptureSettings {
        CaptureSettings {
            camera_index: 0,
            warmup_frames: 1,
            frame_interval_ms: 1,
            max_read_retries: 2,
            retry_backoff_ms: 1,
            stop_timeout_ms: 1000,
        }
    }

    fn file_session(ocr: StubOcr) -> VerifySession {
        let config = AppConfig::default();
        let source = FrameSource::new(config.capture.clone(), Vec::new());
        VerifySession::with_source(
            &config,
            Box::new(ocr),
            HistoryStore::open_in_memory().unwrap(),
            source,
        )
    }

    fn live_session(ocr: StubOcr, backend: ScriptedBackend) -> VerifySession {
        let mut config = AppConfig::default();
        config.capture = fast_capture();
        let source = FrameSource::new(config.capture.clone(), vec![Box::new(backend)]);
        VerifySession::with_source(
            &config,
            Box::new(ocr),
            HistoryStore::open_in_memory().unwrap(),
            source,
        )
    }

    fn test_image_file(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("frame.png");
        RgbImage::new(640, 480).save(&path).unwrap();
        path
    }

    fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_recognize_without_input_rejected() {
        let mut session = file_session(StubOcr::detecting_nothing());

        let result = session.recognize();
        assert!(matches!(result, Err(SessionError::NoInput)));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.history().all_records().unwrap().is_empty());
    }

    #[test]
    fn test_file_verification_pass_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = test_image_file(&dir);
        let mut session = file_session(StubOcr::with_regions(&["NDL-2024-A7", "NDL-2024-A7"]));

        session.load_image(&path).unwrap();
        assert_eq!(session.state(), SessionState::StaticImageLoaded);

        let outcome = session.recognize().unwrap();
        assert_eq!(session.state(), SessionState::StaticImageLoaded);
        assert_eq!(outcome.label.text, "NDL-2024-A7");
        assert_eq!(outcome.print.text, "NDL-2024-A7");
        assert_eq!(outcome.comparison.similarity, 1.0);
        assert!(outcome.comparison.is_match);
        assert_eq!(outcome.regions.label.as_ref().unwrap().bbox.y, 10);
        assert_eq!(outcome.regions.print.as_ref().unwrap().bbox.y, 200);

        let record = outcome.record.unwrap();
        assert_eq!(record.result, VerifyResult::Pass);
        assert_eq!(record.image_path, path.display().to_string());

        let stored = session.history().all_records().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].sign_text, "NDL-2024-A7");
        assert_eq!(stored[0].result, VerifyResult::Pass);
    }

    #[test]
    fn test_file_verification_fail_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = test_image_file(&dir);
        let mut session = file_session(StubOcr::with_regions(&["NDL-2024-A7", "NDL-2024-B7"]));

        session.load_image(&path).unwrap();
        let outcome = session.recognize().unwrap();

        assert!(outcome.comparison.similarity < 1.0);
        assert!(!outcome.comparison.is_match);
        let replaces: Vec<_> = outcome
            .comparison
            .diff
            .iter()
            .filter(|s| s.kind == OpKind::Replace)
            .collect();
        assert_eq!(replaces.len(), 1);
        assert_eq!(replaces[0].left_value, "A");
        assert_eq!(replaces[0].right_value, "B");

        assert_eq!(outcome.record.unwrap().result, VerifyResult::Fail);
        assert_eq!(
            session.history().all_records().unwrap()[0].result,
            VerifyResult::Fail
        );
    }

    #[test]
    fn test_repeat_verification_not_duplicated() {
        let dir = tempfile::tempdir().unwrap();
        let path = test_image_file(&dir);
        let mut session = file_session(StubOcr::with_regions(&[
            "NDL-2024-A7",
            "NDL-2024-A7",
            "NDL-2024-A7",
            "NDL-2024-A7",
        ]));

        session.load_image(&path).unwrap();
        session.recognize().unwrap();
        session.recognize().unwrap();

        assert_eq!(session.history().all_records().unwrap().len(), 1);
    }

    #[test]
    fn test_pipeline_failure_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = test_image_file(&dir);
        let mut session = file_session(StubOcr::broken());

        session.load_image(&path).unwrap();
        let result = session.recognize();

        assert!(matches!(result, Err(SessionError::Pipeline(_))));
        assert_eq!(session.state(), SessionState::StaticImageLoaded);
        assert!(session.history().all_records().unwrap().is_empty());
    }

    #[test]
    fn test_no_regions_yields_no_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = test_image_file(&dir);
        let mut session = file_session(StubOcr::detecting_nothing());

        session.load_image(&path).unwrap();
        let outcome = session.recognize().unwrap();

        assert!(outcome.regions.is_empty());
        assert_eq!(outcome.comparison.similarity, 0.0);
        assert!(!outcome.comparison.is_match);
        assert!(outcome.record.is_none());
        assert!(session.history().all_records().unwrap().is_empty());
    }

    #[test]
    fn test_live_cycle_pauses_then_resumes() {
        let backend = ScriptedBackend::serving_frames().frame_size(640, 480);
        let mut session = live_session(
            StubOcr::with_regions(&["NDL-2024-A7", "NDL-2024-A7"]),
            backend,
        );

        session.start_live().unwrap();
        assert_eq!(session.state(), SessionState::LiveCapturing);
        wait_until("first frame", || session.latest_frame().is_some());

        let outcome = session.recognize().unwrap();
        assert_eq!(session.state(), SessionState::Paused);
        assert!(session.frozen_frame().is_some());
        assert!(outcome.comparison.is_match);
        // No captures dir configured: record kept, no snapshot path
        assert_eq!(outcome.record.unwrap().image_path, "");

        session.resume().unwrap();
        assert_eq!(session.state(), SessionState::LiveCapturing);
        assert!(session.frozen_frame().is_none());

        session.stop();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.camera_state(), CameraState::Stopped);
    }

    #[test]
    fn test_live_snapshot_saved_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::serving_frames().frame_size(640, 480);
        let mut session = live_session(
            StubOcr::with_regions(&["NDL-2024-A7", "NDL-2024-A7"]),
            backend,
        );
        session.set_captures_dir(Some(dir.path().to_path_buf()));

        session.start_live().unwrap();
        wait_until("first frame", || session.latest_frame().is_some());
        let outcome = session.recognize().unwrap();

        let saved = outcome.record.unwrap().image_path;
        assert!(!saved.is_empty());
        assert!(Path::new(&saved).exists());
        session.stop();
    }

    #[test]
    fn test_recognize_rejected_before_first_frame() {
        // The camera fails to open: live state exists, frames never arrive
        let mut session = live_session(
            StubOcr::with_regions(&["A", "B"]),
            ScriptedBackend::failing_open(),
        );

        session.start_live().unwrap();
        let result = session.recognize();
        assert!(matches!(result, Err(SessionError::NoFrame)));
        assert_eq!(session.state(), SessionState::LiveCapturing);
    }

    #[test]
    fn test_load_image_stops_live_capture() {
        let dir = tempfile::tempdir().unwrap();
        let path = test_image_file(&dir);
        let backend = ScriptedBackend::serving_frames().frame_size(640, 480);
        let mut session = live_session(StubOcr::detecting_nothing(), backend);

        session.start_live().unwrap();
        wait_until("running camera", || {
            session.camera_state() == CameraState::Running
        });

        session.load_image(&path).unwrap();
        assert_eq!(session.state(), SessionState::StaticImageLoaded);
        assert_eq!(session.camera_state(), CameraState::Stopped);
    }

    #[test]
    fn test_resume_only_valid_while_paused() {
        let mut session = file_session(StubOcr::detecting_nothing());
        assert!(matches!(
            session.resume(),
            Err(SessionError::InvalidState(SessionState::Idle))
        ));
    }

    #[test]
    fn test_start_live_rejected_while_paused() {
        let backend = ScriptedBackend::serving_frames().frame_size(640, 480);
        let mut session = live_session(
            StubOcr::with_regions(&["NDL-2024-A7", "NDL-2024-A7"]),
            backend,
        );

        session.start_live().unwrap();
        wait_until("first frame", || session.latest_frame().is_some());
        session.recognize().unwrap();
        assert_eq!(session.state(), SessionState::Paused);

        assert!(matches!(
            session.start_live(),
            Err(SessionError::InvalidState(SessionState::Paused))
        ));
        session.stop();
    }

    #[test]
    fn test_camera_failure_ends_live_session() {
        // Device opens, then every read fails until the worker gives up
        let backend =
            ScriptedBackend::with_script(vec![ReadStep::Frame, ReadStep::FailRead]).frame_size(640, 480);
        let mut session = live_session(StubOcr::detecting_nothing(), backend);

        session.start_live().unwrap();
        wait_until("fatal camera event", || {
            session
                .poll_camera()
                .iter()
                .any(|e| matches!(e, CameraEvent::Error(_)))
        });
        assert_eq!(session.state(), SessionState::Idle);
    }
}
