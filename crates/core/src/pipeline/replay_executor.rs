use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::warn;
use serde::Serialize;

use crate::detection::infrastructure::recorded_services::RecordedSession;
use crate::pipeline::report::FrameReport;
use crate::pipeline::session::SessionHandle;
use crate::pipeline::violation_orchestrator::{FrameInput, ProctorError, ViolationOrchestrator};
use crate::shared::frame::Frame;

/// One recorded session to push through an orchestrator.
#[derive(Clone)]
pub struct ReplayJob {
    pub session: Arc<SessionHandle>,
    pub orchestrator: Arc<ViolationOrchestrator>,
    pub recording: Arc<RecordedSession>,
}

impl ReplayJob {
    /// Runs frame `index`, timestamped `base` plus its recorded offset.
    pub fn run_frame(&self, index: usize, base: Instant) -> ReplayEvent {
        let input = self.frame_input(index, base);
        let started = Instant::now();
        let (report, store_error) = match self.orchestrator.process_frame(&self.session, &input) {
            Ok(report) => (report, None),
            Err(ProctorError::Store { source, report }) => (*report, Some(source.to_string())),
        };
        ReplayEvent {
            student_id: self.session.student_id().to_string(),
            exam_id: self.session.exam_id().to_string(),
            report,
            store_error,
            elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }

    fn frame_input(&self, index: usize, base: Instant) -> FrameInput {
        let offset = self
            .recording
            .frames()
            .get(index)
            .map(|f| f.offset_secs)
            .unwrap_or_default();
        let timestamp = base + Duration::try_from_secs_f64(offset.max(0.0)).unwrap_or_default();

        match self.recording.image_path(index) {
            Some(path) => FrameInput::encoded(read_image(&path), index, timestamp),
            // Recorded detections do not need pixels
            None => FrameInput::decoded(Frame::blank(1, 1, index), timestamp),
        }
    }
}

/// Unreadable images become empty bytes, which the orchestrator skips.
fn read_image(path: &Path) -> Vec<u8> {
    std::fs::read(path).unwrap_or_else(|e| {
        warn!("Cannot read frame image {}: {e}", path.display());
        Vec::new()
    })
}

/// One processed frame, tagged with its session.
#[derive(Clone, Debug, Serialize)]
pub struct ReplayEvent {
    pub student_id: String,
    pub exam_id: String,
    pub report: FrameReport,
    /// Set when the report could not be written to the violation store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_error: Option<String>,
    #[serde(skip)]
    pub elapsed_ms: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReplayStats {
    pub sessions: usize,
    pub frames: usize,
    pub skipped_frames: usize,
    pub store_failures: usize,
}

impl ReplayStats {
    pub fn add(&mut self, event: &ReplayEvent) {
        self.frames += 1;
        if event.report.skipped {
            self.skipped_frames += 1;
        }
        if event.store_error.is_some() {
            self.store_failures += 1;
        }
    }
}

pub struct ReplayConfig {
    pub cancelled: Arc<AtomicBool>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Abstracts how a batch of recorded sessions is replayed.
///
/// Frames of one session must reach the orchestrator in order; sessions are
/// independent of each other.
pub trait ReplayExecutor: Send {
    fn execute(
        &self,
        jobs: Vec<ReplayJob>,
        sink: &mut dyn FnMut(ReplayEvent),
        config: ReplayConfig,
    ) -> Result<ReplayStats, Box<dyn std::error::Error>>;
}
