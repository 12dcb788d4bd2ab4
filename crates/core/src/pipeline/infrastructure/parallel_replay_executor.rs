use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use log::debug;

use crate::pipeline::replay_executor::{
    ReplayConfig, ReplayEvent, ReplayExecutor, ReplayJob, ReplayStats,
};

const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// Replays each session on its own thread.
///
/// Layout: `worker per session → channel → caller's sink`
///
/// Sessions share nothing mutable, so they run fully in parallel; each
/// worker walks its own frames in order. Events from different sessions
/// interleave in the sink.
pub struct ParallelReplayExecutor {
    channel_capacity: usize,
}

impl ParallelReplayExecutor {
    pub fn new() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl Default for ParallelReplayExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayExecutor for ParallelReplayExecutor {
    fn execute(
        &self,
        jobs: Vec<ReplayJob>,
        sink: &mut dyn FnMut(ReplayEvent),
        config: ReplayConfig,
    ) -> Result<ReplayStats, Box<dyn std::error::Error>> {
        let mut stats = ReplayStats {
            sessions: jobs.len(),
            ..ReplayStats::default()
        };
        let (event_tx, event_rx) = crossbeam_channel::bounded::<ReplayEvent>(self.channel_capacity);

        let handles: Vec<_> = jobs
            .into_iter()
            .map(|job| spawn_worker(job, event_tx.clone(), config.cancelled.clone()))
            .collect();
        drop(event_tx);

        for event in event_rx {
            stats.add(&event);
            sink(event);
        }

        join_workers(handles)?;
        Ok(stats)
    }
}

fn spawn_worker(
    job: ReplayJob,
    event_tx: crossbeam_channel::Sender<ReplayEvent>,
    cancelled: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let base = Instant::now();
        for index in 0..job.recording.len() {
            if cancelled.load(Ordering::Relaxed) {
                debug!("Replay of {} cancelled at frame {index}", job.session.student_id());
                break;
            }
            if event_tx.send(job.run_frame(index, base)).is_err() {
                break;
            }
        }
    })
}

fn join_workers(handles: Vec<JoinHandle<()>>) -> Result<(), Box<dyn std::error::Error>> {
    let panicked = handles
        .into_iter()
        .map(JoinHandle::join)
        .filter(Result::is_err)
        .count();
    if panicked > 0 {
        return Err(format!("{panicked} replay worker(s) panicked").into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::domain::detections::{FaceDetection, FrameDetections};
    use crate::detection::domain::perception::NoLandmarkService;
    use crate::detection::infrastructure::recorded_services::{
        RecordedFrame, RecordedServices, RecordedSession,
    };
    use crate::identity::domain::identity_matcher::IdentityMatcher;
    use crate::identity::domain::identity_verifier::stubs::FixedReferences;
    use crate::identity::domain::identity_verifier::{IdentityVerifier, ReferenceCache};
    use crate::pipeline::session::SessionHandle;
    use crate::pipeline::violation_orchestrator::{OrchestratorPorts, ViolationOrchestrator};
    use crate::shared::bbox::BoundingBox;
    use crate::shared::config::ProctorConfig;
    use crate::violations::domain::violation_recorder::ViolationRecorder;
    use crate::violations::domain::violation_store::ViolationStore;
    use crate::violations::infrastructure::in_memory_store::InMemoryViolationStore;
    use std::collections::HashMap;

    fn two_faces(at: f64) -> RecordedFrame {
        RecordedFrame {
            offset_secs: at,
            detections: FrameDetections {
                faces: vec![
                    FaceDetection::new(BoundingBox::new(0.0, 0.0, 20.0, 20.0), 0.9),
                    FaceDetection::new(BoundingBox::new(200.0, 0.0, 220.0, 20.0), 0.9),
                ],
                ..FrameDetections::default()
            },
            ..RecordedFrame::default()
        }
    }

    fn job(student: &str, frames: usize, store: Arc<InMemoryViolationStore>) -> ReplayJob {
        let config = ProctorConfig::default();
        let recording = Arc::new(RecordedSession::new(
            (0..frames).map(|i| two_faces(i as f64)).collect(),
        ));
        let services = Arc::new(RecordedServices::new(recording.clone()));
        let references = FixedReferences::single(student, &[("front", vec![0.0, 0.0])]);
        let verifier = IdentityVerifier::new(
            IdentityMatcher::default(),
            Arc::new(ReferenceCache::new(Arc::new(references))),
            services.clone(),
        );
        let recorder = Arc::new(ViolationRecorder::new(
            store,
            config.session.duplicate_window(),
            config.session.recorded_confidence,
        ));
        let ports = OrchestratorPorts {
            perception: services,
            landmarks: Arc::new(NoLandmarkService),
            verifier: Arc::new(verifier),
        };
        ReplayJob {
            session: Arc::new(SessionHandle::new(student, "e1", &config)),
            orchestrator: Arc::new(ViolationOrchestrator::new(config, ports, recorder)),
            recording,
        }
    }

    #[test]
    fn test_replays_every_frame_of_every_session() {
        let store = Arc::new(InMemoryViolationStore::new());
        let jobs = vec![job("s1", 4, store.clone()), job("s2", 6, store.clone())];
        let mut per_session: HashMap<String, Vec<usize>> = HashMap::new();

        let stats = ParallelReplayExecutor::new()
            .execute(
                jobs,
                &mut |event| {
                    assert!(event.report.violations.multiple_faces);
                    per_session
                        .entry(event.student_id)
                        .or_default()
                        .push(event.report.frame_index);
                },
                ReplayConfig::default(),
            )
            .unwrap();

        assert_eq!(stats.sessions, 2);
        assert_eq!(stats.frames, 10);
        assert_eq!(stats.skipped_frames, 0);
        // Frames of one session arrive in order
        assert_eq!(per_session["s1"], vec![0, 1, 2, 3]);
        assert_eq!(per_session["s2"], (0..6).collect::<Vec<_>>());
        // One second apart with a two-second window: every other frame is stored
        assert_eq!(store.query("s1", "e1").unwrap().len(), 2);
        assert_eq!(store.query("s2", "e1").unwrap().len(), 3);
    }

    #[test]
    fn test_cancelled_replay_emits_nothing() {
        let store = Arc::new(InMemoryViolationStore::new());
        let config = ReplayConfig::default();
        config.cancelled.store(true, Ordering::Relaxed);
        let mut events = 0;

        let stats = ParallelReplayExecutor::new()
            .execute(vec![job("s1", 3, store)], &mut |_| events += 1, config)
            .unwrap();

        assert_eq!(events, 0);
        assert_eq!(stats.frames, 0);
    }

    #[test]
    fn test_no_jobs_is_empty_run() {
        let stats = ParallelReplayExecutor::default()
            .execute(Vec::new(), &mut |_| {}, ReplayConfig::default())
            .unwrap();
        assert_eq!(stats, ReplayStats::default());
    }
}
