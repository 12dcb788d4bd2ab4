use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::pipeline::frame_logger::FrameLogger;
use crate::pipeline::replay_executor::{
    ReplayConfig, ReplayEvent, ReplayExecutor, ReplayJob, ReplayStats,
};

/// Replays recorded sessions through their orchestrators.
///
/// Delegates scheduling to a `ReplayExecutor` and feeds every event to the
/// logger before handing it to the caller. Single-use: `execute` consumes
/// the jobs.
pub struct ReplayUseCase {
    jobs: Vec<ReplayJob>,
    executor: Box<dyn ReplayExecutor>,
    logger: Box<dyn FrameLogger>,
    cancelled: Arc<AtomicBool>,
}

impl ReplayUseCase {
    pub fn new(
        jobs: Vec<ReplayJob>,
        executor: Box<dyn ReplayExecutor>,
        logger: Box<dyn FrameLogger>,
        cancelled: Option<Arc<AtomicBool>>,
    ) -> Self {
        Self {
            jobs,
            executor,
            logger,
            cancelled: cancelled.unwrap_or_else(|| Arc::new(AtomicBool::new(false))),
        }
    }

    pub fn total_frames(&self) -> usize {
        self.jobs.iter().map(|job| job.recording.len()).sum()
    }

    pub fn execute(
        &mut self,
        on_event: &mut dyn FnMut(&ReplayEvent),
    ) -> Result<ReplayStats, Box<dyn std::error::Error>> {
        if self.jobs.is_empty() {
            return Err("No sessions to replay".into());
        }
        let total = self.total_frames();
        let jobs = std::mem::take(&mut self.jobs);
        self.logger
            .info(&format!("Replaying {} session(s), {total} frames", jobs.len()));

        let logger = &mut self.logger;
        let mut done = 0;
        let stats = self.executor.execute(
            jobs,
            &mut |event| {
                done += 1;
                logger.progress(done, total);
                logger.timing("process_frame", event.elapsed_ms);
                logger.metric("persons", event.report.detections.persons.len() as f64);
                logger.violations(&event.report.violations.active());
                on_event(&event);
            },
            ReplayConfig {
                cancelled: self.cancelled.clone(),
            },
        )?;

        if stats.store_failures > 0 {
            self.logger.info(&format!(
                "{} frame(s) could not be written to the violation store",
                stats.store_failures
            ));
        }
        self.logger.summary();
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::frame_logger::NullFrameLogger;
    use crate::violations::domain::violation::ViolationKind;
    use std::sync::Mutex;

    /// Executor that emits nothing; lets the use case be tested alone.
    struct EmptyExecutor;

    impl ReplayExecutor for EmptyExecutor {
        fn execute(
            &self,
            jobs: Vec<ReplayJob>,
            _sink: &mut dyn FnMut(ReplayEvent),
            _config: ReplayConfig,
        ) -> Result<ReplayStats, Box<dyn std::error::Error>> {
            Ok(ReplayStats {
                sessions: jobs.len(),
                ..ReplayStats::default()
            })
        }
    }

    #[derive(Default)]
    struct CountingLogger {
        infos: Arc<Mutex<Vec<String>>>,
    }

    impl FrameLogger for CountingLogger {
        fn progress(&mut self, _current: usize, _total: usize) {}
        fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
        fn metric(&mut self, _name: &str, _value: f64) {}
        fn violations(&mut self, _active: &[ViolationKind]) {}
        fn info(&mut self, message: &str) {
            self.infos.lock().unwrap().push(message.to_string());
        }
    }

    #[test]
    fn test_no_jobs_is_an_error() {
        let mut use_case =
            ReplayUseCase::new(Vec::new(), Box::new(EmptyExecutor), Box::new(NullFrameLogger), None);
        assert!(use_case.execute(&mut |_| {}).is_err());
    }

    #[test]
    fn test_logs_start_of_replay() {
        use crate::pipeline::infrastructure::parallel_replay_executor::ParallelReplayExecutor;

        let logger = CountingLogger::default();
        let infos = logger.infos.clone();
        let job = fixtures::job();
        let mut use_case = ReplayUseCase::new(
            vec![job],
            Box::new(ParallelReplayExecutor::new()),
            Box::new(logger),
            None,
        );
        assert_eq!(use_case.total_frames(), 2);

        let mut seen = Vec::new();
        let stats = use_case
            .execute(&mut |event| seen.push(event.report.frame_index))
            .unwrap();

        assert_eq!(stats.frames, 2);
        assert_eq!(seen, vec![0, 1]);
        assert_eq!(infos.lock().unwrap()[0], "Replaying 1 session(s), 2 frames");
        assert!(use_case.execute(&mut |_| {}).is_err());
    }

    mod fixtures {
        use super::*;
        use crate::detection::domain::perception::NoLandmarkService;
        use crate::detection::infrastructure::recorded_services::{
            RecordedFrame, RecordedServices, RecordedSession,
        };
        use crate::identity::domain::identity_matcher::IdentityMatcher;
        use crate::identity::domain::identity_verifier::stubs::FixedReferences;
        use crate::identity::domain::identity_verifier::{IdentityVerifier, ReferenceCache};
        use crate::pipeline::session::SessionHandle;
        use crate::pipeline::violation_orchestrator::{OrchestratorPorts, ViolationOrchestrator};
        use crate::shared::config::ProctorConfig;
        use crate::violations::domain::violation_recorder::ViolationRecorder;
        use crate::violations::infrastructure::in_memory_store::InMemoryViolationStore;
        use std::time::Duration;

        pub fn job() -> ReplayJob {
            let config = ProctorConfig::default();
            let recording = Arc::new(RecordedSession::new(vec![
                RecordedFrame::default(),
                RecordedFrame {
                    offset_secs: 0.5,
                    ..RecordedFrame::default()
                },
            ]));
            let services = Arc::new(RecordedServices::new(recording.clone()));
            let references = Arc::new(FixedReferences::single("s1", &[("front", vec![0.0])]));
            let verifier = IdentityVerifier::new(
                IdentityMatcher::default(),
                Arc::new(ReferenceCache::new(references)),
                services.clone(),
            );
            let ports = OrchestratorPorts {
                perception: services,
                landmarks: Arc::new(NoLandmarkService),
                verifier: Arc::new(verifier),
            };
            let recorder = Arc::new(ViolationRecorder::new(
                Arc::new(InMemoryViolationStore::new()),
                Duration::from_secs(2),
                0.8,
            ));
            ReplayJob {
                session: Arc::new(SessionHandle::new("s1", "e1", &config)),
                orchestrator: Arc::new(ViolationOrchestrator::new(config, ports, recorder)),
                recording,
            }
        }
    }
}
