//! # Background Job Runner
//!
//! Takes a freshly uploaded job and drives it to a terminal state without
//! blocking the upload request.
//!
//! ## Execution Steps:
//! 1. Wait for a concurrency permit
//! 2. Check that the input file still exists
//! 3. `uploaded -> processing`
//! 4. Run the engine on the absolute path, bounded by the configured timeout
//! 5. `processing -> completed` on a non-empty transcript, `failed` otherwise
//!
//! ## Rust Concepts Used:
//! - **Semaphore**: caps how many engine runs happen at once; extra jobs wait in line
//! - **Nested spawn**: a panic in the worker surfaces as a `JoinError` we can
//!   turn into a failed job instead of a job stuck in `processing`
//! - **mpsc channel**: each finished job reports a [`JobOutcome`] to a monitor task

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::JobError;
use super::manager::JobManager;
use super::model::{Job, JobId, JobStatus};
use crate::transcription::TranscriptionEngine;

/// What happened to one dispatched job.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: JobId,
    /// Final status, or `None` if the job vanished (deleted mid-run).
    pub status: Option<JobStatus>,
    pub elapsed: Duration,
}

/// Lock-free counters shared by the runner and the metrics endpoint.
#[derive(Debug, Default)]
pub struct RunnerStats {
    dispatched: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    in_flight: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunnerStatsSnapshot {
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
    pub in_flight: u64,
}

impl RunnerStats {
    pub fn snapshot(&self) -> RunnerStatsSnapshot {
        RunnerStatsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: &JobOutcome) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        match outcome.status {
            Some(JobStatus::Completed) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
            }
            Some(JobStatus::Failed) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }
}

#[derive(Clone)]
pub struct JobRunner {
    manager: JobManager,
    engine: Arc<dyn TranscriptionEngine>,
    permits: Arc<Semaphore>,
    timeout: Duration,
    outcomes: mpsc::UnboundedSender<JobOutcome>,
    stats: Arc<RunnerStats>,
}

impl JobRunner {
    /// Builds a runner and the receiving end of its outcome channel.
    pub fn new(
        manager: JobManager,
        engine: Arc<dyn TranscriptionEngine>,
        max_concurrent: usize,
        timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<JobOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let runner = Self {
            manager,
            engine,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
            outcomes: tx,
            stats: Arc::new(RunnerStats::default()),
        };
        (runner, rx)
    }

    pub fn stats(&self) -> Arc<RunnerStats> {
        Arc::clone(&self.stats)
    }

    /// Starts processing in the background and returns immediately.
    pub fn dispatch(&self, job_id: JobId, path: PathBuf) -> JoinHandle<JobOutcome> {
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
        self.stats.in_flight.fetch_add(1, Ordering::Relaxed);
        debug!(job_id = %job_id, engine = self.engine.name(), "Job dispatched");

        let runner = self.clone();
        tokio::spawn(async move {
            let started = Instant::now();

            // Queued jobs stay `uploaded` until a permit frees up.
            let status = match Arc::clone(&runner.permits).acquire_owned().await {
                Ok(_permit) => {
                    let worker = tokio::spawn(runner.clone().process(job_id, path));
                    match worker.await {
                        Ok(status) => status,
                        Err(join_err) => {
                            error!(job_id = %job_id, error = %join_err, "Job worker panicked");
                            let message = JobError::Unexpected(join_err.to_string()).to_string();
                            runner.settle(job_id, runner.manager.fail(job_id, message).await).await
                        }
                    }
                }
                Err(_) => {
                    let message = JobError::Unexpected("runner is shut down".to_string()).to_string();
                    runner.settle(job_id, runner.manager.fail(job_id, message).await).await
                }
            };

            let outcome = JobOutcome {
                job_id,
                status,
                elapsed: started.elapsed(),
            };
            runner.stats.record(&outcome);
            // The monitor may already be gone during shutdown.
            let _ = runner.outcomes.send(outcome.clone());
            outcome
        })
    }

    async fn process(self, job_id: JobId, path: PathBuf) -> Option<JobStatus> {
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            warn!(job_id = %job_id, path = %path.display(), "Input file missing");
            let message = JobError::InputMissing(path).to_string();
            return self.settle(job_id, self.manager.fail(job_id, message).await).await;
        }

        if let Err(err) = self.manager.begin_processing(job_id).await {
            warn!(job_id = %job_id, error = %err, "Job could not start");
            return self.settle(job_id, Err(err)).await;
        }

        let absolute = tokio::fs::canonicalize(&path).await.unwrap_or(path);
        info!(job_id = %job_id, path = %absolute.display(), "Transcription started");

        let started = Instant::now();
        let result = tokio::time::timeout(self.timeout, self.engine.transcribe(&absolute)).await;
        let secs = started.elapsed().as_secs_f64();

        let transition = match result {
            Ok(Ok(text)) => {
                info!(job_id = %job_id, seconds = secs, chars = text.len(), "Transcription finished");
                self.manager.complete(job_id, text, secs).await
            }
            Ok(Err(err)) => {
                warn!(job_id = %job_id, error = %err, "Transcription engine failed");
                self.manager.fail(job_id, err.to_string()).await
            }
            Err(_) => {
                warn!(job_id = %job_id, timeout_secs = self.timeout.as_secs(), "Transcription timed out");
                self.manager
                    .fail(job_id, JobError::Timeout(self.timeout).to_string())
                    .await
            }
        };

        self.settle(job_id, transition).await
    }

    /// Reduces a transition result to the status worth reporting.
    ///
    /// Any rejection other than a vanished or already finished job is
    /// turned into one `fail` call, so the job cannot stay live after its
    /// worker exits.
    async fn settle(&self, job_id: JobId, result: Result<Job, JobError>) -> Option<JobStatus> {
        let err = match Self::reported(result) {
            Ok(status) => return status,
            Err(err) => err,
        };

        warn!(job_id = %job_id, error = %err, "Transition rejected; failing job");
        let message = match err {
            JobError::EngineFailure(message) => message,
            other => JobError::Unexpected(other.to_string()).to_string(),
        };

        match Self::reported(self.manager.fail(job_id, message).await) {
            Ok(status) => status,
            Err(err) => {
                error!(job_id = %job_id, error = %err, "Failed to record job failure");
                None
            }
        }
    }

    fn reported(result: Result<Job, JobError>) -> Result<Option<JobStatus>, JobError> {
        match result {
            Ok(job) => Ok(Some(job.status)),
            Err(JobError::NotFound(id)) => {
                info!(job_id = %id, "Job deleted while running; result discarded");
                Ok(None)
            }
            Err(JobError::AlreadyTerminal { status, .. }) => Ok(Some(status)),
            Err(err) => Err(err),
        }
    }
}

/// Logs every outcome until all runner handles are dropped.
pub fn spawn_outcome_monitor(mut outcomes: mpsc::UnboundedReceiver<JobOutcome>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(outcome) = outcomes.recv().await {
            match outcome.status {
                Some(status) => info!(
                    job_id = %outcome.job_id,
                    status = %status,
                    elapsed_ms = outcome.elapsed.as_millis() as u64,
                    "Job finished"
                ),
                None => debug!(job_id = %outcome.job_id, "Job finished without a record"),
            }
        }
        debug!("Outcome channel closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::transcription::EngineError;
    use async_trait::async_trait;
    use std::path::Path;

    /// Engine double: answers with a fixed result after an optional delay.
    struct StubEngine {
        reply: Result<&'static str, &'static str>,
        delay: Duration,
        panic: bool,
    }

    impl StubEngine {
        fn ok(text: &'static str) -> Self {
            Self { reply: Ok(text), delay: Duration::ZERO, panic: false }
        }

        fn err(message: &'static str) -> Self {
            Self { reply: Err(message), delay: Duration::ZERO, panic: false }
        }
    }

    #[async_trait]
    impl TranscriptionEngine for StubEngine {
        async fn transcribe(&self, path: &Path) -> Result<String, EngineError> {
            assert!(path.is_absolute(), "engine must receive an absolute path");
            if self.panic {
                panic!("engine exploded");
            }
            tokio::time::sleep(self.delay).await;
            self.reply.map(str::to_string).map_err(|m| EngineError::Failed {
                code: Some(1),
                diagnostic: m.to_string(),
            })
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    struct Fixture {
        manager: JobManager,
        runner: JobRunner,
        _dir: tempfile::TempDir,
        upload: PathBuf,
    }

    async fn fixture(engine: StubEngine, timeout: Duration) -> (Fixture, mpsc::UnboundedReceiver<JobOutcome>) {
        let dir = tempfile::tempdir().unwrap();
        let upload = dir.path().join("speech.wav");
        std::fs::write(&upload, b"RIFF").unwrap();

        let manager = JobManager::new(Arc::new(Database::open_in_memory().unwrap()));
        let (runner, rx) = JobRunner::new(manager.clone(), Arc::new(engine), 2, timeout);
        (Fixture { manager, runner, _dir: dir, upload }, rx)
    }

    async fn run(f: &Fixture) -> (JobId, JobOutcome) {
        let job = f
            .manager
            .create("speech.wav".to_string(), f.upload.clone())
            .await
            .unwrap();
        let outcome = f.runner.dispatch(job.id, f.upload.clone()).await.unwrap();
        (job.id, outcome)
    }

    #[tokio::test]
    async fn test_successful_transcription() {
        let (f, mut rx) = fixture(StubEngine::ok("hello world"), Duration::from_secs(5)).await;
        let (id, outcome) = run(&f).await;

        assert_eq!(outcome.status, Some(JobStatus::Completed));
        let job = f.manager.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.transcription.as_deref(), Some("hello world"));
        assert!(job.error.is_none());
        assert!(job.processing_time.unwrap() >= 0.0);
        assert!(job.started_at.is_some() && job.completed_at.is_some());

        let reported = rx.recv().await.unwrap();
        assert_eq!(reported.job_id, id);

        let stats = f.runner.stats().snapshot();
        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn test_missing_input_fails_without_processing() {
        let (f, _rx) = fixture(StubEngine::ok("unused"), Duration::from_secs(5)).await;
        std::fs::remove_file(&f.upload).unwrap();
        let (id, outcome) = run(&f).await;

        assert_eq!(outcome.status, Some(JobStatus::Failed));
        let job = f.manager.get(id).await.unwrap();
        assert!(job.error.unwrap().starts_with("File not found"));
        assert!(job.started_at.is_none());
        assert_eq!(job.processing_time, Some(0.0));
    }

    #[tokio::test]
    async fn test_engine_failure_records_diagnostic() {
        let (f, _rx) = fixture(StubEngine::err("unsupported codec"), Duration::from_secs(5)).await;
        let (id, outcome) = run(&f).await;

        assert_eq!(outcome.status, Some(JobStatus::Failed));
        let job = f.manager.get(id).await.unwrap();
        assert_eq!(job.error.as_deref(), Some("unsupported codec"));
        assert!(job.transcription.is_none());
        assert_eq!(f.runner.stats().snapshot().failed, 1);
    }

    #[tokio::test]
    async fn test_blank_transcript_fails_job() {
        let (f, _rx) = fixture(StubEngine::ok("   "), Duration::from_secs(5)).await;
        let (id, outcome) = run(&f).await;

        assert_eq!(outcome.status, Some(JobStatus::Failed));
        let job = f.manager.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("Transcription engine returned no text"));
        assert!(job.transcription.is_none());
        assert!(job.completed_at.is_some());

        let stats = f.runner.stats().snapshot();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn test_timeout_fails_job() {
        let mut engine = StubEngine::ok("too late");
        engine.delay = Duration::from_secs(10);
        let (f, _rx) = fixture(engine, Duration::from_millis(50)).await;
        let (id, outcome) = run(&f).await;

        assert_eq!(outcome.status, Some(JobStatus::Failed));
        let job = f.manager.get(id).await.unwrap();
        assert!(job.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_panicking_engine_fails_job() {
        let mut engine = StubEngine::ok("unused");
        engine.panic = true;
        let (f, _rx) = fixture(engine, Duration::from_secs(5)).await;
        let (id, outcome) = run(&f).await;

        assert_eq!(outcome.status, Some(JobStatus::Failed));
        let job = f.manager.get(id).await.unwrap();
        assert!(job.error.unwrap().starts_with("Unexpected error"));
    }

    #[tokio::test]
    async fn test_deleted_job_result_is_discarded() {
        let mut engine = StubEngine::ok("orphan");
        engine.delay = Duration::from_millis(100);
        let (f, _rx) = fixture(engine, Duration::from_secs(5)).await;

        let job = f
            .manager
            .create("speech.wav".to_string(), f.upload.clone())
            .await
            .unwrap();
        let handle = f.runner.dispatch(job.id, f.upload.clone());

        // Wait until the worker has moved the job into processing.
        for _ in 0..50 {
            if f.manager.get(job.id).await.unwrap().status == JobStatus::Processing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        f.manager.delete(job.id).await.unwrap();

        let outcome = handle.await.unwrap();
        assert_eq!(outcome.status, None);
        assert!(matches!(
            f.manager.get(job.id).await,
            Err(JobError::NotFound(_))
        ));
    }
}
