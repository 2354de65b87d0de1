//! # Application State Management
//!
//! This module wires together the long-lived services every HTTP handler
//! needs and hands them out through `web::Data<AppState>`.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: Lets many request handlers share ownership of the same data
//! - **Why needed**: Requests run concurrently on several worker threads
//!
//! ### Cheap clones
//! `JobManager` and `JobRunner` keep their shared parts behind an `Arc`
//! internally, so cloning `AppState` copies a handful of pointers, never the
//! jobs themselves. actix-web clones the state into every worker thread.
//!
//! ## What lives here:
//! - **config**: read-only after startup
//! - **jobs**: the lifecycle manager (only writer of job state)
//! - **runner**: background transcription dispatcher
//! - **uploads**: where uploaded files go and what is accepted
//! - **start_time**: for uptime reporting

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::AppConfig;
use crate::jobs::runner::JobOutcome;
use crate::jobs::{JobManager, JobRunner, JobStore};
use crate::storage::UploadStore;
use crate::transcription::TranscriptionEngine;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub jobs: JobManager,
    pub runner: JobRunner,
    pub uploads: Arc<UploadStore>,
    pub start_time: Instant,
}

impl AppState {
    /// Builds the services from configuration.
    ///
    /// Returns the receiving end of the runner's outcome channel so the
    /// caller decides who consumes it (the outcome monitor in production).
    pub fn new(
        config: AppConfig,
        store: Arc<dyn JobStore>,
        engine: Arc<dyn TranscriptionEngine>,
    ) -> (Self, UnboundedReceiver<JobOutcome>) {
        let jobs = JobManager::new(store);
        let (runner, outcomes) = JobRunner::new(
            jobs.clone(),
            engine,
            config.transcription.max_concurrent_jobs,
            config.transcription_timeout(),
        );
        let uploads = Arc::new(UploadStore::new(&config.storage));

        let state = Self {
            config: Arc::new(config),
            jobs,
            runner,
            uploads,
            start_time: Instant::now(),
        };
        (state, outcomes)
    }

    /// Server uptime in whole seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
