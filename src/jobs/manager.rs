//! # Job Lifecycle Manager
//!
//! The only writer of job state. It owns two views of every job:
//!
//! - **Durable store**: the SQLite `jobs` table, the source of truth across restarts
//! - **Volatile index**: an in-process map, rebuilt lazily as jobs are touched
//!
//! ## Consistency Rules:
//! - Every mutation holds the write gate, so transitions on a job never interleave
//! - The durable row is written first; the index entry is swapped only afterwards
//! - If a durable write fails after creation, the new state still goes into the
//!   index (flagged unflushed) and a warning is logged; reads serve that entry
//!   and retry the flush until it succeeds
//!
//! ## Threading:
//! Store calls run on tokio's blocking pool via `spawn_blocking`, so request
//! handlers and runner tasks never block on SQLite.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use super::error::JobError;
use super::model::{Job, JobCounts, JobId, JobStatus, JobSummary};
use super::store::JobStore;
use crate::db::DatabaseError;

pub const RESTART_FAILURE_MESSAGE: &str = "Interrupted by server restart";

#[derive(Debug, Clone)]
struct IndexEntry {
    job: Job,
    /// `false` while the durable row lags behind this entry.
    flushed: bool,
}

struct Inner {
    store: Arc<dyn JobStore>,
    index: RwLock<HashMap<JobId, IndexEntry>>,
    write_gate: Mutex<()>,
}

/// Cheap to clone; all clones share the same store, index and write gate.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

impl JobManager {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                index: RwLock::new(HashMap::new()),
                write_gate: Mutex::new(()),
            }),
        }
    }

    /// Creates a job under a freshly allocated id.
    #[cfg(test)]
    pub async fn create(&self, file_name: String, file_path: PathBuf) -> Result<Job, JobError> {
        self.create_with_id(JobId::new(), file_name, file_path).await
    }

    /// Creates a job under an id the caller allocated, so the upload can be
    /// stored under a name derived from the id before the record exists.
    ///
    /// Nothing becomes visible to readers unless the durable write succeeds.
    pub async fn create_with_id(
        &self,
        id: JobId,
        file_name: String,
        file_path: PathBuf,
    ) -> Result<Job, JobError> {
        let _gate = self.inner.write_gate.lock().await;

        let indexed = self.inner.index.read().await.contains_key(&id);
        if indexed || self.store_call(move |s| s.find(id)).await?.is_some() {
            return Err(JobError::DuplicateId(id));
        }

        let job = Job::new(id, file_name, file_path, Utc::now());
        let row = job.clone();
        self.store_call(move |s| s.upsert(&row)).await?;

        self.inner.index.write().await.insert(
            id,
            IndexEntry {
                job: job.clone(),
                flushed: true,
            },
        );

        info!(job_id = %id, file_name = %job.file_name, "Job created");
        Ok(job)
    }

    /// `uploaded -> processing`, stamping `started_at`.
    pub async fn begin_processing(&self, id: JobId) -> Result<Job, JobError> {
        self.transition(id, |job, now| job.start(now)).await
    }

    /// `processing -> completed` with the transcript and engine wall time (seconds).
    pub async fn complete(
        &self,
        id: JobId,
        transcription: String,
        processing_time: f64,
    ) -> Result<Job, JobError> {
        self.transition(id, move |job, now| job.complete(transcription, processing_time, now))
            .await
    }

    /// Any non-terminal state `-> failed`.
    pub async fn fail(&self, id: JobId, error: String) -> Result<Job, JobError> {
        self.transition(id, move |job, now| job.fail(error, now)).await
    }

    /// Reads the durable record.
    ///
    /// The one exception is an entry whose durable write failed: that entry is
    /// newer than the row, so the flush is retried and the entry is returned.
    pub async fn get(&self, id: JobId) -> Result<Job, JobError> {
        if let Some(job) = self.flush_pending(id).await {
            return Ok(job);
        }

        self.store_call(move |s| s.find(id))
            .await?
            .ok_or_else(|| JobError::not_found(id))
    }

    /// All jobs, newest first, without transcription bodies.
    pub async fn list(&self) -> Result<Vec<JobSummary>, JobError> {
        let mut jobs = self.store_call(|s| s.list()).await?;

        let index = self.inner.index.read().await;
        for job in jobs.iter_mut() {
            if let Some(entry) = index.get(&job.id).filter(|e| !e.flushed) {
                *job = entry.job.clone();
            }
        }

        Ok(jobs.iter().map(Job::summary).collect())
    }

    /// Removes the backing file (best effort) and then the record from both views.
    pub async fn delete(&self, id: JobId) -> Result<Job, JobError> {
        let _gate = self.inner.write_gate.lock().await;
        let job = self.current(id).await?;

        match tokio::fs::remove_file(&job.file_path).await {
            Ok(()) => info!(job_id = %id, path = %job.file_path.display(), "Upload deleted"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                job_id = %id,
                path = %job.file_path.display(),
                error = %e,
                "Failed to delete upload"
            ),
        }

        self.store_call(move |s| s.remove(id)).await?;
        self.inner.index.write().await.remove(&id);

        info!(job_id = %id, "Job deleted");
        Ok(job)
    }

    /// Per-status totals as readers see them: unflushed entries override
    /// the status their durable row still carries.
    pub async fn counts(&self) -> Result<JobCounts, JobError> {
        let mut counts = self.store_call(|s| s.counts()).await?;

        let held: Vec<(JobId, JobStatus)> = self
            .inner
            .index
            .read()
            .await
            .values()
            .filter(|e| !e.flushed)
            .map(|e| (e.job.id, e.job.status))
            .collect();
        if held.is_empty() {
            return Ok(counts);
        }

        let ids: Vec<JobId> = held.iter().map(|(id, _)| *id).collect();
        let durable = self
            .store_call(move |s| {
                ids.into_iter()
                    .map(|id| s.find(id).map(|row| row.map(|job| job.status)))
                    .collect::<Result<Vec<_>, _>>()
            })
            .await?;

        for ((_, status), stored) in held.into_iter().zip(durable) {
            match stored {
                Some(stored) => counts.shift(stored, status),
                None => counts.add(status, 1),
            }
        }
        Ok(counts)
    }

    /// Number of jobs whose latest state exists only in memory.
    pub async fn unflushed_count(&self) -> usize {
        self.inner
            .index
            .read()
            .await
            .values()
            .filter(|e| !e.flushed)
            .count()
    }

    /// Fails every job a previous process left unfinished.
    ///
    /// Jobs are never re-dispatched, so without this they would stay in
    /// `uploaded` or `processing` forever.
    pub async fn recover_interrupted(&self) -> Result<usize, JobError> {
        let stale: Vec<JobId> = self
            .store_call(|s| s.list())
            .await?
            .into_iter()
            .filter(|job| !job.status.is_terminal())
            .map(|job| job.id)
            .collect();

        for id in &stale {
            self.fail(*id, RESTART_FAILURE_MESSAGE.to_string()).await?;
            warn!(job_id = %id, "Job interrupted by restart marked failed");
        }

        Ok(stale.len())
    }

    async fn transition<F>(&self, id: JobId, apply: F) -> Result<Job, JobError>
    where
        F: FnOnce(&Job, DateTime<Utc>) -> Result<Job, JobError>,
    {
        let _gate = self.inner.write_gate.lock().await;
        let current = self.current(id).await?;
        let next = apply(&current, Utc::now())?;

        let row = next.clone();
        let flushed = match self.store_call(move |s| s.upsert(&row)).await {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    job_id = %id,
                    status = %next.status,
                    error = %err,
                    "Durable write failed; job state is held in memory only"
                );
                false
            }
        };

        self.inner.index.write().await.insert(
            id,
            IndexEntry {
                job: next.clone(),
                flushed,
            },
        );

        info!(job_id = %id, from = %current.status, to = %next.status, "Job transitioned");
        Ok(next)
    }

    /// Latest known state: the index entry if present, else the durable row
    /// (which is then cached). Callers must hold the write gate.
    async fn current(&self, id: JobId) -> Result<Job, JobError> {
        if let Some(entry) = self.inner.index.read().await.get(&id) {
            return Ok(entry.job.clone());
        }

        let job = self
            .store_call(move |s| s.find(id))
            .await?
            .ok_or_else(|| JobError::not_found(id))?;

        self.inner.index.write().await.insert(
            id,
            IndexEntry {
                job: job.clone(),
                flushed: true,
            },
        );
        Ok(job)
    }

    /// Retries the durable write for an unflushed entry and returns it.
    async fn flush_pending(&self, id: JobId) -> Option<Job> {
        let pending = self
            .inner
            .index
            .read()
            .await
            .get(&id)
            .filter(|e| !e.flushed)
            .map(|e| e.job.clone())?;

        let _gate = self.inner.write_gate.lock().await;
        let row = pending.clone();
        match self.store_call(move |s| s.upsert(&row)).await {
            Ok(()) => {
                let mut index = self.inner.index.write().await;
                if let Some(entry) = index.get_mut(&id).filter(|e| e.job == pending) {
                    entry.flushed = true;
                    info!(job_id = %id, "Held job state flushed to store");
                }
            }
            Err(err) => warn!(job_id = %id, error = %err, "Durable write still failing"),
        }

        // A transition may have replaced the entry while we waited for the gate.
        self.inner
            .index
            .read()
            .await
            .get(&id)
            .map(|e| e.job.clone())
            .or(Some(pending))
    }

    async fn store_call<T, F>(&self, f: F) -> Result<T, JobError>
    where
        F: FnOnce(&dyn JobStore) -> Result<T, DatabaseError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.inner.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| JobError::Unexpected(format!("store task failed: {}", e)))?
            .map_err(JobError::from)
    }
}
