//! # Job Model
//!
//! The job record and its state machine:
//!
//! ```text
//! uploaded ──> processing ──> completed
//!     │             │
//!     └─────────────┴───────> failed
//! ```
//!
//! Transitions are pure functions from one `Job` value to the next. They never
//! mutate in place, so the manager can persist the new value before anyone
//! else sees it.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::JobError;

/// Opaque, never-reused job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a client-supplied id. Anything that is not a valid id cannot
    /// name a job, so it is reported as not found.
    pub fn parse(raw: &str) -> Result<Self, JobError> {
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|_| JobError::NotFound(raw.to_string()))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Uploaded,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Uploaded => "uploaded",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Completed and failed jobs accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(JobStatus::Uploaded),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One transcription request and its lifecycle record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: JobId,
    pub file_name: String,
    /// Server-side location of the upload; never sent to clients.
    #[serde(skip_serializing)]
    pub file_path: PathBuf,
    pub status: JobStatus,
    pub transcription: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Seconds
    pub processing_time: Option<f64>,
}

impl Job {
    pub fn new(id: JobId, file_name: String, file_path: PathBuf, now: DateTime<Utc>) -> Self {
        Self {
            id,
            file_name,
            file_path,
            status: JobStatus::Uploaded,
            transcription: None,
            error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            processing_time: None,
        }
    }

    /// `uploaded -> processing`
    pub fn start(&self, now: DateTime<Utc>) -> Result<Job, JobError> {
        self.require(JobStatus::Uploaded, JobStatus::Processing)?;
        Ok(Job {
            status: JobStatus::Processing,
            started_at: Some(now),
            ..self.clone()
        })
    }

    /// `processing -> completed`
    pub fn complete(
        &self,
        transcription: String,
        processing_time: f64,
        now: DateTime<Utc>,
    ) -> Result<Job, JobError> {
        self.require(JobStatus::Processing, JobStatus::Completed)?;
        if transcription.trim().is_empty() {
            return Err(JobError::EngineFailure(
                "Transcription engine returned no text".to_string(),
            ));
        }
        Ok(Job {
            status: JobStatus::Completed,
            transcription: Some(transcription),
            error: None,
            completed_at: Some(now),
            processing_time: Some(processing_time),
            ..self.clone()
        })
    }

    /// Any non-terminal state `-> failed`.
    ///
    /// `processing_time` covers the time since processing began, or zero for
    /// a job that never started.
    pub fn fail(&self, error: String, now: DateTime<Utc>) -> Result<Job, JobError> {
        self.ensure_not_terminal()?;
        let processing_time = self
            .started_at
            .map(|started| (now - started).num_milliseconds().max(0) as f64 / 1000.0)
            .unwrap_or(0.0);
        Ok(Job {
            status: JobStatus::Failed,
            transcription: None,
            error: Some(error),
            completed_at: Some(now),
            processing_time: Some(processing_time),
            ..self.clone()
        })
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            file_name: self.file_name.clone(),
            status: self.status,
            created_at: self.created_at,
            processing_time: self.processing_time,
        }
    }

    fn ensure_not_terminal(&self) -> Result<(), JobError> {
        if self.status.is_terminal() {
            return Err(JobError::AlreadyTerminal {
                id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }

    fn require(&self, from: JobStatus, to: JobStatus) -> Result<(), JobError> {
        self.ensure_not_terminal()?;
        if self.status != from {
            return Err(JobError::InvalidTransition {
                id: self.id,
                from: self.status,
                to,
            });
        }
        Ok(())
    }
}

/// List entry; leaves out the transcription body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub file_name: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub processing_time: Option<f64>,
}

/// Aggregate job counts for health reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub total: u64,
    pub uploaded: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl JobCounts {
    pub fn add(&mut self, status: JobStatus, count: u64) {
        self.total += count;
        *self.slot(status) += count;
    }

    /// Moves one job from `from` to `to`, leaving the total alone.
    pub fn shift(&mut self, from: JobStatus, to: JobStatus) {
        let source = self.slot(from);
        *source = source.saturating_sub(1);
        *self.slot(to) += 1;
    }

    fn slot(&mut self, status: JobStatus) -> &mut u64 {
        match status {
            JobStatus::Uploaded => &mut self.uploaded,
            JobStatus::Processing => &mut self.processing,
            JobStatus::Completed => &mut self.completed,
            JobStatus::Failed => &mut self.failed,
        }
    }

    /// Jobs that have not reached a terminal state yet.
    pub fn active(&self) -> u64 {
        self.uploaded + self.processing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn uploaded() -> Job {
        Job::new(
            JobId::new(),
            "speech.wav".to_string(),
            PathBuf::from("uploads/speech.wav"),
            Utc::now(),
        )
    }

    #[test]
    fn test_happy_path_transitions() {
        let job = uploaded();
        assert_eq!(job.status, JobStatus::Uploaded);
        assert!(job.completed_at.is_none());

        let started = job.start(Utc::now()).unwrap();
        assert_eq!(started.status, JobStatus::Processing);
        assert!(started.started_at.is_some());
        assert!(started.completed_at.is_none());

        let done = started
            .complete("hello world".to_string(), 2.3, Utc::now())
            .unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.transcription.as_deref(), Some("hello world"));
        assert!(done.error.is_none());
        assert!(done.completed_at.is_some());
        assert_eq!(done.processing_time, Some(2.3));
    }

    #[test]
    fn test_fail_from_uploaded() {
        let failed = uploaded().fail("File not found: x".to_string(), Utc::now()).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("File not found: x"));
        assert!(failed.transcription.is_none());
        assert!(failed.completed_at.is_some());
        assert_eq!(failed.processing_time, Some(0.0));
    }

    #[test]
    fn test_fail_measures_time_since_start() {
        let t0 = Utc::now();
        let started = uploaded().start(t0).unwrap();
        let failed = started
            .fail("boom".to_string(), t0 + Duration::milliseconds(1500))
            .unwrap();
        assert_eq!(failed.processing_time, Some(1.5));
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        let done = uploaded()
            .start(Utc::now())
            .unwrap()
            .complete("text".to_string(), 1.0, Utc::now())
            .unwrap();

        assert!(matches!(
            done.fail("late".to_string(), Utc::now()),
            Err(JobError::AlreadyTerminal { status: JobStatus::Completed, .. })
        ));
        assert!(matches!(
            done.start(Utc::now()),
            Err(JobError::AlreadyTerminal { .. })
        ));
        assert!(matches!(
            done.complete("again".to_string(), 1.0, Utc::now()),
            Err(JobError::AlreadyTerminal { .. })
        ));
    }

    #[test]
    fn test_out_of_order_transitions() {
        let job = uploaded();
        assert!(matches!(
            job.complete("text".to_string(), 1.0, Utc::now()),
            Err(JobError::InvalidTransition { from: JobStatus::Uploaded, .. })
        ));

        let started = job.start(Utc::now()).unwrap();
        assert!(matches!(
            started.start(Utc::now()),
            Err(JobError::InvalidTransition { from: JobStatus::Processing, .. })
        ));
    }

    #[test]
    fn test_complete_requires_text() {
        let started = uploaded().start(Utc::now()).unwrap();
        assert!(started.complete("  \n".to_string(), 1.0, Utc::now()).is_err());
    }

    #[test]
    fn test_status_round_trip_and_terminal_flag() {
        for status in [
            JobStatus::Uploaded,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("QUEUED".parse::<JobStatus>().is_err());
        assert!(JobStatus::Completed.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn test_job_id_parse() {
        let id = JobId::new();
        assert_eq!(JobId::parse(&id.to_string()).unwrap(), id);
        assert!(matches!(JobId::parse("../etc"), Err(JobError::NotFound(_))));
    }

    #[test]
    fn test_serialization_hides_file_path() {
        let json = serde_json::to_value(uploaded()).unwrap();
        assert_eq!(json["status"], "uploaded");
        assert_eq!(json["file_name"], "speech.wav");
        assert!(json.get("file_path").is_none());
    }

    #[test]
    fn test_counts() {
        let mut counts = JobCounts::default();
        counts.add(JobStatus::Uploaded, 2);
        counts.add(JobStatus::Processing, 1);
        counts.add(JobStatus::Completed, 4);
        assert_eq!(counts.total, 7);
        assert_eq!(counts.active(), 3);

        counts.shift(JobStatus::Processing, JobStatus::Failed);
        assert_eq!(counts.total, 7);
        assert_eq!(counts.processing, 0);
        assert_eq!(counts.failed, 1);
    }
}
