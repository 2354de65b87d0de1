//! Durable job store seam.
//!
//! [`JobStore`] is synchronous; the manager calls it from `spawn_blocking`.
//! [`Database`] is the production implementation.

use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};

use super::model::{Job, JobCounts, JobId, JobStatus};
use crate::db::job_repo::{self, JobRow};
use crate::db::{Database, DatabaseError};

pub trait JobStore: Send + Sync {
    /// Insert or overwrite the job's row. Replaying the same state is a no-op.
    fn upsert(&self, job: &Job) -> Result<(), DatabaseError>;

    fn find(&self, id: JobId) -> Result<Option<Job>, DatabaseError>;

    /// All jobs ordered by `created_at`, newest first.
    fn list(&self) -> Result<Vec<Job>, DatabaseError>;

    /// Returns whether a row existed.
    fn remove(&self, id: JobId) -> Result<bool, DatabaseError>;

    fn counts(&self) -> Result<JobCounts, DatabaseError>;
}

impl JobStore for Database {
    fn upsert(&self, job: &Job) -> Result<(), DatabaseError> {
        job_repo::upsert(self, &JobRow::from(job))
    }

    fn find(&self, id: JobId) -> Result<Option<Job>, DatabaseError> {
        job_repo::find_by_id(self, &id.to_string())?
            .map(Job::try_from)
            .transpose()
    }

    fn list(&self) -> Result<Vec<Job>, DatabaseError> {
        job_repo::list_all(self)?
            .into_iter()
            .map(Job::try_from)
            .collect()
    }

    fn remove(&self, id: JobId) -> Result<bool, DatabaseError> {
        job_repo::delete(self, &id.to_string())
    }

    fn counts(&self) -> Result<JobCounts, DatabaseError> {
        let mut counts = JobCounts::default();
        for (status, count) in job_repo::count_by_status(self)? {
            let status: JobStatus = status.parse().map_err(|reason| DatabaseError::Corrupt {
                id: "*".to_string(),
                reason,
            })?;
            counts.add(status, count);
        }
        Ok(counts)
    }
}

impl From<&Job> for JobRow {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.to_string(),
            file_name: job.file_name.clone(),
            file_path: job.file_path.to_string_lossy().into_owned(),
            status: job.status.as_str().to_string(),
            transcription: job.transcription.clone(),
            error: job.error.clone(),
            created_at: format_timestamp(job.created_at),
            started_at: job.started_at.map(format_timestamp),
            completed_at: job.completed_at.map(format_timestamp),
            processing_time: job.processing_time,
        }
    }
}

impl TryFrom<JobRow> for Job {
    type Error = DatabaseError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| DatabaseError::Corrupt {
            id: row.id.clone(),
            reason,
        };

        let id = JobId::parse(&row.id).map_err(|e| corrupt(e.to_string()))?;
        let status = row.status.parse::<JobStatus>().map_err(corrupt)?;
        let created_at = parse_timestamp(&row.created_at).map_err(corrupt)?;
        let started_at = row
            .started_at
            .as_deref()
            .map(parse_timestamp)
            .transpose()
            .map_err(corrupt)?;
        let completed_at = row
            .completed_at
            .as_deref()
            .map(parse_timestamp)
            .transpose()
            .map_err(corrupt)?;

        Ok(Job {
            id,
            file_name: row.file_name,
            file_path: PathBuf::from(row.file_path),
            status,
            transcription: row.transcription,
            error: row.error,
            created_at,
            started_at,
            completed_at,
            processing_time: row.processing_time,
        })
    }
}

/// Fixed-width RFC 3339 so `ORDER BY created_at` sorts chronologically.
fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed_job() -> Job {
        let job = Job::new(
            JobId::new(),
            "speech.wav".to_string(),
            PathBuf::from("uploads/x_speech.wav"),
            Utc::now(),
        );
        job.start(Utc::now())
            .unwrap()
            .complete("hello world".to_string(), 2.3, Utc::now())
            .unwrap()
    }

    #[test]
    fn test_store_round_trip_preserves_job() {
        let db = Database::open_in_memory().unwrap();
        let job = completed_job();
        db.upsert(&job).unwrap();

        let found = db.find(job.id).unwrap().unwrap();
        assert_eq!(found, job);
    }

    #[test]
    fn test_counts_by_status() {
        let db = Database::open_in_memory().unwrap();
        db.upsert(&completed_job()).unwrap();
        db.upsert(&Job::new(
            JobId::new(),
            "a.mp3".to_string(),
            PathBuf::from("uploads/a.mp3"),
            Utc::now(),
        ))
        .unwrap();

        let counts = db.counts().unwrap();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.uploaded, 1);
        assert_eq!(counts.active(), 1);
    }

    #[test]
    fn test_corrupt_status_is_reported() {
        let db = Database::open_in_memory().unwrap();
        let mut row = JobRow::from(&completed_job());
        row.status = "exploded".to_string();
        job_repo::upsert(&db, &row).unwrap();

        let err = db.list().unwrap_err();
        assert!(matches!(err, DatabaseError::Corrupt { .. }));
    }
}
