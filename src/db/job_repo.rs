//! Job repository: row-level operations on the `jobs` table.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: String,
    pub file_name: String,
    pub file_path: String,
    pub status: String,
    pub transcription: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub processing_time: Option<f64>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            file_name: row.get("file_name")?,
            file_path: row.get("file_path")?,
            status: row.get("status")?,
            transcription: row.get("transcription")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            processing_time: row.get("processing_time")?,
        })
    }
}

/// Inserts the row, or overwrites every mutable column when the id exists.
///
/// One statement, so readers see either the old row or the new one.
pub fn upsert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, file_name, file_path, status, transcription, error,
             created_at, started_at, completed_at, processing_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                file_name = excluded.file_name,
                file_path = excluded.file_path,
                status = excluded.status,
                transcription = excluded.transcription,
                error = excluded.error,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                processing_time = excluded.processing_time",
            params![
                job.id,
                job.file_name,
                job.file_path,
                job.status,
                job.transcription,
                job.error,
                job.created_at,
                job.started_at,
                job.completed_at,
                job.processing_time,
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM jobs WHERE id = ?1",
                params![id],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Returns every job, newest first.
pub fn list_all(db: &Database) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs ORDER BY created_at DESC, id ASC")?;
        let rows = stmt
            .query_map([], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Deletes a job row. Returns whether a row was removed.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    })
}

/// Counts jobs grouped by their status column.
pub fn count_by_status(db: &Database) -> Result<Vec<(String, u64)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let counts = stmt
            .query_map([], |r| {
                let count: i64 = r.get(1)?;
                Ok((r.get::<_, String>(0)?, count.max(0) as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    })
}
