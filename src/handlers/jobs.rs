//! # Job Routes
//!
//! Thin HTTP layer over the lifecycle manager:
//!
//! - `POST /api/upload`: store the file, create the job, start the runner
//! - `GET /api/jobs/{job_id}`: full record including the transcription
//! - `GET /api/jobs`: summaries, newest first
//! - `DELETE /api/jobs/{job_id}`: remove the record and its upload
//!
//! Processing failures never surface here as request errors. A client sees
//! them only as `status: "failed"` with an `error` message on a later read.

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::jobs::{JobId, JobStatus, JobSummary};
use crate::state::AppState;
use crate::storage::UploadError;

/// Multipart field names accepted for the uploaded file.
const FILE_FIELDS: [&str; 2] = ["file", "audio"];

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobSummary>,
    pub total: usize,
}

pub async fn root() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "message": "Transcription API is running!" }))
}

/// Accepts one media file and starts transcribing it in the background.
///
/// The job id is allocated first so the stored file name can carry it; the
/// job record is created only after the whole file is on disk.
pub async fn upload_file(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> AppResult<HttpResponse> {
    while let Some(item) = payload.next().await {
        let field = item.map_err(|e| AppError::ValidationError(format!("Multipart error: {}", e)))?;

        let (field_name, raw_name) = match field.content_disposition() {
            Some(cd) => (
                cd.get_name().unwrap_or_default().to_string(),
                cd.get_filename().map(str::to_string),
            ),
            None => continue,
        };
        if !FILE_FIELDS.contains(&field_name.as_str()) {
            continue;
        }

        let file_name = state
            .uploads
            .validate_name(raw_name.as_deref().unwrap_or_default())?;
        let job_id = JobId::new();
        let path = state.uploads.path_for(job_id, &file_name);

        let size = state.uploads.write_stream(&path, field).await?;

        let job = match state.jobs.create_with_id(job_id, file_name, path.clone()).await {
            Ok(job) => job,
            Err(e) => {
                // No job will ever own this file.
                if let Err(io) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %io, "Failed to remove orphaned upload");
                }
                return Err(e.into());
            }
        };

        info!(job_id = %job.id, file_name = %job.file_name, bytes = size, "Upload stored");
        state.runner.dispatch(job.id, job.file_path.clone());

        return Ok(HttpResponse::Ok().json(UploadResponse {
            job_id: job.id,
            status: job.status,
            message: "File uploaded successfully. Transcription started.".to_string(),
        }));
    }

    Err(UploadError::MissingFile.into())
}

pub async fn get_job(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let id = JobId::parse(&path)?;
    let job = state.jobs.get(id).await?;
    Ok(HttpResponse::Ok().json(job))
}

pub async fn list_jobs(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let jobs = state.jobs.list().await?;
    Ok(HttpResponse::Ok().json(JobListResponse {
        total: jobs.len(),
        jobs,
    }))
}

pub async fn delete_job(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let id = JobId::parse(&path)?;
    state.jobs.delete(id).await?;
    Ok(HttpResponse::Ok().json(json!({
        "message": "Job deleted successfully",
        "job_id": id
    })))
}
