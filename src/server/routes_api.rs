use crate::server::error::AppError;
use crate::server::AppContext;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use mp3ify_common::{Error, JobId, JobState};
use mp3ify_db::models::{Job, JobSummary};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

pub fn api_routes() -> Router<AppContext> {
    Router::new()
        .route("/jobs", get(list_jobs).post(create_job))
        .route("/jobs/:id", get(get_job).delete(delete_job))
        .route("/jobs/:id/download", get(download))
}

/// Unknown and malformed ids are both "not found".
pub(crate) fn parse_job_id(raw: &str) -> Result<JobId, AppError> {
    raw.parse()
        .map_err(|_| AppError(Error::not_found(format!("job {}", raw))))
}

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    #[serde(default)]
    pub source: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateJobResponse {
    pub id: JobId,
}

async fn create_job(
    State(ctx): State<AppContext>,
    Json(payload): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<CreateJobResponse>), AppError> {
    let id = ctx.engine.create_job(&payload.source)?;
    Ok((StatusCode::CREATED, Json(CreateJobResponse { id })))
}

#[derive(Debug, Deserialize)]
struct ListJobsQuery {
    state: Option<String>,
}

async fn list_jobs(
    State(ctx): State<AppContext>,
    Query(params): Query<ListJobsQuery>,
) -> Result<Json<Vec<JobSummary>>, AppError> {
    let jobs = match params.state {
        Some(state) => {
            let state: JobState = state.parse().map_err(Error::validation)?;
            ctx.engine.list_jobs_by_state(state)?
        }
        None => ctx.engine.list_jobs()?,
    };
    Ok(Json(jobs))
}

async fn get_job(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<Job>, AppError> {
    let id = parse_job_id(&id)?;
    Ok(Json(ctx.engine.get_job(id)?))
}

async fn delete_job(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_job_id(&id)?;
    ctx.engine.delete_job(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn download(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_job_id(&id)?;
    let job = ctx.engine.get_job(id)?;

    let Some(output_path) = job.output_path.as_deref().filter(|_| job.state == JobState::Successful)
    else {
        return Err(Error::conflict(format!("job {} is {}, not SUCCESSFUL", id, job.state)).into());
    };

    let file = tokio::fs::File::open(output_path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::not_found(format!("artifact for job {}", id))
        } else {
            Error::from(e)
        }
    })?;
    let length = file.metadata().await.map_err(Error::from)?.len();

    let extension = std::path::Path::new(output_path)
        .extension()
        .map(|e| e.to_string_lossy().into_owned());
    let display_name = job.display_name.clone().unwrap_or_else(|| id.to_string());
    let file_name = match &extension {
        Some(ext) => format!("{}.{}", display_name, ext),
        None => display_name,
    };

    let content_type = match extension.as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("m4a") => "audio/mp4",
        Some("ogg") | Some("opus") => "audio/ogg",
        Some("wav") => "audio/wav",
        _ => "application/octet-stream",
    };

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_LENGTH, length.to_string()),
            (header::CONTENT_DISPOSITION, content_disposition(&file_name)),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

/// `attachment` disposition for `file_name`.
///
/// ASCII names are quoted as-is; anything else is percent-encoded UTF-8 in
/// both `filename` and `filename*`, since older clients ignore the latter.
pub fn content_disposition(file_name: &str) -> String {
    let plain_ascii = file_name
        .chars()
        .all(|c| c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\');
    if plain_ascii {
        return format!("attachment; filename=\"{}\"", file_name);
    }

    let mut encoded = String::with_capacity(file_name.len() * 3);
    for byte in file_name.bytes() {
        if byte.is_ascii_alphanumeric() || b"-._~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        encoded, encoded
    )
}
