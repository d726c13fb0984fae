//! Conversion job query operations.
//!
//! `put_job`, `get_job`, `list_jobs` and `delete_job` are the plain
//! key-value contract of the job store. The transition queries
//! (`start_job`, `complete_job`, `fail_job`) only touch a row that is in the
//! expected source state and report whether they did, so a terminal record
//! is never modified and a deleted record is never written back.

use chrono::{DateTime, SecondsFormat, Utc};
use mp3ify_common::{Error, JobId, JobState, Result};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};

use crate::models::Job;

const JOB_COLUMNS: &str = "id, source, display_name, state, failure_reason, output_path,
                           created_at, started_at, completed_at";

fn to_timestamp(dt: &DateTime<Utc>) -> String {
    // Fixed width so lexical order matches chronological order
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(
    idx: usize,
    e: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
}

fn parse_timestamp(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn parse_optional_timestamp(idx: usize, s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_timestamp(idx, &s)).transpose()
}

/// Quoted list of the states that may move to `next`, for `state IN (...)`.
fn source_states(next: JobState) -> String {
    JobState::ALL
        .iter()
        .filter(|state| state.can_transition_to(next))
        .map(|state| format!("'{}'", state.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        id: row
            .get::<_, String>(0)?
            .parse()
            .map_err(|e| conversion_error(0, e))?,
        source: row.get(1)?,
        display_name: row.get(2)?,
        state: row
            .get::<_, String>(3)?
            .parse::<JobState>()
            .map_err(|e| conversion_error(3, e))?,
        failure_reason: row.get(4)?,
        output_path: row.get(5)?,
        created_at: parse_timestamp(6, &row.get::<_, String>(6)?)?,
        started_at: parse_optional_timestamp(7, row.get(7)?)?,
        completed_at: parse_optional_timestamp(8, row.get(8)?)?,
    })
}

/// Insert a job, or overwrite every field of an existing job with the same id.
///
/// A single statement, so concurrent readers see either the old or the new
/// record, never a mix.
pub fn put_job(conn: &Connection, job: &Job) -> Result<()> {
    conn.execute(
        "INSERT INTO jobs (id, source, display_name, state, failure_reason, output_path,
                           created_at, started_at, completed_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             source = excluded.source,
             display_name = excluded.display_name,
             state = excluded.state,
             failure_reason = excluded.failure_reason,
             output_path = excluded.output_path,
             created_at = excluded.created_at,
             started_at = excluded.started_at,
             completed_at = excluded.completed_at",
        params![
            job.id.to_string(),
            job.source,
            job.display_name,
            job.state.as_str(),
            job.failure_reason,
            job.output_path,
            to_timestamp(&job.created_at),
            job.started_at.as_ref().map(to_timestamp),
            job.completed_at.as_ref().map(to_timestamp),
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(())
}

/// Get a job by ID.
pub fn get_job(conn: &Connection, id: JobId) -> Result<Job> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"),
        [id.to_string()],
        row_to_job,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Error::not_found(format!("job {}", id)),
        _ => Error::database(e.to_string()),
    })
}

/// List all jobs in creation order.
pub fn list_jobs(conn: &Connection) -> Result<Vec<Job>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at ASC, seq ASC"
        ))
        .map_err(|e| Error::database(e.to_string()))?;

    let jobs = stmt
        .query_map([], row_to_job)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(jobs)
}

/// List jobs in a given state, in creation order.
pub fn list_jobs_by_state(conn: &Connection, state: JobState) -> Result<Vec<Job>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE state = ? ORDER BY created_at ASC, seq ASC"
        ))
        .map_err(|e| Error::database(e.to_string()))?;

    let jobs = stmt
        .query_map([state.as_str()], row_to_job)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(jobs)
}

/// Delete a job. Deleting a missing id is not an error.
///
/// Returns whether a row was removed.
pub fn delete_job(conn: &Connection, id: JobId) -> Result<bool> {
    let affected = conn
        .execute("DELETE FROM jobs WHERE id = ?", [id.to_string()])
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(affected > 0)
}

/// `CREATED -> CONVERTING`.
pub fn start_job(conn: &Connection, id: JobId) -> Result<bool> {
    let affected = conn
        .execute(
            &format!(
                "UPDATE jobs SET state = ?, started_at = ?
                 WHERE id = ? AND state IN ({})",
                source_states(JobState::Converting)
            ),
            params![
                JobState::Converting.as_str(),
                to_timestamp(&Utc::now()),
                id.to_string()
            ],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(affected > 0)
}

/// `CONVERTING -> SUCCESSFUL`, recording the artifact and display name.
pub fn complete_job(
    conn: &Connection,
    id: JobId,
    output_path: &str,
    display_name: &str,
) -> Result<bool> {
    let affected = conn
        .execute(
            &format!(
                "UPDATE jobs SET state = ?, output_path = ?, display_name = ?,
                                 completed_at = ?
                 WHERE id = ? AND state IN ({})",
                source_states(JobState::Successful)
            ),
            params![
                JobState::Successful.as_str(),
                output_path,
                display_name,
                to_timestamp(&Utc::now()),
                id.to_string()
            ],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(affected > 0)
}

/// `CONVERTING -> FAILED`, recording the reason.
pub fn fail_job(conn: &Connection, id: JobId, reason: &str) -> Result<bool> {
    let affected = conn
        .execute(
            &format!(
                "UPDATE jobs SET state = ?, failure_reason = ?, completed_at = ?
                 WHERE id = ? AND state IN ({})",
                source_states(JobState::Failed)
            ),
            params![
                JobState::Failed.as_str(),
                reason,
                to_timestamp(&Utc::now()),
                id.to_string()
            ],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(affected > 0)
}

/// Fail every job left `CONVERTING`, e.g. by a previous process that died.
///
/// Returns the number of jobs failed.
pub fn fail_orphaned_jobs(conn: &Connection, reason: &str) -> Result<usize> {
    let affected = conn
        .execute(
            "UPDATE jobs SET state = 'FAILED', failure_reason = ?, completed_at = ?
             WHERE state = 'CONVERTING'",
            params![reason, to_timestamp(&Utc::now())],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(affected)
}
