//! Durable job records, shared by the engine and the API.
//!
//! A thin handle over the connection pool; every call checks out a
//! connection for the duration of a single statement.

use mp3ify_common::{JobId, JobState, Result};
use mp3ify_db::models::Job;
use mp3ify_db::pool::{get_conn, init_memory_pool, init_pool, DbPool};
use mp3ify_db::queries::jobs;
use std::path::Path;

#[derive(Clone)]
pub struct JobStore {
    pool: DbPool,
}

impl JobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self::new(init_pool(&path.to_string_lossy())?))
    }

    /// A store that lives only as long as this handle and its clones.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(init_memory_pool()?))
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn put(&self, job: &Job) -> Result<()> {
        let conn = get_conn(&self.pool)?;
        jobs::put_job(&conn, job)
    }

    pub fn get(&self, id: JobId) -> Result<Job> {
        let conn = get_conn(&self.pool)?;
        jobs::get_job(&conn, id)
    }

    /// All jobs, oldest first.
    pub fn list(&self) -> Result<Vec<Job>> {
        let conn = get_conn(&self.pool)?;
        jobs::list_jobs(&conn)
    }

    pub fn list_by_state(&self, state: JobState) -> Result<Vec<Job>> {
        let conn = get_conn(&self.pool)?;
        jobs::list_jobs_by_state(&conn, state)
    }

    /// Remove a job. Missing ids are ignored.
    pub fn delete(&self, id: JobId) -> Result<bool> {
        let conn = get_conn(&self.pool)?;
        jobs::delete_job(&conn, id)
    }

    pub(crate) fn mark_converting(&self, id: JobId) -> Result<bool> {
        let conn = get_conn(&self.pool)?;
        jobs::start_job(&conn, id)
    }

    pub(crate) fn mark_successful(
        &self,
        id: JobId,
        output_path: &Path,
        display_name: &str,
    ) -> Result<bool> {
        let conn = get_conn(&self.pool)?;
        jobs::complete_job(
            &conn,
            id,
            &output_path.to_string_lossy(),
            display_name,
        )
    }

    pub(crate) fn mark_failed(&self, id: JobId, reason: &str) -> Result<bool> {
        let conn = get_conn(&self.pool)?;
        jobs::fail_job(&conn, id, reason)
    }

    pub(crate) fn fail_orphaned(&self, reason: &str) -> Result<usize> {
        let conn = get_conn(&self.pool)?;
        jobs::fail_orphaned_jobs(&conn, reason)
    }
}
