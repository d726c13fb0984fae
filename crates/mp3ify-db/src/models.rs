//! Internal Rust models matching the database schema.

use chrono::{DateTime, SubsecRound, Utc};
use mp3ify_common::{JobId, JobState};
use serde::{Deserialize, Serialize};

/// A conversion job record.
///
/// `failure_reason` is set only when `state` is `FAILED`, and `output_path`
/// only when `state` is `SUCCESSFUL`; the schema enforces both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    /// The URL or string submitted by the caller.
    pub source: String,
    /// Human-readable name, known once the converter has resolved the source.
    pub display_name: Option<String>,
    pub state: JobState,
    pub failure_reason: Option<String>,
    pub output_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A fresh `CREATED` job for `source`.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            id: JobId::new(),
            source: source.into(),
            display_name: None,
            state: JobState::Created,
            failure_reason: None,
            output_path: None,
            // Stored with microsecond precision
            created_at: Utc::now().trunc_subsecs(6),
            started_at: None,
            completed_at: None,
        }
    }

    /// Short form used by history listings.
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            display_name: self.display_name.clone(),
            state: self.state,
        }
    }
}

/// History listing entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobSummary {
    pub id: JobId,
    pub display_name: Option<String>,
    pub state: JobState,
}
