//! The narrow interface between the engine and a converter.
//!
//! A runner converts one job. It reports an ordered sequence of
//! [`RunnerRecord`]s over a [`RunHandle`], ending with exactly one
//! [`RunnerRecord::Finished`]. Runners never retry.

use mp3ify_common::JobId;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Records buffered between a runner and the engine.
const RECORD_BUFFER: usize = 64;

/// A successful conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionOutput {
    /// Where the converted file now lives.
    pub artifact_path: PathBuf,
    /// Human-readable name resolved by the converter.
    pub display_name: String,
}

/// Why a conversion did not produce an artifact.
///
/// The `Display` text is what ends up as the job's failure reason.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConversionFailure {
    #[error("failed to launch converter: {0}")]
    Launch(String),

    #[error("{}", exit_reason(.code, .stderr_tail))]
    Exit {
        /// `None` when the process was killed by a signal.
        code: Option<i32>,
        stderr_tail: String,
    },

    #[error("converter produced no usable result: {0}")]
    MalformedResult(String),

    #[error("converter I/O error: {0}")]
    Io(String),

    #[error("conversion cancelled")]
    Cancelled,
}

fn exit_reason(code: &Option<i32>, stderr_tail: &str) -> String {
    match code {
        Some(code) if stderr_tail.is_empty() => format!("converter exited with code {code}"),
        Some(code) => format!("converter exited with code {code}: {stderr_tail}"),
        None if stderr_tail.is_empty() => "converter terminated by signal".to_string(),
        None => format!("converter terminated by signal: {stderr_tail}"),
    }
}

/// One item of runner output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerRecord {
    /// A line to append.
    Line(String),
    /// The next line replaces the previous one.
    CarriageReturn,
    /// Terminal record; nothing follows it.
    Finished(Result<ConversionOutput, ConversionFailure>),
}

/// Receiving side of a runner's record stream.
#[derive(Debug)]
pub struct RunHandle {
    rx: mpsc::Receiver<RunnerRecord>,
}

impl RunHandle {
    /// A connected sender/handle pair.
    pub fn channel() -> (mpsc::Sender<RunnerRecord>, RunHandle) {
        let (tx, rx) = mpsc::channel(RECORD_BUFFER);
        (tx, RunHandle { rx })
    }

    /// Next record in order, or `None` if the runner went away without a
    /// terminal record.
    pub async fn next(&mut self) -> Option<RunnerRecord> {
        self.rx.recv().await
    }
}

/// Something that can convert a source reference into an artifact.
///
/// `start` must return without waiting for the conversion. When `cancel`
/// fires the runner stops the conversion, releases its resources and then
/// finishes with [`ConversionFailure::Cancelled`].
pub trait ConversionRunner: Send + Sync + 'static {
    fn start(&self, job_id: JobId, source: &str, cancel: CancellationToken) -> RunHandle;
}
