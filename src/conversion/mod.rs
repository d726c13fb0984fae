//! Conversion of source references into audio files.
//!
//! This module holds the job engine and everything it drives:
//!
//! - [`JobEngine`]: the job state machine, recovery and cancellation
//! - [`ConversionRunner`]: the interface a converter is driven through
//! - [`ProcessRunner`]: a runner backed by an external command
//! - [`ProgressLineCodec`]: line framing that keeps progress redraws apart
//!
//! # Job lifecycle
//!
//! `CREATED -> CONVERTING -> {SUCCESSFUL | FAILED}`. Output lines are
//! forwarded to subscribers while converting and never stored.

mod engine;
mod framing;
mod process;
mod runner;

pub use engine::{EngineSettings, JobEngine, CANCELLED_REASON, INTERRUPTED_REASON};
pub use framing::{Frame, ProgressLineCodec, DEFAULT_MAX_LINE_LENGTH};
pub use process::{render_args, ProcessRunner, ProcessSettings};
pub use runner::{ConversionFailure, ConversionOutput, ConversionRunner, RunHandle, RunnerRecord};
