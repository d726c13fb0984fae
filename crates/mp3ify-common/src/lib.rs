//! Mp3ify-Common: Shared types and utilities.
//!
//! This crate provides common functionality used across mp3ify:
//!
//! - **Typed IDs**: [`JobId`], a UUID wrapper for conversion jobs
//! - **Core Types**: [`JobState`] and its transition rules
//! - **Error Handling**: Common error types and result aliases
//!
//! # Examples
//!
//! ```
//! use mp3ify_common::{Error, JobId, JobState, Result};
//!
//! let id = JobId::new();
//! assert!(JobState::Created.can_transition_to(JobState::Converting));
//!
//! fn lookup(_id: JobId) -> Result<()> {
//!     Err(Error::not_found("job"))
//! }
//! assert!(lookup(id).is_err());
//! ```

pub mod error;
pub mod ids;
pub mod types;

pub use error::{Error, Result};
pub use ids::*;
pub use types::*;
