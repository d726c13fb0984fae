//! Database query modules.
//!
//! - jobs: Conversion job records and state transitions

pub mod jobs;
