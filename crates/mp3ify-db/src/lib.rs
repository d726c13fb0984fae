//! Mp3ify-DB: Durable job records on SQLite.
//!
//! This crate provides the persistence layer for conversion jobs using
//! rusqlite with r2d2 connection pooling.
//!
//! # Modules
//!
//! - `migrations` - Database schema migrations
//! - `pool` - Connection pool management
//! - `models` - Rust models matching the database schema
//! - `queries` - Database query operations
//!
//! # Example
//!
//! ```no_run
//! use mp3ify_db::models::Job;
//! use mp3ify_db::pool::{get_conn, init_pool};
//! use mp3ify_db::queries::jobs;
//!
//! let pool = init_pool("/var/lib/mp3ify/mp3ify.db").unwrap();
//! let conn = get_conn(&pool).unwrap();
//!
//! let job = Job::new("https://youtu.be/abc123");
//! jobs::put_job(&conn, &job).unwrap();
//! println!("Stored job {}", job.id);
//! ```

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
