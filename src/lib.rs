//! mp3ify - Convert video URLs to audio files with live progress
//!
//! This library crate exposes the job engine, its collaborators and the
//! HTTP adapter for the binary and for integration testing.

pub mod config;
pub mod conversion;
pub mod events;
pub mod render;
pub mod server;
pub mod store;
