//! Anistream - Episode ingestion and HLS packaging pipeline
//!
//! This library crate exposes the core functionality for integration testing.

pub mod config;
pub mod download;
pub mod error;
pub mod hls;
pub mod inflight;
pub mod job;
pub mod pipeline;
pub mod probe;
pub mod tools;
