//! PULSE: streak-biased risk-choice experiment runner
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry points.

pub mod config;
pub mod types;
pub mod engine;
pub mod storage;
pub mod host;
pub mod server;
pub mod simulation;
