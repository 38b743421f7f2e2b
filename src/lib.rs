//! DCA bot — recurring investment scheduler
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod clock;
pub mod exchange;
pub mod engine;
pub mod storage;
pub mod dashboard;
