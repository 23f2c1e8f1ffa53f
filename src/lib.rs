//! PITCHWATCH: live football metrics and betting-signal engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod metrics;
pub mod tracker;
pub mod strategy;
pub mod calibration;
pub mod history;
pub mod resolver;
pub mod engine;
pub mod storage;
