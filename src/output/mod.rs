//! Output module for crawl statistics
//!
//! This module handles:
//! - Loading per-process statistics from storage
//! - Printing them for the `stats` command and the completion log

pub mod stats;

pub use stats::{load_statistics, print_statistics, ProcessStatistics};
