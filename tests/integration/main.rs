//! Integration tests for Sumi-Paths
//!
//! These tests drive the public API end to end: the manager loop, local
//! workers talking to wiremock servers, and path growth across steps.

mod common;
mod crawl_tests;
mod lease_tests;
mod path_tests;
mod worker_tests;
