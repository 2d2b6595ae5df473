//! # famup workspace tests
//!
//! Shared fixtures for the integration test targets declared in this crate's
//! manifest.

#![forbid(unsafe_code)]

/// Mock Beast producer and collection endpoint.
pub mod support;
