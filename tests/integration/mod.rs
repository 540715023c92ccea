//! Integration test suite for Stratus.
//!
//! These tests exercise full pipeline runs end to end: dependency
//! ordering, artifact handoff, failure propagation, timeouts, and
//! cancellation. They verify that the components work together the way
//! a real run would use them.
//!
//! # Test Categories
//!
//! - `pipeline_e2e`: Full pipeline runs, definition loading, reports
//! - `failure_propagation`: Failure, timeout, retry, and cancel behavior
//! - `ordering`: Dependency-order and concurrency properties
//!
//! # CI Compatibility
//!
//! Most scenarios run against an in-memory scripted backend. The
//! end-to-end tests that use the local process backend only invoke `sh`
//! with trivial scripts, so the suite is safe in CI environments.

mod fixtures;

mod ordering;
mod pipeline_e2e;
