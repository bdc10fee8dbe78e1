//! Integration test suite for ragent.
//!
//! These tests run validated plans end to end through the executor, the
//! synthesizer and the agents. They verify that the components work
//! together correctly.
//!
//! # Test Categories
//!
//! - `workflow_e2e`: Plan validation, execution and answers
//! - `failure_policy`: Retries, timeouts, critical steps and abort policies
//! - `concurrency`: Concurrency bound and dependency ordering
//! - `cancellation`: Cancelling runs in flight
//! - `agents`: Query and workflow agents and their output
//!
//! # CI Compatibility
//!
//! These tests use a scripted RAG client and never touch the network,
//! making them safe to run in CI environments.

mod fixtures;

mod failure_policy;
mod cancellation;
