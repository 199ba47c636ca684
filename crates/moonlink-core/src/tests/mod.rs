//! Test module for moonlink-core
//!
//! This module contains tests for:
//! - Snapshot merging and state transitions
//! - Progress quantization and milestone events
//! - Configuration loading and defaults
//! - Status text formatting

// Test modules use exact float comparisons and test-specific casts
#![allow(clippy::float_cmp, clippy::cast_possible_truncation)]

mod progress_tests;
