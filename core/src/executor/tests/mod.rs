//! Tests for the reference executor
//!
//! Organized by feature area

mod failure_tests;
mod helpers;
