//! Stress tester for competitive programming solutions.
//!
//! The supervision core lives in [`runner`]: a [`runner::Runner`] starts one
//! program with redirected streams, enforces wall time and memory limits and
//! classifies how it ended. [`judger`] composes four runners into one
//! generate → solve → check round, and [`tester`] drives rounds until the
//! first mismatch.

pub mod cancel;
pub mod checker;
pub mod cleaner;
pub mod compiler;
pub mod config;
pub mod core;
pub mod judger;
pub mod runner;
pub mod tester;
