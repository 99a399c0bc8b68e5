//! # Demo Scenarios
//!
//! Each scenario exercises one part of `millrace` with simulated jobs that
//! sleep instead of doing real I/O, and logs what happens as it happens.
//!
//! ## Submodules
//!
//! - [`config`] - CLI and environment configuration, validated into a
//!   [`DemoConfig`](config::DemoConfig).
//! - [`scenarios`] - The runnable scenarios.
//! - [`telemetry`] - `tracing` subscriber setup.
//! - [`work`] - The simulated work functions.

pub mod config;
pub mod scenarios;
pub mod telemetry;
pub mod work;
