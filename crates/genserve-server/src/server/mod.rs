//! Server-side building blocks for the `genserve-server` binary.
//!
//! ## Structure
//!
//! - [`config`] - CLI/env configuration.
//! - [`engine`] - the built-in replay engine and its worker pool.
//! - [`service`] - sessions, result multiplexing, disconnect handling and the
//!   HTTP routes.
//! - [`telemetry`] - logging and optional OpenTelemetry export.

pub mod config;
pub mod engine;
pub mod service;
pub mod telemetry;
