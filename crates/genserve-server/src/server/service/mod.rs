//! Request lifecycle between the HTTP transport and the engine.
//!
//! ## Structure
//!
//! - [`context`] - shared engine handle, config and shutdown state.
//! - [`session`] - one in-flight request and its cancellation state machine.
//! - [`multiplexer`] - streaming and blocking delivery of session outputs.
//! - [`disconnect`] - turns a dropped connection into a cancellation signal.
//! - [`handler`] - the axum router.

pub mod context;
pub mod disconnect;
pub mod handler;
pub mod multiplexer;
pub mod session;
