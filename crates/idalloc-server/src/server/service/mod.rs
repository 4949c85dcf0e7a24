//! HTTP surface of the allocation engine.
//!
//! ## Structure
//!
//! - [`handler`] - routes, request validation and error mapping.
//! - [`trace`] - the `X-Trace-Id` middleware.

pub mod handler;
pub mod trace;
