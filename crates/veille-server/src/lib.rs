//! # veille-server
//!
//! HTTP server library for the veille beacon proximity monitor.
//!
//! Exposes the monitoring engine from `veille-core` over a REST API, and
//! carries the logging setup shared by the server binaries.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
