//! Terminal console for a single port-forward tunnel session.
//!
//! The console drives a separate forwarding backend: it validates the
//! session form, issues `forward`/`stop` commands, listens for the backend's
//! connection-count and transfer-statistic events, and renders the result.

pub mod bridge;
pub mod cli;
pub mod config;
pub mod console;
pub mod controller;
pub mod gateway;
pub mod ipc;
pub mod session;
pub mod simulate;
pub mod status_http;
pub mod telemetry;
pub mod ui;
pub mod validate;
