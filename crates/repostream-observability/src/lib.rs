//! # repostream-observability
//!
//! Logging initialisation shared by the repostream binaries. Logs always go
//! to stderr; stdout is reserved for envelopes when the stdout sink is used.

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, LogConfig};
