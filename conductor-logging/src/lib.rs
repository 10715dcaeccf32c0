//! Logging initialisation for Conductor
//!
//! Every crate logs through `tracing`; binaries call [`init_logging`] once
//! with the `logging` section of their configuration.

pub mod init;

pub use init::{build_filter, init_logging, LoggingError};
