//! Shared utilities for the satchel workspace.

pub mod logging;

pub use logging::{init_logging, init_test_tracing, LogFormat, LoggingError};
