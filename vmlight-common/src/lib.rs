//! # vmlight Common
//!
//! Shared utilities for the vmlight binaries.
//!
//! ## Logging
//!
//! ```rust,no_run
//! vmlight_common::init_logging("info").unwrap();
//! tracing::info!(id = 1, "Instance deployed");
//! ```

pub mod logging;

pub use logging::{init_logging, init_logging_json};
