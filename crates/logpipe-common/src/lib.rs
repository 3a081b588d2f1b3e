//! logpipe common library
//!
//! Shared types, utilities, and error handling for the logpipe workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`CommonError`] and the [`Result`] alias
//! - **Checksums**: content addressing for staged files
//! - **Logging**: `tracing` subscriber setup driven by [`logging::LogConfig`]
//! - **Types**: load states and append outcomes shared by the stores
//!
//! # Example
//!
//! ```no_run
//! use logpipe_common::checksum::sha256_hex;
//!
//! let digest = sha256_hex(b"{\"time\": 1700000000}\n");
//! assert_eq!(digest.len(), 64);
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

pub use error::{CommonError, Result};
pub use types::{AppendOutcome, FileStatus};
