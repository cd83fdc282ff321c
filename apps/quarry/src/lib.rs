//! # Quarry Library
//!
//! The application layer of the Quarry binary, exposed for integration
//! tests: configuration, pattern documents and the CLI.

pub mod cli;
pub mod config;
pub mod document;
pub mod error;
pub mod logging;

pub use config::{Config, ConfigError, Override};
pub use document::{Document, DocumentError};
pub use error::AppError;
