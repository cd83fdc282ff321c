//! Errors surfaced by the Quarry binary.

use crate::config::ConfigError;
use crate::document::DocumentError;
use quarry_core::QuarryError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] QuarryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("{0}")]
    Usage(String),

    #[error("I/O error: {0}")]
    Io(String),
}
