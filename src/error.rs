
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BedrockError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("type mismatch for attribute '{attribute}': expected {expected}, found {found}")]
    TypeMismatch {
        attribute: String,
        expected: String,
        found: String,
    },
    #[error("unique constraint '{constraint}' violated by {record}: ({tuple})")]
    ConstraintViolation {
        constraint: String,
        record: String,
        tuple: String,
    },
    #[error("conversion error at '{field}': {message}")]
    Conversion { field: String, message: String },
    #[error("malformed path '{path}': {reason}")]
    MalformedPath { path: String, reason: String },
    #[error("Config error: {0}")]
    Config(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Data corruption: {message}")]
    DataCorruption { message: String },
    #[error("Internal invariant violated: {0}")]
    Invariant(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, BedrockError>;

// Helper conversions
impl From<rusqlite::Error> for BedrockError {
    fn from(e: rusqlite::Error) -> Self { Self::Persistence(e.to_string()) }
}
impl From<config::ConfigError> for BedrockError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|e| BedrockError::Lock(e.to_string()))
}
