//! Error types for standing-circle
//!
//! Not-found is a normal outcome and is modeled as `Option` on lookups;
//! `CircleError::NotFound` only appears where a mutation targets a circle
//! that does not exist. Transport/storage failures stay distinct from both.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CircleError {
    #[error("Circle not found: {0}")]
    NotFound(String),

    #[error("Conflicting write on circle {0}: retries exhausted")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sled::Error> for CircleError {
    fn from(e: sled::Error) -> Self {
        CircleError::Database(e.to_string())
    }
}
