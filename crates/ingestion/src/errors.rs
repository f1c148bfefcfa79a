//! Ingestion error types

use ragline_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Failed to read source {path}: {message}")]
    SourceError { path: String, message: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Text column not found in input: {0}")]
    MissingColumn(String),

    #[error("Chunking error: {0}")]
    ChunkingError(String),

    #[error("Nothing to ingest: {0}")]
    EmptyInput(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Embedding or index failure; aborts the run
    #[error(transparent)]
    Service(#[from] AppError),
}
