//! Source document readers
//!
//! - CSV files: one document per row, text taken from selected columns
//! - Text directories: one document per `*.txt` file

use crate::errors::IngestionError;
use ragline_common::models::{Document, Metadata};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Decode bytes as UTF-8, falling back to Latin-1.
///
/// Latin-1 maps every byte to a code point, so the fallback never fails.
pub fn decode_text(bytes: Vec<u8>, path: &Path) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            warn!(path = %path.display(), "Input is not valid UTF-8, decoding as Latin-1");
            e.into_bytes().iter().map(|&b| b as char).collect()
        }
    }
}

fn read_file(path: &Path) -> Result<String, IngestionError> {
    let bytes = std::fs::read(path).map_err(|e| IngestionError::SourceError {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    Ok(decode_text(bytes, path))
}

/// Read a CSV file into documents.
///
/// The document text is `text_columns` joined by a space; metadata holds
/// every column of the row plus `source_idx`.
pub fn read_csv(path: &Path, text_columns: &[String]) -> Result<Vec<Document>, IngestionError> {
    let content = read_file(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
    let text_indices: Vec<usize> = text_columns
        .iter()
        .map(|column| {
            headers
                .iter()
                .position(|h| h == column)
                .ok_or_else(|| IngestionError::MissingColumn(column.clone()))
        })
        .collect::<Result<_, _>>()?;

    let mut documents = Vec::new();
    for (row_idx, record) in reader.records().enumerate() {
        let record = record?;

        let text = text_indices
            .iter()
            .map(|&i| record.get(i).unwrap_or(""))
            .collect::<Vec<_>>()
            .join(" ");

        let mut metadata: Metadata = headers
            .iter()
            .enumerate()
            .map(|(i, header)| {
                let value = match record.get(i) {
                    Some(cell) if !cell.is_empty() => Value::String(cell.to_string()),
                    _ => Value::Null,
                };
                (header.clone(), value)
            })
            .collect();
        metadata.insert("source_idx".to_string(), Value::from(row_idx));

        documents.push(Document::new(row_idx.to_string(), text, metadata));
    }

    info!(
        path = %path.display(),
        rows = documents.len(),
        columns = headers.len(),
        "Read CSV source"
    );
    Ok(documents)
}

/// Read every `*.txt` file of a directory, in path order
pub fn read_text_dir(dir: &Path) -> Result<Vec<Document>, IngestionError> {
    let entries = std::fs::read_dir(dir).map_err(|e| IngestionError::SourceError {
        path: dir.display().to_string(),
        message: e.to_string(),
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "txt"))
        .collect();
    paths.sort();

    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let text = read_file(&path)?;
        let source = path.display().to_string();
        debug!(source = %source, chars = text.len(), "Read text file");

        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), Value::String(source.clone()));
        documents.push(Document::new(source, text, metadata));
    }

    info!(dir = %dir.display(), files = documents.len(), "Read text directory");
    Ok(documents)
}
