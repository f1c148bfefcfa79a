//! Source documents

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Column name → value as read from the source
///
/// Values keep their source type here; the index writer coerces them to
/// strings on the way into the store.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Raw source text plus the metadata of the record it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable reference used by chunks (row number or file path)
    pub id: String,

    /// Text that gets chunked and embedded
    pub text: String,

    /// Every column of the source record
    pub metadata: Metadata,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata,
        }
    }
}
