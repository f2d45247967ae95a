//! Dataset interchange: delimited tabular text and JSON arrays
//!
//! Both codecs produce [`ImportRecord`]s, which the store turns into rows
//! with inferred step statuses. A sentinel placeholder marks cells that
//! are intentionally empty; it is normalized to absent here, never stored
//! as the literal string.

pub mod json;
pub mod tabular;

use crate::error::PipelineError;
use crate::pipeline::row::NluField;

/// Sentinel token denoting an intentionally empty cell.
pub const EMPTY_PLACEHOLDER: &str = "{empty}";

/// A parsed import record: fields normalized, statuses not yet inferred.
#[derive(Debug, Clone, Default)]
pub struct ImportRecord {
    pub id: Option<String>,
    pub utterance: String,
    pub nlu: Option<NluField>,
    pub visual_blocks: Option<String>,
    pub prompt: Option<String>,
    pub svg: Option<String>,
}

/// Supported dataset formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetFormat {
    Tabular,
    Json,
}

/// Guess the format of an input text: a JSON array reads as JSON,
/// anything else as delimited text.
pub fn detect_format(text: &str) -> DatasetFormat {
    if text.trim_start().starts_with('[') {
        DatasetFormat::Json
    } else {
        DatasetFormat::Tabular
    }
}

/// Parse an input text in whichever format it carries.
pub fn import_text(text: &str) -> Result<Vec<ImportRecord>, PipelineError> {
    match detect_format(text) {
        DatasetFormat::Json => json::import(text),
        DatasetFormat::Tabular => Ok(tabular::import(text)),
    }
}

/// Normalize a raw cell: trim whitespace, drop empties and the
/// placeholder sentinel.
pub(crate) fn clean_cell(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == EMPTY_PLACEHOLDER {
        None
    } else {
        Some(trimmed.to_string())
    }
}
