//! JSON-array dataset codec

use serde_json::Value;

use super::{clean_cell, ImportRecord};
use crate::error::PipelineError;
use crate::pipeline::row::{NluField, Row};
use picto_factory_sdk::NluData;

/// Import a JSON array of row-shaped objects.
///
/// The NLU field is tolerated in both shapes: a JSON object parses
/// structurally, a string goes through the parse-or-preserve fallback.
/// Entries that are not objects are skipped; only an unreadable document
/// rejects the import as a whole.
pub fn import(text: &str) -> Result<Vec<ImportRecord>, PipelineError> {
    let values: Vec<Value> = serde_json::from_str(text)
        .map_err(|e| PipelineError::Validation(format!("unreadable JSON dataset: {}", e)))?;
    Ok(values.into_iter().filter_map(record_from_value).collect())
}

fn record_from_value(value: Value) -> Option<ImportRecord> {
    let object = value.as_object()?;

    let text_field = |names: &[&str]| {
        names
            .iter()
            .find_map(|name| object.get(*name))
            .and_then(Value::as_str)
            .and_then(clean_cell)
    };

    let nlu = match object.get("nlu") {
        None | Some(Value::Null) => None,
        Some(Value::String(raw)) => clean_cell(raw).map(|raw| NluField::parse(&raw)),
        Some(other) => match serde_json::from_value::<NluData>(other.clone()) {
            Ok(data) => Some(NluField::Structured(data)),
            Err(_) => Some(NluField::Unparsed(other.to_string())),
        },
    };

    Some(ImportRecord {
        id: id_field(object.get("id")),
        utterance: text_field(&["utterance"]).unwrap_or_default(),
        nlu,
        visual_blocks: text_field(&["visualBlocks", "visual_blocks"]),
        prompt: text_field(&["prompt"]),
        svg: text_field(&["svg"]),
    })
}

// Tabular sources carry numeric ids; tolerate them here too.
fn id_field(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => clean_cell(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Export rows as a pretty-printed JSON array, one object per row.
pub fn export(rows: &[Row]) -> Result<String, PipelineError> {
    serde_json::to_string_pretty(rows)
        .map_err(|e| PipelineError::Validation(format!("JSON export failed: {}", e)))
}
