//! Row collection: CRUD, bulk import, fuzzy search, snapshotting
//!
//! The store is the only holder of rows. Mutations substitute whole row
//! values produced by the state machine into their slot; nothing reaches
//! into a stored row to flip a field in place.

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use picto_factory_sdk::{RowStatus, StepStatus};
use serde_json::{Map, Value};

use crate::error::PipelineError;
use crate::io::ImportRecord;
use crate::pipeline::row::{EditableField, NluField, Row};
use crate::pipeline::state;

/// Outcome of a bulk import.
#[derive(Debug, Clone)]
pub struct ImportResult {
    pub count: usize,
    pub rows: Vec<Row>,
}

/// Ordered, identity-keyed collection of rows. Insertion order is the
/// display and export order.
#[derive(Debug, Clone, Default)]
pub struct PipelineStore {
    rows: Vec<Row>,
}

impl PipelineStore {
    pub fn new() -> Self {
        PipelineStore::default()
    }

    pub fn from_rows(rows: Vec<Row>) -> Self {
        PipelineStore { rows }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Row> {
        self.rows.iter().find(|row| row.id == id)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.rows.iter().position(|row| row.id == id)
    }

    /// Substitute a fresh row value into its slot. Returns false when no
    /// row with that identity exists (e.g. deleted mid-flight).
    pub fn replace(&mut self, row: Row) -> bool {
        match self.position(&row.id) {
            Some(index) => {
                self.rows[index] = row;
                true
            }
            None => false,
        }
    }

    /// Append a fresh row seeded with an utterance.
    pub fn new_row(&mut self, utterance: &str) -> Row {
        let row = Row::new(utterance);
        self.rows.push(row.clone());
        row
    }

    /// Map parsed import records into rows, seeding step statuses from
    /// the fields present in the source.
    ///
    /// A structured NLU seeds `completed`; malformed NLU text is kept
    /// verbatim with the step left `idle`, so the visual step's repair
    /// path can regenerate it later. Records without an utterance are
    /// skipped rather than aborting the batch. Records whose id already
    /// exists replace that row; everything else appends.
    pub fn import_rows(&mut self, records: Vec<ImportRecord>) -> ImportResult {
        let mut imported = Vec::new();
        for record in records {
            if record.utterance.trim().is_empty() {
                continue;
            }
            let mut row = match &record.id {
                Some(id) if !id.is_empty() => Row::with_id(id.clone(), record.utterance),
                _ => Row::new(record.utterance),
            };
            row.nlu = record.nlu;
            row.visual_blocks = record.visual_blocks;
            row.prompt = record.prompt;
            row.svg = record.svg;

            if matches!(row.nlu, Some(NluField::Structured(_))) {
                row.nlu_status = StepStatus::Completed;
            }
            if row.visual_blocks.is_some() {
                row.visual_status = StepStatus::Completed;
            }
            if row.svg.is_some() {
                row.svg_status = StepStatus::Completed;
                row.status = RowStatus::Completed;
            }

            if !self.replace(row.clone()) {
                self.rows.push(row.clone());
            }
            imported.push(row);
        }
        ImportResult {
            count: imported.len(),
            rows: imported,
        }
    }

    /// Apply a partial update, one field at a time, through the state
    /// machine's edit rule. Unknown field names reject the whole update.
    pub fn update_row(
        &mut self,
        id: &str,
        partial: &Map<String, Value>,
    ) -> Result<Row, PipelineError> {
        let index = self
            .position(id)
            .ok_or_else(|| PipelineError::RowNotFound(id.to_string()))?;
        let mut row = self.rows[index].clone();
        for (name, value) in partial {
            let field = EditableField::from_name(name).ok_or_else(|| {
                PipelineError::Validation(format!("unknown field '{}'", name))
            })?;
            row = state::apply_edit(&row, field, value.clone())?;
        }
        self.rows[index] = row.clone();
        Ok(row)
    }

    /// Remove a row by identity. Idempotent: a missing id is a no-op.
    pub fn delete_row(&mut self, id: &str) -> bool {
        match self.position(id) {
            Some(index) => {
                self.rows.remove(index);
                true
            }
            None => false,
        }
    }

    /// Serialize the whole collection to JSON text.
    pub fn snapshot(&self) -> Result<String, PipelineError> {
        serde_json::to_string(&self.rows)
            .map_err(|e| PipelineError::Validation(format!("snapshot failed: {}", e)))
    }

    /// Replace the whole collection from a snapshot.
    pub fn restore(&mut self, snapshot: &str) -> Result<usize, PipelineError> {
        let rows: Vec<Row> = serde_json::from_str(snapshot)
            .map_err(|e| PipelineError::Validation(format!("snapshot restore failed: {}", e)))?;
        self.rows = rows;
        Ok(self.rows.len())
    }

    /// Fuzzy-match rows by utterance, best match first.
    pub fn search(&self, query: &str) -> Vec<&Row> {
        let matcher = SkimMatcherV2::default();
        let mut scored: Vec<(i64, &Row)> = self
            .rows
            .iter()
            .filter_map(|row| {
                matcher
                    .fuzzy_match(&row.utterance, query)
                    .map(|score| (score, row))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().map(|(_, row)| row).collect()
    }

    /// Search-miss promotion: return the best match for a query, or
    /// create a new row seeded with the query text when nothing matches.
    pub fn find_or_create(&mut self, query: &str) -> (Row, bool) {
        let found = self.search(query).first().map(|row| (*row).clone());
        match found {
            Some(row) => (row, false),
            None => (self.new_row(query), true),
        }
    }
}
