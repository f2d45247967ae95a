//! Row data model: the unit of pipeline work

use picto_factory_sdk::{NluData, RowStatus, StepKind, StepStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The NLU annotation of a row.
///
/// Upstream data is not always well formed: an imported NLU cell may hold
/// structured JSON or an arbitrary string. Structured parsing is attempted
/// first and the raw text is preserved on failure, so a later consumer can
/// detect and repair it instead of the import aborting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NluField {
    Structured(NluData),
    Unparsed(String),
}

impl NluField {
    /// Attempt a structured parse, falling back to the raw text.
    pub fn parse(raw: &str) -> NluField {
        match serde_json::from_str::<NluData>(raw) {
            Ok(data) => NluField::Structured(data),
            Err(_) => NluField::Unparsed(raw.to_string()),
        }
    }

    /// Whether this annotation can feed the visual step: structured, with
    /// a non-empty frame list.
    pub fn is_usable(&self) -> bool {
        matches!(self, NluField::Structured(data) if !data.frames.is_empty())
    }

    pub fn as_structured(&self) -> Option<&NluData> {
        match self {
            NluField::Structured(data) => Some(data),
            NluField::Unparsed(_) => None,
        }
    }

    /// JSON text form, used for tabular export cells.
    pub fn to_json_text(&self) -> String {
        match self {
            NluField::Structured(data) => serde_json::to_string(data).unwrap_or_default(),
            NluField::Unparsed(raw) => raw.clone(),
        }
    }
}

/// One row of the pipeline: an utterance plus the outputs and statuses of
/// the three generation steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    /// Opaque unique identifier, assigned at creation, immutable.
    pub id: String,
    /// Source text; user-editable at any time.
    pub utterance: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nlu: Option<NluField>,
    /// Comma-separated layout element identifiers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual_blocks: Option<String>,
    /// Free-text drawing/layout strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Final rendered markup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svg: Option<String>,
    #[serde(default)]
    pub nlu_status: StepStatus,
    #[serde(default)]
    pub visual_status: StepStatus,
    #[serde(default)]
    pub svg_status: StepStatus,
    /// Legacy overall flag mirroring the svg step.
    #[serde(default)]
    pub status: RowStatus,
    /// Elapsed seconds of the most recent run of each step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nlu_duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual_duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svg_duration: Option<f64>,
    /// Message of the most recent failed step, cleared on the next run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Row {
    /// Create a fresh row seeded with an utterance.
    pub fn new(utterance: impl Into<String>) -> Self {
        Row::with_id(Uuid::new_v4().to_string(), utterance)
    }

    /// Create a row with an externally supplied identity (imports).
    pub fn with_id(id: impl Into<String>, utterance: impl Into<String>) -> Self {
        Row {
            id: id.into(),
            utterance: utterance.into(),
            nlu: None,
            visual_blocks: None,
            prompt: None,
            svg: None,
            nlu_status: StepStatus::Idle,
            visual_status: StepStatus::Idle,
            svg_status: StepStatus::Idle,
            status: RowStatus::Idle,
            nlu_duration: None,
            visual_duration: None,
            svg_duration: None,
            error: None,
        }
    }

    pub fn step_status(&self, step: StepKind) -> StepStatus {
        match step {
            StepKind::Nlu => self.nlu_status,
            StepKind::Visual => self.visual_status,
            StepKind::Svg => self.svg_status,
        }
    }

    pub(crate) fn set_step_status(&mut self, step: StepKind, status: StepStatus) {
        match step {
            StepKind::Nlu => self.nlu_status = status,
            StepKind::Visual => self.visual_status = status,
            StepKind::Svg => self.svg_status = status,
        }
    }

    pub fn step_duration(&self, step: StepKind) -> Option<f64> {
        match step {
            StepKind::Nlu => self.nlu_duration,
            StepKind::Visual => self.visual_duration,
            StepKind::Svg => self.svg_duration,
        }
    }

    pub(crate) fn set_step_duration(&mut self, step: StepKind, seconds: f64) {
        match step {
            StepKind::Nlu => self.nlu_duration = Some(seconds),
            StepKind::Visual => self.visual_duration = Some(seconds),
            StepKind::Svg => self.svg_duration = Some(seconds),
        }
    }

    /// Whether any step is currently executing.
    pub fn is_processing(&self) -> bool {
        StepKind::ALL
            .iter()
            .any(|step| self.step_status(*step) == StepStatus::Processing)
    }
}

/// Row fields a user may edit directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditableField {
    Utterance,
    Nlu,
    VisualBlocks,
    Prompt,
    Svg,
}

impl EditableField {
    /// Resolve a field name from an update-by-path request. Unknown names
    /// yield `None` and are rejected by the store as a validation error.
    pub fn from_name(name: &str) -> Option<EditableField> {
        match name {
            "utterance" => Some(EditableField::Utterance),
            "nlu" => Some(EditableField::Nlu),
            "visualBlocks" | "visual_blocks" => Some(EditableField::VisualBlocks),
            "prompt" => Some(EditableField::Prompt),
            "svg" => Some(EditableField::Svg),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EditableField::Utterance => "utterance",
            EditableField::Nlu => "nlu",
            EditableField::VisualBlocks => "visualBlocks",
            EditableField::Prompt => "prompt",
            EditableField::Svg => "svg",
        }
    }
}
