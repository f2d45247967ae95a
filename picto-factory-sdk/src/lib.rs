//! Shared contract for the picto-factory pipeline
//!
//! This crate holds everything the engine and its consumers must agree on:
//! the step/status enums, the structured log events emitted while a
//! pipeline runs, and the typed contract of the external generation
//! service (NLU, visual blueprint, SVG).

use serde::{Deserialize, Serialize};
use thiserror::Error;

// Re-export async trait for convenience
pub use async_trait::async_trait;

/// The three pipeline steps, in dependency order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Nlu,
    Visual,
    Svg,
}

impl StepKind {
    /// All steps in cascade order
    pub const ALL: [StepKind; 3] = [StepKind::Nlu, StepKind::Visual, StepKind::Svg];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Nlu => "nlu",
            StepKind::Visual => "visual",
            StepKind::Svg => "svg",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nlu" => Ok(StepKind::Nlu),
            "visual" => Ok(StepKind::Visual),
            "svg" => Ok(StepKind::Svg),
            other => Err(format!("unknown step '{}'", other)),
        }
    }
}

/// Status of one pipeline step for one row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Never run, or result cleared
    #[default]
    Idle,
    /// Currently executing; at most one in-flight run per (row, step)
    Processing,
    /// Last run succeeded and no upstream input changed since
    Completed,
    /// Last run failed; any previous successful output is preserved
    Error,
    /// Was completed, but an upstream field was edited afterwards
    Outdated,
}

/// Legacy overall row flag, mirroring the svg step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    #[default]
    Idle,
    Processing,
    Completed,
    Error,
}

// ============================================================================
// Generation service contract
// ============================================================================

/// Speech-act level annotation of an utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NluMetadata {
    pub speech_act: String,
    pub intent: String,
}

/// One semantic frame with its role bindings
///
/// `roles` stays a raw JSON value: the model emits both object-keyed and
/// array-of-role shapes depending on the utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NluFrame {
    pub frame_name: String,
    pub lexical_unit: String,
    pub roles: serde_json::Value,
}

/// Drawing hints the semanticist attaches for the visual architect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NluVisualGuidelines {
    pub focus_actor: String,
    pub action_core: String,
    pub object_core: String,
    pub context: String,
    pub temporal: String,
}

/// Structured semantic annotation of one utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NluData {
    pub utterance: String,
    pub lang: String,
    pub metadata: NluMetadata,
    #[serde(default)]
    pub frames: Vec<NluFrame>,
    pub visual_guidelines: NluVisualGuidelines,
    /// Optional enrichments some model revisions include
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nsm_explications: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_form: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pragmatics: Option<serde_json::Value>,
}

/// Output of the visual-blueprint step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualBlueprint {
    /// Comma-separated hierarchical SVG group ids
    pub visual_blocks: String,
    /// Free-text design strategy for the SVG engineer
    pub prompt: String,
}

/// Failures of the external generation service
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("missing GEMINI_API_KEY (set it in the environment or a .env file)")]
    MissingApiKey,
    #[error("generation request failed: {0}")]
    Http(String),
    #[error("generation API returned status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("model returned unusable output: {0}")]
    MalformedResponse(String),
}

/// Result type for generation calls
pub type GenerationResult<T> = Result<T, GenerationError>;

/// The external generation backend, one operation per pipeline step
///
/// All three calls are asynchronous and fallible; none of them is
/// abortable mid-flight, which is why cancellation in the engine is a
/// post-await checkpoint rather than a request abort.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Produce a structured semantic annotation for one utterance
    async fn generate_nlu(&self, utterance: &str) -> GenerationResult<NluData>;

    /// Produce visual blocks and a drawing prompt from an annotation
    async fn generate_visual_blueprint(
        &self,
        nlu: &NluData,
        lang: &str,
    ) -> GenerationResult<VisualBlueprint>;

    /// Produce the final pictogram markup
    ///
    /// Returns raw markup expected to contain a single root element;
    /// callers should defensively extract the root element from any
    /// surrounding noise in the response.
    async fn generate_svg(
        &self,
        visual_blocks: &str,
        prompt: &str,
        utterance: &str,
        canvas_size: u32,
    ) -> GenerationResult<String>;
}

// ============================================================================
// Structured log events
// ============================================================================

/// Structured logging events emitted by the pipeline engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineLog {
    /// A step began executing for one row
    StepStarted { row_id: String, step: StepKind },
    /// A step finished successfully
    StepCompleted {
        row_id: String,
        step: StepKind,
        duration_seconds: f64,
    },
    /// A step failed
    StepFailed {
        row_id: String,
        step: StepKind,
        error: String,
    },
    /// A step was cancelled after its external call returned
    StepCancelled { row_id: String, step: StepKind },
    /// The visual step repaired a missing or unusable NLU inline
    NluRepaired { row_id: String, reason: String },
    /// A completed downstream step went stale after an upstream edit
    DownstreamInvalidated { row_id: String, step: StepKind },
    /// A dataset import finished
    DatasetImported { count: usize },
    /// A dataset export finished
    DatasetExported { count: usize, path: String },
    /// A batch run over pending rows started
    BatchStarted { total: usize, batch_size: usize },
    /// A batch run was stopped by user request
    BatchStopped { completed: usize },
    /// A batch run finished
    BatchCompleted { completed: usize, failed: usize },
    /// The whole store was persisted
    StateSaved { rows: usize },
}

impl PipelineLog {
    /// Emit this log event to stderr for host-UI parsing
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            use std::io::Write;
            eprintln!("__PICTO_EVENT__:{}", json);
            // Force flush stderr in async/concurrent contexts
            let _ = std::io::stderr().flush();
        }
    }
}

/// Helper macros for pipeline logging
#[macro_export]
macro_rules! log_step_start {
    ($row_id:expr, $step:expr) => {
        $crate::PipelineLog::StepStarted {
            row_id: $row_id.to_string(),
            step: $step,
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_step_complete {
    ($row_id:expr, $step:expr, $duration:expr) => {
        $crate::PipelineLog::StepCompleted {
            row_id: $row_id.to_string(),
            step: $step,
            duration_seconds: $duration,
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_step_failed {
    ($row_id:expr, $step:expr, $error:expr) => {
        $crate::PipelineLog::StepFailed {
            row_id: $row_id.to_string(),
            step: $step,
            error: $error.to_string(),
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_step_cancelled {
    ($row_id:expr, $step:expr) => {
        $crate::PipelineLog::StepCancelled {
            row_id: $row_id.to_string(),
            step: $step,
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_nlu_repaired {
    ($row_id:expr, $reason:expr) => {
        $crate::PipelineLog::NluRepaired {
            row_id: $row_id.to_string(),
            reason: $reason.to_string(),
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_invalidated {
    ($row_id:expr, $step:expr) => {
        $crate::PipelineLog::DownstreamInvalidated {
            row_id: $row_id.to_string(),
            step: $step,
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_imported {
    ($count:expr) => {
        $crate::PipelineLog::DatasetImported { count: $count }.emit();
    };
}

#[macro_export]
macro_rules! log_exported {
    ($count:expr, $path:expr) => {
        $crate::PipelineLog::DatasetExported {
            count: $count,
            path: $path.to_string(),
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_batch_start {
    ($total:expr, $batch_size:expr) => {
        $crate::PipelineLog::BatchStarted {
            total: $total,
            batch_size: $batch_size,
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_batch_stopped {
    ($completed:expr) => {
        $crate::PipelineLog::BatchStopped {
            completed: $completed,
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_batch_complete {
    ($completed:expr, $failed:expr) => {
        $crate::PipelineLog::BatchCompleted {
            completed: $completed,
            failed: $failed,
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_state_saved {
    ($rows:expr) => {
        $crate::PipelineLog::StateSaved { rows: $rows }.emit();
    };
}

// ============================================================================
// Console logging macros
// ============================================================================
// Colored console output for human-readable progress, complementing the
// structured PipelineLog events parsed by a host UI.

/// Logs an informational message.
#[macro_export]
macro_rules! log_info {
    ($message:expr) => {
        println!("\x1b[36mℹ {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        println!("\x1b[36mℹ {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

/// Logs a warning message.
#[macro_export]
macro_rules! log_warning {
    ($message:expr) => {
        println!("\x1b[33m⚠ Warning: {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        println!("\x1b[33m⚠ Warning: {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

/// Logs a successfully saved file.
#[macro_export]
macro_rules! log_file_saved {
    ($path:expr) => {
        println!("\x1b[32m✓ Saved: {}\x1b[0m", $path);
    };
}

/// Logs progress of a batch run.
#[macro_export]
macro_rules! log_progress {
    ($current:expr, $total:expr, $item_type:expr) => {
        println!(
            "\x1b[36mProgress: {}/{} {}\x1b[0m",
            $current, $total, $item_type
        );
    };
}
