use picto_factory_sdk::{StepKind, StepStatus};
use thiserror::Error;

/// Errors raised by the pipeline core.
///
/// Every variant is row+step scoped and user-recoverable; there is no
/// fatal error class in this crate.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("illegal {step} transition: step is {from:?}")]
    InvalidTransition { step: StepKind, from: StepStatus },

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("missing dependency: {0}")]
    MissingDependency(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("step cancelled")]
    Cancelled,

    #[error("row '{0}' not found")]
    RowNotFound(String),
}
