//! Step executor: drives one pipeline step against the generation service

use std::time::Instant;

use picto_factory_sdk::{
    log_nlu_repaired, GenerationResult, GenerationService, NluData, StepKind,
};

use crate::error::PipelineError;
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::config::GlobalConfig;
use crate::pipeline::row::{NluField, Row};

/// Result fields of a successful step, mapped into row shape.
#[derive(Debug, Clone, PartialEq)]
pub enum StepFields {
    Nlu(NluField),
    Visual {
        visual_blocks: String,
        prompt: String,
        /// Set when the precondition check had to regenerate the NLU
        /// inline before the blueprint call.
        repaired_nlu: Option<NluData>,
    },
    Svg(String),
}

/// Outcome of one step run. Cancellation is a normal outcome, not an
/// error.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Success {
        fields: StepFields,
        duration_seconds: f64,
    },
    Failure(String),
    Cancelled,
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Success { .. })
    }
}

/// Run one step for one row.
///
/// The cancellation token is consulted exactly once, after the external
/// call resolves; the call itself is not abortable, so cancellation only
/// discards the result. The svg step validates its inputs before any
/// external call; the visual step repairs a missing or unusable NLU
/// inline instead of failing.
pub async fn run<S: GenerationService + ?Sized>(
    row: &Row,
    step: StepKind,
    config: &GlobalConfig,
    service: &S,
    token: &CancelToken,
) -> StepOutcome {
    let started = Instant::now();

    let result = match step {
        StepKind::Nlu => service
            .generate_nlu(&row.utterance)
            .await
            .map(|data| StepFields::Nlu(NluField::Structured(data))),
        StepKind::Visual => run_visual(row, config, service).await,
        StepKind::Svg => {
            let (blocks, prompt) = match (
                row.visual_blocks.as_deref().filter(|s| !s.is_empty()),
                row.prompt.as_deref().filter(|s| !s.is_empty()),
            ) {
                (Some(blocks), Some(prompt)) => (blocks, prompt),
                _ => {
                    // Fail fast, no external call made.
                    return StepOutcome::Failure(
                        PipelineError::MissingDependency(
                            "svg step needs both visual blocks and a prompt".to_string(),
                        )
                        .to_string(),
                    );
                }
            };
            service
                .generate_svg(blocks, prompt, &row.utterance, config.canvas_size)
                .await
                .map(StepFields::Svg)
        }
    };

    // Single post-await cancellation checkpoint.
    if token.take() {
        return StepOutcome::Cancelled;
    }

    match result {
        Ok(fields) => StepOutcome::Success {
            fields,
            duration_seconds: started.elapsed().as_secs_f64(),
        },
        Err(err) => StepOutcome::Failure(PipelineError::Generation(err.to_string()).to_string()),
    }
}

async fn run_visual<S: GenerationService + ?Sized>(
    row: &Row,
    config: &GlobalConfig,
    service: &S,
) -> GenerationResult<StepFields> {
    let usable = row
        .nlu
        .as_ref()
        .filter(|field| field.is_usable())
        .and_then(NluField::as_structured);
    let (nlu, repaired) = match usable {
        Some(data) => (data.clone(), None),
        None => {
            // One-time inline repair rather than an error: regenerate the
            // annotation, then proceed with the blueprint.
            let reason = match &row.nlu {
                None => "no NLU annotation",
                Some(NluField::Unparsed(_)) => "NLU annotation is unparsed text",
                Some(NluField::Structured(_)) => "NLU annotation has no frames",
            };
            log_nlu_repaired!(row.id, reason);
            let data = service.generate_nlu(&row.utterance).await?;
            (data.clone(), Some(data))
        }
    };

    let blueprint = service
        .generate_visual_blueprint(&nlu, &config.language)
        .await?;
    Ok(StepFields::Visual {
        visual_blocks: blueprint.visual_blocks,
        prompt: blueprint.prompt,
        repaired_nlu: repaired,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::{sample_nlu, ScriptedService};
    use std::sync::atomic::Ordering;

    fn base_row() -> Row {
        Row::with_id("1", "Quiero beber agua")
    }

    #[tokio::test]
    async fn nlu_step_maps_service_output_into_row_shape() {
        let service = ScriptedService::default();
        let outcome = run(
            &base_row(),
            StepKind::Nlu,
            &GlobalConfig::default(),
            &service,
            &CancelToken::new(),
        )
        .await;

        match outcome {
            StepOutcome::Success {
                fields: StepFields::Nlu(NluField::Structured(data)),
                duration_seconds,
            } => {
                assert_eq!(data.utterance, "Quiero beber agua");
                assert!(duration_seconds >= 0.0);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(service.nlu_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn svg_step_fails_fast_without_inputs() {
        let service = ScriptedService::default();
        let outcome = run(
            &base_row(),
            StepKind::Svg,
            &GlobalConfig::default(),
            &service,
            &CancelToken::new(),
        )
        .await;

        match outcome {
            StepOutcome::Failure(message) => {
                assert!(message.contains("missing dependency"), "{}", message);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        // No external call was made.
        assert_eq!(service.svg_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn visual_step_repairs_missing_nlu_inline() {
        let service = ScriptedService::default();
        let outcome = run(
            &base_row(),
            StepKind::Visual,
            &GlobalConfig::default(),
            &service,
            &CancelToken::new(),
        )
        .await;

        match outcome {
            StepOutcome::Success {
                fields:
                    StepFields::Visual {
                        visual_blocks,
                        repaired_nlu,
                        ..
                    },
                ..
            } => {
                assert!(!visual_blocks.is_empty());
                assert!(repaired_nlu.is_some());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(service.nlu_calls.load(Ordering::SeqCst), 1);
        assert_eq!(service.visual_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn visual_step_skips_repair_for_usable_nlu() {
        let service = ScriptedService::default();
        let mut row = base_row();
        row.nlu = Some(NluField::Structured(sample_nlu(&row.utterance)));

        let outcome = run(
            &row,
            StepKind::Visual,
            &GlobalConfig::default(),
            &service,
            &CancelToken::new(),
        )
        .await;

        assert!(outcome.is_success());
        assert_eq!(service.nlu_calls.load(Ordering::SeqCst), 0);
        match outcome {
            StepOutcome::Success {
                fields: StepFields::Visual { repaired_nlu, .. },
                ..
            } => assert!(repaired_nlu.is_none()),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn visual_step_repairs_unparsed_nlu() {
        let service = ScriptedService::default();
        let mut row = base_row();
        row.nlu = Some(NluField::Unparsed("{broken json".to_string()));

        let outcome = run(
            &row,
            StepKind::Visual,
            &GlobalConfig::default(),
            &service,
            &CancelToken::new(),
        )
        .await;

        assert!(outcome.is_success());
        assert_eq!(service.nlu_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_is_observed_after_the_call_returns() {
        let service = ScriptedService::default();
        let token = CancelToken::new();
        // Requested before the call resolves: the checkpoint after the
        // await discards the result.
        token.request();

        let outcome = run(
            &base_row(),
            StepKind::Nlu,
            &GlobalConfig::default(),
            &service,
            &token,
        )
        .await;

        assert_eq!(outcome, StepOutcome::Cancelled);
        // The external call still ran; only its result was discarded.
        assert_eq!(service.nlu_calls.load(Ordering::SeqCst), 1);
        // The checkpoint clears the flag.
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn service_failure_surfaces_as_failure_outcome() {
        let service = ScriptedService::failing();
        let outcome = run(
            &base_row(),
            StepKind::Nlu,
            &GlobalConfig::default(),
            &service,
            &CancelToken::new(),
        )
        .await;

        match outcome {
            StepOutcome::Failure(message) => assert!(message.contains("scripted failure")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
