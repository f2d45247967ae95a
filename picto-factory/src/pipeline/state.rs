//! Row state machine: the single authority for row content and status
//!
//! Every mutation of a row's fields or step statuses goes through the
//! operations here, which take the current row by reference and return a
//! fresh value. The store substitutes the returned row into its slot, so
//! concurrent runs on different rows interleave safely without locks
//! around row internals.
//!
//! Per step, per row:
//!
//! ```text
//! idle ----begin----> processing
//! outdated --begin--> processing
//! error ----begin---> processing
//! completed --begin-> processing            (user-initiated rerun)
//! processing --complete--> completed
//! processing --fail------> error
//! processing --cancel----> idle
//! completed --(upstream edit)--> outdated
//! ```

use picto_factory_sdk::{log_invalidated, RowStatus, StepKind, StepStatus};
use serde_json::Value;

use crate::error::PipelineError;
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::executor::StepFields;
use crate::pipeline::row::{EditableField, NluField, Row};

/// Statuses a step may move to through an explicit step operation.
/// `Completed -> Outdated` happens only through upstream edits in
/// [`apply_edit`], never through a step operation.
pub fn allowed_transitions(from: StepStatus) -> &'static [StepStatus] {
    use StepStatus::*;
    match from {
        Idle | Outdated | Error | Completed => &[Processing],
        Processing => &[Completed, Error, Idle],
    }
}

fn check_transition(
    row: &Row,
    step: StepKind,
    to: StepStatus,
) -> Result<StepStatus, PipelineError> {
    let from = row.step_status(step);
    if allowed_transitions(from).contains(&to) {
        Ok(from)
    } else {
        Err(PipelineError::InvalidTransition { step, from })
    }
}

/// Apply a direct user edit to one field, invalidating completed
/// downstream steps whose input just changed.
///
/// The dependency table: `nlu` feeds the visual step, and
/// `visualBlocks`+`prompt` feed the svg step. Invalidation is write-time
/// against the currently stored status; a step that is `processing` while
/// its input changes is not touched here.
pub fn apply_edit(row: &Row, field: EditableField, value: Value) -> Result<Row, PipelineError> {
    let mut next = row.clone();
    match field {
        EditableField::Utterance => {
            next.utterance = require_string(field, value)?;
        }
        EditableField::Nlu => {
            next.nlu = nlu_from_value(value)?;
            invalidate(&mut next, StepKind::Visual);
            invalidate(&mut next, StepKind::Svg);
        }
        EditableField::VisualBlocks => {
            next.visual_blocks = optional_string(field, value)?;
            invalidate(&mut next, StepKind::Svg);
        }
        EditableField::Prompt => {
            next.prompt = optional_string(field, value)?;
            invalidate(&mut next, StepKind::Svg);
        }
        EditableField::Svg => {
            // Terminal field: no downstream, and editing it never flips
            // the overall status on its own.
            next.svg = optional_string(field, value)?;
        }
    }
    Ok(next)
}

fn invalidate(row: &mut Row, step: StepKind) {
    if row.step_status(step) == StepStatus::Completed {
        row.set_step_status(step, StepStatus::Outdated);
        log_invalidated!(row.id, step);
    }
}

/// Move a step into `processing`. Fails with `InvalidTransition` when the
/// step is already in flight; callers must not invoke a step twice
/// concurrently for the same row.
pub fn begin_step(row: &Row, step: StepKind) -> Result<Row, PipelineError> {
    check_transition(row, step, StepStatus::Processing)?;
    let mut next = row.clone();
    next.set_step_status(step, StepStatus::Processing);
    next.error = None;
    if step == StepKind::Svg {
        next.status = RowStatus::Processing;
    }
    Ok(next)
}

/// Merge a successful step result and mark the step `completed`.
///
/// When the run's cancellation token was flagged before this call, the
/// result is discarded and the call behaves as [`cancel_step`] instead.
pub fn complete_step(
    row: &Row,
    step: StepKind,
    fields: StepFields,
    duration_seconds: f64,
    token: &CancelToken,
) -> Result<Row, PipelineError> {
    if token.take() {
        return cancel_step(row, step);
    }
    check_transition(row, step, StepStatus::Completed)?;
    let mut next = row.clone();
    match fields {
        StepFields::Nlu(nlu) => {
            next.nlu = Some(nlu);
        }
        StepFields::Visual {
            visual_blocks,
            prompt,
            repaired_nlu,
        } => {
            if let Some(nlu) = repaired_nlu {
                next.nlu = Some(NluField::Structured(nlu));
                next.nlu_status = StepStatus::Completed;
            }
            next.visual_blocks = Some(visual_blocks);
            next.prompt = Some(prompt);
        }
        StepFields::Svg(svg) => {
            next.svg = Some(svg);
        }
    }
    next.set_step_status(step, StepStatus::Completed);
    next.set_step_duration(step, duration_seconds);
    if step == StepKind::Svg {
        next.status = RowStatus::Completed;
    }
    Ok(next)
}

/// Mark a step failed, keeping any prior successful output in place.
pub fn fail_step(row: &Row, step: StepKind, message: &str) -> Result<Row, PipelineError> {
    check_transition(row, step, StepStatus::Error)?;
    let mut next = row.clone();
    next.set_step_status(step, StepStatus::Error);
    next.error = Some(message.to_string());
    if step == StepKind::Svg {
        next.status = RowStatus::Error;
    }
    Ok(next)
}

/// Return a cancelled step to its pre-run `idle` state, merging nothing.
pub fn cancel_step(row: &Row, step: StepKind) -> Result<Row, PipelineError> {
    check_transition(row, step, StepStatus::Idle)?;
    let mut next = row.clone();
    next.set_step_status(step, StepStatus::Idle);
    if step == StepKind::Svg {
        next.status = RowStatus::Idle;
    }
    Ok(next)
}

fn require_string(field: EditableField, value: Value) -> Result<String, PipelineError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(PipelineError::Validation(format!(
            "field '{}' expects a string, got {}",
            field.as_str(),
            other
        ))),
    }
}

fn optional_string(field: EditableField, value: Value) -> Result<Option<String>, PipelineError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.is_empty() => Ok(None),
        Value::String(s) => Ok(Some(s)),
        other => Err(PipelineError::Validation(format!(
            "field '{}' expects a string or null, got {}",
            field.as_str(),
            other
        ))),
    }
}

fn nlu_from_value(value: Value) -> Result<Option<NluField>, PipelineError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.is_empty() => Ok(None),
        Value::String(s) => Ok(Some(NluField::parse(&s))),
        Value::Object(_) => {
            let raw = value.to_string();
            match serde_json::from_value(value) {
                Ok(data) => Ok(Some(NluField::Structured(data))),
                Err(_) => Ok(Some(NluField::Unparsed(raw))),
            }
        }
        other => Err(PipelineError::Validation(format!(
            "field 'nlu' expects a string, object or null, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::sample_nlu;
    use serde_json::json;

    fn completed_row() -> Row {
        let mut row = Row::with_id("1", "Quiero beber agua");
        row.nlu = Some(NluField::Structured(sample_nlu("Quiero beber agua")));
        row.nlu_status = StepStatus::Completed;
        row.visual_blocks = Some("actor,action,object".to_string());
        row.prompt = Some("centered actor drinking".to_string());
        row.visual_status = StepStatus::Completed;
        row.svg = Some("<svg/>".to_string());
        row.svg_status = StepStatus::Completed;
        row.status = RowStatus::Completed;
        row
    }

    #[test]
    fn editing_nlu_invalidates_completed_downstream_steps() {
        let row = completed_row();
        let edited = apply_edit(&row, EditableField::Nlu, json!("replacement text")).unwrap();

        assert_eq!(edited.visual_status, StepStatus::Outdated);
        assert_eq!(edited.svg_status, StepStatus::Outdated);
        // Output is retained for inspection, only the statuses go stale.
        assert!(edited.visual_blocks.is_some());
        assert!(edited.svg.is_some());
    }

    #[test]
    fn editing_blueprint_fields_invalidates_only_svg() {
        let row = completed_row();
        let edited = apply_edit(&row, EditableField::Prompt, json!("new strategy")).unwrap();
        assert_eq!(edited.nlu_status, StepStatus::Completed);
        assert_eq!(edited.visual_status, StepStatus::Completed);
        assert_eq!(edited.svg_status, StepStatus::Outdated);

        let edited = apply_edit(&row, EditableField::VisualBlocks, json!("a,b")).unwrap();
        assert_eq!(edited.svg_status, StepStatus::Outdated);
    }

    #[test]
    fn editing_svg_changes_no_statuses() {
        let row = completed_row();
        let edited = apply_edit(&row, EditableField::Svg, json!("<svg>edited</svg>")).unwrap();
        assert_eq!(edited.nlu_status, StepStatus::Completed);
        assert_eq!(edited.visual_status, StepStatus::Completed);
        assert_eq!(edited.svg_status, StepStatus::Completed);
        assert_eq!(edited.status, RowStatus::Completed);
    }

    #[test]
    fn invalidation_skips_steps_that_never_ran() {
        // visualStatus was idle (never run), so editing nlu leaves it idle.
        let mut row = Row::with_id("1", "Quiero beber agua");
        row.nlu = Some(NluField::Structured(sample_nlu("Quiero beber agua")));
        row.nlu_status = StepStatus::Completed;

        let edited = apply_edit(
            &row,
            EditableField::Nlu,
            serde_json::to_value(sample_nlu("otra cosa")).unwrap(),
        )
        .unwrap();
        assert_eq!(edited.visual_status, StepStatus::Idle);
        assert_eq!(edited.svg_status, StepStatus::Idle);
    }

    #[test]
    fn invalidation_does_not_touch_processing_steps() {
        let mut row = completed_row();
        row.svg_status = StepStatus::Processing;

        let edited = apply_edit(&row, EditableField::Nlu, json!("changed")).unwrap();
        assert_eq!(edited.visual_status, StepStatus::Outdated);
        // Write-time rule: a step already in flight is left alone.
        assert_eq!(edited.svg_status, StepStatus::Processing);
    }

    #[test]
    fn begin_step_twice_is_an_invalid_transition() {
        let row = Row::with_id("1", "hola");
        let begun = begin_step(&row, StepKind::Nlu).unwrap();
        assert_eq!(begun.nlu_status, StepStatus::Processing);

        let err = begin_step(&begun, StepKind::Nlu).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidTransition {
                step: StepKind::Nlu,
                from: StepStatus::Processing
            }
        ));
    }

    #[test]
    fn begin_step_reenters_from_every_resting_state() {
        for status in [
            StepStatus::Idle,
            StepStatus::Completed,
            StepStatus::Error,
            StepStatus::Outdated,
        ] {
            let mut row = Row::with_id("1", "hola");
            row.visual_status = status;
            let begun = begin_step(&row, StepKind::Visual).unwrap();
            assert_eq!(begun.visual_status, StepStatus::Processing);
        }
    }

    #[test]
    fn begin_step_clears_previous_error_annotation() {
        let mut row = Row::with_id("1", "hola");
        row.nlu_status = StepStatus::Error;
        row.error = Some("previous failure".to_string());

        let begun = begin_step(&row, StepKind::Nlu).unwrap();
        assert!(begun.error.is_none());
    }

    #[test]
    fn complete_step_merges_fields_and_duration() {
        let row = Row::with_id("1", "Quiero beber agua");
        let begun = begin_step(&row, StepKind::Nlu).unwrap();
        let token = CancelToken::new();

        let done = complete_step(
            &begun,
            StepKind::Nlu,
            StepFields::Nlu(NluField::Structured(sample_nlu("Quiero beber agua"))),
            1.2,
            &token,
        )
        .unwrap();

        assert_eq!(done.nlu_status, StepStatus::Completed);
        assert_eq!(done.nlu_duration, Some(1.2));
        assert!(done.nlu.is_some());
        // The legacy flag only mirrors the svg step.
        assert_eq!(done.status, RowStatus::Idle);
    }

    #[test]
    fn completing_svg_sets_overall_status() {
        let mut row = completed_row();
        row.svg_status = StepStatus::Outdated;
        row.status = RowStatus::Idle;
        let begun = begin_step(&row, StepKind::Svg).unwrap();
        assert_eq!(begun.status, RowStatus::Processing);

        let done = complete_step(
            &begun,
            StepKind::Svg,
            StepFields::Svg("<svg/>".to_string()),
            2.0,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(done.svg_status, StepStatus::Completed);
        assert_eq!(done.status, RowStatus::Completed);
    }

    #[test]
    fn complete_step_with_flagged_token_behaves_as_cancel() {
        let row = Row::with_id("1", "hola");
        let begun = begin_step(&row, StepKind::Nlu).unwrap();
        let token = CancelToken::new();
        token.request();

        let done = complete_step(
            &begun,
            StepKind::Nlu,
            StepFields::Nlu(NluField::Unparsed("late result".to_string())),
            0.5,
            &token,
        )
        .unwrap();

        assert_eq!(done.nlu_status, StepStatus::Idle);
        assert!(done.nlu.is_none());
        assert!(done.nlu_duration.is_none());
        assert!(!token.is_cancelled());
    }

    #[test]
    fn fail_step_keeps_prior_output() {
        let mut row = completed_row();
        row.nlu_status = StepStatus::Outdated;
        let begun = begin_step(&row, StepKind::Nlu).unwrap();

        let failed = fail_step(&begun, StepKind::Nlu, "model returned garbage").unwrap();
        assert_eq!(failed.nlu_status, StepStatus::Error);
        assert_eq!(failed.error.as_deref(), Some("model returned garbage"));
        // Previous successful output is left untouched.
        assert!(failed.nlu.is_some());
    }

    #[test]
    fn cancel_step_restores_idle() {
        let row = Row::with_id("1", "hola");
        let begun = begin_step(&row, StepKind::Svg).unwrap();
        let cancelled = cancel_step(&begun, StepKind::Svg).unwrap();
        assert_eq!(cancelled.svg_status, StepStatus::Idle);
        assert_eq!(cancelled.status, RowStatus::Idle);
    }

    #[test]
    fn resolution_ops_require_processing() {
        let row = Row::with_id("1", "hola");
        assert!(fail_step(&row, StepKind::Nlu, "nope").is_err());
        assert!(cancel_step(&row, StepKind::Nlu).is_err());
        assert!(complete_step(
            &row,
            StepKind::Nlu,
            StepFields::Nlu(NluField::Unparsed("x".to_string())),
            0.1,
            &CancelToken::new(),
        )
        .is_err());
    }

    #[test]
    fn update_rejects_wrong_value_types() {
        let row = Row::with_id("1", "hola");
        assert!(apply_edit(&row, EditableField::Utterance, json!(42)).is_err());
        assert!(apply_edit(&row, EditableField::Prompt, json!([1, 2])).is_err());
        assert!(apply_edit(&row, EditableField::Nlu, json!(true)).is_err());
    }

    #[test]
    fn empty_string_edit_clears_optional_fields() {
        let row = completed_row();
        let edited = apply_edit(&row, EditableField::VisualBlocks, json!("")).unwrap();
        assert!(edited.visual_blocks.is_none());
    }
}
