//! Per-row pipeline state machine and orchestration engine
//!
//! A row moves through three generation steps (NLU → visual blueprint →
//! SVG), each independently tracked, individually rerunnable, and
//! invalidated when its upstream input is edited. The modules here own
//! all of that: the row model, the status state machine, the per-step
//! executor, the cascade engine, and the row store.

pub mod cancel;
pub mod config;
pub mod engine;
pub mod executor;
pub mod row;
pub mod state;
pub mod store;

pub use cancel::{CancelRegistry, CancelToken};
pub use config::GlobalConfig;
pub use engine::{BatchOptions, BatchReport, PipelineEngine};
pub use executor::{StepFields, StepOutcome};
pub use row::{EditableField, NluField, Row};
pub use store::{ImportResult, PipelineStore};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Notify;

    use picto_factory_sdk::{
        async_trait, GenerationError, GenerationResult, GenerationService, NluData, NluFrame,
        NluMetadata, NluVisualGuidelines, VisualBlueprint,
    };

    pub(crate) fn sample_nlu(utterance: &str) -> NluData {
        NluData {
            utterance: utterance.to_string(),
            lang: "es".to_string(),
            metadata: NluMetadata {
                speech_act: "assertion".to_string(),
                intent: "describe".to_string(),
            },
            frames: vec![NluFrame {
                frame_name: "Ingestion".to_string(),
                lexical_unit: "beber".to_string(),
                roles: serde_json::json!({ "Ingestor": "yo", "Ingestible": "agua" }),
            }],
            visual_guidelines: NluVisualGuidelines {
                focus_actor: "person".to_string(),
                action_core: "drinking".to_string(),
                object_core: "glass of water".to_string(),
                context: "none".to_string(),
                temporal: "present".to_string(),
            },
            nsm_explications: None,
            logical_form: None,
            pragmatics: None,
        }
    }

    /// Scripted generation backend for engine and executor tests: counts
    /// calls, optionally fails per step, optionally blocks on a gate so a
    /// test can act while a call is in flight.
    #[derive(Default)]
    pub(crate) struct ScriptedService {
        pub fail_nlu: bool,
        pub fail_visual: bool,
        pub fail_svg: bool,
        pub gate: Option<Arc<Notify>>,
        pub nlu_calls: AtomicUsize,
        pub visual_calls: AtomicUsize,
        pub svg_calls: AtomicUsize,
    }

    impl ScriptedService {
        pub fn failing() -> Self {
            ScriptedService {
                fail_nlu: true,
                fail_visual: true,
                fail_svg: true,
                ..Default::default()
            }
        }

        pub fn failing_nlu() -> Self {
            ScriptedService {
                fail_nlu: true,
                ..Default::default()
            }
        }

        pub fn gated(gate: Arc<Notify>) -> Self {
            ScriptedService {
                gate: Some(gate),
                ..Default::default()
            }
        }

        async fn pass_gate(&self) {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
        }

        fn scripted_failure() -> GenerationError {
            GenerationError::MalformedResponse("scripted failure".to_string())
        }
    }

    #[async_trait]
    impl GenerationService for ScriptedService {
        async fn generate_nlu(&self, utterance: &str) -> GenerationResult<NluData> {
            self.nlu_calls.fetch_add(1, Ordering::SeqCst);
            self.pass_gate().await;
            if self.fail_nlu {
                return Err(Self::scripted_failure());
            }
            Ok(sample_nlu(utterance))
        }

        async fn generate_visual_blueprint(
            &self,
            _nlu: &NluData,
            _lang: &str,
        ) -> GenerationResult<VisualBlueprint> {
            self.visual_calls.fetch_add(1, Ordering::SeqCst);
            self.pass_gate().await;
            if self.fail_visual {
                return Err(Self::scripted_failure());
            }
            Ok(VisualBlueprint {
                visual_blocks: "actor,action,object".to_string(),
                prompt: "centered scene, flat shapes".to_string(),
            })
        }

        async fn generate_svg(
            &self,
            _visual_blocks: &str,
            _prompt: &str,
            _utterance: &str,
            canvas_size: u32,
        ) -> GenerationResult<String> {
            self.svg_calls.fetch_add(1, Ordering::SeqCst);
            self.pass_gate().await;
            if self.fail_svg {
                return Err(Self::scripted_failure());
            }
            Ok(format!(
                "<svg viewBox=\"0 0 {size} {size}\"><g id=\"actor\"/></svg>",
                size = canvas_size
            ))
        }
    }
}
