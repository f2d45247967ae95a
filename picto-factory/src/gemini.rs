//! Gemini generation backend
//!
//! Implements the three pipeline calls against the Google Generative
//! Language HTTP API. The NLU and blueprint steps constrain the model
//! with a JSON response schema; the SVG step takes raw text and extracts
//! the root element defensively, since the model wraps markup in fences
//! or prose often enough.

use picto_factory_sdk::{
    async_trait, GenerationError, GenerationResult, GenerationService, NluData, VisualBlueprint,
};
use serde_json::{json, Value};

const API_KEY_VAR: &str = "GEMINI_API_KEY";
const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        GeminiClient {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Build a client from `GEMINI_API_KEY`.
    pub fn from_env(model: &str) -> GenerationResult<Self> {
        let api_key = std::env::var(API_KEY_VAR)
            .ok()
            .filter(|key| !key.is_empty())
            .ok_or(GenerationError::MissingApiKey)?;
        Ok(GeminiClient::new(api_key, model))
    }

    async fn generate_content(
        &self,
        system_instruction: &str,
        contents: String,
        response_schema: Option<Value>,
    ) -> GenerationResult<String> {
        let url = format!(
            "{}/{}:generateContent?key={}",
            BASE_URL, self.model, self.api_key
        );
        let mut body = json!({
            "systemInstruction": { "parts": [{ "text": system_instruction }] },
            "contents": [{ "parts": [{ "text": contents }] }],
        });
        if let Some(schema) = response_schema {
            body["generationConfig"] = json!({
                "responseMimeType": "application/json",
                "responseSchema": schema,
            });
        }

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| GenerationError::Http(e.to_string()))?;
        candidate_text(&payload)
    }
}

#[async_trait]
impl GenerationService for GeminiClient {
    async fn generate_nlu(&self, utterance: &str) -> GenerationResult<NluData> {
        let system = "You are a semanticist. Generate a formal NLU JSON for the given \
                      UTTERANCE. Detect the language and ensure the schema is strictly followed.";
        let text = self
            .generate_content(
                system,
                format!("UTTERANCE: \"{}\"", utterance),
                Some(nlu_response_schema()),
            )
            .await?;
        serde_json::from_str(&text).map_err(|e| {
            GenerationError::MalformedResponse(format!("NLU JSON did not parse: {}", e))
        })
    }

    async fn generate_visual_blueprint(
        &self,
        nlu: &NluData,
        lang: &str,
    ) -> GenerationResult<VisualBlueprint> {
        let system = "You are a visual architect. Create VISUAL-BLOCKS (hierarchical SVG \
                      group ids) and a design PROMPT from NLU data.";
        let nlu_json = serde_json::to_string(nlu)
            .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;
        let text = self
            .generate_content(
                system,
                format!("NLU: {}. TARGET LANGUAGE: {}.", nlu_json, lang),
                Some(blueprint_response_schema()),
            )
            .await?;
        serde_json::from_str(&text).map_err(|e| {
            GenerationError::MalformedResponse(format!("blueprint JSON did not parse: {}", e))
        })
    }

    async fn generate_svg(
        &self,
        visual_blocks: &str,
        prompt: &str,
        utterance: &str,
        canvas_size: u32,
    ) -> GenerationResult<String> {
        let system = format!(
            "You are an SVG engineer. Create a {size}x{size} semantic SVG. \
             Use .f for fill, .k for stroke. Return ONLY raw SVG code.",
            size = canvas_size
        );
        let text = self
            .generate_content(
                &system,
                format!(
                    "UTTERANCE: \"{}\". VISUAL-BLOCKS: {}. PROMPT: {}.",
                    utterance, visual_blocks, prompt
                ),
                None,
            )
            .await?;
        extract_svg_root(&text).ok_or_else(|| {
            GenerationError::MalformedResponse("no <svg> root element in response".to_string())
        })
    }
}

/// Pull the first candidate's text parts out of a generateContent
/// response payload.
fn candidate_text(payload: &Value) -> GenerationResult<String> {
    let parts = payload
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array);
    let text: String = parts
        .into_iter()
        .flatten()
        .filter_map(|part| part["text"].as_str())
        .collect();
    if text.is_empty() {
        Err(GenerationError::MalformedResponse(
            "no candidate text in response".to_string(),
        ))
    } else {
        Ok(text)
    }
}

/// Extract the root `<svg>` element from model output, dropping code
/// fences and any prose around it.
pub fn extract_svg_root(text: &str) -> Option<String> {
    let start = text.find("<svg")?;
    let end = text.rfind("</svg>")? + "</svg>".len();
    if end <= start {
        return None;
    }
    Some(text[start..end].to_string())
}

fn nlu_response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "utterance": { "type": "STRING" },
            "lang": { "type": "STRING" },
            "metadata": {
                "type": "OBJECT",
                "properties": {
                    "speech_act": { "type": "STRING" },
                    "intent": { "type": "STRING" }
                },
                "required": ["speech_act", "intent"]
            },
            "frames": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "frame_name": { "type": "STRING" },
                        "lexical_unit": { "type": "STRING" },
                        "roles": { "type": "OBJECT" }
                    },
                    "required": ["frame_name", "lexical_unit", "roles"]
                }
            },
            "visual_guidelines": {
                "type": "OBJECT",
                "properties": {
                    "focus_actor": { "type": "STRING" },
                    "action_core": { "type": "STRING" },
                    "object_core": { "type": "STRING" },
                    "context": { "type": "STRING" },
                    "temporal": { "type": "STRING" }
                },
                "required": ["focus_actor", "action_core", "object_core", "context", "temporal"]
            }
        },
        "required": ["utterance", "lang", "metadata", "frames", "visual_guidelines"]
    })
}

fn blueprint_response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "visualBlocks": { "type": "STRING", "description": "SVG group ids list" },
            "prompt": { "type": "STRING", "description": "Design strategy prompt" }
        },
        "required": ["visualBlocks", "prompt"]
    })
}
