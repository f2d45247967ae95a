//! Global pipeline configuration, persisted alongside the row collection

use serde::{Deserialize, Serialize};

/// Settings shared by every generation step.
///
/// Persisted whole under its own key on every mutation and restored at
/// startup, independently of the row collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalConfig {
    /// Target language for the visual blueprint step.
    pub language: String,
    /// Side length of the square pictogram canvas, in user units.
    pub canvas_size: u32,
    /// Generation model identifier.
    pub model: String,
    /// Attribution metadata carried with the dataset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig {
            language: "es".to_string(),
            canvas_size: 100,
            model: "gemini-3-pro-preview".to_string(),
            attribution: None,
        }
    }
}
