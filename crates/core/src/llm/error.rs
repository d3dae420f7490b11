use crate::llm::Provider;
use serde_json::Value;
use std::fmt;

/// LLM failure with enough context to persist alongside the run for later inspection.
#[derive(Debug, Clone)]
pub struct LlmDiagnosticsError {
    pub provider: Provider,
    pub stage: &'static str,
    pub detail: String,
    pub raw_output: Option<String>,
    pub raw_response_json: Option<Value>,
}

impl LlmDiagnosticsError {
    /// Best available raw payload: the decoded response body, else the raw text.
    pub fn raw_payload(&self) -> Option<Value> {
        if let Some(v) = &self.raw_response_json {
            return Some(v.clone());
        }
        self.raw_output.as_deref().map(|raw| {
            serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({ "raw_text": raw }))
        })
    }
}

impl fmt::Display for LlmDiagnosticsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LLM error (provider={}, stage={}): {}",
            self.provider.as_str(),
            self.stage,
            self.detail
        )
    }
}

impl std::error::Error for LlmDiagnosticsError {}
