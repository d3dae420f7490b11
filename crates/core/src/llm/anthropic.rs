use crate::config::Settings;
use crate::domain::contract::{LlmExplanationSet, MAX_RATIONALE_LINES};
use crate::domain::recommendation::RecommendationSnapshot;
use crate::llm::error::LlmDiagnosticsError;
use crate::llm::json;
use crate::llm::{ExplainInput, Explanation, LlmClient, Provider};
use anyhow::Context;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const REPAIR_ATTEMPTS: u32 = 2;

const TOOL_NAME_EMIT_EXPLANATIONS: &str = "emit_explanations";

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_anthropic_api_key()?.to_string();
        let base_url =
            std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let max_tokens = std::env::var("ANTHROPIC_MAX_TOKENS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let timeout_secs = std::env::var("ANTHROPIC_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model,
            max_tokens,
        })
    }

    async fn create_message(
        &self,
        req: &CreateMessageRequest,
    ) -> anyhow::Result<(serde_json::Value, CreateMessageResponse)> {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_str(&self.api_key)?);
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .post(url)
            .headers(headers)
            .json(req)
            .send()
            .await
            .context("Anthropic request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read Anthropic response body")?;
        if !status.is_success() {
            let raw_response_json = serde_json::from_str::<serde_json::Value>(&text).ok();
            return Err(LlmDiagnosticsError {
                provider: Provider::Anthropic,
                stage: "http",
                detail: format!("status={status}"),
                raw_output: Some(text),
                raw_response_json,
            }
            .into());
        }

        let raw_json = serde_json::from_str::<serde_json::Value>(&text)
            .with_context(|| format!("failed to parse Anthropic response JSON: {text}"))?;
        let parsed = serde_json::from_value::<CreateMessageResponse>(raw_json.clone())
            .context("failed to decode Anthropic response into CreateMessageResponse")?;
        Ok((raw_json, parsed))
    }

    fn request(&self, max_tokens: u32, content: String) -> CreateMessageRequest {
        CreateMessageRequest {
            model: self.model.clone(),
            max_tokens,
            system: Some(Self::system_prompt()),
            messages: vec![Message {
                role: "user",
                content,
            }],
            tools: Some(Self::tools()),
            tool_choice: Some(Self::tool_choice()),
        }
    }

    fn tools() -> Vec<Tool> {
        let schema = serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["items"],
            "properties": {
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "additionalProperties": false,
                        "required": ["ticker", "rationale", "risk_notes"],
                        "properties": {
                            "ticker": {"type": "string"},
                            "rationale": {
                                "type": "array",
                                "minItems": 1,
                                "maxItems": MAX_RATIONALE_LINES,
                                "items": {"type": "string"}
                            },
                            "risk_notes": {"type": ["string", "null"]}
                        }
                    }
                }
            }
        });

        vec![Tool {
            name: TOOL_NAME_EMIT_EXPLANATIONS,
            description: "Emit one explanation per shortlisted security as structured JSON",
            input_schema: schema,
        }]
    }

    fn tool_choice() -> ToolChoice {
        ToolChoice::Tool {
            name: TOOL_NAME_EMIT_EXPLANATIONS,
        }
    }

    fn system_prompt() -> String {
        [
            "You explain stock shortlists produced by a deterministic ranking engine.",
            "The ranking is final: do not reorder, add or drop securities.",
            "Ground every statement in the provided metrics and score breakdown; do not invent data.",
            "Return ONLY valid JSON. Do not wrap in markdown. Do not include any extra keys.",
            "Output schema:",
            "{\"items\": [{\"ticker\": \"7203\", \"rationale\": [\"line1\", \"line2\"], \"risk_notes\": null}]}",
            "Rules:",
            "- exactly one item per shortlisted ticker",
            "- rationale has 1 to 3 short lines",
            "- risk_notes key MUST be present (use null if none)",
        ]
        .join("\n")
    }

    fn user_prompt(input: &ExplainInput) -> String {
        format!(
            "Task: explain why each security suits this investor for as_of_date={}.\n\nInput JSON:\n{}",
            input.as_of_date,
            input.prompt_json()
        )
    }

    fn repair_prompt(previous_output: &str, input: &ExplainInput) -> String {
        let tickers = input.shortlist.tickers().join(", ");
        format!(
            "Your previous message was NOT valid JSON for the required schema.\n\n\
TASK: Output ONLY a single JSON object of the form {{\"items\": [...]}}.\n\
- Do NOT include any markdown, prose, or code fences.\n\
- Include exactly one item for each of these tickers: {tickers}.\n\
- Each item MUST include keys: ticker, rationale, risk_notes.\n\
- rationale MUST have 1 to {MAX_RATIONALE_LINES} strings.\n\n\
INVALID OUTPUT (for reference only; DO NOT copy verbatim):\n{previous_output}"
        )
    }

    fn response_text(res: &CreateMessageResponse) -> String {
        let mut out = String::new();
        for block in &res.content {
            if let ContentBlock::Text { text } = block {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    fn response_tool_explanations(
        res: &CreateMessageResponse,
    ) -> anyhow::Result<Option<LlmExplanationSet>> {
        for block in &res.content {
            if let ContentBlock::ToolUse { name, input, .. } = block {
                if name == TOOL_NAME_EMIT_EXPLANATIONS {
                    let parsed = serde_json::from_value::<LlmExplanationSet>(input.clone())
                        .context("failed to decode tool_use.input into LlmExplanationSet")?;
                    return Ok(Some(parsed));
                }
            }
        }
        Ok(None)
    }

    async fn try_parse_with_repairs(
        &self,
        input: &ExplainInput,
        initial_text: String,
        initial_raw_json: serde_json::Value,
    ) -> anyhow::Result<(RecommendationSnapshot, serde_json::Value)> {
        let first_err = match json::parse_explanations(
            &initial_text,
            &input.shortlist,
            input.as_of_date,
            Utc::now(),
        ) {
            Ok(snapshot) => return Ok((snapshot, initial_raw_json)),
            Err(err) => err,
        };

        let mut last_err = first_err;
        let mut last_text = initial_text;
        let mut last_raw_json = initial_raw_json;

        for attempt in 1..=REPAIR_ATTEMPTS {
            let req = self.request(self.max_tokens, Self::repair_prompt(&last_text, input));
            let (raw_json, res) = self.create_message(&req).await?;

            let parsed = match Self::response_tool_explanations(&res)? {
                Some(set) => set.validate_and_attach(&input.shortlist, input.as_of_date, Utc::now()),
                None => {
                    last_text = Self::response_text(&res);
                    json::parse_explanations(
                        &last_text,
                        &input.shortlist,
                        input.as_of_date,
                        Utc::now(),
                    )
                }
            };

            match parsed {
                Ok(snapshot) => return Ok((snapshot, raw_json)),
                Err(err) => {
                    last_err = err;
                    last_raw_json = raw_json;
                    tracing::warn!(
                        attempt,
                        %input.as_of_date,
                        error = %last_err,
                        "LLM explanation still invalid after repair attempt"
                    );
                }
            }
        }

        Err(LlmDiagnosticsError {
            provider: Provider::Anthropic,
            stage: "parse_after_repair",
            detail: format!("final_error={last_err}"),
            raw_output: Some(last_text),
            raw_response_json: Some(last_raw_json),
        }
        .into())
    }

    pub async fn explain_with_raw(
        &self,
        input: &ExplainInput,
    ) -> anyhow::Result<(RecommendationSnapshot, serde_json::Value)> {
        let prompt = Self::user_prompt(input);
        let (mut raw_json, mut res) = self
            .create_message(&self.request(self.max_tokens, prompt.clone()))
            .await?;

        if matches!(res.stop_reason.as_deref(), Some("max_tokens")) {
            let bumped = self.max_tokens.saturating_mul(2).max(2048);
            tracing::warn!(
                %input.as_of_date,
                from = self.max_tokens,
                to = bumped,
                "Anthropic stop_reason=max_tokens; retrying once with higher max_tokens"
            );
            let (rj, r) = self.create_message(&self.request(bumped, prompt)).await?;
            raw_json = rj;
            res = r;
        }

        if let Some(set) = Self::response_tool_explanations(&res)? {
            let snapshot =
                set.validate_and_attach(&input.shortlist, input.as_of_date, Utc::now())?;
            return Ok((snapshot, raw_json));
        }

        // Tool use is forced, so plain text should be rare.
        let text = Self::response_text(&res);
        self.try_parse_with_repairs(input, text, raw_json).await
    }
}

#[async_trait::async_trait]
impl LlmClient for AnthropicClient {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn explain(&self, input: &ExplainInput) -> anyhow::Result<Explanation> {
        let (snapshot, raw) = self.explain_with_raw(input).await?;
        Ok(Explanation {
            snapshot,
            raw_response: Some(raw),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct CreateMessageRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateMessageResponse {
    content: Vec<ContentBlock>,

    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct Tool {
    name: &'static str,
    description: &'static str,
    input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum ToolChoice {
    #[serde(rename = "tool")]
    Tool { name: &'static str },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },

    #[serde(other)]
    Unknown,
}
