use crate::domain::contract::LlmExplanationSet;
use crate::domain::recommendation::{RecommendationSnapshot, Shortlist};
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};

pub fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        // Strip Markdown fences (```json ... ``` or ``` ... ```).
        let mut inner = trimmed;
        if let Some(after_first) = inner.split_once('\n').map(|(_, rest)| rest) {
            inner = after_first;
        }
        if let Some(end) = inner.rfind("```") {
            inner = &inner[..end];
        }
        return Some(inner.trim().to_string());
    }

    // Best effort: first '{' to last '}'.
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(trimmed[start..=end].trim().to_string())
}

pub fn parse_explanations(
    text: &str,
    shortlist: &Shortlist,
    as_of_date: NaiveDate,
    generated_at: DateTime<Utc>,
) -> anyhow::Result<RecommendationSnapshot> {
    let json_str = extract_json(text).unwrap_or_else(|| text.trim().to_string());
    let parsed = serde_json::from_str::<LlmExplanationSet>(&json_str)
        .with_context(|| format!("LLM output is not valid JSON for explanation schema: {json_str}"))?;
    parsed.validate_and_attach(shortlist, as_of_date, generated_at)
}
