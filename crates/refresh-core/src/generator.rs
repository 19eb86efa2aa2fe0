//! Content generation over an OpenAI-compatible chat completions API.
//!
//! The model is asked for a JSON object keyed by field name. Values over a
//! field's `max_chars` are cut to `max_chars - 3` characters plus `...`.
//! Any failure (transport, HTTP status, unparseable body, no usable field)
//! is a [`CollaboratorError::Generation`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::classify::CollaboratorError;
use crate::config::{FieldSpec, GeneratorConfig};
use crate::error::{RefreshError, Result};
use crate::ports::{ContentGenerator, ProfileContext};
use crate::profile::FieldMap;

const SYSTEM_PROMPT: &str = "You edit therapist directory profiles. Make minimal changes: \
rewrite at most one sentence per section for warmth and clarity, keep every other sentence \
unchanged, and never shorten the text below its original length unless it exceeds the limit. \
Answer with a single JSON object.";

pub struct HttpContentGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    fields: Vec<FieldSpec>,
}

impl HttpContentGenerator {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        fields: Vec<FieldSpec>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RefreshError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
            fields,
        })
    }

    /// Build from config, reading the API key from `api_key_env` if set.
    pub fn from_config(config: &GeneratorConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            warn!(env = %config.api_key_env, "no generator API key in environment");
        }
        Self::new(
            config.endpoint.clone(),
            config.model.clone(),
            api_key,
            config.fields.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn user_prompt(&self, ctx: &ProfileContext) -> String {
        let mut prompt = format!("Profile: {}\n", ctx.username);
        if let Some(notes) = &ctx.notes {
            prompt.push_str(&format!("Notes: {notes}\n"));
        }
        prompt.push_str("\nCurrent content:\n");
        for field in &self.fields {
            let current = ctx.content.get(&field.name).map(String::as_str).unwrap_or("");
            prompt.push_str(&format!("- {}: \"{}\"\n", field.name, current));
        }
        prompt.push_str("\nReturn JSON with exactly these keys:\n");
        for field in &self.fields {
            match field.max_chars {
                Some(max) => prompt.push_str(&format!("- {} (max {} characters)\n", field.name, max)),
                None => prompt.push_str(&format!("- {}\n", field.name)),
            }
        }
        prompt
    }

    fn request_body(&self, ctx: &ProfileContext) -> Value {
        json!({
            "model": self.model,
            "temperature": 0.5,
            "max_tokens": 1000,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": self.user_prompt(ctx) },
            ],
        })
    }

    /// Pick the configured fields out of the model's JSON answer.
    fn extract_fields(&self, content: &str) -> std::result::Result<FieldMap, CollaboratorError> {
        let parsed: Value = serde_json::from_str(strip_code_fence(content)).map_err(|e| {
            CollaboratorError::Generation(format!("response is not valid JSON: {e}"))
        })?;
        let object = parsed.as_object().ok_or_else(|| {
            CollaboratorError::Generation("response is not a JSON object".into())
        })?;

        let mut out = FieldMap::new();
        for field in &self.fields {
            match object.get(&field.name).and_then(Value::as_str) {
                Some(value) if !value.trim().is_empty() => {
                    out.insert(field.name.clone(), trim_to_limit(value.trim(), field.max_chars));
                }
                _ => debug!(field = %field.name, "field missing from generated content"),
            }
        }
        if out.is_empty() {
            return Err(CollaboratorError::Generation(
                "response contained none of the requested fields".into(),
            ));
        }
        Ok(out)
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ContentGenerator for HttpContentGenerator {
    async fn generate(&self, ctx: &ProfileContext) -> std::result::Result<FieldMap, CollaboratorError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .json(&self.request_body(ctx))
            .send()
            .await
            .map_err(|e| CollaboratorError::Generation(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let reason = if status.as_u16() == 429 {
                "rate limited".to_string()
            } else {
                format!("HTTP {status}")
            };
            return Err(CollaboratorError::Generation(format!(
                "{reason}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CollaboratorError::Generation(format!("unreadable response: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CollaboratorError::Generation("response has no content".into()))?;

        self.extract_fields(&content)
    }
}

/// Cut `value` to `max` characters, ending in `...` when it was cut.
pub fn trim_to_limit(value: &str, max: Option<usize>) -> String {
    match max {
        Some(max) if value.chars().count() > max => {
            let keep = max.saturating_sub(3);
            let mut out: String = value.chars().take(keep).collect();
            out.push_str("...");
            out
        }
        _ => value.to_string(),
    }
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}
