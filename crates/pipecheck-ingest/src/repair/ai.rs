//! AI-assisted row repair
//!
//! Rows that still fail validation after auto-fix can be handed to an
//! OpenAI-compatible chat completion endpoint (Groq by default). Every failure
//! is logged and swallowed: the caller simply keeps its original error.

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::AiRepairConfig;
use crate::error::RepairError;
use crate::row::RowView;

/// Process-wide request budget shared by every repair call
pub type AiRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const SYSTEM_PROMPT: &str =
    "You are a data cleaning assistant. Return only valid JSON, no markdown or explanation.";

/// Corrected row plus a description of each change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiRepair {
    pub row: RowView,
    pub fixes: Vec<String>,
}

/// External collaborator that may correct a rejected row
#[async_trait]
pub trait RowRepairer: Send + Sync {
    /// Disabled repairers are skipped without a call
    fn is_enabled(&self) -> bool {
        true
    }

    /// Propose a corrected row, or `None` when nothing could be fixed
    async fn repair(&self, row: &RowView, error: &str, columns: &[String]) -> Option<AiRepair>;
}

/// Repairer used when no AI service is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledRepairer;

#[async_trait]
impl RowRepairer for DisabledRepairer {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn repair(&self, _row: &RowView, _error: &str, _columns: &[String]) -> Option<AiRepair> {
        None
    }
}

/// Limiter allowing `requests_per_minute` calls, at least one
pub fn rate_limiter(requests_per_minute: u32) -> Arc<AiRateLimiter> {
    let per_minute = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::direct(Quota::per_minute(per_minute)))
}

/// Build the repairer described by `config`
///
/// Returns a [`DisabledRepairer`] when no API key is set. An enabled repairer
/// waits on `limiter` before every request.
pub fn repairer_from_config(
    config: &AiRepairConfig,
    limiter: Arc<AiRateLimiter>,
) -> Result<Arc<dyn RowRepairer>, RepairError> {
    if !config.is_enabled() {
        info!("AI repair disabled");
        return Ok(Arc::new(DisabledRepairer));
    }

    let repairer = ChatCompletionRepairer::new(config.clone(), limiter)?;
    info!(model = %config.model, requests_per_minute = config.requests_per_minute, "AI repair enabled");
    Ok(Arc::new(repairer))
}

/// Chat completion client with a per-minute request budget
pub struct ChatCompletionRepairer {
    client: Client,
    config: AiRepairConfig,
    api_key: String,
    limiter: Arc<AiRateLimiter>,
}

impl ChatCompletionRepairer {
    /// Client sharing `limiter` with every other holder of it
    pub fn new(config: AiRepairConfig, limiter: Arc<AiRateLimiter>) -> Result<Self, RepairError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| RepairError::NotConfigured("missing API key".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;


        Ok(Self {
            client,
            config,
            api_key,
            limiter,
        })
    }

    async fn request(
        &self,
        row: &RowView,
        error: &str,
        columns: &[String],
    ) -> Result<Option<AiRepair>, RepairError> {
        self.limiter.until_ready().await;

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: build_prompt(row, error, columns)?,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RepairError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let completion: ChatResponse = response.json().await?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(RepairError::EmptyResponse)?;

        let proposed: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(strip_code_fence(&content))?;

        Ok(apply_proposal(row, &proposed))
    }
}

#[async_trait]
impl RowRepairer for ChatCompletionRepairer {
    async fn repair(&self, row: &RowView, error: &str, columns: &[String]) -> Option<AiRepair> {
        match self.request(row, error, columns).await {
            Ok(Some(repair)) => {
                info!(row_index = row.index(), fixes = ?repair.fixes, "AI fixes applied");
                Some(repair)
            }
            Ok(None) => {
                debug!(row_index = row.index(), "AI repair proposed no changes");
                None
            }
            Err(e) => {
                warn!(row_index = row.index(), error = %e, "AI repair failed");
                None
            }
        }
    }
}

fn build_prompt(row: &RowView, error: &str, columns: &[String]) -> Result<String, RepairError> {
    let row_json = serde_json::to_string_pretty(&row.to_json())?;

    Ok(format!(
        r#"You are a data cleaning assistant. Fix the following CSV row data that has validation errors.

Row data (JSON):
{row_json}

Error: {error}

Available columns: {columns}

Rules:
1. If email is missing or invalid (like 'nan', empty, or malformed), try to generate a plausible email from the name or other data
2. If name is missing, try to extract it from email or generate from context
3. Keep all other fields unchanged
4. Return ONLY valid JSON with the fixed data, no explanation

Example: If name is "John Smith" and email is missing, generate "john.smith@example.com"

Return the fixed row as JSON:"#,
        columns = columns.join(", ")
    ))
}

/// Remove a surrounding ``` or ```json fence
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = rest.split("```").next().unwrap_or_default();
    inner.strip_prefix("json").unwrap_or(inner).trim()
}

/// Adopt changed, non-empty values for keys the row already has
fn apply_proposal(
    row: &RowView,
    proposed: &serde_json::Map<String, serde_json::Value>,
) -> Option<AiRepair> {
    let mut fixed = row.clone();
    let mut fixes = Vec::new();

    for (key, value) in proposed {
        if !row.has_column(key) {
            continue;
        }

        let new_value = match value {
            serde_json::Value::String(s) => s.trim().to_string(),
            serde_json::Value::Null => continue,
            other => other.to_string(),
        };
        let old_value = row.get(key).unwrap_or_default();

        if new_value.is_empty() || new_value == old_value {
            continue;
        }

        fixes.push(format!("AI fixed {}: '{}' -> '{}'", key, old_value, new_value));
        fixed.set(key, Some(new_value));
    }

    if fixes.is_empty() {
        return None;
    }
    Some(AiRepair { row: fixed, fixes })
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}
