//! HTTP adapter for the OpenAI-compatible chat-completions contract.
//!
//! One [`ProviderClient`] exists per configured upstream; the registry
//! dispatches by model prefix. Request bodies are shaped by the catalogue
//! flags, and transient failures retry with exponential backoff without
//! resetting the caller's deadline.

use std::time::{Duration, Instant};

use serde_json::{json, Value};

use cd_domain::catalog::{self, ModelSpec, ProviderKind};
use cd_domain::config::DaemonConfig;
use cd_domain::model::Role;
use cd_domain::{Error, Result};

use crate::types::{Completion, ProviderMessage, Usage};

/// Up to this many retries after the initial attempt.
const MAX_RETRIES: u32 = 2;
const BASE_DELAY_MS: u64 = 1_000;

/// HTTP statuses worth retrying.
const RETRYABLE_STATUSES: &[u16] = &[429, 500, 501, 502, 503, 504, 599];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One upstream chat-completion endpoint with its credentials.
#[derive(Debug)]
pub struct ProviderClient {
    kind: ProviderKind,
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl ProviderClient {
    pub fn new(
        kind: ProviderKind,
        api_key: String,
        base_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = base_url
            .unwrap_or(kind.default_base_url())
            .trim_end_matches('/')
            .to_owned();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("building http client: {e}")))?;
        Ok(Self {
            kind,
            base_url,
            api_key,
            http,
        })
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    /// Run one chat completion with retry. The measured wall time covers
    /// every attempt, backoff included.
    pub async fn complete(
        &self,
        spec: &ModelSpec,
        messages: &[ProviderMessage],
        system_prompt: Option<&str>,
    ) -> Result<Completion> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = build_body(spec, messages, system_prompt);
        let started = Instant::now();
        let mut last_err = Error::ExternalUnavailable("no attempt made".into());

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = BASE_DELAY_MS * 2u64.pow(attempt - 1);
                tracing::debug!(
                    provider = self.kind.as_str(),
                    attempt,
                    delay_ms = delay,
                    "retrying provider call"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            match self.send_once(&url, &body).await {
                Ok(mut completion) => {
                    completion.response_time_ms = started.elapsed().as_millis() as u64;
                    return Ok(completion);
                }
                Err(e) => {
                    let retryable = is_retryable(&e);
                    tracing::warn!(
                        provider = self.kind.as_str(),
                        model = spec.id,
                        attempt,
                        retryable,
                        error = %e,
                        "provider call failed"
                    );
                    if !retryable {
                        return Err(e);
                    }
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    async fn send_once(&self, url: &str, body: &Value) -> Result<Completion> {
        let resp = self
            .http
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            let message = format!(
                "{} returned HTTP {} - {}",
                self.kind.as_str(),
                status.as_u16(),
                text
            );
            return Err(match status.as_u16() {
                401 | 403 => Error::Auth(message),
                _ => Error::ExternalUnavailable(message),
            });
        }

        let parsed: Value = serde_json::from_str(&text)?;
        parse_completion(&parsed)
    }
}

fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::ExternalUnavailable(e.to_string())
    }
}

/// Retry when the failure is transient: a retryable HTTP status, a
/// timeout, or an error whose text says timeout (covers ETIMEDOUT).
fn is_retryable(e: &Error) -> bool {
    match e {
        Error::Timeout(_) => true,
        Error::ExternalUnavailable(msg) => {
            let lower = msg.to_lowercase();
            RETRYABLE_STATUSES
                .iter()
                .any(|s| msg.contains(&format!("HTTP {s}")))
                || lower.contains("timeout")
                || lower.contains("etimedout")
        }
        _ => false,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Body construction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn build_body(spec: &ModelSpec, messages: &[ProviderMessage], system_prompt: Option<&str>) -> Value {
    let mut wire: Vec<Value> = Vec::with_capacity(messages.len() + 1);

    match system_prompt {
        Some(prompt) if spec.supports_system_prompt => {
            wire.push(json!({ "role": "system", "content": prompt }));
            wire.extend(messages.iter().map(msg_to_wire));
        }
        Some(prompt) => {
            // Model takes no system role: fold the prompt into the first
            // user turn instead.
            let mut merged = false;
            for msg in messages {
                if !merged && msg.role == Role::User {
                    wire.push(json!({
                        "role": "user",
                        "content": merge_system_prompt(prompt, &msg.content),
                    }));
                    merged = true;
                } else {
                    wire.push(msg_to_wire(msg));
                }
            }
        }
        None => wire.extend(messages.iter().map(msg_to_wire)),
    }

    let mut body = json!({
        "model": spec.api_model,
        "messages": wire,
    });

    let cap_field = if spec.uses_completion_token_cap {
        "max_completion_tokens"
    } else {
        "max_tokens"
    };
    body[cap_field] = json!(spec.max_output_tokens);

    if spec.provider == ProviderKind::Deepseek && spec.is_reasoning {
        body["temperature"] = json!(0);
    }
    if let Some(effort) = spec.reasoning_effort {
        body["reasoning_effort"] = json!(effort);
    }
    body
}

fn msg_to_wire(msg: &ProviderMessage) -> Value {
    json!({ "role": msg.role.as_str(), "content": msg.content })
}

fn merge_system_prompt(prompt: &str, user: &str) -> String {
    format!("[System Instructions]\n{prompt}\n\n[User Query]\n{user}")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_completion(body: &Value) -> Result<Completion> {
    let message = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| Error::ExternalUnavailable("no message in provider response".into()))?;

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_owned();
    let reasoning_content = message
        .get("reasoning_content")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_owned);
    let finish_reason = body["choices"][0]
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(str::to_owned);
    let usage = body.get("usage").and_then(parse_usage);

    Ok(Completion {
        content,
        usage,
        finish_reason,
        reasoning_content,
        response_time_ms: 0,
    })
}

fn parse_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The closed set of provider clients, built from the effective config.
/// Rebuilt whenever the config changes.
pub struct ProviderRegistry {
    deepseek: Option<ProviderClient>,
    openai: Option<ProviderClient>,
}

impl ProviderRegistry {
    pub fn from_config(cfg: &DaemonConfig) -> Self {
        let timeout = Duration::from_millis(cfg.request_timeout);
        let build = |kind: ProviderKind, settings: &cd_domain::config::ProviderSettings| {
            if !settings.enabled {
                return None;
            }
            let key = settings.api_key.as_deref()?.to_owned();
            if key.is_empty() {
                return None;
            }
            match ProviderClient::new(kind, key, settings.base_url.as_deref(), timeout) {
                Ok(client) => Some(client),
                Err(e) => {
                    tracing::warn!(provider = kind.as_str(), error = %e, "provider init failed");
                    None
                }
            }
        };
        Self {
            deepseek: build(ProviderKind::Deepseek, &cfg.providers.deepseek),
            openai: build(ProviderKind::Openai, &cfg.providers.openai),
        }
    }

    /// Resolve a model id to its client and catalogue entry. Fails
    /// validation for unknown models and auth when the provider has no
    /// usable credentials.
    pub fn resolve(&self, model: &str) -> Result<(&ProviderClient, &'static ModelSpec)> {
        let spec = catalog::lookup(model)
            .ok_or_else(|| Error::validation("model", format!("unknown model: {model}")))?;
        let client = match spec.provider {
            ProviderKind::Deepseek => self.deepseek.as_ref(),
            ProviderKind::Openai => self.openai.as_ref(),
        }
        .ok_or_else(|| {
            Error::Auth(format!(
                "provider {} is not configured (missing api key)",
                spec.provider.as_str()
            ))
        })?;
        Ok((client, spec))
    }

    /// Whether a provider has usable credentials.
    pub fn is_configured(&self, kind: ProviderKind) -> bool {
        match kind {
            ProviderKind::Deepseek => self.deepseek.is_some(),
            ProviderKind::Openai => self.openai.is_some(),
        }
    }
}
