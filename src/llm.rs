//! LLM client adapter (C6): a transport trait plus the retry/backoff and
//! JSON-normalization wrapper extraction (C7) is built on.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::cancel::CancellationToken;
use crate::error::{EngramError, Result};

/// The raw completion call, implemented per provider. Retry and backoff
/// live in `LlmClient`, not here, so transports stay dumb.
#[async_trait]
pub trait LlmTransport: Send + Sync {
    async fn complete_raw(&self, prompt: &str) -> Result<String>;
}

/// OpenAI-compatible chat completions endpoint.
pub struct OpenAiTransport {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiTransport {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LlmTransport for OpenAiTransport {
    async fn complete_raw(&self, prompt: &str) -> Result<String> {
        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "model": self.model,
                "messages": [{"role": "user", "content": prompt}],
            }))
            .send()
            .await
            .map_err(|e| EngramError::Transient(format!("llm request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("llm provider error {status}: {body}");
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                EngramError::Transient(message)
            } else {
                EngramError::Permanent(message)
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| EngramError::Permanent(format!("malformed llm response: {e}")))?;

        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| EngramError::Permanent("llm response missing content".into()))
    }
}

/// Wraps any `LlmTransport` with the retry discipline from §4.6: factor-2
/// exponential backoff starting at 1s, up to 3 retries (4 attempts total),
/// ±50% jitter, retrying only network failures / 429 / 5xx.
pub struct LlmClient<T: LlmTransport> {
    transport: T,
}

const MAX_ATTEMPTS: u32 = 4;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

impl<T: LlmTransport> LlmClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub async fn complete(&self, prompt: &str, cancel: &CancellationToken) -> Result<String> {
        let mut attempt = 0;
        loop {
            cancel.check()?;
            attempt += 1;
            match self.transport.complete_raw(prompt).await {
                Ok(text) => return Ok(text),
                Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                    let backoff = jittered_backoff(attempt);
                    cancel.sleep_or_cancel(backoff).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Runs `complete`, strips a single outer markdown fence, normalizes
    /// array-valued leaves to joined strings, then deserializes into `S`.
    pub async fn complete_with_schema<S: DeserializeOwned>(&self, prompt: &str, cancel: &CancellationToken) -> Result<S> {
        let raw = self.complete(prompt, cancel).await?;
        let stripped = strip_code_fence(&raw);
        let mut value: Value = serde_json::from_str(stripped)
            .map_err(|e| EngramError::Permanent(format!("llm returned invalid json: {e}")))?;
        if normalize_json_arrays(&mut value, true) {
            tracing::warn!("llm response contained a string-typed field returned as an array; normalized in place");
        }
        serde_json::from_value(value).map_err(|e| EngramError::Permanent(format!("llm json did not match schema: {e}")))
    }
}

/// `2^(attempt-1)` seconds base, jittered by ±50%.
fn jittered_backoff(attempt: u32) -> Duration {
    let base = INITIAL_BACKOFF.as_secs_f64() * 2f64.powi(attempt as i32 - 1);
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_secs_f64(base * jitter)
}

/// Strips a single outer ``` or ```json fence, if present.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// JSON array-to-string normalizer (§4.6.1): recursively replaces any
/// non-root array of strings (or empty array) with its elements joined by
/// ", ". The root value is traversed but never itself converted.
pub fn normalize_json_arrays(value: &mut Value, is_root: bool) -> bool {
    let mut changed = false;
    match value {
        Value::Array(items) => {
            for item in items.iter_mut() {
                changed |= normalize_json_arrays(item, false);
            }
            if !is_root && items.iter().all(|v| v.is_string()) {
                let joined = items
                    .iter()
                    .map(|v| v.as_str().unwrap_or_default())
                    .collect::<Vec<_>>()
                    .join(", ");
                *value = Value::String(joined);
                changed = true;
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                changed |= normalize_json_arrays(v, false);
            }
        }
        _ => {}
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakyTransport {
        failures_before_success: u32,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl LlmTransport for FlakyTransport {
        async fn complete_raw(&self, _prompt: &str) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                Err(EngramError::Transient("simulated 503".into()))
            } else {
                Ok("{\"ok\": true}".to_string())
            }
        }
    }

    #[tokio::test]
    async fn complete_retries_on_transient_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let client = LlmClient::new(FlakyTransport { failures_before_success: 2, calls: calls.clone() });
        let result = client.complete("prompt", &CancellationToken::new()).await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn complete_does_not_retry_permanent_errors() {
        struct AlwaysPermanent;
        #[async_trait]
        impl LlmTransport for AlwaysPermanent {
            async fn complete_raw(&self, _prompt: &str) -> Result<String> {
                Err(EngramError::Permanent("bad request".into()))
            }
        }
        let client = LlmClient::new(AlwaysPermanent);
        let result = client.complete("prompt", &CancellationToken::new()).await;
        assert!(matches!(result, Err(EngramError::Permanent(_))));
    }

    #[tokio::test]
    async fn cancellation_preempts_retry() {
        struct AlwaysTransient;
        #[async_trait]
        impl LlmTransport for AlwaysTransient {
            async fn complete_raw(&self, _prompt: &str) -> Result<String> {
                Err(EngramError::Transient("simulated 503".into()))
            }
        }
        let cancel = CancellationToken::new();
        cancel.cancel();
        let client = LlmClient::new(AlwaysTransient);
        let result = client.complete("prompt", &cancel).await;
        assert!(matches!(result, Err(EngramError::Cancelled)));
    }

    #[test]
    fn strip_code_fence_handles_json_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn normalize_converts_non_root_string_arrays() {
        let mut value = json!({"object": ["a", "b"]});
        let changed = normalize_json_arrays(&mut value, true);
        assert!(changed);
        assert_eq!(value, json!({"object": "a, b"}));
    }

    #[test]
    fn normalize_preserves_root_array() {
        let mut value = json!(["a", "b"]);
        let changed = normalize_json_arrays(&mut value, true);
        assert!(!changed);
        assert_eq!(value, json!(["a", "b"]));
    }

    #[test]
    fn normalize_does_not_touch_non_string_arrays() {
        let mut value = json!({"nums": [1, 2, 3]});
        let changed = normalize_json_arrays(&mut value, true);
        assert!(!changed);
        assert_eq!(value, json!({"nums": [1, 2, 3]}));
    }

    #[test]
    fn normalize_is_idempotent() {
        let mut value = json!({"object": ["a", "b"], "nested": {"list": ["c"]}});
        normalize_json_arrays(&mut value, true);
        let once = value.clone();
        normalize_json_arrays(&mut value, true);
        assert_eq!(value, once);
    }
}
