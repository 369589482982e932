//! AI engine capability.
//!
//! This is the infrastructure boundary for LLM calls. Business logic
//! (what to prompt for) lives in the generation domain; this module only
//! knows how to send a prompt to a provider and classify what went wrong.

use std::time::Duration;

use async_trait::async_trait;
use rig::completion::Prompt;
use rig::providers::openai;
use thiserror::Error;

/// Default per-call timeout for provider requests.
pub const AI_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Typed errors for AI engine calls.
///
/// The retryable/permanent split drives the job retry policy: transient
/// provider conditions reset the job to pending, everything else is a
/// terminal failure.
#[derive(Debug, Clone, Error)]
pub enum AiError {
    /// Credentials rejected by the provider.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Provider rate limit hit (429).
    #[error("rate limited: {0}")]
    RateLimit(String),

    /// Account quota exhausted.
    #[error("quota exhausted: {0}")]
    Quota(String),

    /// Call exceeded the per-request timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Provider returned something the caller cannot use.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The batch's frozen settings name an engine this deployment
    /// does not support.
    #[error("unsupported engine: {0}")]
    UnsupportedEngine(String),

    /// Transient transport failure (connection reset, 5xx).
    #[error("network error: {0}")]
    Network(String),
}

impl AiError {
    /// Whether a failed call may succeed if attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AiError::RateLimit(_) | AiError::Timeout(_) | AiError::Network(_)
        )
    }
}

/// A single completion request with the batch's frozen model settings.
#[derive(Debug, Clone)]
pub struct CompletionRequest<'a> {
    pub engine: &'a str,
    pub model: &'a str,
    /// Env-var name of a credential overriding the deployment default.
    pub api_key_ref: Option<&'a str>,
    pub prompt: &'a str,
    pub temperature: f64,
    pub max_tokens: u64,
}

/// Capability trait for calling an AI engine.
#[async_trait]
pub trait AiEngine: Send + Sync {
    /// Complete a prompt, returning the raw text response.
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, AiError>;
}

/// OpenAI implementation of the AI engine capability, built on rig.
pub struct OpenAiEngine {
    api_key: String,
    timeout: Duration,
}

impl OpenAiEngine {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            timeout: AI_CALL_TIMEOUT,
        }
    }

    pub fn with_timeout(api_key: String, timeout: Duration) -> Self {
        Self { api_key, timeout }
    }
}

#[async_trait]
impl AiEngine for OpenAiEngine {
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, AiError> {
        if !matches!(request.engine, "openai" | "chatgpt") {
            return Err(AiError::UnsupportedEngine(request.engine.to_string()));
        }

        // The batch may freeze a named credential; the key is looked up
        // at call time, never persisted.
        let key = match request.api_key_ref {
            Some(name) => std::env::var(name)
                .map_err(|_| AiError::Auth(format!("credential reference {name} is not set")))?,
            None => self.api_key.clone(),
        };

        let agent = openai::Client::new(&key)
            .agent(request.model)
            .preamble("You are an e-commerce SEO copywriter.")
            .temperature(request.temperature)
            .max_tokens(request.max_tokens)
            .build();

        tracing::debug!(
            model = request.model,
            prompt_length = request.prompt.len(),
            "calling OpenAI API"
        );

        let response = tokio::time::timeout(self.timeout, agent.prompt(request.prompt))
            .await
            .map_err(|_| AiError::Timeout(self.timeout))?
            .map_err(|e| classify_provider_error(&e.to_string()))?;

        if response.trim().is_empty() {
            return Err(AiError::MalformedResponse(
                "provider returned an empty completion".to_string(),
            ));
        }

        Ok(response)
    }
}

/// Classify a provider error message into a typed `AiError`.
///
/// Providers report failures as HTTP-flavored strings; this matches on
/// the statuses OpenAI reports for each failure class.
fn classify_provider_error(message: &str) -> AiError {
    let lower = message.to_lowercase();

    if lower.contains("401")
        || lower.contains("unauthorized")
        || lower.contains("invalid api key")
        || lower.contains("incorrect api key")
    {
        return AiError::Auth(message.to_string());
    }

    if lower.contains("insufficient_quota") || lower.contains("quota") {
        return AiError::Quota(message.to_string());
    }

    if lower.contains("429") || lower.contains("rate limit") {
        return AiError::RateLimit(message.to_string());
    }

    if lower.contains("timed out") || lower.contains("timeout") {
        return AiError::Timeout(AI_CALL_TIMEOUT);
    }

    AiError::Network(message.to_string())
}

/// Scripted AI engine for tests.
///
/// Responses are matched by prompt substring; unmatched prompts fall
/// back to a FIFO queue of canned responses. Failures can be injected
/// per substring with a bounded count, after which the stubbed response
/// (if any) is served again.
#[derive(Default)]
pub struct MockAiEngine {
    stubs: std::sync::RwLock<Vec<(String, String)>>,
    queued: std::sync::RwLock<std::collections::VecDeque<String>>,
    failures: std::sync::RwLock<Vec<(String, AiError, usize)>>,
    prompts: std::sync::RwLock<Vec<String>>,
}

impl MockAiEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `response` for any prompt containing `needle`.
    pub fn stub(&self, needle: &str, response: &str) {
        self.stubs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((needle.to_string(), response.to_string()));
    }

    /// Queue a response for the next otherwise-unmatched prompt.
    pub fn push_response(&self, response: &str) {
        self.queued
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response.to_string());
    }

    /// Fail the next `times` prompts containing `needle` with `error`.
    pub fn fail_when(&self, needle: &str, error: AiError, times: usize) {
        self.failures
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((needle.to_string(), error, times));
    }

    /// All prompts this engine has received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[async_trait]
impl AiEngine for MockAiEngine {
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, AiError> {
        self.prompts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.prompt.to_string());

        {
            let mut failures = self.failures.write().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = failures
                .iter_mut()
                .find(|(needle, _, left)| *left > 0 && request.prompt.contains(needle.as_str()))
            {
                entry.2 -= 1;
                return Err(entry.1.clone());
            }
        }

        // Later stubs override earlier ones for the same needle.
        let stubs = self.stubs.read().unwrap_or_else(|e| e.into_inner());
        if let Some((_, response)) = stubs
            .iter()
            .rev()
            .find(|(needle, _)| request.prompt.contains(needle.as_str()))
        {
            return Ok(response.clone());
        }
        drop(stubs);

        if let Some(next) = self
            .queued
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
        {
            return Ok(next);
        }

        Ok(format!("generated copy for: {}", request.model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_and_timeout_are_retryable() {
        assert!(AiError::RateLimit("429".into()).is_retryable());
        assert!(AiError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(AiError::Network("connection reset".into()).is_retryable());
    }

    #[test]
    fn auth_quota_and_malformed_are_permanent() {
        assert!(!AiError::Auth("bad key".into()).is_retryable());
        assert!(!AiError::Quota("exceeded".into()).is_retryable());
        assert!(!AiError::MalformedResponse("empty".into()).is_retryable());
        assert!(!AiError::UnsupportedEngine("claude".into()).is_retryable());
    }

    #[test]
    fn classify_recognizes_auth_errors() {
        assert!(matches!(
            classify_provider_error("401 Unauthorized"),
            AiError::Auth(_)
        ));
        assert!(matches!(
            classify_provider_error("Incorrect API key provided"),
            AiError::Auth(_)
        ));
    }

    #[test]
    fn classify_recognizes_rate_limits_and_quota() {
        assert!(matches!(
            classify_provider_error("429 Too Many Requests: rate limit"),
            AiError::RateLimit(_)
        ));
        // Quota takes precedence over the 429 status it ships with.
        assert!(matches!(
            classify_provider_error("429: insufficient_quota"),
            AiError::Quota(_)
        ));
    }

    #[tokio::test]
    async fn mock_engine_matches_stub_by_substring() {
        let engine = MockAiEngine::new();
        engine.stub("meta description", "A concise meta description.");

        let request = CompletionRequest {
            engine: "openai",
            model: "gpt-4o",
            api_key_ref: None,
            prompt: "Write a meta description for this product",
            temperature: 0.7,
            max_tokens: 256,
        };

        let response = engine.complete(&request).await.unwrap();
        assert_eq!(response, "A concise meta description.");
        assert_eq!(engine.call_count(), 1);
    }

    #[tokio::test]
    async fn mock_engine_fails_bounded_number_of_times() {
        let engine = MockAiEngine::new();
        engine.stub("title", "Recovered Title");
        engine.fail_when("title", AiError::RateLimit("slow down".into()), 2);

        let request = CompletionRequest {
            engine: "openai",
            model: "gpt-4o",
            api_key_ref: None,
            prompt: "Write a title",
            temperature: 0.7,
            max_tokens: 64,
        };

        assert!(engine.complete(&request).await.is_err());
        assert!(engine.complete(&request).await.is_err());
        assert_eq!(engine.complete(&request).await.unwrap(), "Recovered Title");
    }
}
