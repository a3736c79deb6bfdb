//! OpenAI-compatible chat-completion client with cost accounting.
//!
//! FeedHarvest talks to a Groq-style `/chat/completions` endpoint directly
//! over HTTP. Every call returns the response text plus token usage and the
//! USD cost derived from the configured per-million-token prices; the batch
//! engine feeds that cost into its budget gate.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use feedharvest_shared::{FeedHarvestError, LlmConfig, Result};

/// User-Agent string for API requests.
const USER_AGENT: &str = concat!("FeedHarvest/", env!("CARGO_PKG_VERSION"));

/// Per-request timeout. Generation can be slow under load.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Sampling temperature; low for consistent structured output.
const TEMPERATURE: f32 = 0.3;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// One completed chat call.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub text: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
}

impl ChatOutcome {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Chat-completion client bound to one model and price table.
pub struct ChatClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    input_cost_per_1m: f64,
    output_cost_per_1m: f64,
}

impl ChatClient {
    /// Build a client from the `[llm]` config section, reading the API key
    /// from the configured environment variable.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            FeedHarvestError::config(format!(
                "LLM API key not found. Set the {} environment variable.",
                config.api_key_env
            ))
        })?;
        if api_key.is_empty() {
            return Err(FeedHarvestError::config(format!(
                "{} is set but empty",
                config.api_key_env
            )));
        }

        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| FeedHarvestError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            input_cost_per_1m: config.input_cost_per_1m,
            output_cost_per_1m: config.output_cost_per_1m,
        })
    }

    /// The model identifier sent with each request.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The API host, used as the engine partition key for API politeness.
    pub fn partition_key(&self) -> String {
        url::Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| self.base_url.clone())
    }

    /// Send a system+user message pair and return the completion.
    #[instrument(skip_all, fields(model = %self.model))]
    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<ChatOutcome> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens,
            temperature: TEMPERATURE,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| FeedHarvestError::Llm(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FeedHarvestError::Llm(format!(
                "HTTP {status}: {}",
                truncate(&body, 300)
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| FeedHarvestError::Llm(format!("invalid response body: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| FeedHarvestError::Llm("response contained no completion".into()))?;

        let usage = parsed.usage.unwrap_or_default();
        let cost_usd = self.cost_for(usage.prompt_tokens, usage.completion_tokens);

        debug!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            cost_usd,
            "chat completion received"
        );

        Ok(ChatOutcome {
            text,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            cost_usd,
        })
    }

    /// USD cost for a token usage pair under the configured prices.
    pub fn cost_for(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        let input = (prompt_tokens as f64 / 1_000_000.0) * self.input_cost_per_1m;
        let output = (completion_tokens as f64 / 1_000_000.0) * self.output_cost_per_1m;
        input + output
    }
}

/// Slice the first top-level JSON object out of a model response that may be
/// wrapped in prose or code fences.
pub fn extract_json(text: &str) -> Result<&str> {
    let start = text
        .find('{')
        .ok_or_else(|| FeedHarvestError::Llm("no JSON object in response".into()))?;
    let end = text
        .rfind('}')
        .ok_or_else(|| FeedHarvestError::Llm("unterminated JSON object in response".into()))?;
    if end < start {
        return Err(FeedHarvestError::Llm("malformed JSON object in response".into()));
    }
    Ok(&text[start..=end])
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(base_url: String) -> LlmConfig {
        LlmConfig {
            api_key_env: "FH_TEST_LLM_KEY".into(),
            base_url,
            model: "llama-3.3-70b-versatile".into(),
            input_cost_per_1m: 0.59,
            output_cost_per_1m: 0.79,
            max_budget_usd: 5.0,
            max_concurrent: 2,
            rate_limit_ms: 0,
        }
    }

    #[test]
    fn extract_json_variants() {
        assert_eq!(extract_json(r#"{"a": 1}"#).unwrap(), r#"{"a": 1}"#);
        assert_eq!(
            extract_json("Here you go:\n```json\n{\"a\": 1}\n```").unwrap(),
            r#"{"a": 1}"#
        );
        assert!(extract_json("no json here").is_err());
        assert!(extract_json("} backwards {").is_err());
    }

    #[tokio::test]
    async fn completes_and_prices_a_call() {
        let server = wiremock::MockServer::start().await;

        let body = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "{\"ok\": true}"}}],
            "usage": {"prompt_tokens": 1000000, "completion_tokens": 1000000, "total_tokens": 2000000}
        });

        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/chat/completions"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        // SAFETY: test-local env var, unique name.
        unsafe { std::env::set_var("FH_TEST_LLM_KEY", "test-key") };
        let client = ChatClient::from_config(&test_config(server.uri())).unwrap();

        let outcome = client
            .complete("You are a helpful assistant.", "Say ok as JSON.", 100)
            .await
            .expect("completion");

        assert_eq!(outcome.text, "{\"ok\": true}");
        assert_eq!(outcome.total_tokens(), 2_000_000);
        // 1M input at $0.59 + 1M output at $0.79.
        assert!((outcome.cost_usd - 1.38).abs() < 1e-9);
    }

    #[tokio::test]
    async fn http_error_surfaces_as_llm_error() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/chat/completions"))
            .respond_with(
                wiremock::ResponseTemplate::new(429).set_body_string("rate limit exceeded"),
            )
            .mount(&server)
            .await;

        unsafe { std::env::set_var("FH_TEST_LLM_KEY", "test-key") };
        let client = ChatClient::from_config(&test_config(server.uri())).unwrap();
        let err = client.complete("s", "u", 100).await.unwrap_err();
        assert!(err.to_string().contains("429"));
    }

    #[test]
    fn partition_key_is_the_api_host() {
        unsafe { std::env::set_var("FH_TEST_LLM_KEY", "test-key") };
        let client =
            ChatClient::from_config(&test_config("https://api.groq.com/openai/v1".into())).unwrap();
        assert_eq!(client.partition_key(), "api.groq.com");
    }
}
