// OpenAI-compatible chat completions over blocking HTTP

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{CompletionProvider, OracleError};

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: Option<String>,
}

/// Production completion provider; the API key is read from the environment on every call
#[derive(Debug, Clone)]
pub struct HttpCompletionProvider {
    endpoint: String,
    model: String,
    api_key_env: String,
    max_tokens: u32,
    timeout: Duration,
}

impl HttpCompletionProvider {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key_env: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            api_key_env: api_key_env.into(),
            max_tokens: 4096,
            timeout: Duration::from_secs(300),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn api_key(&self) -> Result<String, OracleError> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| OracleError::Unavailable(format!("{} is not set", self.api_key_env)))
    }
}

impl CompletionProvider for HttpCompletionProvider {
    fn complete(&self, prompt: &str) -> Result<String, OracleError> {
        let api_key = self.api_key()?;

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| OracleError::Unavailable(format!("HTTP client: {}", e)))?;

        let request = ChatRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.max_tokens,
        };

        debug!("POST {} (model {})", self.endpoint, self.model);
        let response = client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .map_err(|e| OracleError::Unavailable(format!("request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|e| OracleError::Unavailable(format!("reading response: {}", e)))?;

        if !status.is_success() {
            return Err(OracleError::Unavailable(format!(
                "API error {}: {}",
                status,
                truncate_str(&text, 200)
            )));
        }

        parse_completion(&text)
    }
}

fn parse_completion(body: &str) -> Result<String, OracleError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| OracleError::Malformed(format!("completion body: {}", e)))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| OracleError::Malformed("empty completion".to_string()))
}

/// Truncate for display without splitting a character
fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
