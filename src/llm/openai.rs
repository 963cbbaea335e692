use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{build_client, GenerationParams, LlmProvider};
use crate::http::{check_status, ProviderError};

const SYSTEM_PROMPT: &str =
    "You classify event-log messages. Reply with a single JSON object and nothing else.";

/// OpenAI chat-completions provider.
pub struct OpenAiProvider {
    api_key: String,
    model: String,
    endpoint: String,
    params: GenerationParams,
    client: Client,
}

impl OpenAiProvider {
    /// Builds a provider against `base_url` (e.g. `https://api.openai.com/v1`).
    pub fn new(
        api_key: String,
        model: String,
        base_url: &str,
        params: GenerationParams,
    ) -> Result<Self, ProviderError> {
        let client = build_client(params.timeout, "OpenAI")?;
        Ok(Self {
            api_key,
            model,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            params,
            client,
        })
    }
}

impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", self.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| ProviderError::Client("invalid OpenAI API key".to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let body = ChatRequest {
            model: &self.model,
            temperature: self.params.temperature,
            max_tokens: self.params.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .headers(headers)
            .json(&body)
            .send()?;
        let parsed: ChatResponse = check_status(resp)?.json()?;
        parsed.into_text()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatResponse {
    fn into_text(self) -> Result<String, ProviderError> {
        self.choices
            .into_iter()
            .filter_map(|choice| choice.message.content)
            .find(|content| !content.trim().is_empty())
            .ok_or_else(|| {
                ProviderError::InvalidResponse("OpenAI response had no content".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_content_is_skipped() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":null}},{"message":{"content":"{}"}}]}"#,
        )
        .expect("parse");
        assert_eq!(parsed.into_text().expect("content"), "{}");
    }

    #[test]
    fn response_without_content_is_invalid() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":null,"refusal":"no"}}]}"#,
        )
        .expect("parse");
        assert!(matches!(parsed.into_text(), Err(ProviderError::InvalidResponse(_))));

        let empty: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).expect("parse");
        assert!(empty.into_text().is_err());
    }

    #[test]
    fn endpoint_joins_base_url() {
        let provider = OpenAiProvider::new(
            "key".into(),
            "gpt-4o-mini".into(),
            "https://api.openai.com/v1/",
            GenerationParams::default(),
        )
        .expect("provider");
        assert_eq!(provider.endpoint, "https://api.openai.com/v1/chat/completions");
    }
}
