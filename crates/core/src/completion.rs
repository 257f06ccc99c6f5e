use crate::error::CompletionError;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1/";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Models with a context window at or below this are too small for a
/// prefilter chunk.
pub const DEFAULT_MIN_CONTEXT_WINDOW: u64 = 9_100;

const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub system: &'a str,
    pub user: &'a str,
    pub temperature: f32,
    pub seed: u64,
}

/// A chat-completion backend. Each call is one blocking round trip.
pub trait CompletionClient {
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, CompletionError>;
}

impl<T: CompletionClient + ?Sized> CompletionClient for &T {
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, CompletionError> {
        (**self).complete(request)
    }
}

impl<T: CompletionClient + ?Sized> CompletionClient for std::sync::Arc<T> {
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, CompletionError> {
        (**self).complete(request)
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionPayload<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    seed: u64,
}

impl<'a> From<&CompletionRequest<'a>> for ChatCompletionPayload<'a> {
    fn from(request: &CompletionRequest<'a>) -> Self {
        Self {
            model: request.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: request.system,
                },
                ChatMessage {
                    role: "user",
                    content: request.user,
                },
            ],
            temperature: request.temperature,
            seed: request.seed,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: Option<ChatReply>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub owned_by: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub context_window: Option<u64>,
    #[serde(default)]
    pub max_completion_tokens: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct ModelListResponse {
    #[serde(default)]
    data: Vec<ModelInfo>,
}

#[derive(Debug, Clone)]
pub struct ChatCompletionsClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl ChatCompletionsClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, CompletionError> {
        let base_url = normalize_base_url(base_url)?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| CompletionError::Transport {
                endpoint: base_url.to_string(),
                details: format!("failed to build http client: {error}"),
            })?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        })
    }

    /// Models whose context window exceeds `min_context_window`, sorted by id
    /// descending.
    pub fn list_models(&self, min_context_window: u64) -> Result<Vec<ModelInfo>, CompletionError> {
        let endpoint = self.base_url.join("models")?;
        let mut request = self.client.get(endpoint.clone());
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .map_err(|error| transport_error(&endpoint, &error))?;
        let response = check_status(&endpoint, response)?;
        let listed: ModelListResponse = response
            .json()
            .map_err(|error| CompletionError::MalformedResponse(error.to_string()))?;

        Ok(filter_models(listed.data, min_context_window))
    }
}

impl CompletionClient for ChatCompletionsClient {
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, CompletionError> {
        let endpoint = self.base_url.join("chat/completions")?;
        let payload = ChatCompletionPayload::from(request);

        let mut http = self
            .client
            .post(endpoint.clone())
            .header("content-type", "application/json")
            .json(&payload);
        if let Some(api_key) = &self.api_key {
            http = http.bearer_auth(api_key);
        }

        let response = http
            .send()
            .map_err(|error| transport_error(&endpoint, &error))?;
        let response = check_status(&endpoint, response)?;
        let body = response
            .text()
            .map_err(|error| transport_error(&endpoint, &error))?;

        completion_text(&body)
    }
}

fn normalize_base_url(base_url: &str) -> Result<Url, CompletionError> {
    let trimmed = base_url.trim();
    if trimmed.ends_with('/') {
        Ok(Url::parse(trimmed)?)
    } else {
        Ok(Url::parse(&format!("{trimmed}/"))?)
    }
}

fn transport_error(endpoint: &Url, error: &reqwest::Error) -> CompletionError {
    let details = if error.is_timeout() {
        format!("request timed out: {error}")
    } else {
        error.to_string()
    };
    CompletionError::Transport {
        endpoint: endpoint.to_string(),
        details,
    }
}

/// Auth rejections are reported as transport failures. Any other non-2xx is
/// a status error.
fn check_status(
    endpoint: &Url,
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, CompletionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body: String = response
        .text()
        .unwrap_or_default()
        .chars()
        .take(MAX_ERROR_BODY_CHARS)
        .collect();

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(CompletionError::Transport {
            endpoint: endpoint.to_string(),
            details: format!("authentication rejected ({status}): {body}"),
        });
    }

    Err(CompletionError::Status {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        body,
    })
}

fn completion_text(body: &str) -> Result<String, CompletionError> {
    let parsed: ChatCompletionResponse = serde_json::from_str(body)
        .map_err(|error| CompletionError::MalformedResponse(format!("{error}: {body}")))?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .ok_or_else(|| {
            CompletionError::MalformedResponse(format!(
                "response has no choices[0].message.content: {body}"
            ))
        })
}

fn filter_models(models: Vec<ModelInfo>, min_context_window: u64) -> Vec<ModelInfo> {
    let mut models: Vec<ModelInfo> = models
        .into_iter()
        .filter(|model| {
            model
                .context_window
                .is_some_and(|window| window > min_context_window)
        })
        .collect();
    models.sort_by(|left, right| right.id.cmp(&left.id));
    models
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_roles_temperature_and_seed() {
        let request = CompletionRequest {
            model: "llama-3.1-8b-instant",
            system: "system text",
            user: "user text",
            temperature: 0.1,
            seed: 123,
        };

        let payload = serde_json::to_value(ChatCompletionPayload::from(&request)).unwrap();
        assert_eq!(payload["model"], "llama-3.1-8b-instant");
        assert_eq!(payload["messages"][0]["role"], "system");
        assert_eq!(payload["messages"][0]["content"], "system text");
        assert_eq!(payload["messages"][1]["role"], "user");
        assert_eq!(payload["messages"][1]["content"], "user text");
        assert_eq!(payload["seed"], 123);
        assert!((payload["temperature"].as_f64().unwrap() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn completion_text_reads_first_choice() {
        let body = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"hello"}}]}"#;
        assert_eq!(completion_text(body).unwrap(), "hello");
    }

    #[test]
    fn completion_without_content_is_malformed() {
        let error = completion_text(r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(error, CompletionError::MalformedResponse(_)));
        assert!(!error.is_transport());

        let error = completion_text("<html>bad gateway</html>").unwrap_err();
        assert!(matches!(error, CompletionError::MalformedResponse(_)));
    }

    #[test]
    fn base_url_gains_trailing_slash_so_joins_keep_the_path() {
        let url = normalize_base_url("https://api.groq.com/openai/v1").unwrap();
        assert_eq!(
            url.join("chat/completions").unwrap().as_str(),
            "https://api.groq.com/openai/v1/chat/completions"
        );
        assert!(normalize_base_url("not a url").is_err());
    }

    #[test]
    fn models_are_filtered_by_context_window_and_sorted_descending() {
        let model = |id: &str, window: Option<u64>| ModelInfo {
            id: id.to_string(),
            owned_by: None,
            active: Some(true),
            context_window: window,
            max_completion_tokens: None,
        };

        let filtered = filter_models(
            vec![
                model("alpha", Some(131_072)),
                model("whisper", Some(448)),
                model("gamma", Some(9_100)),
                model("zeta", Some(32_768)),
                model("unknown", None),
            ],
            DEFAULT_MIN_CONTEXT_WINDOW,
        );

        let ids: Vec<&str> = filtered.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["zeta", "alpha"]);
    }

    #[test]
    fn unreachable_endpoint_is_a_transport_error() {
        let client = ChatCompletionsClient::new(
            "http://127.0.0.1:9/v1",
            Some("key".to_string()),
            Duration::from_millis(500),
        )
        .unwrap();
        let request = CompletionRequest {
            model: "m",
            system: "s",
            user: "u",
            temperature: 0.0,
            seed: 123,
        };

        let error = client.complete(&request).unwrap_err();
        assert!(error.is_transport(), "unexpected error: {error}");
    }
}
