use backoff::{future::retry, Error as BackoffError, ExponentialBackoff};
use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::llm::types::*;

pub struct AnthropicClient {
    http: Client,
    config: LlmConfig,
    api_key: String,
}

impl AnthropicClient {
    pub fn new(config: LlmConfig, api_key: String) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Http(e.to_string()))?;

        Ok(Self { http, config, api_key })
    }

    fn headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key).map_err(|e| LlmError::InvalidHeader(e.to_string()))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        insert_extra_headers(&mut headers, &self.config.extra_headers)?;
        Ok(headers)
    }

    pub async fn messages(&self, request: &MessageRequest<'_>) -> Result<ModelResponse, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        let result: AnthropicResponse = post_with_retry(&self.http, &url, self.headers()?, request).await?;
        debug!(id = %result.id, model = %result.model, stop_reason = ?result.stop_reason, "messages call returned");

        ModelResponse::try_from(result)
    }
}

impl ModelClient for AnthropicClient {
    fn create_message<'a>(
        &'a self,
        request: &'a MessageRequest<'a>,
    ) -> BoxFuture<'a, Result<ModelResponse, LlmError>> {
        Box::pin(self.messages(request))
    }
}

/// POSTs a JSON body and decodes the reply, retrying timeouts, 429s and 5xx
/// responses with exponential backoff.
pub(crate) async fn post_with_retry<B, T>(http: &Client, url: &str, headers: HeaderMap, body: &B) -> Result<T, LlmError>
where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
{
    let operation = || async {
        let response = http
            .post(url)
            .headers(headers.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackoffError::transient(LlmError::Timeout)
                } else {
                    BackoffError::transient(LlmError::Http(e.to_string()))
                }
            })?;

        let status = response.status();

        if status.is_success() {
            response
                .json::<T>()
                .await
                .map_err(|e| BackoffError::permanent(LlmError::InvalidResponse(e.to_string())))
        } else {
            let error_text = api_error_message(response.text().await.unwrap_or_default());
            warn!(status = status.as_u16(), url, "model call failed: {}", error_text);
            match status {
                StatusCode::TOO_MANY_REQUESTS => Err(BackoffError::transient(LlmError::RateLimited)),
                StatusCode::UNAUTHORIZED => Err(BackoffError::permanent(LlmError::Api {
                    status: 401,
                    message: "Invalid API key".to_string(),
                })),
                _ if status.as_u16() >= 500 => Err(BackoffError::transient(LlmError::Api {
                    status: status.as_u16(),
                    message: error_text,
                })),
                _ => Err(BackoffError::permanent(LlmError::Api {
                    status: status.as_u16(),
                    message: error_text,
                })),
            }
        }
    };

    let backoff = ExponentialBackoff {
        initial_interval: Duration::from_millis(500),
        max_interval: Duration::from_secs(4),
        max_elapsed_time: Some(Duration::from_secs(30)),
        ..Default::default()
    };

    retry(backoff, operation).await
}

/// Copies string-valued entries of `extra` into `headers`.
pub(crate) fn insert_extra_headers(headers: &mut HeaderMap, extra: &Value) -> Result<(), LlmError> {
    if let Some(obj) = extra.as_object() {
        for (key, value) in obj {
            if let Some(val_str) = value.as_str() {
                let name = HeaderName::from_bytes(key.as_bytes())
                    .map_err(|e| LlmError::InvalidHeader(format!("{}: {}", key, e)))?;
                let value = HeaderValue::from_str(val_str)
                    .map_err(|e| LlmError::InvalidHeader(format!("{}: {}", key, e)))?;
                headers.insert(name, value);
            }
        }
    }
    Ok(())
}

/// Pulls `error.message` out of an API error body, falling back to the raw text.
fn api_error_message(body: String) -> String {
    serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;

    #[test]
    fn test_api_error_message() {
        let body = r#"{"type":"error","error":{"type":"invalid_request_error","message":"max_tokens: too large"}}"#;
        assert_eq!(api_error_message(body.to_string()), "max_tokens: too large");
        assert_eq!(api_error_message("gateway down".to_string()), "gateway down");
    }

    #[test]
    fn test_headers_include_extras() {
        let client = AnthropicClient::new(LlmConfig::default(), "sk-test".into()).unwrap();
        let headers = client.headers().unwrap();
        assert_eq!(headers["x-api-key"], "sk-test");
        assert_eq!(headers["anthropic-version"], ANTHROPIC_VERSION);
        assert_eq!(headers["anthropic-beta"], "prompt-caching-2024-07-31");
    }

    #[tokio::test]
    async fn test_missing_key_fails_fast() {
        let client = AnthropicClient::new(LlmConfig::default(), String::new()).unwrap();
        let messages = vec![Message::user_text("hi")];
        let request = MessageRequest {
            model: "m",
            max_tokens: 8,
            system: None,
            messages: &messages,
            tools: &[],
            temperature: None,
        };
        assert!(matches!(client.messages(&request).await, Err(LlmError::MissingApiKey)));
    }
}
