//! Abstract LLM classifier port.
//!
//! The orchestration core never talks to a concrete model provider; it hands
//! a prompt to this port and parses the `DEPARTMENT|CONFIDENCE` reply. Any
//! failure on this path falls back to the keyword scorer.

use async_trait::async_trait;
use serde_json::json;

use crate::utils::error::{DirectorError, DirectorResult};

/// Completion port implemented by an external model provider.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn complete(&self, prompt: &str) -> DirectorResult<String>;
}

/// HTTP-backed classifier posting the prompt to a configured endpoint.
pub struct HttpClassifier {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl HttpClassifier {
    #[must_use]
    pub fn new(endpoint: String, api_key: Option<String>, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn complete(&self, prompt: &str) -> DirectorResult<String> {
        let mut request = self.client.post(&self.endpoint).json(&json!({
            "model": self.model,
            "prompt": prompt,
            "max_tokens": 50,
            "temperature": 0.1,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DirectorError::ClassifierUnavailable {
                reason: format!("classifier request failed: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(DirectorError::ClassifierUnavailable {
                reason: format!("classifier returned status {}", response.status()),
            });
        }

        let body: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| DirectorError::ClassifierUnavailable {
                    reason: format!("classifier response unreadable: {e}"),
                })?;

        body.get("completion")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| DirectorError::ClassifierUnavailable {
                reason: "classifier response missing completion field".to_string(),
            })
    }
}
