use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use meridian_core::{Collaborator, CoreError};

use crate::ports::{ClientError, TextGenerator};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Reference text-generation client for an HTTP completion service:
/// `POST <url>` with `{prompt, max_length}`, answered with `{"text": ...}`
/// (a plain-text body is tolerated).
pub struct HttpTextGenerator {
    url: String,
    api_key: String,
    http: reqwest::Client,
}

impl HttpTextGenerator {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            url: url.into(),
            api_key: api_key.into(),
            http,
        })
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(&self, prompt: &str, max_length: usize) -> Result<String, ClientError> {
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&json!({ "prompt": prompt, "max_length": max_length }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Rejected(format!(
                "generation service returned {status}"
            )));
        }

        let body = response.text().await?;
        match serde_json::from_str::<Value>(&body) {
            Ok(value) => match value.get("text").and_then(Value::as_str) {
                Some(text) => Ok(text.to_string()),
                None => Err(ClientError::Rejected(
                    "generation response missing text field".to_string(),
                )),
            },
            Err(_) => Ok(body),
        }
    }

    async fn probe(&self) -> Result<(), ClientError> {
        self.http.get(&self.url).send().await?;
        Ok(())
    }
}

#[async_trait]
impl Collaborator for HttpTextGenerator {
    fn name(&self) -> &str {
        "generator"
    }

    async fn probe(&self) -> Result<(), CoreError> {
        TextGenerator::probe(self)
            .await
            .map_err(|e| CoreError::Probe(e.to_string()))
    }

    async fn close(&self) {}
}
