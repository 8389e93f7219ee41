use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use meridian_core::{Collaborator, CoreError};

use crate::clients::extract_id;
use crate::ports::{ClientError, InboundItem, PostReceipt, SocialClient};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Reference social client publishing through a platform webhook/bridge URL.
///
/// Platforms without an inbox URL simply have nothing to fetch; engagement
/// monitoring skips them.
pub struct WebhookSocialClient {
    platform: String,
    webhook_url: String,
    inbox_url: Option<String>,
    token: Option<String>,
    http: reqwest::Client,
}

impl WebhookSocialClient {
    pub fn new(
        platform: impl Into<String>,
        webhook_url: impl Into<String>,
        inbox_url: Option<String>,
        token: Option<String>,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            platform: platform.into().to_ascii_lowercase(),
            webhook_url: webhook_url.into(),
            inbox_url,
            token,
            http,
        })
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn publish(&self, payload: Value) -> Result<PostReceipt, ClientError> {
        let response = self
            .authorized(self.http.post(&self.webhook_url))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Rejected(format!(
                "{} returned {status}",
                self.platform
            )));
        }

        let body: Option<Value> = response.json().await.ok();
        let id = extract_id(body.as_ref(), &["id", "message_id"]);
        debug!(platform = %self.platform, %id, "content published");
        Ok(PostReceipt { id })
    }
}

#[async_trait]
impl SocialClient for WebhookSocialClient {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn post(&self, content: &str) -> Result<PostReceipt, ClientError> {
        self.publish(json!({ "content": content })).await
    }

    async fn fetch_new_items(&self, since: Option<&str>) -> Result<Vec<InboundItem>, ClientError> {
        let Some(inbox_url) = &self.inbox_url else {
            return Ok(Vec::new());
        };

        let mut req = self.authorized(self.http.get(inbox_url));
        if let Some(since) = since {
            req = req.query(&[("since", since)]);
        }

        let response = req.send().await?;
        if !response.status().is_success() {
            return Err(ClientError::Rejected(format!(
                "{} inbox returned {}",
                self.platform,
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    async fn reply(&self, item_id: &str, content: &str) -> Result<PostReceipt, ClientError> {
        self.publish(json!({ "content": content, "in_reply_to": item_id }))
            .await
    }

    async fn probe(&self) -> Result<(), ClientError> {
        // Reachability only: any HTTP answer proves the endpoint is there,
        // even one that refuses an empty GET.
        self.http.get(&self.webhook_url).send().await?;
        Ok(())
    }
}

#[async_trait]
impl Collaborator for WebhookSocialClient {
    fn name(&self) -> &str {
        &self.platform
    }

    async fn probe(&self) -> Result<(), CoreError> {
        SocialClient::probe(self)
            .await
            .map_err(|e| CoreError::Probe(e.to_string()))
    }

    async fn close(&self) {}
}
