//! Home Assistant REST client (supervisor or direct core API).

use crate::source::snapshot::snapshot_from_state;
use crate::source::{SourceError, StateSource};
use crate::state::PlayerSnapshot;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

pub struct HomeAssistant {
    client: Client,
    /// Base of the REST API, e.g. `http://supervisor/core/api`.
    api_url: String,
    token: Option<String>,
}

impl HomeAssistant {
    pub fn new(api_url: &str, token: Option<String>) -> Result<Self, SourceError> {
        let client = Client::builder()
            .user_agent(crate::lyrics::types::USER_AGENT)
            .timeout(TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    fn authorized(&self, req: RequestBuilder) -> Result<RequestBuilder, SourceError> {
        let token = self.token.as_deref().ok_or(SourceError::MissingToken)?;
        Ok(req.bearer_auth(token))
    }

    /// Absolute URL for an artwork reference. `entity_picture` values are
    /// server-relative (`/api/media_player_proxy/...`), so they hang off the
    /// host part of the API URL.
    pub fn resolve_url(&self, reference: &str) -> String {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return reference.to_string();
        }
        let root = self
            .api_url
            .strip_suffix("/api")
            .unwrap_or(&self.api_url);
        format!("{}/{}", root, reference.trim_start_matches('/'))
    }

    /// Raw bytes behind an artwork reference.
    pub async fn fetch_bytes(&self, reference: &str) -> Result<Vec<u8>, SourceError> {
        let url = self.resolve_url(reference);
        let resp = self.authorized(self.client.get(&url))?.send().await?;
        if !resp.status().is_success() {
            return Err(SourceError::Status(resp.status()));
        }
        Ok(resp.bytes().await?.to_vec())
    }

    /// `POST /services/<domain>/<service>`.
    pub async fn call_service(&self, domain: &str, service: &str, data: &Value) -> Result<(), SourceError> {
        let url = format!("{}/services/{}/{}", self.api_url, domain, service);
        let resp = self
            .authorized(self.client.post(&url))?
            .json(data)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SourceError::Status(resp.status()));
        }
        Ok(())
    }
}

#[async_trait]
impl StateSource for HomeAssistant {
    async fn fetch(&self, entity_id: &str) -> Result<PlayerSnapshot, SourceError> {
        let url = format!("{}/states/{}", self.api_url, entity_id);
        let resp = self.authorized(self.client.get(&url))?.send().await?;
        if !resp.status().is_success() {
            return Err(SourceError::Status(resp.status()));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| SourceError::Malformed(e.to_string()))?;
        snapshot_from_state(&body)
    }
}
