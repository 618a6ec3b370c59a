//! HTTP/JSON gateway adapter.
//!
//! Records map to `{base_url}/{path}.json`; a 404 is authoritative absence.
//! Files are uploaded with `PUT {base_url}/files/{remote_path}` and the
//! backend answers `{"url": "..."}`.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{GatewayError, GatewayResult, RemoteGateway};
use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::path::RecordPath;

/// Gateway speaking JSON over HTTP.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
}

impl HttpGateway {
    /// Create a gateway for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        auth_token: Option<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Gateway(GatewayError::Transport(e.to_string())))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
        })
    }

    /// Create a gateway from the remote configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        Self::new(
            config.base_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
            config.auth_token.clone(),
        )
    }

    fn record_url(&self, path: &RecordPath) -> String {
        format!("{}/{}.json", self.base_url, path)
    }

    fn file_url(&self, remote_path: &str) -> String {
        format!(
            "{}/files/{}",
            self.base_url,
            remote_path.trim_start_matches('/')
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> GatewayResult<Response> {
        self.authorize(request)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))
    }

    async fn reject(response: Response) -> GatewayError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        GatewayError::Rejected { status, message }
    }

    async fn json(response: Response) -> GatewayResult<Value> {
        response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

#[async_trait::async_trait]
impl RemoteGateway for HttpGateway {
    async fn get(&self, path: &RecordPath) -> GatewayResult<Option<Value>> {
        let response = self.send(self.client.get(self.record_url(path))).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => match Self::json(response).await? {
                // Some backends answer `null` instead of 404.
                Value::Null => Ok(None),
                value => Ok(Some(value)),
            },
            _ => Err(Self::reject(response).await),
        }
    }

    async fn set(&self, path: &RecordPath, value: &Value) -> GatewayResult<()> {
        let response = self
            .send(self.client.put(self.record_url(path)).json(value))
            .await?;
        if response.status().is_success() {
            debug!(path = %path, "remote write accepted");
            Ok(())
        } else {
            Err(Self::reject(response).await)
        }
    }

    async fn delete(&self, path: &RecordPath) -> GatewayResult<()> {
        let response = self.send(self.client.delete(self.record_url(path))).await?;
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(Self::reject(response).await)
        }
    }

    async fn list(&self, prefix: &RecordPath) -> GatewayResult<Vec<Value>> {
        let response = self.send(self.client.get(self.record_url(prefix))).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            s if s.is_success() => items_of(Self::json(response).await?),
            _ => Err(Self::reject(response).await),
        }
    }

    async fn upload(&self, remote_path: &str, bytes: Vec<u8>) -> GatewayResult<String> {
        let response = self
            .send(
                self.client
                    .put(self.file_url(remote_path))
                    .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                    .body(bytes),
            )
            .await?;
        if !response.status().is_success() {
            return Err(Self::reject(response).await);
        }
        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        Ok(body.url)
    }
}

/// Flatten a listing response: arrays as-is, objects by key order, null as empty.
fn items_of(value: Value) -> GatewayResult<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(map) => Ok(map.into_iter().map(|(_, v)| v).collect()),
        Value::Null => Ok(Vec::new()),
        other => Err(GatewayError::Decode(format!(
            "expected a list, got {other}"
        ))),
    }
}
