//! `reqwest` implementation of [`ApiClient`]

use super::{ApiClient, Params};
use crate::config::{ApiConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::retry::with_retry;
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use url::Url;

/// Proxmox API client authenticating with an API token
///
/// Cheap to clone; clones share the underlying connection pool. GET requests
/// are retried on transient failures according to the [`RetryConfig`]. Other
/// methods are sent exactly once.
///
/// HTTP 401 becomes [`Error::Authentication`]; every other failure status,
/// 403 included, becomes [`Error::Api`].
#[derive(Clone)]
pub struct ProxmoxClient {
    http: reqwest::Client,
    base_url: Url,
    auth_header: String,
    retry: RetryConfig,
}

impl std::fmt::Debug for ProxmoxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxmoxClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl ProxmoxClient {
    /// Build a client for `https://{host}:{port}/api2/json/`
    pub fn new(api: &ApiConfig, retry: RetryConfig) -> Result<Self> {
        Self::with_base_url(&api.base_url(), api, retry)
    }

    /// Build a client against an explicit base URL (ending in `/api2/json/`)
    pub fn with_base_url(base_url: &str, api: &ApiConfig, retry: RetryConfig) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| Error::config("api.host", format!("invalid API URL {base_url}: {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!api.verify_ssl)
            .timeout(api.request_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url,
            auth_header: api.auth_header(),
            retry,
        })
    }

    async fn send_once(&self, method: Method, path: &str, params: &Params<'_>) -> Result<Value> {
        let url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::InvalidResponse(format!("invalid API path {path}: {e}")))?;

        tracing::debug!(%method, path, "API request");

        let mut request = self
            .http
            .request(method.clone(), url)
            .header(AUTHORIZATION, &self.auth_header);
        request = if method == Method::GET || method == Method::DELETE {
            request.query(params)
        } else {
            request.form(params)
        };

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = error_message(status, response).await;
            tracing::debug!(%method, path, status = status.as_u16(), %message, "API request failed");
            // 403 also covers ACL denials for a valid token, so only 401 is
            // treated as rejected credentials
            return Err(
                if status == StatusCode::UNAUTHORIZED {
                    Error::Authentication {
                        status: status.as_u16(),
                        message,
                    }
                } else {
                    Error::Api {
                        status: status.as_u16(),
                        message,
                    }
                },
            );
        }

        let body = response.bytes().await?;
        match serde_json::from_slice::<Value>(&body)? {
            Value::Object(mut map) => Ok(map.remove("data").unwrap_or(Value::Null)),
            other => Err(Error::InvalidResponse(format!(
                "expected a JSON object from {path}, got {other}"
            ))),
        }
    }
}

#[async_trait]
impl ApiClient for ProxmoxClient {
    async fn request(&self, method: Method, path: &str, params: &Params<'_>) -> Result<Value> {
        if method == Method::GET {
            with_retry(&self.retry, || self.send_once(Method::GET, path, params)).await
        } else {
            self.send_once(method, path, params).await
        }
    }
}

async fn error_message(status: StatusCode, response: reqwest::Response) -> String {
    let reason = status
        .canonical_reason()
        .unwrap_or("unknown status")
        .to_string();
    let body = response.text().await.unwrap_or_default();

    match serde_json::from_str::<Value>(&body) {
        Ok(json) => {
            if let Some(errors) = json.get("errors").filter(|e| !e.is_null()) {
                format!("{reason}: {errors}")
            } else if let Some(message) = json.get("message").and_then(Value::as_str) {
                message.trim().to_string()
            } else {
                reason
            }
        }
        Err(_) if !body.trim().is_empty() => body.trim().to_string(),
        Err(_) => reason,
    }
}
