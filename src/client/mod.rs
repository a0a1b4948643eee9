//! Proxmox REST API access
//!
//! [`ApiClient`] is the seam between the guest-agent protocol and HTTP. The
//! protocol code only ever calls [`get`](ApiClient::get) and
//! [`post`](ApiClient::post) with an API path relative to `/api2/json/` and
//! a list of parameters, and gets back the `data` member of the response.
//!
//! [`ProxmoxClient`] is the production implementation on top of `reqwest`.

mod proxmox;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

pub use proxmox::ProxmoxClient;

/// Request parameters: query string for GET/DELETE, form body for POST/PUT
pub type Params<'a> = [(&'a str, String)];

/// Authenticated access to the Proxmox API
///
/// Implementations return `Error::Authentication` when credentials are
/// rejected and `Error::Api` for other non-success statuses, so callers can
/// tell the two apart.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Issue one request and return the decoded `data` member (or `null`)
    async fn request(&self, method: Method, path: &str, params: &Params<'_>) -> crate::Result<Value>;

    /// GET with query parameters
    async fn get(&self, path: &str, params: &Params<'_>) -> crate::Result<Value> {
        self.request(Method::GET, path, params).await
    }

    /// POST with form parameters
    async fn post(&self, path: &str, params: &Params<'_>) -> crate::Result<Value> {
        self.request(Method::POST, path, params).await
    }

    /// PUT with form parameters
    async fn put(&self, path: &str, params: &Params<'_>) -> crate::Result<Value> {
        self.request(Method::PUT, path, params).await
    }

    /// DELETE with query parameters
    async fn delete(&self, path: &str, params: &Params<'_>) -> crate::Result<Value> {
        self.request(Method::DELETE, path, params).await
    }
}
