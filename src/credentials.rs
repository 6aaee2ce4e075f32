//! Tunnel credential sources
//!
//! A connector authenticates to Cloudflare with a tunnel token. The token is
//! fetched right before the connector Deployment is created and embedded in its
//! command line; it is never logged or cached here.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

/// Default Cloudflare v4 API base URL
pub const DEFAULT_CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Errors returned by a credential source
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Transport failure reaching the tunnel service
    #[error("http error: {0}")]
    Http(String),

    /// The tunnel service rejected the request
    #[error("tunnel API returned {status}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error details reported by the service
        message: String,
    },

    /// The response could not be understood
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Source of single-use tunnel tokens
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Obtain a tunnel token for the connector
    async fn fetch_credential(&self) -> Result<String, CredentialError>;
}

/// Cloudflare API client scoped to one tunnel
#[derive(Clone)]
pub struct CloudflareTunnelClient {
    http: reqwest::Client,
    api_base: String,
    api_token: String,
    account_id: String,
    tunnel_id: String,
}

impl std::fmt::Debug for CloudflareTunnelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareTunnelClient")
            .field("api_base", &self.api_base)
            .field("account_id", &self.account_id)
            .field("tunnel_id", &self.tunnel_id)
            .finish_non_exhaustive()
    }
}

impl CloudflareTunnelClient {
    /// Create a client for the given account and tunnel
    pub fn new(
        api_token: impl Into<String>,
        account_id: impl Into<String>,
        tunnel_id: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: DEFAULT_CLOUDFLARE_API_BASE.to_string(),
            api_token: api_token.into(),
            account_id: account_id.into(),
            tunnel_id: tunnel_id.into(),
        }
    }

    /// Point the client at a different API base URL
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn token_url(&self) -> String {
        format!(
            "{}/accounts/{}/cfd_tunnel/{}/token",
            self.api_base, self.account_id, self.tunnel_id
        )
    }
}

/// Cloudflare v4 response envelope
#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    #[serde(default)]
    result: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    code: i64,
    message: String,
}

fn describe(errors: &[ApiMessage]) -> String {
    if errors.is_empty() {
        return "no error details".to_string();
    }
    errors
        .iter()
        .map(|e| format!("{} ({})", e.message, e.code))
        .collect::<Vec<_>>()
        .join("; ")
}

#[async_trait]
impl CredentialSource for CloudflareTunnelClient {
    async fn fetch_credential(&self) -> Result<String, CredentialError> {
        debug!(tunnel_id = %self.tunnel_id, "requesting tunnel token");

        let response = self
            .http
            .get(self.token_url())
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| CredentialError::Http(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CredentialError::Http(e.to_string()))?;

        let envelope: Option<ApiEnvelope> = serde_json::from_str(&body).ok();

        if !status.is_success() {
            let message = match &envelope {
                Some(envelope) => describe(&envelope.errors),
                None => body,
            };
            return Err(CredentialError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let envelope = envelope.ok_or_else(|| {
            CredentialError::InvalidResponse("response body is not a Cloudflare API envelope".to_string())
        })?;

        if !envelope.success {
            return Err(CredentialError::Api {
                status: status.as_u16(),
                message: describe(&envelope.errors),
            });
        }

        envelope
            .result
            .filter(|token| !token.is_empty())
            .ok_or_else(|| CredentialError::InvalidResponse("response carries no token".to_string()))
    }
}
