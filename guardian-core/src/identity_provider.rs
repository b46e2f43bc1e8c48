//! The external identity provider, consulted only to gate provisioning.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::{
    error::{GuardianError, GuardianResult},
    http_request::{join_path, unexpected_status, Request},
};

#[cfg(any(test, feature = "test-utils"))]
mod memory;
#[cfg(any(test, feature = "test-utils"))]
pub use memory::InMemoryIdentityProvider;

/// Directory lookups Guardian needs from the identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Whether `username` is an account in the provider's organisation.
    ///
    /// # Errors
    /// [`GuardianError::ProviderUnavailable`] on transport failure and
    /// [`GuardianError::IdentityProviderRejected`] if the provider refuses
    /// Guardian's API token, and [`GuardianError::InvalidInput`] for a name
    /// that cannot be a single path segment.
    async fn account_exists(&self, username: &str) -> GuardianResult<bool>;
}

/// Okta management API client authenticated with an SSWS API token.
pub struct OktaClient {
    base_url: String,
    token: SecretString,
    request: Request,
}

impl OktaClient {
    /// Creates a client for the organisation at `org`.
    ///
    /// `org` may be a full URL or a bare organisation name; `acme` expands to
    /// `https://acme.okta.com`.
    #[must_use]
    pub fn new(org: &str, token: SecretString, timeout: Option<Duration>) -> Self {
        Self {
            base_url: org_base_url(org),
            token,
            request: Request::new(timeout),
        }
    }

    /// The organisation URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn org_base_url(org: &str) -> String {
    let org = org.trim().trim_end_matches('/');
    if org.contains("://") {
        org.to_string()
    } else if org.contains('.') {
        format!("https://{org}")
    } else {
        format!("https://{org}.okta.com")
    }
}

#[async_trait]
impl IdentityProvider for OktaClient {
    async fn account_exists(&self, username: &str) -> GuardianResult<bool> {
        let operation = "get provider user";
        let url = join_path(&self.base_url, ["api", "v1", "users", username])?;
        let builder = self
            .request
            .get(&url)
            .header("Accept", "application/json")
            .header(
                "Authorization",
                format!("SSWS {}", self.token.expose_secret()),
            );
        let response = self.request.handle(builder).await.map_err(|e| {
            GuardianError::ProviderUnavailable {
                operation: operation.to_string(),
                cause: e.to_string(),
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }
        if status == StatusCode::NOT_FOUND {
            debug!(username, "account unknown to the identity provider");
            return Ok(false);
        }
        let error = unexpected_status(response).await;
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(GuardianError::IdentityProviderRejected(format!(
                "provider refused the configured API token: {error}"
            )));
        }
        Err(GuardianError::ProviderUnavailable {
            operation: operation.to_string(),
            cause: error.to_string(),
        })
    }
}
