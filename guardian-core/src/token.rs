//! Service and session tokens.

use std::collections::BTreeMap;

use secrecy::SecretString;
use tracing::{debug, info};

use crate::{
    custodian::KeyCustodian,
    defaults::Settings,
    error::{GuardianError, GuardianResult},
    secret_store::{SecretStore, TokenRequest},
};

/// Session tokens are good for exactly one request.
pub const SESSION_TOKEN_USES: u32 = 1;

/// Mints the tokens Guardian hands out.
pub struct TokenIssuer<'a> {
    store: &'a dyn SecretStore,
    settings: &'a Settings,
}

impl<'a> TokenIssuer<'a> {
    /// Creates an issuer minting against the roles named in `settings`.
    #[must_use]
    pub fn new(store: &'a dyn SecretStore, settings: &'a Settings) -> Self {
        Self { store, settings }
    }

    /// Exchanges the AppRole secret id for Guardian's service token.
    ///
    /// # Errors
    /// [`GuardianError::TokenIssuanceFailure`] if the secret is refused, or a
    /// store error.
    pub async fn exchange_service_secret(
        &self,
        secret_id: &SecretString,
    ) -> GuardianResult<SecretString> {
        let token = self
            .store
            .approle_login(&self.settings.role_id, secret_id)
            .await?;
        info!(role_id = %self.settings.role_id, "exchanged secret id for service token");
        Ok(token)
    }

    /// Mints a single-use end-user token bound to `username`.
    ///
    /// # Errors
    /// [`GuardianError::TokenIssuanceFailure`] carrying the cause.
    pub async fn issue_session_token(&self, username: &str) -> GuardianResult<SecretString> {
        let request = TokenRequest {
            role: self.settings.token_role.clone(),
            policies: vec![self.settings.enduser_policy.clone()],
            num_uses: SESSION_TOKEN_USES,
            meta: BTreeMap::from([("name".to_string(), username.to_string())]),
        };
        let issued = self.store.create_token(&request).await.map_err(|e| {
            if matches!(e, GuardianError::TokenIssuanceFailure(_)) {
                e
            } else {
                GuardianError::TokenIssuanceFailure(format!(
                    "unable to create session token for {username}: {e}"
                ))
            }
        })?;
        debug!(username, accessor = %issued.accessor, "issued session token");
        Ok(issued.client_token)
    }

    /// Replaces the token behind `old_accessor` with a fresh one for the same
    /// user.
    ///
    /// # Errors
    /// [`GuardianError::IdentityLookupFailure`] or
    /// [`GuardianError::TokenIssuanceFailure`].
    pub async fn rotate_token(&self, old_accessor: &str) -> GuardianResult<SecretString> {
        let username = KeyCustodian::new(self.store)
            .resolve_username_from_accessor(old_accessor)
            .await?;
        self.issue_session_token(&username).await
    }
}
