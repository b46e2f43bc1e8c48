//! Bridging identity-provider accounts into the secret store's auth method.

use secrecy::SecretString;
use tracing::{info, warn};

use crate::{
    crypto,
    custodian::KeyCustodian,
    error::{GuardianError, GuardianResult},
    identity_provider::IdentityProvider,
    secret_store::SecretStore,
};

/// Where a user stands in provisioning.
///
/// Registration and key ownership are tracked separately so an interrupted
/// provisioning can resume where it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountState {
    /// The user is registered in the auth method.
    pub registered: bool,
    /// A key record exists for the user.
    pub has_key: bool,
}

impl AccountState {
    /// A user is new until both registration and key are in place.
    #[must_use]
    pub const fn is_new(self) -> bool {
        !(self.registered && self.has_key)
    }
}

/// Ties a provider account to an auth-method user and a custodied key.
pub struct IdentityBridge<'a> {
    store: &'a dyn SecretStore,
    provider: &'a dyn IdentityProvider,
    default_group: &'a str,
}

impl<'a> IdentityBridge<'a> {
    /// Creates a bridge registering new users into `default_group`.
    #[must_use]
    pub fn new(
        store: &'a dyn SecretStore,
        provider: &'a dyn IdentityProvider,
        default_group: &'a str,
    ) -> Self {
        Self {
            store,
            provider,
            default_group,
        }
    }

    /// Whether `username` is registered in the auth method.
    ///
    /// # Errors
    /// [`GuardianError::StoreUnavailable`] on transport failure.
    pub async fn user_exists(&self, username: &str) -> GuardianResult<bool> {
        self.store.auth_user_exists(username).await
    }

    /// Registration and key ownership of `username`.
    ///
    /// # Errors
    /// [`GuardianError::StoreUnavailable`] on transport failure.
    pub async fn account_state(&self, username: &str) -> GuardianResult<AccountState> {
        Ok(AccountState {
            registered: self.user_exists(username).await?,
            has_key: KeyCustodian::new(self.store).has_key(username).await?,
        })
    }

    /// Whether the identity provider knows `username`.
    ///
    /// # Errors
    /// See [`IdentityProvider::account_exists`].
    pub async fn verify_provider_account(&self, username: &str) -> GuardianResult<bool> {
        self.provider.account_exists(username).await
    }

    /// Completes whatever `state` says is missing and returns the user's
    /// address.
    ///
    /// Registration is skipped for an already registered user. A failure after
    /// registration leaves the user registered but keyless, and the next call
    /// picks up from there.
    ///
    /// # Errors
    /// Store errors from registration or the key write, and
    /// [`GuardianError::KeyGeneration`].
    pub async fn provision_account(
        &self,
        username: &str,
        state: AccountState,
    ) -> GuardianResult<String> {
        if state.registered {
            info!(username, "user already registered, resuming provisioning");
        } else {
            self.store
                .register_auth_user(username, &[self.default_group.to_string()])
                .await?;
        }

        let custodian = KeyCustodian::new(self.store);
        if state.has_key {
            warn!(username, "key present for unregistered user, keeping it");
            return custodian.address_of(username).await;
        }

        let (private_key_hex, address) = crypto::generate_keypair()?;
        custodian
            .store_key(username, private_key_hex, address.clone())
            .await?;
        info!(username, address, "provisioned new user");
        Ok(address)
    }

    /// Checks the password through the auth method.
    ///
    /// # Errors
    /// [`GuardianError::IdentityProviderRejected`] if the credentials are wrong.
    pub async fn verify_credentials(
        &self,
        username: &str,
        password: &SecretString,
    ) -> GuardianResult<()> {
        self.store.login_auth_user(username, password).await
    }

    /// Rejection for a username the provider does not know.
    pub(crate) fn unknown_account() -> GuardianError {
        GuardianError::IdentityProviderRejected(
            "username does not belong to the identity provider organization, not creating account"
                .to_string(),
        )
    }
}
