//! The five Guardian operations.
//!
//! Every call loads the persisted config, builds the collaborator clients it
//! needs from it and runs a linear sequence of remote calls. Nothing is cached
//! between calls, so an `authorize` takes effect on the next request.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::{
    config::{ConfigManager, GuardianConfig},
    crypto,
    custodian::KeyCustodian,
    defaults::Settings,
    error::GuardianResult,
    identity::IdentityBridge,
    identity_provider::{IdentityProvider, OktaClient},
    requests::{
        AddressResponse, AuthorizeRequest, AuthorizeResponse, Caller, LoginRequest,
        LoginResponse, SignRequest, SignResponse, SignTxRequest, SignTxResponse,
    },
    secret_store::{SecretStore, VaultClient},
    storage::RecordStorage,
    token::TokenIssuer,
};

/// Builds collaborator clients for a single request.
pub trait ClientFactory: Send + Sync {
    /// A secret store client authenticated with `token`. The token is empty
    /// when exchanging the AppRole secret.
    fn secret_store(&self, settings: &Settings, token: &SecretString) -> Arc<dyn SecretStore>;

    /// An identity provider client for the configured organisation.
    fn identity_provider(
        &self,
        settings: &Settings,
        config: &GuardianConfig,
    ) -> Arc<dyn IdentityProvider>;
}

/// Builds [`VaultClient`]s and [`OktaClient`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpClientFactory;

impl ClientFactory for HttpClientFactory {
    fn secret_store(&self, settings: &Settings, token: &SecretString) -> Arc<dyn SecretStore> {
        Arc::new(VaultClient::new(
            settings,
            SecretString::from(token.expose_secret().to_string()),
        ))
    }

    fn identity_provider(
        &self,
        settings: &Settings,
        config: &GuardianConfig,
    ) -> Arc<dyn IdentityProvider> {
        Arc::new(OktaClient::new(
            &config.provider_url,
            SecretString::from(config.provider_token.expose_secret().to_string()),
            settings.http_timeout,
        ))
    }
}

/// Hands out the same in-memory collaborators on every request.
#[cfg(any(test, feature = "test-utils"))]
pub struct InMemoryClientFactory {
    store: Arc<crate::InMemorySecretStore>,
    provider: Arc<crate::InMemoryIdentityProvider>,
}

#[cfg(any(test, feature = "test-utils"))]
impl InMemoryClientFactory {
    /// Wraps an existing store and provider.
    #[must_use]
    pub fn new(
        store: Arc<crate::InMemorySecretStore>,
        provider: Arc<crate::InMemoryIdentityProvider>,
    ) -> Self {
        Self { store, provider }
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl ClientFactory for InMemoryClientFactory {
    fn secret_store(&self, _settings: &Settings, _token: &SecretString) -> Arc<dyn SecretStore> {
        self.store.clone()
    }

    fn identity_provider(
        &self,
        _settings: &Settings,
        _config: &GuardianConfig,
    ) -> Arc<dyn IdentityProvider> {
        self.provider.clone()
    }
}

/// Entry point for hosts.
pub struct Backend {
    storage: Arc<dyn RecordStorage>,
    settings: Settings,
    clients: Arc<dyn ClientFactory>,
}

impl Backend {
    /// A backend talking HTTP to Vault and Okta.
    #[must_use]
    pub fn new(storage: Arc<dyn RecordStorage>, settings: Settings) -> Self {
        Self::with_clients(storage, settings, Arc::new(HttpClientFactory))
    }

    /// A backend using `clients` to reach its collaborators.
    #[must_use]
    pub fn with_clients(
        storage: Arc<dyn RecordStorage>,
        settings: Settings,
        clients: Arc<dyn ClientFactory>,
    ) -> Self {
        Self {
            storage,
            settings,
            clients,
        }
    }

    /// Deployment settings this backend runs with.
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    fn config_manager(&self) -> ConfigManager<'_> {
        ConfigManager::new(self.storage.as_ref())
    }

    fn complete_config(&self) -> GuardianResult<GuardianConfig> {
        let config = self.config_manager().load()?;
        config.ensure_complete()?;
        Ok(config)
    }

    fn store(&self, config: &GuardianConfig) -> Arc<dyn SecretStore> {
        self.clients
            .secret_store(&self.settings, &config.service_token)
    }

    /// Authenticates an end-user, provisioning them on first login, and hands
    /// out a single-use session token.
    ///
    /// The address is returned when requested and always on first login.
    ///
    /// # Errors
    /// - [`crate::GuardianError::ConfigIncomplete`] before `authorize` has run.
    /// - [`crate::GuardianError::IdentityProviderRejected`] for an account the
    ///   provider does not know or wrong credentials.
    /// - Store, provider, key and token errors from the individual steps.
    pub async fn login(&self, request: LoginRequest) -> GuardianResult<LoginResponse> {
        let config = self.complete_config()?;
        let store = self.store(&config);
        let provider = self.clients.identity_provider(&self.settings, &config);
        let username = request.username.as_str();
        let bridge = IdentityBridge::new(
            store.as_ref(),
            provider.as_ref(),
            &self.settings.default_group,
        );

        let state = bridge.account_state(username).await?;
        let created = if state.is_new() {
            if !bridge.verify_provider_account(username).await? {
                warn!(username, "login for account unknown to the identity provider");
                return Err(IdentityBridge::unknown_account());
            }
            bridge.provision_account(username, state).await?;
            true
        } else {
            false
        };

        bridge
            .verify_credentials(username, &request.password)
            .await?;
        let client_token = TokenIssuer::new(store.as_ref(), &self.settings)
            .issue_session_token(username)
            .await?;

        let address = if request.get_address || created {
            Some(KeyCustodian::new(store.as_ref()).address_of(username).await?)
        } else {
            None
        };
        info!(username, created, "login succeeded");
        Ok(LoginResponse {
            client_token,
            address,
        })
    }

    /// Updates Guardian's own credentials.
    ///
    /// A secret id is exchanged for a service token before anything is
    /// written. The merged config must be complete or nothing is persisted.
    /// Concurrent calls are last-writer-wins.
    ///
    /// # Errors
    /// [`crate::GuardianError::TokenIssuanceFailure`] if the secret id is
    /// refused and [`crate::GuardianError::ConfigIncomplete`] if a field would
    /// be left empty.
    pub async fn authorize(&self, request: AuthorizeRequest) -> GuardianResult<AuthorizeResponse> {
        let manager = self.config_manager();
        let mut config = manager.load()?;

        if let Some(secret_id) = request.secret_id() {
            let store = self
                .clients
                .secret_store(&self.settings, &SecretString::from(String::new()));
            config.service_token = TokenIssuer::new(store.as_ref(), &self.settings)
                .exchange_service_secret(secret_id)
                .await?;
        }
        if let Some(okta_url) = request.okta_url() {
            config.provider_url = okta_url.to_string();
        }
        if let Some(okta_token) = request.okta_token() {
            config.provider_token = SecretString::from(okta_token.expose_secret().to_string());
        }

        manager.save(&config)?;
        info!(provider_url = %config.provider_url, "config updated");
        Ok(AuthorizeResponse {
            config_updated: true,
        })
    }

    /// Signs a digest with the caller's key and rotates their session token.
    ///
    /// `accessor` identifies the session token the request arrived with. If
    /// rotation fails the signature is discarded and the error returned.
    ///
    /// # Errors
    /// Lookup, key, signing and token errors.
    pub async fn sign(&self, request: SignRequest, accessor: &str) -> GuardianResult<SignResponse> {
        let config = self.complete_config()?;
        let store = self.store(&config);
        let custodian = KeyCustodian::new(store.as_ref());

        let username = custodian.resolve_username_from_accessor(accessor).await?;
        let key = custodian.read_key(&username).await?;
        let signature = crypto::sign_digest(&request.digest, &key)?;
        debug!(username, "signed digest");

        let fresh_client_token = TokenIssuer::new(store.as_ref(), &self.settings)
            .rotate_token(accessor)
            .await?;
        Ok(SignResponse {
            signature: format!("0x{}", hex::encode(signature)),
            fresh_client_token,
        })
    }

    /// Signs a legacy transaction with the caller's key and rotates their
    /// session token.
    ///
    /// # Errors
    /// As [`Backend::sign`].
    pub async fn sign_tx(
        &self,
        request: SignTxRequest,
        accessor: &str,
    ) -> GuardianResult<SignTxResponse> {
        let config = self.complete_config()?;
        let store = self.store(&config);
        let custodian = KeyCustodian::new(store.as_ref());

        let username = custodian.resolve_username_from_accessor(accessor).await?;
        let key = custodian.read_key(&username).await?;
        let signed = crypto::sign_transaction(&request.params, &key)?;
        debug!(
            username,
            nonce = request.params.nonce,
            chain_id = request.params.chain_id,
            "signed transaction"
        );

        let fresh_client_token = TokenIssuer::new(store.as_ref(), &self.settings)
            .rotate_token(accessor)
            .await?;
        Ok(SignTxResponse {
            signed_tx_json: signed.json,
            signed_tx_rlp: signed.rlp,
            fresh_client_token,
        })
    }

    /// Address of the caller. Does not rotate any token.
    ///
    /// # Errors
    /// Lookup and key errors.
    pub async fn get_address(&self, caller: &Caller) -> GuardianResult<AddressResponse> {
        let config = self.complete_config()?;
        let store = self.store(&config);
        let custodian = KeyCustodian::new(store.as_ref());

        let username = match caller {
            Caller::Entity(entity_id) => custodian.resolve_username_from_entity(entity_id).await?,
            Caller::Accessor(accessor) => {
                custodian.resolve_username_from_accessor(accessor).await?
            }
        };
        Ok(AddressResponse {
            public_address: custodian.address_of(&username).await?,
        })
    }
}
