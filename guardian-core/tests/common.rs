#![allow(dead_code, missing_docs)]

//! Common fixtures shared across integration tests.

use std::sync::Arc;

use guardian_core::{
    AuthorizeRequest, Backend, InMemoryClientFactory, InMemoryIdentityProvider,
    InMemorySecretStore, LoginRequest, LoginResponse, MemoryRecordStorage, Settings,
};
use secrecy::{ExposeSecret, SecretString};

pub const USER: &str = "alice@acme.com";
pub const PASSWORD: &str = "correct horse battery staple";
pub const SECRET_ID: &str = "3f1a9c2e-guardian-secret";
pub const SERVICE_TOKEN: &str = "s.guardian-service";

/// A backend wired to in-memory collaborators, already authorized.
pub struct Harness {
    pub backend: Backend,
    pub store: Arc<InMemorySecretStore>,
    pub provider: Arc<InMemoryIdentityProvider>,
}

impl Harness {
    pub async fn new(settings: Settings) -> Self {
        let provider = Arc::new(InMemoryIdentityProvider::new());
        provider.add_account(USER, PASSWORD);
        let store = Arc::new(InMemorySecretStore::new(Arc::clone(&provider)));
        store.add_approle_secret(&settings.role_id, SECRET_ID, SERVICE_TOKEN);

        let backend = Backend::with_clients(
            Arc::new(MemoryRecordStorage::new()),
            settings,
            Arc::new(InMemoryClientFactory::new(
                Arc::clone(&store),
                Arc::clone(&provider),
            )),
        );
        backend
            .authorize(AuthorizeRequest {
                secret_id: Some(SecretString::from(SECRET_ID.to_string())),
                okta_url: Some("acme".to_string()),
                okta_token: Some(SecretString::from("okta-api-token".to_string())),
            })
            .await
            .expect("authorize");

        Self {
            backend,
            store,
            provider,
        }
    }

    pub async fn login(&self, get_address: bool) -> LoginResponse {
        self.backend
            .login(login_request(USER, PASSWORD, get_address))
            .await
            .expect("login")
    }

    /// Logs in and presents the session token, returning the token and the
    /// accessor the store reports for it.
    pub async fn session(&self) -> (LoginResponse, String) {
        let response = self.login(false).await;
        let accessor = self
            .store
            .authenticate(response.client_token.expose_secret())
            .expect("fresh token authenticates");
        (response, accessor)
    }
}

pub fn login_request(username: &str, password: &str, get_address: bool) -> LoginRequest {
    LoginRequest::new(
        username,
        SecretString::from(password.to_string()),
        get_address,
    )
    .expect("valid login request")
}
