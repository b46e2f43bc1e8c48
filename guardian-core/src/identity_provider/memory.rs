use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;

use crate::error::{GuardianError, GuardianResult};

use super::IdentityProvider;

/// An in-process identity provider holding accounts and their passwords.
///
/// Shared with [`crate::InMemorySecretStore`], which checks passwords here the
/// way the bridged auth method checks them against the real provider.
#[derive(Default)]
pub struct InMemoryIdentityProvider {
    accounts: Mutex<HashMap<String, String>>,
}

impl InMemoryIdentityProvider {
    /// Creates a provider with no accounts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Option<MutexGuard<'_, HashMap<String, String>>> {
        self.accounts.lock().ok()
    }

    /// Adds or replaces an account.
    pub fn add_account(&self, username: &str, password: &str) {
        if let Some(mut accounts) = self.lock() {
            accounts.insert(username.to_string(), password.to_string());
        }
    }

    /// Whether `password` is the password of `username`.
    #[must_use]
    pub fn check_password(&self, username: &str, password: &str) -> bool {
        self.lock()
            .and_then(|accounts| accounts.get(username).map(|known| known == password))
            .unwrap_or(false)
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn account_exists(&self, username: &str) -> GuardianResult<bool> {
        self.lock()
            .map(|accounts| accounts.contains_key(username))
            .ok_or_else(|| GuardianError::ProviderUnavailable {
                operation: "get provider user".to_string(),
                cause: "in-memory provider lock poisoned".to_string(),
            })
    }
}
