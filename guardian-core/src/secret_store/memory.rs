use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::{
    error::{GuardianError, GuardianResult},
    identity_provider::InMemoryIdentityProvider,
};

use super::{AccessorLookup, EntityLookup, IssuedToken, KeyRecord, SecretStore, TokenRequest};

/// A [`SecretStore`] operation that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// [`SecretStore::auth_user_exists`]
    AuthUserExists,
    /// [`SecretStore::register_auth_user`]
    RegisterAuthUser,
    /// [`SecretStore::login_auth_user`]
    LoginAuthUser,
    /// [`SecretStore::read_key_record`]
    ReadKey,
    /// [`SecretStore::write_key_record`]
    WriteKey,
    /// [`SecretStore::lookup_entity`]
    LookupEntity,
    /// [`SecretStore::lookup_accessor`]
    LookupAccessor,
    /// [`SecretStore::create_token`]
    CreateToken,
    /// [`SecretStore::approle_login`]
    ApproleLogin,
}

impl FailPoint {
    const fn operation(self) -> &'static str {
        match self {
            Self::AuthUserExists => "read auth user",
            Self::RegisterAuthUser => "register auth user",
            Self::LoginAuthUser => "identity provider login",
            Self::ReadKey => "read key",
            Self::WriteKey => "write key",
            Self::LookupEntity => "lookup entity",
            Self::LookupAccessor => "lookup token accessor",
            Self::CreateToken => "create token",
            Self::ApproleLogin => "approle login",
        }
    }
}

struct StoredToken {
    client_token: String,
    meta: BTreeMap<String, String>,
    uses_remaining: u32,
}

#[derive(Default)]
struct State {
    users: HashMap<String, Vec<String>>,
    registrations: usize,
    keys: HashMap<String, (String, String)>,
    entities: HashMap<String, Vec<String>>,
    tokens: HashMap<String, StoredToken>,
    approle_secrets: HashMap<(String, String), String>,
    failing: HashSet<FailPoint>,
    next_token: u64,
}

/// An in-process secret store with the same observable behaviour as the
/// Vault binding over a versioned keys mount, for tests.
///
/// Passwords are checked against the shared [`InMemoryIdentityProvider`],
/// mirroring how the auth method defers to the external provider. Tokens
/// count down their uses through [`InMemorySecretStore::authenticate`].
pub struct InMemorySecretStore {
    provider: Arc<InMemoryIdentityProvider>,
    state: Mutex<State>,
}

impl InMemorySecretStore {
    /// Creates an empty store bridged to `provider`.
    #[must_use]
    pub fn new(provider: Arc<InMemoryIdentityProvider>) -> Self {
        Self {
            provider,
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> GuardianResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| GuardianError::store("lock", "in-memory store lock poisoned"))
    }

    fn check(&self, point: FailPoint) -> GuardianResult<MutexGuard<'_, State>> {
        let state = self.lock()?;
        if state.failing.contains(&point) {
            return Err(GuardianError::store(point.operation(), "injected failure"));
        }
        Ok(state)
    }

    /// Makes every subsequent call to `point` fail with
    /// [`GuardianError::StoreUnavailable`].
    pub fn fail(&self, point: FailPoint) {
        if let Ok(mut state) = self.lock() {
            state.failing.insert(point);
        }
    }

    /// Undoes [`InMemorySecretStore::fail`].
    pub fn heal(&self, point: FailPoint) {
        if let Ok(mut state) = self.lock() {
            state.failing.remove(&point);
        }
    }

    /// Registers an entity with the given alias names.
    pub fn add_entity(&self, entity_id: &str, aliases: &[&str]) {
        if let Ok(mut state) = self.lock() {
            state.entities.insert(
                entity_id.to_string(),
                aliases.iter().map(ToString::to_string).collect(),
            );
        }
    }

    /// Accepts `secret_id` for `role_id`, answering with `service_token`.
    pub fn add_approle_secret(&self, role_id: &str, secret_id: &str, service_token: &str) {
        if let Ok(mut state) = self.lock() {
            state.approle_secrets.insert(
                (role_id.to_string(), secret_id.to_string()),
                service_token.to_string(),
            );
        }
    }

    /// Presents `client_token` as a request credential, consuming one use.
    ///
    /// Returns the token's accessor, or `None` if the token is unknown or
    /// exhausted. An exhausted token stays resolvable by accessor.
    pub fn authenticate(&self, client_token: &str) -> Option<String> {
        let mut state = self.lock().ok()?;
        let (accessor, token) = state
            .tokens
            .iter_mut()
            .find(|(_, token)| token.client_token == client_token)?;
        if token.uses_remaining == 0 {
            return None;
        }
        token.uses_remaining -= 1;
        Some(accessor.clone())
    }

    /// Number of stored key records.
    #[must_use]
    pub fn key_record_count(&self) -> usize {
        self.lock().map_or(0, |state| state.keys.len())
    }

    /// Address recorded alongside the key of `username`.
    #[must_use]
    pub fn recorded_address(&self, username: &str) -> Option<String> {
        let state = self.lock().ok()?;
        state.keys.get(username).map(|(_, address)| address.clone())
    }

    /// Groups `username` is registered with, `None` if unregistered.
    #[must_use]
    pub fn registered_groups(&self, username: &str) -> Option<Vec<String>> {
        let state = self.lock().ok()?;
        state.users.get(username).cloned()
    }

    /// Number of registration calls served so far.
    #[must_use]
    pub fn registration_count(&self) -> usize {
        self.lock().map_or(0, |state| state.registrations)
    }

    /// Number of tokens minted so far.
    #[must_use]
    pub fn issued_token_count(&self) -> usize {
        self.lock().map_or(0, |state| state.tokens.len())
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn auth_user_exists(&self, username: &str) -> GuardianResult<bool> {
        let state = self.check(FailPoint::AuthUserExists)?;
        Ok(state.users.contains_key(username))
    }

    async fn register_auth_user(&self, username: &str, groups: &[String]) -> GuardianResult<()> {
        let mut state = self.check(FailPoint::RegisterAuthUser)?;
        state.users.insert(username.to_string(), groups.to_vec());
        state.registrations += 1;
        Ok(())
    }

    async fn login_auth_user(
        &self,
        username: &str,
        password: &SecretString,
    ) -> GuardianResult<()> {
        drop(self.check(FailPoint::LoginAuthUser)?);
        if self.provider.check_password(username, password.expose_secret()) {
            Ok(())
        } else {
            Err(GuardianError::IdentityProviderRejected(
                "unable to login with the provided credentials: authentication failed".to_string(),
            ))
        }
    }

    async fn read_key_record(&self, username: &str) -> GuardianResult<Option<KeyRecord>> {
        let state = self.check(FailPoint::ReadKey)?;
        Ok(state.keys.get(username).map(|(key, address)| KeyRecord {
            private_key_hex: SecretString::from(key.clone()),
            public_address_hex: address.clone(),
        }))
    }

    async fn write_key_record(&self, username: &str, record: &KeyRecord) -> GuardianResult<()> {
        let mut state = self.check(FailPoint::WriteKey)?;
        if state.keys.contains_key(username) {
            return Err(GuardianError::KeyAlreadyExists {
                username: username.to_string(),
            });
        }
        state.keys.insert(
            username.to_string(),
            (
                record.private_key_hex.expose_secret().to_string(),
                record.public_address_hex.clone(),
            ),
        );
        Ok(())
    }

    async fn lookup_entity(&self, entity_id: &str) -> GuardianResult<EntityLookup> {
        let state = self.check(FailPoint::LookupEntity)?;
        Ok(EntityLookup {
            aliases: state.entities.get(entity_id).cloned().unwrap_or_default(),
        })
    }

    async fn lookup_accessor(&self, accessor: &str) -> GuardianResult<AccessorLookup> {
        let state = self.check(FailPoint::LookupAccessor)?;
        let token = state.tokens.get(accessor).ok_or_else(|| {
            GuardianError::store("lookup token accessor", "invalid accessor")
        })?;
        Ok(AccessorLookup {
            meta: if token.meta.is_empty() {
                None
            } else {
                Some(token.meta.clone().into_iter().collect())
            },
        })
    }

    async fn create_token(&self, request: &TokenRequest) -> GuardianResult<IssuedToken> {
        let mut state = self.check(FailPoint::CreateToken)?;
        state.next_token += 1;
        let id = state.next_token;
        let client_token = format!("s.mem{id:08}");
        let accessor = format!("acc{id:08}");
        state.tokens.insert(
            accessor.clone(),
            StoredToken {
                client_token: client_token.clone(),
                meta: request.meta.clone(),
                uses_remaining: request.num_uses,
            },
        );
        Ok(IssuedToken {
            client_token: SecretString::from(client_token),
            accessor,
        })
    }

    async fn approle_login(
        &self,
        role_id: &str,
        secret_id: &SecretString,
    ) -> GuardianResult<SecretString> {
        let state = self.check(FailPoint::ApproleLogin)?;
        state
            .approle_secrets
            .get(&(role_id.to_string(), secret_id.expose_secret().to_string()))
            .map(|token| SecretString::from(token.clone()))
            .ok_or_else(|| {
                GuardianError::TokenIssuanceFailure("secret_id was rejected".to_string())
            })
    }
}
