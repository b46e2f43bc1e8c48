//! The secret-storage host Guardian custodies keys in and mints tokens from.
//!
//! [`SecretStore`] is the whole surface Guardian consumes: key records, the
//! auth-method user registry (bridged to the identity provider), the identity
//! and token registries, and AppRole login. [`VaultClient`] speaks the Vault
//! HTTP API; with the `test-utils` feature, `InMemorySecretStore` models the
//! same behaviour in process.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::GuardianResult;

#[cfg(any(test, feature = "test-utils"))]
mod memory;
mod vault;

#[cfg(any(test, feature = "test-utils"))]
pub use memory::{FailPoint, InMemorySecretStore};
pub use vault::VaultClient;

/// A custodied key as stored in the secret store.
#[derive(Debug)]
pub struct KeyRecord {
    /// Private key, 64 hex characters.
    pub private_key_hex: SecretString,
    /// Checksummed address derived from the key when it was generated.
    pub public_address_hex: String,
}

/// Response of an entity lookup, reduced to the alias names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityLookup {
    /// Alias names attached to the entity, in registry order.
    pub aliases: Vec<String>,
}

/// Response of a token-accessor lookup, reduced to the metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessorLookup {
    /// Metadata attached at token creation, if any.
    pub meta: Option<HashMap<String, String>>,
}

/// Parameters for minting a token against a token role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    /// Token role to create the token against.
    pub role: String,
    /// Policies attached to the token.
    pub policies: Vec<String>,
    /// Number of uses before the store revokes the token.
    pub num_uses: u32,
    /// Metadata attached to the token.
    pub meta: BTreeMap<String, String>,
}

/// A freshly minted token.
#[derive(Debug)]
pub struct IssuedToken {
    /// The bearer credential handed to the end-user.
    pub client_token: SecretString,
    /// Non-secret handle the store reports on authenticated requests.
    pub accessor: String,
}

/// Operations Guardian needs from the secret-storage host.
///
/// Implementations classify failures: transport problems are
/// [`crate::GuardianError::StoreUnavailable`]; a password rejected by the
/// bridged auth method is [`crate::GuardianError::IdentityProviderRejected`].
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Whether `username` is registered in the identity auth method.
    async fn auth_user_exists(&self, username: &str) -> GuardianResult<bool>;

    /// Registers `username` in the identity auth method with `groups`.
    async fn register_auth_user(&self, username: &str, groups: &[String]) -> GuardianResult<()>;

    /// Checks `password` through the identity auth method. Any token the store
    /// hands back is dropped.
    async fn login_auth_user(&self, username: &str, password: &SecretString)
        -> GuardianResult<()>;

    /// Reads the key record for `username`, `None` if absent.
    async fn read_key_record(&self, username: &str) -> GuardianResult<Option<KeyRecord>>;

    /// Writes the key record for `username`.
    ///
    /// Stores that support check-and-set refuse to replace an existing record
    /// with [`crate::GuardianError::KeyAlreadyExists`].
    async fn write_key_record(&self, username: &str, record: &KeyRecord) -> GuardianResult<()>;

    /// Looks up an identity entity by id.
    async fn lookup_entity(&self, entity_id: &str) -> GuardianResult<EntityLookup>;

    /// Looks up a token by accessor.
    async fn lookup_accessor(&self, accessor: &str) -> GuardianResult<AccessorLookup>;

    /// Mints a token.
    async fn create_token(&self, request: &TokenRequest) -> GuardianResult<IssuedToken>;

    /// Exchanges an AppRole secret id for a client token.
    async fn approle_login(&self, role_id: &str, secret_id: &SecretString)
        -> GuardianResult<SecretString>;
}
