//! Key records in the secret store, and resolving who is asking for them.

use secrecy::SecretString;
use tracing::{debug, info};

use crate::{
    crypto,
    error::{GuardianError, GuardianResult},
    secret_store::{KeyRecord, SecretStore},
};

/// Owns the mapping from usernames to their single custodied key.
pub struct KeyCustodian<'a> {
    store: &'a dyn SecretStore,
}

impl<'a> KeyCustodian<'a> {
    /// Wraps a secret store authenticated with the service token.
    #[must_use]
    pub fn new(store: &'a dyn SecretStore) -> Self {
        Self { store }
    }

    /// Whether a key record exists for `username`. Absence is not an error.
    ///
    /// # Errors
    /// [`GuardianError::StoreUnavailable`] if the store cannot be reached.
    pub async fn has_key(&self, username: &str) -> GuardianResult<bool> {
        Ok(self.store.read_key_record(username).await?.is_some())
    }

    /// Writes the one key record for `username`.
    ///
    /// The existence check and the write are separate calls. Only a store with
    /// check-and-set writes closes the gap between them against a concurrent
    /// first login.
    ///
    /// # Errors
    /// [`GuardianError::KeyAlreadyExists`] if a record is already present;
    /// keys are never rewritten.
    pub async fn store_key(
        &self,
        username: &str,
        private_key_hex: SecretString,
        address_hex: String,
    ) -> GuardianResult<()> {
        if self.has_key(username).await? {
            return Err(GuardianError::KeyAlreadyExists {
                username: username.to_string(),
            });
        }
        let record = KeyRecord {
            private_key_hex,
            public_address_hex: address_hex,
        };
        self.store.write_key_record(username, &record).await?;
        info!(username, address = %record.public_address_hex, "stored key record");
        Ok(())
    }

    /// Reads the private key of `username`.
    ///
    /// # Errors
    /// [`GuardianError::KeyNotFound`] if no record exists.
    pub async fn read_key(&self, username: &str) -> GuardianResult<SecretString> {
        self.store
            .read_key_record(username)
            .await?
            .map(|record| record.private_key_hex)
            .ok_or_else(|| GuardianError::KeyNotFound {
                username: username.to_string(),
            })
    }

    /// Address of `username`, derived from the stored key rather than the
    /// recorded address.
    ///
    /// # Errors
    /// As [`KeyCustodian::read_key`], plus [`GuardianError::MalformedKey`].
    pub async fn address_of(&self, username: &str) -> GuardianResult<String> {
        let key = self.read_key(username).await?;
        crypto::derive_address(&key)
    }

    /// Username bound to an identity entity, taken from its first alias.
    ///
    /// # Errors
    /// [`GuardianError::IdentityLookupFailure`] if the lookup fails or the
    /// entity has no alias.
    pub async fn resolve_username_from_entity(&self, entity_id: &str) -> GuardianResult<String> {
        let lookup = self
            .store
            .lookup_entity(entity_id)
            .await
            .map_err(|e| lookup_failure("entity", entity_id, &e))?;
        let username = lookup.aliases.into_iter().next().ok_or_else(|| {
            GuardianError::IdentityLookupFailure(format!("entity {entity_id} has no aliases"))
        })?;
        debug!(entity_id, username, "resolved caller from entity");
        Ok(username)
    }

    /// Username bound to a session token through its `name` metadata.
    ///
    /// # Errors
    /// [`GuardianError::IdentityLookupFailure`] if the lookup fails or the
    /// token carries no `name`.
    pub async fn resolve_username_from_accessor(&self, accessor: &str) -> GuardianResult<String> {
        let lookup = self
            .store
            .lookup_accessor(accessor)
            .await
            .map_err(|e| lookup_failure("token accessor", accessor, &e))?;
        let username = lookup
            .meta
            .and_then(|mut meta| meta.remove("name"))
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                GuardianError::IdentityLookupFailure(
                    "token has no name in its metadata".to_string(),
                )
            })?;
        debug!(username, "resolved caller from token accessor");
        Ok(username)
    }
}

fn lookup_failure(kind: &str, id: &str, cause: &GuardianError) -> GuardianError {
    GuardianError::IdentityLookupFailure(format!("unable to look up {kind} {id}: {cause}"))
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, sync::Arc};

    use secrecy::ExposeSecret;

    use super::*;
    use crate::{
        identity_provider::InMemoryIdentityProvider,
        secret_store::{FailPoint, InMemorySecretStore, TokenRequest},
    };

    const KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    fn store() -> InMemorySecretStore {
        InMemorySecretStore::new(Arc::new(InMemoryIdentityProvider::new()))
    }

    #[tokio::test]
    async fn test_store_read_and_derive() {
        let store = store();
        let custodian = KeyCustodian::new(&store);
        assert!(!custodian.has_key("user@acme.com").await.unwrap());

        custodian
            .store_key(
                "user@acme.com",
                SecretString::from(KEY.to_string()),
                ADDRESS.to_string(),
            )
            .await
            .unwrap();
        assert!(custodian.has_key("user@acme.com").await.unwrap());
        assert_eq!(
            custodian.read_key("user@acme.com").await.unwrap().expose_secret(),
            KEY
        );
        assert_eq!(custodian.address_of("user@acme.com").await.unwrap(), ADDRESS);
    }

    #[tokio::test]
    async fn test_keys_are_never_rewritten() {
        let store = store();
        let custodian = KeyCustodian::new(&store);
        custodian
            .store_key("user@acme.com", SecretString::from(KEY.to_string()), ADDRESS.to_string())
            .await
            .unwrap();
        let err = custodian
            .store_key(
                "user@acme.com",
                SecretString::from("11".repeat(32)),
                "0x0000000000000000000000000000000000000001".to_string(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GuardianError::KeyAlreadyExists { .. }));
        assert_eq!(store.recorded_address("user@acme.com").unwrap(), ADDRESS);
    }

    #[tokio::test]
    async fn test_missing_key() {
        let store = store();
        let err = KeyCustodian::new(&store)
            .read_key("nobody@acme.com")
            .await
            .unwrap_err();
        assert!(matches!(err, GuardianError::KeyNotFound { username } if username == "nobody@acme.com"));
    }

    #[tokio::test]
    async fn test_resolve_from_entity() {
        let store = store();
        store.add_entity("entity-1", &["user@acme.com", "other"]);
        store.add_entity("entity-2", &[]);
        let custodian = KeyCustodian::new(&store);

        assert_eq!(
            custodian.resolve_username_from_entity("entity-1").await.unwrap(),
            "user@acme.com"
        );
        assert!(matches!(
            custodian.resolve_username_from_entity("entity-2").await,
            Err(GuardianError::IdentityLookupFailure(_))
        ));
        assert!(matches!(
            custodian.resolve_username_from_entity("missing").await,
            Err(GuardianError::IdentityLookupFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_from_accessor() {
        let store = store();
        let named = store
            .create_token(&TokenRequest {
                role: "guardian-enduser".to_string(),
                policies: vec!["enduser".to_string()],
                num_uses: 1,
                meta: BTreeMap::from([("name".to_string(), "user@acme.com".to_string())]),
            })
            .await
            .unwrap();
        let anonymous = store
            .create_token(&TokenRequest {
                role: "guardian-enduser".to_string(),
                policies: vec![],
                num_uses: 1,
                meta: BTreeMap::new(),
            })
            .await
            .unwrap();
        let custodian = KeyCustodian::new(&store);

        assert_eq!(
            custodian
                .resolve_username_from_accessor(&named.accessor)
                .await
                .unwrap(),
            "user@acme.com"
        );
        assert!(matches!(
            custodian.resolve_username_from_accessor(&anonymous.accessor).await,
            Err(GuardianError::IdentityLookupFailure(_))
        ));

        store.fail(FailPoint::LookupAccessor);
        let err = custodian
            .resolve_username_from_accessor(&named.accessor)
            .await
            .unwrap_err();
        assert!(matches!(err, GuardianError::IdentityLookupFailure(_)));
        assert!(err.to_string().contains("injected failure"));
    }
}
