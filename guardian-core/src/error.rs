use thiserror::Error;

/// Result type used across `guardian-core`.
pub type GuardianResult<T> = Result<T, GuardianError>;

/// Error outputs from Guardian.
///
/// The `Display` output is what callers of the five operations receive, so every
/// variant carries a human-readable context and, where there is one, the cause.
#[derive(Debug, Error)]
pub enum GuardianError {
    /// The persisted configuration is missing one of its three secrets.
    #[error("config_incomplete: {field} has not been set, run authorize first")]
    ConfigIncomplete {
        /// Name of the missing field as it appears in `authorize`.
        field: &'static str,
    },
    /// The identity provider rejected the account or the credentials.
    #[error("identity_provider_rejected: {0}")]
    IdentityProviderRejected(String),
    /// Transport or infrastructure failure talking to the secret store.
    #[error("store_unavailable: {operation} failed: {cause}")]
    StoreUnavailable {
        /// The store operation that failed.
        operation: String,
        /// Underlying cause text.
        cause: String,
    },
    /// Transport failure talking to the identity provider.
    #[error("provider_unavailable: {operation} failed: {cause}")]
    ProviderUnavailable {
        /// The provider operation that failed.
        operation: String,
        /// Underlying cause text.
        cause: String,
    },
    /// No key record exists for the user.
    #[error("key_not_found: no key stored for {username}")]
    KeyNotFound {
        /// Username the lookup was made for.
        username: String,
    },
    /// A key record already exists and keys are never rewritten.
    #[error("key_already_exists: refusing to overwrite the key stored for {username}")]
    KeyAlreadyExists {
        /// Username the write was made for.
        username: String,
    },
    /// Stored key material does not decode to a valid secp256k1 scalar.
    #[error("malformed_key: {0}")]
    MalformedKey(String),
    /// A hex payload supplied by the caller could not be decoded.
    #[error("invalid_payload: {0}")]
    InvalidPayload(String),
    /// Producing a signature failed.
    #[error("signing_failure: {0}")]
    SigningFailure(String),
    /// The entropy source failed while generating a key.
    #[error("key_generation: {0}")]
    KeyGeneration(String),
    /// Minting a session or service token failed.
    #[error("token_issuance_failure: {0}")]
    TokenIssuanceFailure(String),
    /// A username could not be resolved from an entity id or token accessor.
    #[error("identity_lookup_failure: {0}")]
    IdentityLookupFailure(String),
    /// The presented input is not valid for the requested operation.
    #[error("invalid_input: {attribute}: {reason}")]
    InvalidInput {
        /// The offending request attribute.
        attribute: String,
        /// Why it was rejected.
        reason: String,
    },
    /// Reading or writing the persisted config record failed.
    #[error("storage_error: {0}")]
    Storage(String),
    /// Unexpected error serializing or deserializing data.
    #[error("serialization_error: {0}")]
    Serialization(String),
}

impl GuardianError {
    /// Whether the whole operation may be retried by the host.
    ///
    /// Only transport-level failures qualify. A rejected identity must never be
    /// retried with the same credentials.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. } | Self::ProviderUnavailable { .. }
        )
    }

    pub(crate) fn invalid_input(attribute: &str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            attribute: attribute.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn store(operation: &str, cause: impl ToString) -> Self {
        Self::StoreUnavailable {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }
}

impl From<serde_json::Error> for GuardianError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}
