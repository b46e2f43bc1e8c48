#![deny(clippy::all, clippy::pedantic, clippy::nursery)]

//! # Guardian
//!
//! Guardian binds identity-provider accounts to secp256k1 keys held in a
//! secret store. End-users log in with their provider credentials, receive a
//! single-use session token, and spend it on one signing request, which hands
//! back a replacement token. Private keys never leave the secret store except
//! for the duration of a signing call.
//!
//! [`Backend`] exposes the five operations. Collaborators sit behind the
//! [`SecretStore`], [`IdentityProvider`] and [`RecordStorage`] traits, with
//! HTTP bindings for Vault and Okta. In-memory collaborators for tests are
//! compiled in with the `test-utils` feature.

mod error;
pub use error::*;

mod backend;
pub use backend::{Backend, ClientFactory, HttpClientFactory};
#[cfg(any(test, feature = "test-utils"))]
pub use backend::InMemoryClientFactory;

mod config;
pub use config::{ConfigManager, GuardianConfig};

/// secp256k1 keys, digest signing and transaction signing.
pub mod crypto;

mod custodian;
pub use custodian::KeyCustodian;

/// Fixed names and process settings.
pub mod defaults;
pub use defaults::Settings;

mod identity;
pub use identity::{AccountState, IdentityBridge};

/// External identity provider clients.
pub mod identity_provider;
pub use identity_provider::{IdentityProvider, OktaClient};
#[cfg(any(test, feature = "test-utils"))]
pub use identity_provider::InMemoryIdentityProvider;

/// Tracing setup for hosts that do not bring their own subscriber.
pub mod logger;

mod primitives;
pub use primitives::{decode_hex, strip_hex_prefix, ParseFromRequest};

/// Request and response types.
pub mod requests;
pub use requests::{
    AddressResponse, AuthorizeRequest, AuthorizeResponse, Caller, LoginRequest, LoginResponse,
    SignRequest, SignResponse, SignTxInput, SignTxRequest, SignTxResponse,
};

/// Secret store clients.
pub mod secret_store;
pub use secret_store::{SecretStore, VaultClient};
#[cfg(any(test, feature = "test-utils"))]
pub use secret_store::{FailPoint, InMemorySecretStore};

/// Persisted record storage.
pub mod storage;
pub use storage::{FileRecordStorage, MemoryRecordStorage, RecordStorage};

mod token;
pub use token::{TokenIssuer, SESSION_TOKEN_USES};

mod http_request;
