//! Typed requests and responses of the five operations.
//!
//! Requests are validated when they are built, before any remote call is made.
//! Responses serialize to the payload field names hosts already consume.

use alloy_primitives::{Address, U256};
use secrecy::{ExposeSecret, SecretString};
use serde::{Serialize, Serializer};

use crate::{
    crypto::TransactionParams,
    defaults::DEFAULT_CHAIN_ID,
    error::{GuardianError, GuardianResult},
    primitives::{decode_hex, ParseFromRequest},
};

/// Only the first derived key exists for now.
pub const SUPPORTED_ADDRESS_INDEX: u32 = 0;

fn expose<S: Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// Checks a username is usable as a single path segment in the secret store.
///
/// # Errors
/// [`GuardianError::InvalidInput`] for empty names, `.` and `..`, and names
/// containing `/`, `%`, `?`, `#` or whitespace.
pub fn validate_username(username: &str) -> GuardianResult<()> {
    if username.is_empty() {
        return Err(GuardianError::invalid_input("username", "must not be empty"));
    }
    if username == "." || username == ".." {
        return Err(GuardianError::invalid_input(
            "username",
            "must not be a relative path segment",
        ));
    }
    if username
        .chars()
        .any(|c| matches!(c, '/' | '%' | '?' | '#') || c.is_whitespace())
    {
        return Err(GuardianError::invalid_input(
            "username",
            "must not contain '/', '%', '?', '#' or whitespace",
        ));
    }
    Ok(())
}

fn check_address_index(address_index: Option<u32>) -> GuardianResult<u32> {
    match address_index.unwrap_or(SUPPORTED_ADDRESS_INDEX) {
        SUPPORTED_ADDRESS_INDEX => Ok(SUPPORTED_ADDRESS_INDEX),
        other => Err(GuardianError::invalid_input(
            "address_index",
            format!("only index {SUPPORTED_ADDRESS_INDEX} is supported, got {other}"),
        )),
    }
}

/// Input of `login`.
#[derive(Debug)]
pub struct LoginRequest {
    /// Identity provider login, usually an email address.
    pub username: String,
    /// Identity provider password.
    pub password: SecretString,
    /// Whether to return the address for an existing user too.
    pub get_address: bool,
}

impl LoginRequest {
    /// Builds a validated login request.
    ///
    /// # Errors
    /// [`GuardianError::InvalidInput`] for an unusable username or an empty
    /// password.
    pub fn new(
        username: impl Into<String>,
        password: SecretString,
        get_address: bool,
    ) -> GuardianResult<Self> {
        let username = username.into();
        validate_username(&username)?;
        if password.expose_secret().is_empty() {
            return Err(GuardianError::invalid_input("password", "must not be empty"));
        }
        Ok(Self {
            username,
            password,
            get_address,
        })
    }
}

/// Input of `authorize`. Empty strings count as absent.
#[derive(Debug, Default)]
pub struct AuthorizeRequest {
    /// AppRole secret id to exchange for a new service token.
    pub secret_id: Option<SecretString>,
    /// New identity provider URL or organisation name.
    pub okta_url: Option<String>,
    /// New identity provider API token.
    pub okta_token: Option<SecretString>,
}

impl AuthorizeRequest {
    pub(crate) fn secret_id(&self) -> Option<&SecretString> {
        self.secret_id
            .as_ref()
            .filter(|s| !s.expose_secret().is_empty())
    }

    pub(crate) fn okta_url(&self) -> Option<&str> {
        self.okta_url.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub(crate) fn okta_token(&self) -> Option<&SecretString> {
        self.okta_token
            .as_ref()
            .filter(|s| !s.expose_secret().is_empty())
    }
}

/// Input of `sign`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    /// Decoded digest to sign.
    pub digest: Vec<u8>,
    /// Index of the key to sign with.
    pub address_index: u32,
}

impl SignRequest {
    /// Decodes `raw_data` (hex, `0x` optional).
    ///
    /// # Errors
    /// [`GuardianError::InvalidPayload`] for non-hex data and
    /// [`GuardianError::InvalidInput`] for an unsupported address index.
    pub fn new(raw_data: &str, address_index: Option<u32>) -> GuardianResult<Self> {
        let address_index = check_address_index(address_index)?;
        let digest = decode_hex(raw_data.trim())
            .map_err(|e| GuardianError::InvalidPayload(format!("raw_data is not valid hex: {e}")))?;
        Ok(Self {
            digest,
            address_index,
        })
    }
}

/// Unvalidated fields of `sign-tx` as a caller supplies them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignTxInput {
    /// Sender nonce. Required.
    pub nonce: Option<u64>,
    /// Recipient address, `0x`-prefixed. Required.
    pub to: Option<String>,
    /// Value in wei. Defaults to zero.
    pub amount: Option<U256>,
    /// Gas limit. Required.
    pub gas_limit: Option<u64>,
    /// Gas price in wei.
    pub gas_price: Option<u128>,
    /// Call data as hex.
    pub data: Option<String>,
    /// Chain id. Defaults to mainnet.
    pub chain_id: Option<u64>,
    /// Key index. Defaults to zero.
    pub address_index: Option<u32>,
}

/// Validated input of `sign-tx`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignTxRequest {
    /// The transaction to sign.
    pub params: TransactionParams,
    /// Index of the key to sign with.
    pub address_index: u32,
}

impl SignTxRequest {
    /// Validates `input`.
    ///
    /// A missing gas price is zero when `allow_zero_gas_price` is set and an
    /// error otherwise.
    ///
    /// # Errors
    /// [`GuardianError::InvalidInput`] naming the offending field, or
    /// [`GuardianError::InvalidPayload`] for non-hex data.
    pub fn new(input: SignTxInput, allow_zero_gas_price: bool) -> GuardianResult<Self> {
        let (nonce, to, gas_limit) = match (input.nonce, input.to.as_deref(), input.gas_limit) {
            (Some(nonce), Some(to), Some(gas_limit)) => (nonce, to, gas_limit),
            (nonce, to, gas_limit) => {
                let missing: Vec<&str> = [
                    ("nonce", nonce.is_none()),
                    ("to", to.is_none()),
                    ("gas_limit", gas_limit.is_none()),
                ]
                .into_iter()
                .filter_map(|(name, absent)| absent.then_some(name))
                .collect();
                return Err(GuardianError::invalid_input(
                    "nonce, to, gas_limit",
                    format!("all three are required, missing {}", missing.join(", ")),
                ));
            }
        };
        let to = Address::parse_from_request(to.trim(), "to")?;

        let gas_price = match input.gas_price {
            Some(gas_price) => gas_price,
            None if allow_zero_gas_price => 0,
            None => {
                return Err(GuardianError::invalid_input(
                    "gas_price",
                    "required unless zero gas price chains are enabled",
                ))
            }
        };

        let chain_id = input.chain_id.unwrap_or(DEFAULT_CHAIN_ID);
        if chain_id == 0 {
            return Err(GuardianError::invalid_input("chain_id", "must be positive"));
        }
        let address_index = check_address_index(input.address_index)?;

        let payload_hex = input.data.map(|d| d.trim().to_string()).unwrap_or_default();
        decode_hex(&payload_hex)
            .map_err(|e| GuardianError::InvalidPayload(format!("data is not valid hex: {e}")))?;

        Ok(Self {
            params: TransactionParams {
                chain_id,
                nonce,
                to,
                value: input.amount.unwrap_or(U256::ZERO),
                gas_limit,
                gas_price,
                payload_hex,
            },
            address_index,
        })
    }
}

/// Who is calling an operation that does not take a session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// Identity entity id of the request.
    Entity(String),
    /// Accessor of the token the request was made with.
    Accessor(String),
}

/// Output of `login`.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    /// Single-use session token.
    #[serde(serialize_with = "expose")]
    pub client_token: SecretString,
    /// Address of the user, when requested or newly created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Output of `authorize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuthorizeResponse {
    /// Always `true` on success.
    #[serde(rename = "configUpdated")]
    pub config_updated: bool,
}

/// Output of `sign`.
#[derive(Debug, Serialize)]
pub struct SignResponse {
    /// `0x` followed by r, s and v as 130 hex characters.
    pub signature: String,
    /// Replacement for the consumed session token.
    #[serde(serialize_with = "expose")]
    pub fresh_client_token: SecretString,
}

/// Output of `sign-tx`.
#[derive(Debug, Serialize)]
pub struct SignTxResponse {
    /// The signed transaction as JSON.
    pub signed_tx_json: String,
    /// The signed transaction, RLP encoded, `0x`-prefixed.
    pub signed_tx_rlp: String,
    /// Replacement for the consumed session token.
    #[serde(serialize_with = "expose")]
    pub fresh_client_token: SecretString,
}

/// Output of `get-address`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressResponse {
    /// Checksummed address of the caller.
    pub public_address: String,
}
