//! Fixed names shared with the secret store deployment, and process settings.

use std::{env, time::Duration};

use crate::error::{GuardianError, GuardianResult};

/// Secret store address used when `VAULT_ADDR` is not set.
pub const DEFAULT_VAULT_ADDR: &str = "https://127.0.0.1:8200";
/// Mount of the key-value engine holding key records.
pub const DEFAULT_KEYS_MOUNT: &str = "keys";
/// Mount of the auth method bridging to the identity provider.
pub const DEFAULT_OKTA_MOUNT: &str = "okta";
/// Role id of the AppRole the service secret belongs to.
pub const DEFAULT_ROLE_ID: &str = "guardian-role-id";
/// Group every provisioned end-user is registered into.
pub const DEFAULT_ENDUSER_GROUP: &str = "vault-guardian-endusers";
/// Capability policy attached to session tokens.
pub const DEFAULT_ENDUSER_POLICY: &str = "enduser";
/// Token role session tokens are created against.
pub const DEFAULT_TOKEN_ROLE: &str = "guardian-enduser";
/// Name of the persisted config record.
pub const CONFIG_RECORD: &str = "config";
/// Chain id used by `sign-tx` when none is supplied.
pub const DEFAULT_CHAIN_ID: u64 = 1;

/// Deployment settings that are not secret and do not change per request.
///
/// These describe where things live in the secret store, not who Guardian
/// authenticates as; the latter is the persisted [`crate::GuardianConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Base address of the secret store API.
    pub vault_addr: String,
    /// Mount of the key-value engine holding key records.
    pub keys_mount: String,
    /// Whether the keys mount is a versioned (v2) engine. Writes then use
    /// check-and-set so an existing key can never be replaced.
    pub keys_kv_v2: bool,
    /// Mount of the identity-provider auth method.
    pub okta_mount: String,
    /// AppRole role id exchanged together with the service secret.
    pub role_id: String,
    /// Group new users are registered into.
    pub default_group: String,
    /// Policy attached to session tokens.
    pub enduser_policy: String,
    /// Token role used to mint session tokens.
    pub token_role: String,
    /// Optional deadline applied to every outgoing HTTP call.
    pub http_timeout: Option<Duration>,
    /// Whether `sign-tx` may treat a missing gas price as zero.
    pub allow_zero_gas_price: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            vault_addr: DEFAULT_VAULT_ADDR.to_string(),
            keys_mount: DEFAULT_KEYS_MOUNT.to_string(),
            keys_kv_v2: false,
            okta_mount: DEFAULT_OKTA_MOUNT.to_string(),
            role_id: DEFAULT_ROLE_ID.to_string(),
            default_group: DEFAULT_ENDUSER_GROUP.to_string(),
            enduser_policy: DEFAULT_ENDUSER_POLICY.to_string(),
            token_role: DEFAULT_TOKEN_ROLE.to_string(),
            http_timeout: None,
            allow_zero_gas_price: false,
        }
    }
}

impl Settings {
    /// Builds settings from the process environment, falling back to defaults.
    ///
    /// # Errors
    /// Returns [`GuardianError::InvalidInput`] if a numeric or boolean variable
    /// does not parse.
    pub fn from_env() -> GuardianResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds settings from an arbitrary variable lookup.
    ///
    /// # Errors
    /// See [`Settings::from_env`].
    pub fn from_lookup<F>(lookup: F) -> GuardianResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let string = |name: &str, default: String| {
            lookup(name).filter(|v| !v.is_empty()).unwrap_or(default)
        };

        let http_timeout = match lookup("GUARDIAN_HTTP_TIMEOUT_SECS") {
            Some(raw) if !raw.is_empty() => {
                let secs = raw.parse::<u64>().map_err(|e| {
                    GuardianError::invalid_input("GUARDIAN_HTTP_TIMEOUT_SECS", e.to_string())
                })?;
                Some(Duration::from_secs(secs))
            }
            _ => None,
        };

        let flag = |name: &str| match lookup(name) {
            Some(raw) if !raw.is_empty() => raw
                .parse::<bool>()
                .map_err(|e| GuardianError::invalid_input(name, e.to_string())),
            _ => Ok(false),
        };
        let allow_zero_gas_price = flag("GUARDIAN_ALLOW_ZERO_GAS_PRICE")?;
        let keys_kv_v2 = flag("GUARDIAN_KEYS_KV_V2")?;

        Ok(Self {
            vault_addr: string("VAULT_ADDR", defaults.vault_addr),
            keys_mount: string("GUARDIAN_KEYS_MOUNT", defaults.keys_mount),
            keys_kv_v2,
            okta_mount: string("GUARDIAN_OKTA_MOUNT", defaults.okta_mount),
            role_id: string("GUARDIAN_ROLE_ID", defaults.role_id),
            default_group: string("GUARDIAN_DEFAULT_GROUP", defaults.default_group),
            enduser_policy: string("GUARDIAN_ENDUSER_POLICY", defaults.enduser_policy),
            token_role: string("GUARDIAN_TOKEN_ROLE", defaults.token_role),
            http_timeout,
            allow_zero_gas_price,
        })
    }
}
