//! The three long-lived secrets Guardian runs with, and their persistence.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    defaults::CONFIG_RECORD,
    error::{GuardianError, GuardianResult},
    storage::RecordStorage,
};

/// Guardian's credentials towards its two collaborators.
///
/// Loaded from record storage at the start of every request and passed down
/// explicitly; there is no process-wide copy.
#[derive(Debug)]
pub struct GuardianConfig {
    /// Secret-store token holding the guardian policy.
    pub service_token: SecretString,
    /// Identity provider organisation URL, or bare organisation name.
    pub provider_url: String,
    /// Identity provider API token.
    pub provider_token: SecretString,
}

/// Persisted shape of [`GuardianConfig`].
#[derive(Serialize, Deserialize)]
struct StoredConfig {
    #[serde(default)]
    guardian_token: String,
    #[serde(default)]
    okta_url: String,
    #[serde(default)]
    okta_token: String,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            service_token: SecretString::from(String::new()),
            provider_url: String::new(),
            provider_token: SecretString::from(String::new()),
        }
    }
}

impl GuardianConfig {
    /// Whether a service token is present.
    #[must_use]
    pub fn is_authorized(&self) -> bool {
        !self.service_token.expose_secret().is_empty()
    }

    /// Checks that all three fields are non-empty.
    ///
    /// # Errors
    /// Returns [`GuardianError::ConfigIncomplete`] naming the first empty field.
    pub fn ensure_complete(&self) -> GuardianResult<()> {
        if !self.is_authorized() {
            return Err(GuardianError::ConfigIncomplete { field: "secret_id" });
        }
        if self.provider_url.is_empty() {
            return Err(GuardianError::ConfigIncomplete { field: "okta_url" });
        }
        if self.provider_token.expose_secret().is_empty() {
            return Err(GuardianError::ConfigIncomplete { field: "okta_token" });
        }
        Ok(())
    }
}

/// Reads and writes the single `config` record.
pub struct ConfigManager<'a> {
    storage: &'a dyn RecordStorage,
}

impl<'a> ConfigManager<'a> {
    /// Wraps `storage`.
    #[must_use]
    pub fn new(storage: &'a dyn RecordStorage) -> Self {
        Self { storage }
    }

    /// Loads the config, returning an empty one if none has been saved.
    ///
    /// # Errors
    /// Returns [`GuardianError::Storage`] or [`GuardianError::Serialization`]
    /// if the record cannot be read or parsed.
    pub fn load(&self) -> GuardianResult<GuardianConfig> {
        let Some(bytes) = self.storage.get(CONFIG_RECORD)? else {
            debug!("no config record yet, starting empty");
            return Ok(GuardianConfig::default());
        };
        let stored: StoredConfig = serde_json::from_slice(&bytes)?;
        Ok(GuardianConfig {
            service_token: SecretString::from(stored.guardian_token),
            provider_url: stored.okta_url,
            provider_token: SecretString::from(stored.okta_token),
        })
    }

    /// Persists `config` after checking it is complete.
    ///
    /// # Errors
    /// Returns [`GuardianError::ConfigIncomplete`] without writing if a field is
    /// empty, or a storage/serialization error.
    pub fn save(&self, config: &GuardianConfig) -> GuardianResult<()> {
        config.ensure_complete()?;
        let stored = StoredConfig {
            guardian_token: config.service_token.expose_secret().to_string(),
            okta_url: config.provider_url.clone(),
            okta_token: config.provider_token.expose_secret().to_string(),
        };
        self.storage.put(CONFIG_RECORD, &serde_json::to_vec(&stored)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryRecordStorage;

    fn complete() -> GuardianConfig {
        GuardianConfig {
            service_token: SecretString::from("s.service".to_string()),
            provider_url: "acme".to_string(),
            provider_token: SecretString::from("okta-token".to_string()),
        }
    }

    #[test]
    fn test_missing_record_loads_empty() {
        let storage = MemoryRecordStorage::new();
        let config = ConfigManager::new(&storage).load().unwrap();
        assert!(!config.is_authorized());
        assert!(matches!(
            config.ensure_complete(),
            Err(GuardianError::ConfigIncomplete { field: "secret_id" })
        ));
    }

    #[test]
    fn test_save_then_load() {
        let storage = MemoryRecordStorage::new();
        let manager = ConfigManager::new(&storage);
        manager.save(&complete()).unwrap();

        let loaded = manager.load().unwrap();
        assert_eq!(loaded.service_token.expose_secret(), "s.service");
        assert_eq!(loaded.provider_url, "acme");
        assert_eq!(loaded.provider_token.expose_secret(), "okta-token");
    }

    #[test]
    fn test_record_uses_plugin_field_names() {
        let storage = MemoryRecordStorage::new();
        ConfigManager::new(&storage).save(&complete()).unwrap();
        let raw: serde_json::Value =
            serde_json::from_slice(&storage.get(CONFIG_RECORD).unwrap().unwrap()).unwrap();
        assert_eq!(raw["guardian_token"], "s.service");
        assert_eq!(raw["okta_url"], "acme");
        assert_eq!(raw["okta_token"], "okta-token");
    }

    #[test]
    fn test_incomplete_config_is_not_saved() {
        let storage = MemoryRecordStorage::new();
        let config = GuardianConfig {
            provider_url: String::new(),
            ..complete()
        };
        let err = ConfigManager::new(&storage).save(&config).unwrap_err();
        assert!(matches!(err, GuardianError::ConfigIncomplete { field: "okta_url" }));
        assert!(storage.get(CONFIG_RECORD).unwrap().is_none());
    }

    #[test]
    fn test_debug_does_not_leak_secrets() {
        let rendered = format!("{:?}", complete());
        assert!(!rendered.contains("s.service"));
        assert!(!rendered.contains("okta-token"));
    }
}
