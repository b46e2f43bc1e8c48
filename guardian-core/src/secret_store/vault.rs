use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::{
    defaults::Settings,
    error::{GuardianError, GuardianResult},
    http_request::{is_absent, join_path, unexpected_status, Request},
};

use super::{AccessorLookup, EntityLookup, IssuedToken, KeyRecord, SecretStore, TokenRequest};

/// Vault HTTP API client authenticated with Guardian's service token.
pub struct VaultClient {
    addr: String,
    token: SecretString,
    keys_mount: String,
    keys_kv_v2: bool,
    okta_mount: String,
    request: Request,
}

#[derive(Deserialize)]
struct VaultResponse<T> {
    data: Option<T>,
    auth: Option<VaultAuth>,
}

#[derive(Deserialize)]
struct VaultAuth {
    client_token: String,
    #[serde(default)]
    accessor: String,
}

#[derive(Serialize, Deserialize)]
struct KeyRecordData {
    #[serde(rename = "privKeyHex")]
    priv_key_hex: String,
    #[serde(rename = "publicAddressHex", default)]
    public_address_hex: String,
}

#[derive(Deserialize)]
struct VersionedData<T> {
    data: Option<T>,
}

#[derive(Serialize)]
struct CasOptions {
    cas: u64,
}

#[derive(Serialize)]
struct VersionedWrite<'a> {
    options: CasOptions,
    data: &'a KeyRecordData,
}

#[derive(Deserialize)]
struct EntityData {
    #[serde(default)]
    aliases: Vec<AliasData>,
}

#[derive(Deserialize)]
struct AliasData {
    name: String,
}

#[derive(Deserialize)]
struct AccessorData {
    meta: Option<HashMap<String, String>>,
}

#[derive(Serialize)]
struct CreateTokenBody<'a> {
    policies: &'a [String],
    num_uses: u32,
    meta: &'a BTreeMap<String, String>,
}

impl VaultClient {
    /// Builds a client for `settings.vault_addr` using `token`.
    ///
    /// An empty token is allowed; only AppRole login works without one.
    #[must_use]
    pub fn new(settings: &Settings, token: SecretString) -> Self {
        Self {
            addr: settings.vault_addr.trim_end_matches('/').to_string(),
            token,
            keys_mount: settings.keys_mount.trim_matches('/').to_string(),
            keys_kv_v2: settings.keys_kv_v2,
            okta_mount: settings.okta_mount.trim_matches('/').to_string(),
            request: Request::new(settings.http_timeout),
        }
    }

    /// `path` is trusted and may span several levels; `segment` is a caller
    /// supplied value and always stays one encoded level.
    fn url(&self, path: &str, segment: Option<&str>) -> GuardianResult<String> {
        join_path(
            &self.addr,
            std::iter::once("v1").chain(path.split('/')).chain(segment),
        )
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        let token = self.token.expose_secret();
        if token.is_empty() {
            builder
        } else {
            builder.header("X-Vault-Token", token)
        }
    }

    async fn send(&self, operation: &str, builder: RequestBuilder) -> GuardianResult<Response> {
        self.request
            .handle(self.authed(builder))
            .await
            .map_err(|e| GuardianError::store(operation, e))
    }

    fn user_url(&self, username: &str) -> GuardianResult<String> {
        self.url(&format!("auth/{}/users", self.okta_mount), Some(username))
    }

    fn key_url(&self, username: &str) -> GuardianResult<String> {
        if self.keys_kv_v2 {
            self.url(&format!("{}/data", self.keys_mount), Some(username))
        } else {
            self.url(&self.keys_mount, Some(username))
        }
    }
}

async fn expect_success(operation: &str, response: Response) -> GuardianResult<Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(GuardianError::store(operation, unexpected_status(response).await))
    }
}

async fn parse<T: DeserializeOwned>(
    operation: &str,
    response: Response,
) -> GuardianResult<VaultResponse<T>> {
    response.json().await.map_err(|e| {
        GuardianError::Serialization(format!("failed to parse {operation} response: {e}"))
    })
}

#[async_trait]
impl SecretStore for VaultClient {
    async fn auth_user_exists(&self, username: &str) -> GuardianResult<bool> {
        let operation = "read auth user";
        let response = self
            .send(operation, self.request.get(&self.user_url(username)?))
            .await?;
        if is_absent(response.status()) {
            return Ok(false);
        }
        expect_success(operation, response).await?;
        Ok(true)
    }

    async fn register_auth_user(&self, username: &str, groups: &[String]) -> GuardianResult<()> {
        let operation = "register auth user";
        let builder = self
            .request
            .post(&self.user_url(username)?)
            .json(&json!({ "groups": groups }));
        let response = self.send(operation, builder).await?;
        expect_success(operation, response).await?;
        debug!(username, "registered user in auth method");
        Ok(())
    }

    async fn login_auth_user(
        &self,
        username: &str,
        password: &SecretString,
    ) -> GuardianResult<()> {
        let operation = "identity provider login";
        let url = self.url(&format!("auth/{}/login", self.okta_mount), Some(username))?;
        let builder = self
            .request
            .post(&url)
            .json(&json!({ "password": password.expose_secret() }));
        let response = self.send(operation, builder).await?;

        let status = response.status();
        if status.is_success() {
            // any token in the response is dropped
            return Ok(());
        }
        let error = unexpected_status(response).await;
        // 403 and 429 come from Vault policy and quotas, not from the provider
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            return Err(GuardianError::IdentityProviderRejected(format!(
                "unable to login with the provided credentials: {}",
                error.error
            )));
        }
        Err(GuardianError::store(operation, error))
    }

    async fn read_key_record(&self, username: &str) -> GuardianResult<Option<KeyRecord>> {
        let operation = "read key";
        let url = self.key_url(username)?;
        let response = self.send(operation, self.request.get(&url)).await?;
        if is_absent(response.status()) {
            return Ok(None);
        }
        let response = expect_success(operation, response).await?;
        let data = if self.keys_kv_v2 {
            let parsed: VaultResponse<VersionedData<KeyRecordData>> =
                parse(operation, response).await?;
            parsed.data.and_then(|versioned| versioned.data)
        } else {
            let parsed: VaultResponse<KeyRecordData> = parse(operation, response).await?;
            parsed.data
        };
        Ok(data.map(|data| KeyRecord {
            private_key_hex: SecretString::from(data.priv_key_hex),
            public_address_hex: data.public_address_hex,
        }))
    }

    async fn write_key_record(&self, username: &str, record: &KeyRecord) -> GuardianResult<()> {
        let operation = "write key";
        let url = self.key_url(username)?;
        let body = KeyRecordData {
            priv_key_hex: record.private_key_hex.expose_secret().to_string(),
            public_address_hex: record.public_address_hex.clone(),
        };
        let builder = if self.keys_kv_v2 {
            // cas 0 only succeeds while no version of the record exists
            self.request.post(&url).json(&VersionedWrite {
                options: CasOptions { cas: 0 },
                data: &body,
            })
        } else {
            self.request.post(&url).json(&body)
        };
        let response = self.send(operation, builder).await?;
        if self.keys_kv_v2 && response.status() == StatusCode::BAD_REQUEST {
            let error = unexpected_status(response).await;
            if error.error.contains("check-and-set") {
                return Err(GuardianError::KeyAlreadyExists {
                    username: username.to_string(),
                });
            }
            return Err(GuardianError::store(operation, error));
        }
        expect_success(operation, response).await?;
        Ok(())
    }

    async fn lookup_entity(&self, entity_id: &str) -> GuardianResult<EntityLookup> {
        let operation = "lookup entity";
        let builder = self
            .request
            .post(&self.url("identity/lookup/entity", None)?)
            .json(&json!({ "id": entity_id }));
        let response = self.send(operation, builder).await?;
        if is_absent(response.status()) {
            return Ok(EntityLookup::default());
        }
        let response = expect_success(operation, response).await?;
        let parsed: VaultResponse<EntityData> = parse(operation, response).await?;
        Ok(EntityLookup {
            aliases: parsed
                .data
                .map(|data| data.aliases.into_iter().map(|alias| alias.name).collect())
                .unwrap_or_default(),
        })
    }

    async fn lookup_accessor(&self, accessor: &str) -> GuardianResult<AccessorLookup> {
        let operation = "lookup token accessor";
        let builder = self
            .request
            .post(&self.url("auth/token/lookup-accessor", None)?)
            .json(&json!({ "accessor": accessor }));
        let response = self.send(operation, builder).await?;
        let response = expect_success(operation, response).await?;
        let parsed: VaultResponse<AccessorData> = parse(operation, response).await?;
        Ok(AccessorLookup {
            meta: parsed.data.and_then(|data| data.meta),
        })
    }

    async fn create_token(&self, request: &TokenRequest) -> GuardianResult<IssuedToken> {
        let operation = "create token";
        let url = self.url("auth/token/create", Some(&request.role))?;
        let body = CreateTokenBody {
            policies: &request.policies,
            num_uses: request.num_uses,
            meta: &request.meta,
        };
        let response = self.send(operation, self.request.post(&url).json(&body)).await?;
        let response = expect_success(operation, response).await?;
        let parsed: VaultResponse<serde_json::Value> = parse(operation, response).await?;
        let auth = parsed.auth.ok_or_else(|| {
            GuardianError::TokenIssuanceFailure("no auth info returned".to_string())
        })?;
        Ok(IssuedToken {
            client_token: SecretString::from(auth.client_token),
            accessor: auth.accessor,
        })
    }

    async fn approle_login(
        &self,
        role_id: &str,
        secret_id: &SecretString,
    ) -> GuardianResult<SecretString> {
        let operation = "approle login";
        let builder = self.request.post(&self.url("auth/approle/login", None)?).json(&json!({
            "role_id": role_id,
            "secret_id": secret_id.expose_secret(),
        }));
        let response = self.send(operation, builder).await?;
        if response.status() == StatusCode::BAD_REQUEST {
            let error = unexpected_status(response).await;
            return Err(GuardianError::TokenIssuanceFailure(format!(
                "secret_id was rejected: {}",
                error.error
            )));
        }
        let response = expect_success(operation, response).await?;
        let parsed: VaultResponse<serde_json::Value> = parse(operation, response).await?;
        parsed
            .auth
            .map(|auth| SecretString::from(auth.client_token))
            .ok_or_else(|| GuardianError::TokenIssuanceFailure("no auth info returned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use mockito::{Matcher, Server};

    use super::*;

    fn client(server: &Server) -> VaultClient {
        let settings = Settings {
            vault_addr: server.url(),
            ..Settings::default()
        };
        VaultClient::new(&settings, SecretString::from("s.guardian".to_string()))
    }

    #[tokio::test]
    async fn test_auth_user_exists() {
        let mut server = Server::new_async().await;
        let known = server
            .mock("GET", "/v1/auth/okta/users/known@acme.com")
            .match_header("x-vault-token", "s.guardian")
            .with_status(200)
            .with_body(r#"{"data":{"groups":["vault-guardian-endusers"]}}"#)
            .create_async()
            .await;
        let unknown = server
            .mock("GET", "/v1/auth/okta/users/new@acme.com")
            .with_status(404)
            .with_body(r#"{"errors":[]}"#)
            .create_async()
            .await;

        let vault = client(&server);
        assert!(vault.auth_user_exists("known@acme.com").await.unwrap());
        assert!(!vault.auth_user_exists("new@acme.com").await.unwrap());
        known.assert_async().await;
        unknown.assert_async().await;
    }

    #[tokio::test]
    async fn test_register_sends_groups() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/auth/okta/users/new@acme.com")
            .match_body(Matcher::Json(json!({ "groups": ["vault-guardian-endusers"] })))
            .with_status(204)
            .create_async()
            .await;

        client(&server)
            .register_auth_user("new@acme.com", &["vault-guardian-endusers".to_string()])
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_login_rejection_is_not_a_store_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1/auth/okta/login/user@acme.com")
            .with_status(400)
            .with_body(r#"{"errors":["Okta auth failed"]}"#)
            .create_async()
            .await;

        let err = client(&server)
            .login_auth_user("user@acme.com", &SecretString::from("wrong".to_string()))
            .await
            .unwrap_err();
        match err {
            GuardianError::IdentityProviderRejected(message) => {
                assert!(message.contains("Okta auth failed"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_only_credential_failures_reject_the_login() {
        let mut server = Server::new_async().await;
        for (user, status) in [("a", 400), ("b", 401), ("c", 403), ("d", 429)] {
            server
                .mock("POST", format!("/v1/auth/okta/login/{user}@acme.com").as_str())
                .with_status(status)
                .with_body(r#"{"errors":["nope"]}"#)
                .create_async()
                .await;
        }

        let vault = client(&server);
        let password = SecretString::from("pw".to_string());
        for user in ["a@acme.com", "b@acme.com"] {
            let err = vault.login_auth_user(user, &password).await.unwrap_err();
            assert!(matches!(err, GuardianError::IdentityProviderRejected(_)));
        }
        for user in ["c@acme.com", "d@acme.com"] {
            let err = vault.login_auth_user(user, &password).await.unwrap_err();
            assert!(matches!(err, GuardianError::StoreUnavailable { .. }));
            assert!(err.is_retryable());
        }
    }

    #[tokio::test]
    async fn test_usernames_stay_one_path_segment() {
        let mut server = Server::new_async().await;
        let key = server
            .mock("GET", "/v1/keys/a%252F..%252Fgroups")
            .with_status(404)
            .create_async()
            .await;
        let user = server
            .mock("GET", "/v1/auth/okta/users/..%2Fsys")
            .with_status(404)
            .create_async()
            .await;

        let vault = client(&server);
        assert!(vault.read_key_record("a%2F..%2Fgroups").await.unwrap().is_none());
        assert!(!vault.auth_user_exists("../sys").await.unwrap());
        assert!(matches!(
            vault.read_key_record("..").await,
            Err(GuardianError::InvalidInput { .. })
        ));

        key.assert_async().await;
        user.assert_async().await;
    }

    #[tokio::test]
    async fn test_versioned_keys_mount_writes_with_check_and_set() {
        let mut server = Server::new_async().await;
        let record = json!({
            "privKeyHex": "ab".repeat(32),
            "publicAddressHex": "0x000000000000000000000000000000000000dEaD",
        });
        let created = server
            .mock("POST", "/v1/keys/data/new@acme.com")
            .match_body(Matcher::Json(json!({ "options": { "cas": 0 }, "data": record })))
            .with_status(200)
            .with_body(r#"{"data":{"version":1}}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/v1/keys/data/taken@acme.com")
            .with_status(400)
            .with_body(
                r#"{"errors":["check-and-set parameter did not match the current version"]}"#,
            )
            .create_async()
            .await;
        server
            .mock("GET", "/v1/keys/data/new@acme.com")
            .with_status(200)
            .with_body(json!({ "data": { "data": record, "metadata": { "version": 1 } } }).to_string())
            .create_async()
            .await;

        let settings = Settings {
            vault_addr: server.url(),
            keys_kv_v2: true,
            ..Settings::default()
        };
        let vault = VaultClient::new(&settings, SecretString::from("s.guardian".to_string()));
        let key_record = || KeyRecord {
            private_key_hex: SecretString::from("ab".repeat(32)),
            public_address_hex: "0x000000000000000000000000000000000000dEaD".to_string(),
        };

        vault.write_key_record("new@acme.com", &key_record()).await.unwrap();
        let err = vault
            .write_key_record("taken@acme.com", &key_record())
            .await
            .unwrap_err();
        assert!(
            matches!(err, GuardianError::KeyAlreadyExists { username } if username == "taken@acme.com")
        );
        let stored = vault.read_key_record("new@acme.com").await.unwrap().unwrap();
        assert_eq!(stored.private_key_hex.expose_secret(), "ab".repeat(32));
        created.assert_async().await;
    }

    #[tokio::test]
    async fn test_sealed_vault_is_unavailable() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1/auth/okta/login/user@acme.com")
            .with_status(503)
            .with_body(r#"{"errors":["Vault is sealed"]}"#)
            .create_async()
            .await;

        let err = client(&server)
            .login_auth_user("user@acme.com", &SecretString::from("pw".to_string()))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("Vault is sealed"));
    }

    #[tokio::test]
    async fn test_key_record_round_trip_uses_plugin_field_names() {
        let mut server = Server::new_async().await;
        let write = server
            .mock("POST", "/v1/keys/user@acme.com")
            .match_body(Matcher::Json(json!({
                "privKeyHex": "ab".repeat(32),
                "publicAddressHex": "0x000000000000000000000000000000000000dEaD",
            })))
            .with_status(204)
            .create_async()
            .await;
        let read = server
            .mock("GET", "/v1/keys/user@acme.com")
            .with_status(200)
            .with_body(
                json!({
                    "data": {
                        "privKeyHex": "ab".repeat(32),
                        "publicAddressHex": "0x000000000000000000000000000000000000dEaD",
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;
        let missing = server
            .mock("GET", "/v1/keys/nobody@acme.com")
            .with_status(404)
            .create_async()
            .await;

        let vault = client(&server);
        vault
            .write_key_record(
                "user@acme.com",
                &KeyRecord {
                    private_key_hex: SecretString::from("ab".repeat(32)),
                    public_address_hex: "0x000000000000000000000000000000000000dEaD".to_string(),
                },
            )
            .await
            .unwrap();
        let record = vault.read_key_record("user@acme.com").await.unwrap().unwrap();
        assert_eq!(record.private_key_hex.expose_secret(), "ab".repeat(32));
        assert!(vault.read_key_record("nobody@acme.com").await.unwrap().is_none());

        write.assert_async().await;
        read.assert_async().await;
        missing.assert_async().await;
    }

    #[tokio::test]
    async fn test_lookups() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1/identity/lookup/entity")
            .match_body(Matcher::Json(json!({ "id": "entity-1" })))
            .with_status(200)
            .with_body(r#"{"data":{"aliases":[{"name":"user@acme.com","mount_type":"okta"}]}}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/v1/identity/lookup/entity")
            .match_body(Matcher::Json(json!({ "id": "entity-2" })))
            .with_status(204)
            .create_async()
            .await;
        server
            .mock("POST", "/v1/auth/token/lookup-accessor")
            .match_body(Matcher::Json(json!({ "accessor": "acc-1" })))
            .with_status(200)
            .with_body(r#"{"data":{"meta":{"name":"user@acme.com"},"num_uses":1}}"#)
            .create_async()
            .await;

        let vault = client(&server);
        assert_eq!(
            vault.lookup_entity("entity-1").await.unwrap().aliases,
            vec!["user@acme.com".to_string()]
        );
        assert!(vault.lookup_entity("entity-2").await.unwrap().aliases.is_empty());
        let meta = vault.lookup_accessor("acc-1").await.unwrap().meta.unwrap();
        assert_eq!(meta["name"], "user@acme.com");
    }

    #[tokio::test]
    async fn test_create_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/auth/token/create/guardian-enduser")
            .match_body(Matcher::Json(json!({
                "policies": ["enduser"],
                "num_uses": 1,
                "meta": { "name": "user@acme.com" },
            })))
            .with_status(200)
            .with_body(r#"{"auth":{"client_token":"s.fresh","accessor":"acc-2"}}"#)
            .create_async()
            .await;

        let token = client(&server)
            .create_token(&TokenRequest {
                role: "guardian-enduser".to_string(),
                policies: vec!["enduser".to_string()],
                num_uses: 1,
                meta: BTreeMap::from([("name".to_string(), "user@acme.com".to_string())]),
            })
            .await
            .unwrap();
        assert_eq!(token.client_token.expose_secret(), "s.fresh");
        assert_eq!(token.accessor, "acc-2");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_approle_login_without_service_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/auth/approle/login")
            .match_header("x-vault-token", Matcher::Missing)
            .match_body(Matcher::Json(json!({
                "role_id": "guardian-role-id",
                "secret_id": "secret-1",
            })))
            .with_status(200)
            .with_body(r#"{"auth":{"client_token":"s.service","accessor":"acc-svc"}}"#)
            .create_async()
            .await;

        let settings = Settings {
            vault_addr: server.url(),
            ..Settings::default()
        };
        let vault = VaultClient::new(&settings, SecretString::from(String::new()));
        let token = vault
            .approle_login("guardian-role-id", &SecretString::from("secret-1".to_string()))
            .await
            .unwrap();
        assert_eq!(token.expose_secret(), "s.service");
        mock.assert_async().await;
    }
}
