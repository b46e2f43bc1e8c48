//! `guardian`: operator CLI running the Guardian operations against Vault and
//! Okta. Every subcommand prints its response as JSON on stdout.
//!
//! The config written by `authorize` is kept under `--state-dir`, by default
//! `guardian/` in the platform's local data directory.

use std::{path::PathBuf, sync::Arc, time::Duration};

use alloy_primitives::U256;
use clap::{Args, Parser, Subcommand};
use eyre::{eyre, Result, WrapErr};
use guardian_core::{
    logger, AuthorizeRequest, Backend, Caller, FileRecordStorage, LoginRequest, Settings,
    SignRequest, SignTxInput, SignTxRequest,
};
use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Parser)]
#[command(name = "guardian", version, about = "Identity-to-key custody bridge")]
struct Cli {
    /// Directory holding the persisted config record.
    #[arg(long, env = "GUARDIAN_STATE_DIR", global = true)]
    state_dir: Option<PathBuf>,

    /// Vault address. Overrides `VAULT_ADDR`.
    #[arg(long, global = true)]
    vault_addr: Option<String>,

    /// Per-request HTTP timeout in seconds. Overrides
    /// `GUARDIAN_HTTP_TIMEOUT_SECS`.
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Set Guardian's AppRole secret and Okta credentials.
    Authorize {
        /// AppRole secret id, exchanged for a service token.
        #[arg(long, env = "GUARDIAN_SECRET_ID", hide_env_values = true)]
        secret_id: Option<String>,
        /// Okta organisation URL or name.
        #[arg(long)]
        okta_url: Option<String>,
        /// Okta API token.
        #[arg(long, env = "GUARDIAN_OKTA_TOKEN", hide_env_values = true)]
        okta_token: Option<String>,
    },
    /// Log in an end-user and print a single-use session token.
    Login {
        /// Okta username.
        #[arg(long)]
        username: String,
        /// Okta password.
        #[arg(long, env = "GUARDIAN_PASSWORD", hide_env_values = true)]
        password: String,
        /// Include the user's address in the response.
        #[arg(long)]
        get_address: bool,
    },
    /// Sign a 32-byte digest.
    Sign {
        #[command(flatten)]
        session: Session,
        /// Digest as hex, `0x` optional.
        #[arg(long)]
        raw_data: String,
        /// Key index.
        #[arg(long)]
        address_index: Option<u32>,
    },
    /// Sign a legacy transaction.
    SignTx {
        #[command(flatten)]
        session: Session,
        #[command(flatten)]
        tx: TxArgs,
    },
    /// Print the address of a user.
    Address {
        /// Identity entity id of the caller.
        #[arg(long, conflicts_with = "accessor", required_unless_present = "accessor")]
        entity: Option<String>,
        /// Accessor of the caller's token.
        #[arg(long)]
        accessor: Option<String>,
    },
}

#[derive(Debug, Args)]
struct Session {
    /// Accessor of the session token the request is made with.
    #[arg(long)]
    accessor: String,
}

#[derive(Debug, Args)]
struct TxArgs {
    #[arg(long)]
    nonce: Option<u64>,
    /// Recipient, `0x`-prefixed.
    #[arg(long)]
    to: Option<String>,
    /// Value in wei.
    #[arg(long)]
    amount: Option<U256>,
    #[arg(long)]
    gas_limit: Option<u64>,
    /// Gas price in wei.
    #[arg(long)]
    gas_price: Option<u128>,
    /// Call data as hex.
    #[arg(long)]
    data: Option<String>,
    #[arg(long)]
    chain_id: Option<u64>,
    #[arg(long)]
    address_index: Option<u32>,
}

impl From<TxArgs> for SignTxInput {
    fn from(args: TxArgs) -> Self {
        Self {
            nonce: args.nonce,
            to: args.to,
            amount: args.amount,
            gas_limit: args.gas_limit,
            gas_price: args.gas_price,
            data: args.data,
            chain_id: args.chain_id,
            address_index: args.address_index,
        }
    }
}

fn settings(cli: &Cli) -> Result<Settings> {
    let mut settings = Settings::from_env().wrap_err("invalid environment")?;
    if let Some(vault_addr) = &cli.vault_addr {
        settings.vault_addr.clone_from(vault_addr);
    }
    if let Some(secs) = cli.timeout_secs {
        settings.http_timeout = Some(Duration::from_secs(secs));
    }
    Ok(settings)
}

fn state_dir(cli: &Cli) -> Result<PathBuf> {
    if let Some(dir) = &cli.state_dir {
        return Ok(dir.clone());
    }
    dirs::data_local_dir()
        .map(|dir| dir.join("guardian"))
        .ok_or_else(|| eyre!("no local data directory on this platform, pass --state-dir"))
}

fn print<T: Serialize>(response: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(())
}

fn secret(value: Option<String>) -> Option<SecretString> {
    value.map(SecretString::from)
}

async fn run(cli: Cli) -> Result<()> {
    let settings = settings(&cli)?;
    let state_dir = state_dir(&cli)?;
    debug!(state_dir = %state_dir.display(), vault_addr = %settings.vault_addr, "starting");
    let storage = FileRecordStorage::open(&state_dir)
        .wrap_err_with(|| format!("cannot open state directory {}", state_dir.display()))?;
    let backend = Backend::new(Arc::new(storage), settings);

    match cli.command {
        Command::Authorize {
            secret_id,
            okta_url,
            okta_token,
        } => {
            let request = AuthorizeRequest {
                secret_id: secret(secret_id),
                okta_url,
                okta_token: secret(okta_token),
            };
            print(&backend.authorize(request).await?)
        }
        Command::Login {
            username,
            password,
            get_address,
        } => {
            let request = LoginRequest::new(username, SecretString::from(password), get_address)?;
            print(&backend.login(request).await?)
        }
        Command::Sign {
            session,
            raw_data,
            address_index,
        } => {
            let request = SignRequest::new(&raw_data, address_index)?;
            print(&backend.sign(request, &session.accessor).await?)
        }
        Command::SignTx { session, tx } => {
            let request =
                SignTxRequest::new(tx.into(), backend.settings().allow_zero_gas_price)?;
            print(&backend.sign_tx(request, &session.accessor).await?)
        }
        Command::Address { entity, accessor } => {
            let caller = match (entity, accessor) {
                (Some(entity), _) => Caller::Entity(entity),
                (None, Some(accessor)) => Caller::Accessor(accessor),
                (None, None) => return Err(eyre!("pass --entity or --accessor")),
            };
            print(&backend.get_address(&caller).await?)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logger::init_tracing(None);
    run(Cli::parse()).await
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_sign_tx_arguments() {
        let cli = Cli::try_parse_from([
            "guardian",
            "sign-tx",
            "--accessor",
            "acc-1",
            "--nonce",
            "3",
            "--to",
            "0x000000000000000000000000000000000000dEaD",
            "--amount",
            "1000",
            "--gas-limit",
            "21000",
            "--gas-price",
            "1",
        ])
        .unwrap();
        let Command::SignTx { session, tx } = cli.command else {
            panic!("expected sign-tx");
        };
        assert_eq!(session.accessor, "acc-1");
        let input = SignTxInput::from(tx);
        assert_eq!(input.nonce, Some(3));
        assert_eq!(input.amount, Some(U256::from(1000)));
        assert!(input.chain_id.is_none());
    }

    #[test]
    fn test_address_needs_a_caller() {
        assert!(Cli::try_parse_from(["guardian", "address"]).is_err());
        assert!(
            Cli::try_parse_from(["guardian", "address", "--entity", "e", "--accessor", "a"])
                .is_err()
        );
    }

    #[test]
    fn test_state_dir_override() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::try_parse_from([
            "guardian",
            "--state-dir",
            dir.path().to_str().unwrap(),
            "address",
            "--entity",
            "e",
        ])
        .unwrap();
        assert_eq!(state_dir(&cli).unwrap(), dir.path());
    }
}
