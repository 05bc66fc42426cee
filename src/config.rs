//! Runtime configuration
//!
//! Settings come from an optional TOML file, then the process environment.
//! Environment values win.

use ::config::{Config, ConfigError as SourceError, Environment, File, FileFormat};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{AnchorError, Result};
use crate::ledger::{Address, JsonRpcConnection, LedgerLogClient, Wallet};

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_VAR: &str = "LEDGER_ANCHOR_CONFIG";

const DEFAULT_NETWORK: &str = "sepolia";

const KEYS: [&str; 8] = [
    "RPC_URL",
    "NETWORK",
    "INFURA_API_KEY",
    "CHAIN_ID",
    "PRIVATE_KEY",
    "CONTRACT_ADDRESS",
    "GAS_PRICE_WEI",
    "RPC_TIMEOUT_SECS",
];

#[derive(Debug, Clone)]
pub struct AnchorConfig {
    pub rpc_url: String,
    pub network: String,
    /// Pinned chain id; queried from the node when absent.
    pub chain_id: Option<u64>,
    /// Signing key, only needed for writes.
    pub wallet: Option<Wallet>,
    pub contract_address: Address,
    pub gas_price_wei: Option<u128>,
    pub rpc_timeout_secs: Option<u64>,
}

impl AnchorConfig {
    /// Load from `path` (or `$LEDGER_ANCHOR_CONFIG`) and the process
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| env::var_os(CONFIG_PATH_VAR).map(PathBuf::from));
        Self::load_from(path.as_deref(), env::vars().collect())
    }

    /// Load from an optional file and an explicit variable set.
    pub fn load_from(path: Option<&Path>, vars: HashMap<String, String>) -> Result<Self> {
        // Only our own keys, so unrelated variables cannot shadow file values.
        let overrides: HashMap<String, String> = vars
            .into_iter()
            .filter(|(key, value)| KEYS.contains(&key.as_str()) && !value.trim().is_empty())
            .map(|(key, value)| (key.to_ascii_lowercase(), value))
            .collect();

        let mut builder = Config::builder().set_default("network", DEFAULT_NETWORK)?;
        if let Some(path) = path {
            debug!("Reading configuration from {}", path.display());
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        let settings = builder
            .add_source(Environment::default().source(Some(overrides)))
            .build()?;

        let network =
            optional(&settings, "network")?.unwrap_or_else(|| DEFAULT_NETWORK.to_string());
        let rpc_url = match optional(&settings, "rpc_url")? {
            Some(url) => url,
            None => {
                let key = optional(&settings, "infura_api_key")?.ok_or_else(|| {
                    AnchorError::ConfigError("set RPC_URL or INFURA_API_KEY".to_string())
                })?;
                format!("https://{}.infura.io/v3/{}", network, key)
            }
        };

        let contract_address = optional(&settings, "contract_address")?
            .ok_or_else(|| AnchorError::ConfigError("CONTRACT_ADDRESS is required".to_string()))?
            .parse::<Address>()
            .map_err(|e| AnchorError::ConfigError(format!("CONTRACT_ADDRESS: {}", e)))?;

        let wallet = optional(&settings, "private_key")?
            .map(|key| Wallet::from_hex(&key))
            .transpose()
            .map_err(|e| AnchorError::ConfigError(format!("PRIVATE_KEY: {}", e)))?;

        Ok(Self {
            rpc_url,
            network,
            chain_id: parse_number(&settings, "chain_id")?,
            wallet,
            contract_address,
            gas_price_wei: parse_number(&settings, "gas_price_wei")?,
            rpc_timeout_secs: parse_number(&settings, "rpc_timeout_secs")?,
        })
    }

    /// Build the log client this configuration describes.
    pub fn connect(&self) -> Result<LedgerLogClient<JsonRpcConnection>> {
        let connection = match self.rpc_timeout_secs {
            Some(secs) => {
                JsonRpcConnection::with_timeout(self.rpc_url.clone(), Duration::from_secs(secs))?
            }
            None => JsonRpcConnection::new(self.rpc_url.clone()),
        };

        let mut client = LedgerLogClient::new(connection, self.contract_address);
        if let Some(wallet) = &self.wallet {
            client = client.with_wallet(wallet.clone());
        }
        if let Some(price) = self.gas_price_wei {
            client = client.with_gas_price(price);
        }
        if let Some(chain_id) = self.chain_id {
            client = client.with_chain_id(chain_id);
        }
        Ok(client)
    }
}

fn optional(settings: &Config, key: &str) -> Result<Option<String>> {
    match settings.get_string(key) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value.trim().to_string())),
        Err(SourceError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn parse_number<T: std::str::FromStr>(settings: &Config, key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    optional(settings, key)?
        .map(|value| {
            value.parse::<T>().map_err(|e| {
                AnchorError::ConfigError(format!(
                    "{}: {:?} is not a number: {}",
                    key.to_uppercase(),
                    value,
                    e
                ))
            })
        })
        .transpose()
}
