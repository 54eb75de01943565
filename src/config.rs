//! Client Configuration - passed from higher layers
//!
//! Precedence when resolved by the CLI: flags > environment > config file.
//!
//! | Env var | Field |
//! |---------|-------|
//! | `ESCROW_CONTRACT` | `contract_address` |
//! | `ESCROW_PROVIDER` | `preferred_provider` |
//! | `ESCROW_CHAIN_ID` | `expected_chain_id` |

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::Address;
use crate::wallet::ProviderKind;

pub const ENV_CONTRACT: &str = "ESCROW_CONTRACT";
pub const ENV_PROVIDER: &str = "ESCROW_PROVIDER";
pub const ENV_CHAIN_ID: &str = "ESCROW_CHAIN_ID";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Escrow contract to bind against. Without it the client is never ready.
    pub contract_address: Option<Address>,
    /// Hint used when several wallets are injected.
    pub preferred_provider: Option<ProviderKind>,
    /// When set, sessions on any other network are not ready.
    pub expected_chain_id: Option<u64>,
}

impl ClientConfig {
    pub fn new() -> Self { Self::default() }
    pub fn with_contract(mut self, address: Address) -> Self { self.contract_address = Some(address); self }
    pub fn with_provider(mut self, kind: ProviderKind) -> Self { self.preferred_provider = Some(kind); self }
    pub fn with_chain_id(mut self, chain_id: u64) -> Self { self.expected_chain_id = Some(chain_id); self }

    /// `<config dir>/escrow-client/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("escrow-client").join("config.json"))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|source| ConfigError::Io { path: parent.to_path_buf(), source })?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })
    }

    /// Only the fields present in the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let var = |key: &str| env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(raw) = var(ENV_CONTRACT) {
            let address = Address::parse(&raw).map_err(|_| ConfigError::Invalid { key: ENV_CONTRACT, value: raw })?;
            config.contract_address = Some(address);
        }
        if let Some(raw) = var(ENV_PROVIDER) {
            let kind = raw.parse::<ProviderKind>().map_err(|_| ConfigError::Invalid { key: ENV_PROVIDER, value: raw })?;
            config.preferred_provider = Some(kind);
        }
        if let Some(raw) = var(ENV_CHAIN_ID) {
            let chain_id = raw.parse().map_err(|_| ConfigError::Invalid { key: ENV_CHAIN_ID, value: raw })?;
            config.expected_chain_id = Some(chain_id);
        }
        Ok(config)
    }

    /// Fields set in `other` win.
    pub fn merge(mut self, other: ClientConfig) -> Self {
        if other.contract_address.is_some() { self.contract_address = other.contract_address; }
        if other.preferred_provider.is_some() { self.preferred_provider = other.preferred_provider; }
        if other.expected_chain_id.is_some() { self.expected_chain_id = other.expected_chain_id; }
        self
    }

    /// Config file (explicit path or default location, if it exists) overlaid with env.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(p) if p.exists() => Self::load(&p)?,
            _ => Self::default(),
        };
        Ok(file.merge(Self::from_env()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::sync::Mutex;
    use tempfile::TempDir;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    const CONTRACT: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

    fn clear_env() {
        for key in [ENV_CONTRACT, ENV_PROVIDER, ENV_CHAIN_ID] {
            env::remove_var(key);
        }
    }

    #[test]
    fn test_from_env() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        clear_env();
        env::set_var(ENV_CONTRACT, CONTRACT);
        env::set_var(ENV_PROVIDER, "MetaMask");
        env::set_var(ENV_CHAIN_ID, "11155111");

        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.contract_address.unwrap().as_str(), CONTRACT.to_lowercase());
        assert_eq!(config.preferred_provider, Some(ProviderKind::Metamask));
        assert_eq!(config.expected_chain_id, Some(11155111));
        clear_env();
    }

    #[test]
    fn test_from_env_rejects_bad_values() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        clear_env();
        env::set_var(ENV_CHAIN_ID, "mainnet");
        assert!(matches!(ClientConfig::from_env(), Err(ConfigError::Invalid { key: ENV_CHAIN_ID, .. })));
        clear_env();
    }

    #[test]
    fn test_file_roundtrip_and_env_overlay() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        clear_env();
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("nested").join("config.json");

        let saved = ClientConfig::new()
            .with_contract(Address::parse(CONTRACT).unwrap())
            .with_provider(ProviderKind::Coinbase)
            .with_chain_id(31337);
        saved.save(&path).unwrap();
        assert_eq!(ClientConfig::load(&path).unwrap(), saved);

        env::set_var(ENV_PROVIDER, "trust");
        let resolved = ClientConfig::resolve(Some(&path)).unwrap();
        assert_eq!(resolved.preferred_provider, Some(ProviderKind::Trust));
        assert_eq!(resolved.expected_chain_id, Some(31337));
        clear_env();
    }

    #[test]
    fn test_missing_file_is_default() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        clear_env();
        let dir = TempDir::new().expect("tempdir");
        let resolved = ClientConfig::resolve(Some(&dir.path().join("absent.json"))).unwrap();
        assert_eq!(resolved, ClientConfig::default());
    }
}
