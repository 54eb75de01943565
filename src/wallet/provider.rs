//! Wallet provider boundary and discovery

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::core::{Address, Wei};
use crate::error::EscrowError;

/// Which wallet implementation is behind a provider handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Metamask,
    Coinbase,
    Trust,
    GenericInjected,
    #[default]
    None,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Metamask => "metamask",
            ProviderKind::Coinbase => "coinbase",
            ProviderKind::Trust => "trust",
            ProviderKind::GenericInjected => "injected",
            ProviderKind::None => "none",
        }
    }

}

impl std::str::FromStr for ProviderKind {
    type Err = EscrowError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "metamask" => Ok(ProviderKind::Metamask),
            "coinbase" | "coinbase-wallet" => Ok(ProviderKind::Coinbase),
            "trust" | "trust-wallet" => Ok(ProviderKind::Trust),
            "injected" | "generic" | "generic-injected" => Ok(ProviderKind::GenericInjected),
            "none" => Ok(ProviderKind::None),
            _ => Err(EscrowError::InvalidInput(format!("unknown wallet provider: {}", value))),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Push notifications a provider emits after authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("user rejected the request")]
    UserRejected,
    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// EIP-1193 error codes: 4001 is the user declining the prompt.
    pub fn from_code(code: i64, message: impl Into<String>) -> Self {
        if code == 4001 {
            ProviderError::UserRejected
        } else {
            ProviderError::Other(message.into())
        }
    }
}

impl From<ProviderError> for EscrowError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::UserRejected => EscrowError::UserRejected,
            ProviderError::Other(msg) => EscrowError::ConnectionFailed(msg),
        }
    }
}

/// An injected wallet: authorization, balance reads and change notifications.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Detected kind of this provider.
    fn kind(&self) -> ProviderKind;

    /// Prompt the human for account access. First entry is the active account.
    async fn request_accounts(&self) -> Result<Vec<Address>, ProviderError>;

    async fn balance(&self, address: &Address) -> Result<Wei, ProviderError>;

    async fn chain_id(&self) -> Result<u64, ProviderError>;

    /// New receiver for `accountsChanged` / `chainChanged`.
    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent>;
}

/// Result of probing for injected providers, resolved once per connect.
pub enum Discovery {
    None,
    Single(Arc<dyn WalletProvider>),
    Many(Vec<(ProviderKind, Arc<dyn WalletProvider>)>),
}

impl Discovery {
    pub fn from_providers(mut providers: Vec<Arc<dyn WalletProvider>>) -> Self {
        match providers.len() {
            0 => Discovery::None,
            1 => Discovery::Single(providers.remove(0)),
            _ => Discovery::Many(providers.into_iter().map(|p| (p.kind(), p)).collect()),
        }
    }

    /// Pick by kind when several are injected, otherwise the first available.
    pub fn select(self, preferred: Option<ProviderKind>) -> Option<Arc<dyn WalletProvider>> {
        match self {
            Discovery::None => None,
            Discovery::Single(p) => Some(p),
            Discovery::Many(candidates) => {
                let wanted = preferred.filter(|k| *k != ProviderKind::None);
                let idx = wanted
                    .and_then(|kind| candidates.iter().position(|(k, _)| *k == kind))
                    .unwrap_or(0);
                candidates.into_iter().nth(idx).map(|(_, p)| p)
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Discovery::None => 0,
            Discovery::Single(_) => 1,
            Discovery::Many(c) => c.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Source of injected providers, probed at connect time.
pub trait ProviderSource: Send + Sync {
    fn discover(&self) -> Discovery;
}

/// Fixed set of providers registered by the host.
#[derive(Clone, Default)]
pub struct InjectedProviders {
    providers: Vec<Arc<dyn WalletProvider>>,
}

impl InjectedProviders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: Arc<dyn WalletProvider>) -> Self {
        self.providers.push(provider);
        self
    }
}

impl ProviderSource for InjectedProviders {
    fn discover(&self) -> Discovery {
        Discovery::from_providers(self.providers.clone())
    }
}
