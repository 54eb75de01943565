//! Error taxonomy for wallet and escrow operations

use thiserror::Error;

/// Every failure a caller of the session or the escrow client can observe.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EscrowError {
    #[error("No wallet provider found")]
    NoProviderFound,

    /// The human declined an authorization or signature prompt.
    #[error("Request rejected in wallet")]
    UserRejected,

    #[error("Wallet connection failed: {0}")]
    ConnectionFailed(String),

    /// No live session, no contract binding, wrong network, or busy.
    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Transaction reverted: {}", reason.as_deref().unwrap_or("no reason given"))]
    RemoteReverted { reason: Option<String> },

    #[error("Network failure: {0}")]
    NetworkFailure(String),

    /// Rejected locally before anything reached the remote.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type EscrowResult<T> = Result<T, EscrowError>;

impl EscrowError {
    pub fn not_ready(msg: impl Into<String>) -> Self {
        Self::NotReady(msg.into())
    }

    pub fn reverted(reason: impl Into<String>) -> Self {
        Self::RemoteReverted { reason: Some(reason.into()) }
    }

    pub fn is_user_rejected(&self) -> bool {
        matches!(self, Self::UserRejected)
    }

    pub fn is_reverted(&self) -> bool {
        matches!(self, Self::RemoteReverted { .. })
    }

    /// Short machine-readable tag, used in CLI JSON output and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoProviderFound => "no_provider_found",
            Self::UserRejected => "user_rejected",
            Self::ConnectionFailed(_) => "connection_failed",
            Self::NotReady(_) => "not_ready",
            Self::RemoteReverted { .. } => "remote_reverted",
            Self::NetworkFailure(_) => "network_failure",
            Self::InvalidInput(_) => "invalid_input",
        }
    }
}
