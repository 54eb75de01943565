//! Remote escrow contract surface
//!
//! | Call | Kind | Effect |
//! |------|------|--------|
//! | `get_escrow(id)` | read | full record |
//! | `my_client_escrows()` | read | ids where caller is client |
//! | `my_freelancer_escrows()` | read | ids where caller is freelancer |
//! | `my_earnings()` | read | caller's withdrawable balance |
//! | `CreateEscrow` + value | write | new record, Open |
//! | `AcceptEscrow(id)` | write | Open → InProgress |
//! | `SubmitWork(id)` | write | InProgress → Completed |
//! | `ApproveAndRelease(id)` | write | Completed → Released |
//! | `Dispute(id)` | write | InProgress/Completed → Disputed |
//! | `CancelEscrow(id)` | write | Open → Cancelled |
//! | `WithdrawEarnings` | write | zeroes caller's earnings |
//!
//! Writes are two steps: `submit` returns once the wallet signed and the
//! transaction was accepted for inclusion, `confirm` waits for the outcome.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::core::{Address, Wei};
use crate::error::EscrowError;
use crate::escrow::types::EscrowRecord;
use crate::wallet::SessionHandle;

/// A mutating contract call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum ContractCall {
    CreateEscrow { description: String, freelancer: Address, value: Wei },
    AcceptEscrow { id: u64 },
    SubmitWork { id: u64 },
    ApproveAndRelease { id: u64 },
    Dispute { id: u64 },
    CancelEscrow { id: u64 },
    WithdrawEarnings,
}

impl ContractCall {
    pub fn method(&self) -> &'static str {
        match self {
            Self::CreateEscrow { .. } => "createEscrow",
            Self::AcceptEscrow { .. } => "acceptEscrow",
            Self::SubmitWork { .. } => "submitWork",
            Self::ApproveAndRelease { .. } => "approveAndRelease",
            Self::Dispute { .. } => "dispute",
            Self::CancelEscrow { .. } => "cancelEscrow",
            Self::WithdrawEarnings => "withdrawEarnings",
        }
    }

    pub fn escrow_id(&self) -> Option<u64> {
        match self {
            Self::AcceptEscrow { id }
            | Self::SubmitWork { id }
            | Self::ApproveAndRelease { id }
            | Self::Dispute { id }
            | Self::CancelEscrow { id } => Some(*id),
            Self::CreateEscrow { .. } | Self::WithdrawEarnings => None,
        }
    }

    /// Native value attached to the transaction.
    pub fn value(&self) -> Wei {
        match self {
            Self::CreateEscrow { value, .. } => *value,
            _ => Wei::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TxHash(pub String);

impl TxHash {
    /// `0x1234abcd...` short form.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(10);
        &self.0[..end]
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxReceipt {
    pub hash: TxHash,
    pub block_number: u64,
    /// Id returned by `createEscrow`.
    pub escrow_id: Option<u64>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractError {
    #[error("user rejected the transaction")]
    Rejected,
    #[error("execution reverted: {}", .0.as_deref().unwrap_or("unknown reason"))]
    Reverted(Option<String>),
    #[error("transport error: {0}")]
    Transport(String),
}

impl ContractError {
    /// Classify a raw JSON-RPC failure.
    ///
    /// 4001 and `ACTION_REJECTED` are wallet refusals, code 3 and any
    /// "revert" message are contract rejections, everything else is transport.
    pub fn from_rpc(code: i64, message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if code == 4001 || lower.contains("user rejected") || lower.contains("user denied") || message.contains("ACTION_REJECTED") {
            return ContractError::Rejected;
        }
        if code == 3 || lower.contains("revert") {
            return ContractError::Reverted(revert_reason(message));
        }
        ContractError::Transport(message.to_string())
    }
}

fn revert_reason(message: &str) -> Option<String> {
    let lower = message.to_ascii_lowercase();
    let idx = lower.find("reverted:")?;
    let reason = message[idx + "reverted:".len()..].trim().trim_matches('"').trim();
    (!reason.is_empty()).then(|| reason.to_string())
}

impl From<ContractError> for EscrowError {
    fn from(err: ContractError) -> Self {
        match err {
            ContractError::Rejected => EscrowError::UserRejected,
            ContractError::Reverted(reason) => EscrowError::RemoteReverted { reason },
            ContractError::Transport(msg) => EscrowError::NetworkFailure(msg),
        }
    }
}

/// Contract binding for one account on one network.
#[async_trait]
pub trait EscrowContract: Send + Sync {
    async fn get_escrow(&self, id: u64) -> Result<EscrowRecord, ContractError>;
    async fn my_client_escrows(&self) -> Result<Vec<u64>, ContractError>;
    async fn my_freelancer_escrows(&self) -> Result<Vec<u64>, ContractError>;
    async fn my_earnings(&self) -> Result<Wei, ContractError>;

    /// Sign and broadcast one mutating call.
    async fn submit(&self, call: &ContractCall) -> Result<TxHash, ContractError>;

    /// Wait until the transaction succeeds or reverts. No timeout.
    async fn confirm(&self, tx: &TxHash) -> Result<TxReceipt, ContractError>;
}

/// Builds contract bindings from an authenticated session handle.
pub trait ContractBinder: Send + Sync {
    fn bind(&self, contract: &Address, session: &SessionHandle) -> Result<Arc<dyn EscrowContract>, ContractError>;
}
