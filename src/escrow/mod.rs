//! Escrow - reconciled view of the caller's escrows and the lifecycle calls
//!
//! ```text
//!  WalletSession ──watch──▶ EscrowClient ──ContractBinder──▶ EscrowContract
//!                               │    ▲
//!                     Notifier ◀┘    └── Arc<EscrowView> (swapped per refresh)
//! ```
//!
//! ## Lifecycle
//!
//! | From | Call | By | To |
//! |------|------|----|----|
//! | - | `create_escrow` | client | Open |
//! | Open | `accept_escrow` | freelancer | InProgress |
//! | InProgress | `submit_work` | freelancer | Completed |
//! | Completed | `approve_and_release` | client | Released |
//! | InProgress, Completed | `dispute` | either | Disputed |
//! | Open | `cancel_escrow` | client | Cancelled |
//!
//! Role and state checks belong to the contract; the client forwards the
//! call and reports the revert reason.

mod client;
mod contract;
mod notify;
mod types;

pub use client::EscrowClient;
pub use contract::{ContractBinder, ContractCall, ContractError, EscrowContract, TxHash, TxReceipt};
pub use notify::{ChannelNotifier, CorrelationId, Notification, Notifier, Severity, TracingNotifier};
pub use types::{
    EarningsBalance, EarningsState, EscrowAction, EscrowDraft, EscrowRecord, EscrowStats, EscrowStatus, EscrowView, Role,
};
