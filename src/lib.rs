//! Escrow client: wallet session plus escrow lifecycle orchestration.
//!
//! # Architecture
//!
//! ```text
//! ProviderSource (injected wallets)
//!   │ discover / select
//!   ▼
//! WalletSession ──watch──▶ SessionSnapshot { state, address, balance, chain, epoch }
//!   │
//!   ▼ SessionHandle (per epoch)
//! EscrowClient
//!   ├── ContractBinder ──▶ EscrowContract (reads + two-step writes)
//!   ├── EscrowView (Arc, replaced per refresh)
//!   └── Notifier (pending / success / error, correlated)
//! ```
//!
//! # Operations
//!
//! | Operation | Method | Description |
//! |-----------|--------|-------------|
//! | connect | `session.connect(kind)` | authorize, read chain and balance |
//! | disconnect | `session.disconnect()` | forget the session locally |
//! | refresh | `client.refresh()` | refetch ids, earnings and records |
//! | create | `client.create_escrow(draft)` | fund a new escrow |
//! | accept / submit / release | `client.accept_escrow(id)` ... | advance an escrow |
//! | dispute / cancel | `client.dispute(id)` ... | stop an escrow |
//! | withdraw | `client.withdraw_earnings()` | pull released payments |
//!
//! # Features
//!
//! - `devnet` - in-process chain implementing both boundaries, used by the CLI and tests
//!
//! # Usage
//!
//! ```ignore
//! use escrow_client::devnet::Devnet;
//! use escrow_client::{ClientConfig, EscrowClient, EscrowDraft, InjectedProviders, ProviderKind, WalletSession};
//!
//! let devnet = Devnet::new();
//! let wallet = devnet.wallet(ProviderKind::Metamask, vec![Devnet::account(0)]);
//! let session = WalletSession::new(InjectedProviders::new().with(wallet));
//! let client = EscrowClient::new(
//!     session.clone(),
//!     devnet.binder(),
//!     ClientConfig::new().with_contract(devnet.contract_address()),
//! );
//!
//! session.connect(None).await?;
//! client.create_escrow(EscrowDraft::parse("Logo design", &freelancer, "0.5")?).await?;
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod escrow;
pub mod logging;
pub mod runtime;
pub mod wallet;

#[cfg(feature = "devnet")]
pub mod devnet;

// =============================================================================
// Re-exports
// =============================================================================
pub use config::{ClientConfig, ConfigError};
pub use core::{format_ether, parse_ether, Address, Wei};
pub use error::{EscrowError, EscrowResult};
pub use escrow::{
    EarningsBalance, EscrowClient, EscrowDraft, EscrowRecord, EscrowStats, EscrowStatus, EscrowView, Notification,
    Notifier, Severity, TxReceipt,
};
pub use runtime::{install_signal_handlers, Shutdown};
pub use wallet::{InjectedProviders, ProviderKind, SessionSnapshot, SessionState, WalletSession};
