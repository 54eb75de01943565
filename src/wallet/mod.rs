//! Wallet module - injected provider discovery and the connection session
//!
//! # Architecture
//!
//! ```text
//! ProviderSource ──discover()──▶ Discovery { None | Single | Many }
//!                                     │ select(preferred kind)
//!                                     ▼
//!                              WalletProvider (trait)
//!                                     │ request_accounts / balance / chain_id
//!                                     ▼
//!                              WalletSession ──watch──▶ SessionSnapshot
//!                                     ▲          └─broadcast─▶ SessionEvent
//!                                     │
//!                 accountsChanged / chainChanged (listener task)
//! ```
//!
//! # Snapshot fields
//!
//! | Field | Description |
//! |-------|-------------|
//! | `state` | disconnected / connecting / connected |
//! | `address` | lowercase account, absent when disconnected |
//! | `balance` | native balance in ether |
//! | `provider_kind` | metamask / coinbase / trust / injected / none |
//! | `chain_id` | network reported by the provider |
//! | `epoch` | identity generation, bumped on every change |

mod provider;
mod session;

pub use provider::{
    Discovery, InjectedProviders, ProviderError, ProviderEvent, ProviderKind, ProviderSource, WalletProvider,
};
pub use session::{SessionEvent, SessionHandle, SessionSnapshot, SessionState, WalletSession};
