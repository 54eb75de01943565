//! DevnetWallet - injected wallet backed by the devnet
//!
//! Host-side controls (`switch_account`, `switch_chain`, `revoke`) mimic the
//! user acting in the wallet UI and emit the matching provider events.

use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

use super::Devnet;
use crate::core::{Address, Wei};
use crate::wallet::{ProviderError, ProviderEvent, ProviderKind, WalletProvider};

struct WalletState {
    accounts: Vec<Address>,
    chain_id: u64,
    reject_authorization: bool,
    authorization_delay: Option<Duration>,
}

pub struct DevnetWallet {
    devnet: Devnet,
    kind: ProviderKind,
    state: Mutex<WalletState>,
    events: broadcast::Sender<ProviderEvent>,
}

impl DevnetWallet {
    pub fn new(devnet: Devnet, kind: ProviderKind, accounts: Vec<Address>) -> Self {
        let (events, _) = broadcast::channel(32);
        let chain_id = devnet.chain_id();
        Self {
            devnet,
            kind,
            state: Mutex::new(WalletState {
                accounts,
                chain_id,
                reject_authorization: false,
                authorization_delay: None,
            }),
            events,
        }
    }

    fn state(&self) -> MutexGuard<'_, WalletState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn emit(&self, event: ProviderEvent) {
        debug!(kind = %self.kind, ?event, "Devnet wallet event");
        // No subscribers yet is fine.
        let _ = self.events.send(event);
    }

    pub fn accounts(&self) -> Vec<Address> {
        self.state().accounts.clone()
    }

    /// Make `account` the active one (adding it if unknown).
    pub fn switch_account(&self, account: &Address) {
        let accounts = {
            let mut state = self.state();
            state.accounts.retain(|a| a != account);
            state.accounts.insert(0, account.clone());
            state.accounts.clone()
        };
        self.emit(ProviderEvent::AccountsChanged(accounts));
    }

    /// User revoked site access: empty account list.
    pub fn revoke(&self) {
        self.state().accounts.clear();
        self.emit(ProviderEvent::AccountsChanged(Vec::new()));
    }

    pub fn switch_chain(&self, chain_id: u64) {
        self.state().chain_id = chain_id;
        self.emit(ProviderEvent::ChainChanged(chain_id));
    }

    /// The next authorization prompt is declined.
    pub fn reject_next_authorization(&self) {
        self.state().reject_authorization = true;
    }

    /// Time the user takes to answer the authorization prompt.
    pub fn set_authorization_delay(&self, delay: Option<Duration>) {
        self.state().authorization_delay = delay;
    }
}

#[async_trait]
impl WalletProvider for DevnetWallet {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, ProviderError> {
        let delay = self.state().authorization_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        if std::mem::take(&mut state.reject_authorization) {
            return Err(ProviderError::from_code(4001, "User rejected the request."));
        }
        Ok(state.accounts.clone())
    }

    async fn balance(&self, address: &Address) -> Result<Wei, ProviderError> {
        if self.devnet.faults().fail_reads {
            return Err(ProviderError::Other("devnet unreachable".into()));
        }
        // Other chains hold nothing for devnet accounts.
        if self.state().chain_id != self.devnet.chain_id() {
            return Ok(Wei::ZERO);
        }
        Ok(self.devnet.balance(address))
    }

    async fn chain_id(&self) -> Result<u64, ProviderError> {
        Ok(self.state().chain_id)
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejection_applies_once() {
        let devnet = Devnet::new();
        let wallet = devnet.wallet(ProviderKind::Metamask, vec![Devnet::account(0)]);
        wallet.reject_next_authorization();
        assert_eq!(wallet.request_accounts().await, Err(ProviderError::UserRejected));
        assert_eq!(wallet.request_accounts().await.unwrap(), vec![Devnet::account(0)]);
    }

    #[tokio::test]
    async fn test_switch_account_reorders_and_emits() {
        let devnet = Devnet::new();
        let wallet = devnet.wallet(ProviderKind::Metamask, vec![Devnet::account(0), Devnet::account(1)]);
        let mut rx = wallet.subscribe();
        wallet.switch_account(&Devnet::account(1));
        assert_eq!(
            rx.recv().await.unwrap(),
            ProviderEvent::AccountsChanged(vec![Devnet::account(1), Devnet::account(0)])
        );
    }

    #[tokio::test]
    async fn test_foreign_chain_has_no_balance() {
        let devnet = Devnet::new();
        let account = Devnet::account(0);
        devnet.fund(&account, Wei(5));
        let wallet = devnet.wallet(ProviderKind::Metamask, vec![account.clone()]);
        assert_eq!(wallet.balance(&account).await.unwrap(), Wei(5));
        wallet.switch_chain(1);
        assert_eq!(wallet.balance(&account).await.unwrap(), Wei::ZERO);
    }
}
