//! WalletSession - who is connected, on which network, with what balance
//!
//! The session owns the single provider handle. Every change of identity
//! (connect, account switch, chain switch, disconnect) is published as one
//! complete `SessionSnapshot` through a `watch` channel, so readers never see
//! an address without its balance or a handle from a previous account.
//!
//! ```text
//!               connect()                 ok
//! Disconnected ──────────▶ Connecting ──────────▶ Connected ◀──┐
//!      ▲                      │ err                  │  │      │ accountsChanged([B, ..])
//!      └──────────────────────┘                      │  └──────┘ chainChanged(id)
//!      ▲                                             │
//!      └──── disconnect() / accountsChanged([]) ─────┘
//! ```

use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::{format_ether, Address, Wei};
use crate::error::{EscrowError, EscrowResult};
use crate::runtime::Shutdown;
use crate::wallet::provider::{ProviderEvent, ProviderKind, ProviderSource, WalletProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// The authenticated connection handed to dependents.
#[derive(Clone)]
pub struct SessionHandle {
    pub provider: Arc<dyn WalletProvider>,
    pub address: Address,
    pub chain_id: u64,
    /// Identity generation this handle was issued under.
    pub epoch: u64,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("provider", &self.provider.kind())
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .field("epoch", &self.epoch)
            .finish()
    }
}

/// One consistent view of the session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub address: Option<Address>,
    /// Native balance in ether, decimal string.
    pub balance: String,
    pub provider_kind: ProviderKind,
    pub chain_id: Option<u64>,
    pub epoch: u64,
    #[serde(skip)]
    handle: Option<SessionHandle>,
}

impl SessionSnapshot {
    fn disconnected(epoch: u64) -> Self {
        Self {
            state: SessionState::Disconnected,
            address: None,
            balance: "0".into(),
            provider_kind: ProviderKind::None,
            chain_id: None,
            epoch,
            handle: None,
        }
    }

    fn connecting(epoch: u64) -> Self {
        Self { state: SessionState::Connecting, ..Self::disconnected(epoch) }
    }

    fn connected(handle: SessionHandle, balance: Wei) -> Self {
        Self {
            state: SessionState::Connected,
            address: Some(handle.address.clone()),
            balance: format_ether(balance),
            provider_kind: handle.provider.kind(),
            chain_id: Some(handle.chain_id),
            epoch: handle.epoch,
            handle: Some(handle),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected && self.address.is_some() && self.handle.is_some()
    }

    pub fn handle(&self) -> Option<&SessionHandle> {
        self.handle.as_ref()
    }
}

/// Announcements for dependents that prefer events over polling snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected { address: Address, kind: ProviderKind },
    AccountChanged { from: Address, to: Address },
    /// Hard boundary: every cache built on the old network is invalid.
    ChainChanged { chain_id: u64 },
    Disconnected,
}

struct Control {
    /// Bumped whenever in-flight async work must be considered stale.
    generation: u64,
    /// Identity generation, copied into every published snapshot.
    epoch: u64,
    listener: Option<JoinHandle<()>>,
}

struct SessionShared {
    source: Arc<dyn ProviderSource>,
    state: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
    control: Mutex<Control>,
    shutdown: Shutdown,
}

impl Drop for SessionShared {
    fn drop(&mut self) {
        let ctl = self.control.get_mut().unwrap_or_else(|p| p.into_inner());
        if let Some(listener) = ctl.listener.take() {
            listener.abort();
        }
    }
}

/// Process-scoped wallet session. Clones share the same session.
#[derive(Clone)]
pub struct WalletSession {
    inner: Arc<SessionShared>,
}

struct Established {
    provider: Arc<dyn WalletProvider>,
    address: Address,
    balance: Wei,
    chain_id: u64,
    notifications: broadcast::Receiver<ProviderEvent>,
}

impl WalletSession {
    pub fn new(source: impl ProviderSource + 'static) -> Self {
        Self::with_shutdown(source, Shutdown::new())
    }

    /// Session that tears itself down when `shutdown` triggers.
    pub fn with_shutdown(source: impl ProviderSource + 'static, shutdown: Shutdown) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::disconnected(0));
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(SessionShared {
                source: Arc::new(source),
                state,
                events,
                control: Mutex::new(Control { generation: 0, epoch: 0, listener: None }),
                shutdown,
            }),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().state
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.borrow().is_connected()
    }

    pub fn address(&self) -> Option<Address> {
        self.inner.state.borrow().address.clone()
    }

    pub fn handle(&self) -> Option<SessionHandle> {
        self.inner.state.borrow().handle.clone()
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.inner.shutdown
    }

    /// Discover a provider, authorize, and publish a Connected session.
    ///
    /// Reconnecting replaces the current handle. If a `disconnect` overtakes
    /// the attempt, its result is discarded and `ConnectionFailed` returned.
    pub async fn connect(&self, preferred: Option<ProviderKind>) -> EscrowResult<SessionSnapshot> {
        let (attempt, was_connected) = {
            let mut ctl = self.lock_control();
            ctl.generation += 1;
            if let Some(listener) = ctl.listener.take() {
                listener.abort();
            }
            let was_connected = self.inner.state.borrow().is_connected();
            self.publish(&mut ctl, SessionSnapshot::connecting);
            (ctl.generation, was_connected)
        };
        debug!(attempt, ?preferred, "Connecting wallet");

        let outcome = self.establish(preferred).await;

        let mut ctl = self.lock_control();
        if ctl.generation != attempt {
            debug!(attempt, "Connect attempt superseded, discarding result");
            return Err(EscrowError::ConnectionFailed("connection attempt superseded".into()));
        }

        match outcome {
            Ok(est) => {
                ctl.generation += 1;
                let generation = ctl.generation;
                let handle = SessionHandle {
                    provider: est.provider,
                    address: est.address.clone(),
                    chain_id: est.chain_id,
                    epoch: ctl.epoch + 1,
                };
                let kind = handle.provider.kind();
                let balance = est.balance;
                self.publish(&mut ctl, move |_| SessionSnapshot::connected(handle, balance));
                ctl.listener = Some(self.spawn_listener(est.notifications));
                let snapshot = self.snapshot();
                drop(ctl);

                info!(address = %est.address, %kind, chain_id = est.chain_id, generation, "Wallet connected");
                let _ = self.inner.events.send(SessionEvent::Connected { address: est.address, kind });
                Ok(snapshot)
            }
            Err(err) => {
                ctl.generation += 1;
                self.publish(&mut ctl, SessionSnapshot::disconnected);
                drop(ctl);

                warn!(error = %err, "Wallet connection failed");
                // The previous identity is gone too.
                if was_connected {
                    let _ = self.inner.events.send(SessionEvent::Disconnected);
                }
                Err(err)
            }
        }
    }

    async fn establish(&self, preferred: Option<ProviderKind>) -> EscrowResult<Established> {
        let discovery = self.inner.source.discover();
        debug!(candidates = discovery.len(), "Provider discovery");
        let provider = discovery.select(preferred).ok_or(EscrowError::NoProviderFound)?;

        // Subscribe before authorizing so no notification falls in between.
        let notifications = provider.subscribe();

        let accounts = provider.request_accounts().await?;
        let address = accounts
            .into_iter()
            .next()
            .ok_or_else(|| EscrowError::ConnectionFailed("no accounts authorized".into()))?;
        let balance = provider.balance(&address).await?;
        let chain_id = provider.chain_id().await?;

        Ok(Established { provider, address, balance, chain_id, notifications })
    }

    /// Clear the session. Never fails; safe to call in any state.
    pub fn disconnect(&self) {
        let was_active = {
            let mut ctl = self.lock_control();
            ctl.generation += 1;
            if let Some(listener) = ctl.listener.take() {
                listener.abort();
            }
            let was_active = self.inner.state.borrow().state != SessionState::Disconnected;
            if was_active {
                self.publish(&mut ctl, SessionSnapshot::disconnected);
            }
            was_active
        };

        if was_active {
            info!("Wallet disconnected");
            let _ = self.inner.events.send(SessionEvent::Disconnected);
        }
    }

    /// Single entry point for provider notifications.
    pub async fn reconcile(&self, event: ProviderEvent) {
        match event {
            ProviderEvent::AccountsChanged(accounts) => match accounts.into_iter().next() {
                None => {
                    info!("Provider revoked all accounts");
                    self.disconnect();
                }
                Some(next) => self.switch_account(next).await,
            },
            ProviderEvent::ChainChanged(chain_id) => self.switch_chain(chain_id).await,
        }
    }

    async fn switch_account(&self, next: Address) {
        let Some((attempt, handle)) = self.active_handle() else {
            return;
        };
        if handle.address == next {
            return;
        }

        match handle.provider.balance(&next).await {
            Ok(balance) => {
                let mut ctl = self.lock_control();
                if ctl.generation != attempt {
                    debug!("Account switch superseded");
                    return;
                }
                ctl.generation += 1;
                let from = handle.address.clone();
                let switched = SessionHandle { address: next.clone(), epoch: ctl.epoch + 1, ..handle };
                self.publish(&mut ctl, move |_| SessionSnapshot::connected(switched, balance));
                drop(ctl);

                info!(%from, to = %next, "Account switched");
                let _ = self.inner.events.send(SessionEvent::AccountChanged { from, to: next });
            }
            Err(err) => {
                warn!(error = %err, account = %next, "Balance fetch failed after account switch");
                self.disconnect_if_current(attempt);
            }
        }
    }

    async fn switch_chain(&self, chain_id: u64) {
        let Some((attempt, handle)) = self.active_handle() else {
            return;
        };
        if handle.chain_id == chain_id {
            return;
        }

        match handle.provider.balance(&handle.address).await {
            Ok(balance) => {
                let mut ctl = self.lock_control();
                if ctl.generation != attempt {
                    debug!("Chain switch superseded");
                    return;
                }
                ctl.generation += 1;
                let switched = SessionHandle { chain_id, epoch: ctl.epoch + 1, ..handle };
                self.publish(&mut ctl, move |_| SessionSnapshot::connected(switched, balance));
                drop(ctl);

                info!(chain_id, "Network changed, dependents reload");
                let _ = self.inner.events.send(SessionEvent::ChainChanged { chain_id });
            }
            Err(err) => {
                warn!(error = %err, chain_id, "Balance fetch failed after network change");
                self.disconnect_if_current(attempt);
            }
        }
    }

    fn disconnect_if_current(&self, attempt: u64) {
        let current = self.lock_control().generation == attempt;
        if current {
            self.disconnect();
        }
    }

    fn active_handle(&self) -> Option<(u64, SessionHandle)> {
        let ctl = self.lock_control();
        let handle = self.inner.state.borrow().handle.clone()?;
        Some((ctl.generation, handle))
    }

    fn publish(&self, ctl: &mut Control, build: impl FnOnce(u64) -> SessionSnapshot) {
        ctl.epoch += 1;
        self.inner.state.send_replace(build(ctl.epoch));
    }

    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.inner.control.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn spawn_listener(&self, mut notifications: broadcast::Receiver<ProviderEvent>) -> JoinHandle<()> {
        let weak: Weak<SessionShared> = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.wait() => {
                        if let Some(inner) = weak.upgrade() {
                            info!("Teardown, closing wallet session");
                            WalletSession { inner }.disconnect();
                        }
                        break;
                    }
                    received = notifications.recv() => match received {
                        Ok(event) => {
                            let Some(inner) = weak.upgrade() else { break };
                            debug!(?event, "Provider notification");
                            WalletSession { inner }.reconcile(event).await;
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Provider notifications lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    }
}
