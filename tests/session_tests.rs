//! Integration Tests: wallet session against the devnet wallet
//!
//! These tests verify:
//! 1. Connect outcomes (single, many, none, rejected)
//! 2. Account switches stay connected and re-key the session
//! 3. Revocation and teardown disconnect
//! 4. Overtaken connects publish nothing

use escrow_client::devnet::Devnet;
use escrow_client::wallet::{ProviderEvent, SessionEvent};
use escrow_client::{
    parse_ether, EscrowError, InjectedProviders, ProviderKind, SessionSnapshot, SessionState, Shutdown, WalletSession,
};
use std::time::Duration;

async fn wait_until(session: &WalletSession, pred: impl Fn(&SessionSnapshot) -> bool) -> SessionSnapshot {
    let mut rx = session.watch();
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if pred(&snapshot) {
                return snapshot;
            }
            rx.changed().await.expect("session dropped");
        }
    })
    .await
    .expect("session did not reach expected state")
}

fn funded_devnet() -> Devnet {
    let devnet = Devnet::new();
    for i in 0..3 {
        devnet.fund(&Devnet::account(i), parse_ether("100").unwrap());
    }
    devnet
}

/// Test: Single provider connect publishes one complete snapshot
#[tokio::test]
async fn connect_single_provider() {
    let devnet = funded_devnet();
    let wallet = devnet.wallet(ProviderKind::Metamask, vec![Devnet::account(0)]);
    let session = WalletSession::new(InjectedProviders::new().with(wallet));
    assert_eq!(session.state(), SessionState::Disconnected);

    let snapshot = session.connect(None).await.expect("connect");
    assert_eq!(snapshot.state, SessionState::Connected);
    assert_eq!(snapshot.address, Some(Devnet::account(0)));
    assert_eq!(snapshot.balance, "100.0");
    assert_eq!(snapshot.provider_kind, ProviderKind::Metamask);
    assert_eq!(snapshot.chain_id, Some(devnet.chain_id()));
    assert!(session.handle().is_some());
}

/// Test: No injected provider fails without leaving Connecting behind
#[tokio::test]
async fn connect_without_provider() {
    let session = WalletSession::new(InjectedProviders::new());
    let err = session.connect(None).await.unwrap_err();
    assert_eq!(err, EscrowError::NoProviderFound);
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(session.address().is_none());
}

/// Test: Declined authorization is reported as UserRejected
#[tokio::test]
async fn connect_user_rejected() {
    let devnet = funded_devnet();
    let wallet = devnet.wallet(ProviderKind::Metamask, vec![Devnet::account(0)]);
    wallet.reject_next_authorization();
    let session = WalletSession::new(InjectedProviders::new().with(wallet));

    let err = session.connect(None).await.unwrap_err();
    assert!(err.is_user_rejected());
    assert_eq!(session.state(), SessionState::Disconnected);

    // Next attempt goes through
    session.connect(None).await.expect("second connect");
    assert!(session.is_connected());
}

/// Test: Failed reconnect from a live session announces the disconnect
#[tokio::test]
async fn failed_reconnect_announces_disconnect() {
    let devnet = funded_devnet();
    let wallet = devnet.wallet(ProviderKind::Metamask, vec![Devnet::account(0)]);
    let session = WalletSession::new(InjectedProviders::new().with(wallet.clone()));
    session.connect(None).await.unwrap();
    let mut events = session.events();

    wallet.reject_next_authorization();
    assert!(session.connect(None).await.unwrap_err().is_user_rejected());
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(session.handle().is_none());
    assert_eq!(events.recv().await.unwrap(), SessionEvent::Disconnected);
}

/// Test: Wallet with no authorized accounts does not connect
#[tokio::test]
async fn connect_without_accounts() {
    let devnet = funded_devnet();
    let wallet = devnet.wallet(ProviderKind::Trust, vec![]);
    let session = WalletSession::new(InjectedProviders::new().with(wallet));
    assert!(matches!(session.connect(None).await, Err(EscrowError::ConnectionFailed(_))));
    assert_eq!(session.state(), SessionState::Disconnected);
}

/// Test: Preferred kind wins among several injected wallets, first otherwise
#[tokio::test]
async fn connect_selects_among_many() {
    let devnet = funded_devnet();
    let source = InjectedProviders::new()
        .with(devnet.wallet(ProviderKind::Metamask, vec![Devnet::account(0)]))
        .with(devnet.wallet(ProviderKind::Coinbase, vec![Devnet::account(1)]));
    let session = WalletSession::new(source);

    let snapshot = session.connect(Some(ProviderKind::Coinbase)).await.unwrap();
    assert_eq!(snapshot.provider_kind, ProviderKind::Coinbase);
    assert_eq!(snapshot.address, Some(Devnet::account(1)));

    let snapshot = session.connect(Some(ProviderKind::Trust)).await.unwrap();
    assert_eq!(snapshot.provider_kind, ProviderKind::Metamask);
}

/// Test: Account switch goes Connected → Connected with the new balance
#[tokio::test]
async fn account_switch_stays_connected() {
    let devnet = funded_devnet();
    devnet.fund(&Devnet::account(1), parse_ether("0.5").unwrap());
    let wallet = devnet.wallet(ProviderKind::Metamask, vec![Devnet::account(0), Devnet::account(1)]);
    let session = WalletSession::new(InjectedProviders::new().with(wallet.clone()));
    let before = session.connect(None).await.unwrap();
    let mut events = session.events();

    wallet.switch_account(&Devnet::account(1));
    let after = wait_until(&session, |s| s.address == Some(Devnet::account(1))).await;

    assert_eq!(after.state, SessionState::Connected);
    assert_eq!(after.balance, "100.5");
    assert!(after.epoch > before.epoch);
    assert_eq!(after.handle().unwrap().address, Devnet::account(1));
    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::AccountChanged { from: Devnet::account(0), to: Devnet::account(1) }
    );
}

/// Test: Switching to the already active account changes nothing
#[tokio::test]
async fn account_switch_to_same_account_is_noop() {
    let devnet = funded_devnet();
    let wallet = devnet.wallet(ProviderKind::Metamask, vec![Devnet::account(0)]);
    let session = WalletSession::new(InjectedProviders::new().with(wallet.clone()));
    let before = session.connect(None).await.unwrap();

    session.reconcile(ProviderEvent::AccountsChanged(vec![Devnet::account(0)])).await;
    assert_eq!(session.snapshot().epoch, before.epoch);
}

/// Test: Empty account list is a disconnect
#[tokio::test]
async fn revoked_accounts_disconnect() {
    let devnet = funded_devnet();
    let wallet = devnet.wallet(ProviderKind::Metamask, vec![Devnet::account(0)]);
    let session = WalletSession::new(InjectedProviders::new().with(wallet.clone()));
    session.connect(None).await.unwrap();
    let mut events = session.events();

    wallet.revoke();
    let snapshot = wait_until(&session, |s| s.state == SessionState::Disconnected).await;
    assert!(snapshot.address.is_none());
    assert_eq!(snapshot.balance, "0");
    assert!(snapshot.handle().is_none());
    assert_eq!(events.recv().await.unwrap(), SessionEvent::Disconnected);
}

/// Test: Network change re-keys the session and announces it
#[tokio::test]
async fn chain_change_bumps_epoch() {
    let devnet = funded_devnet();
    let wallet = devnet.wallet(ProviderKind::Metamask, vec![Devnet::account(0)]);
    let session = WalletSession::new(InjectedProviders::new().with(wallet.clone()));
    let before = session.connect(None).await.unwrap();
    let mut events = session.events();

    wallet.switch_chain(11155111);
    let after = wait_until(&session, |s| s.chain_id == Some(11155111)).await;
    assert_eq!(after.state, SessionState::Connected);
    assert!(after.epoch > before.epoch);
    assert_eq!(after.balance, "0.0");
    assert_eq!(events.recv().await.unwrap(), SessionEvent::ChainChanged { chain_id: 11155111 });
}

/// Test: Balance failure after an account switch disconnects instead of publishing a partial session
#[tokio::test]
async fn failed_balance_after_switch_disconnects() {
    let devnet = funded_devnet();
    let wallet = devnet.wallet(ProviderKind::Metamask, vec![Devnet::account(0), Devnet::account(1)]);
    let session = WalletSession::new(InjectedProviders::new().with(wallet.clone()));
    session.connect(None).await.unwrap();

    devnet.set_fail_reads(true);
    wallet.switch_account(&Devnet::account(1));
    let snapshot = wait_until(&session, |s| s.state == SessionState::Disconnected).await;
    assert!(snapshot.address.is_none());
}

/// Test: Disconnect overtaking a pending connect wins
#[tokio::test]
async fn disconnect_overtakes_pending_connect() {
    let devnet = funded_devnet();
    let wallet = devnet.wallet(ProviderKind::Metamask, vec![Devnet::account(0)]);
    wallet.set_authorization_delay(Some(Duration::from_millis(100)));
    let session = WalletSession::new(InjectedProviders::new().with(wallet.clone()));

    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.connect(None).await }
    });
    wait_until(&session, |s| s.state == SessionState::Connecting).await;
    session.disconnect();

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(EscrowError::ConnectionFailed(_))));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(session.handle().is_none());
}

/// Test: Disconnect never fails and is idempotent
#[tokio::test]
async fn disconnect_is_idempotent() {
    let session = WalletSession::new(InjectedProviders::new());
    let epoch = session.snapshot().epoch;
    session.disconnect();
    session.disconnect();
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(session.snapshot().epoch, epoch);
}

/// Test: Teardown signal closes the session
#[tokio::test]
async fn shutdown_tears_down_session() {
    let devnet = funded_devnet();
    let wallet = devnet.wallet(ProviderKind::Metamask, vec![Devnet::account(0)]);
    let shutdown = Shutdown::new();
    let session = WalletSession::with_shutdown(InjectedProviders::new().with(wallet.clone()), shutdown.clone());
    session.connect(None).await.unwrap();

    shutdown.trigger();
    wait_until(&session, |s| s.state == SessionState::Disconnected).await;

    // Events after teardown are ignored
    wallet.switch_account(&Devnet::account(1));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(session.state(), SessionState::Disconnected);
}
