//! EscrowClient - reconciled escrow view and lifecycle orchestration
//!
//! The cached `EscrowView` is an `Arc` swapped under a lock: a refresh either
//! replaces it completely or not at all. Lifecycle calls go through one
//! pipeline (ready check → busy flag → submit → confirm → refresh) and report
//! their progress to the `Notifier` under one correlation id.

use futures::future::try_join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::core::{Address, Wei};
use crate::error::{EscrowError, EscrowResult};
use crate::escrow::contract::{ContractBinder, ContractCall, ContractError, EscrowContract, TxReceipt};
use crate::escrow::notify::{CorrelationId, Notification, Notifier, Severity, TracingNotifier};
use crate::escrow::types::{EarningsBalance, EscrowDraft, EscrowRecord, EscrowStats, EscrowView};
use crate::wallet::{SessionHandle, SessionSnapshot, WalletSession};

/// Contract binding built for one session epoch. Replaced, never patched.
#[derive(Clone)]
struct Binding {
    contract: Arc<dyn EscrowContract>,
    account: Address,
    epoch: u64,
}

struct ClientShared {
    session: WalletSession,
    binder: Arc<dyn ContractBinder>,
    notifier: Arc<dyn Notifier>,
    config: ClientConfig,
    binding: Mutex<Option<Binding>>,
    view: RwLock<Arc<EscrowView>>,
    busy: AtomicBool,
    refresh_seq: AtomicU64,
    op_seq: AtomicU64,
}

/// Escrow orchestrator for one wallet session. Clones share state.
#[derive(Clone)]
pub struct EscrowClient {
    inner: Arc<ClientShared>,
}

/// Clears the busy flag when the operation ends, however it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// User-facing text for one lifecycle call.
struct OpText {
    tag: &'static str,
    pending: &'static str,
    success: &'static str,
    failure: &'static str,
}

impl OpText {
    fn for_call(call: &ContractCall) -> Self {
        let (tag, pending, success, failure) = match call {
            ContractCall::CreateEscrow { .. } => ("create", "Transaction pending...", "Escrow created!", "Transaction failed"),
            ContractCall::AcceptEscrow { .. } => ("accept", "Accepting job...", "Job accepted!", "Failed to accept job"),
            ContractCall::SubmitWork { .. } => ("submit", "Submitting work...", "Work submitted!", "Failed to submit work"),
            ContractCall::ApproveAndRelease { .. } => ("release", "Releasing payment...", "Payment released!", "Failed to release payment"),
            ContractCall::Dispute { .. } => ("dispute", "Filing dispute...", "Dispute filed!", "Failed to file dispute"),
            ContractCall::CancelEscrow { .. } => ("cancel", "Cancelling escrow...", "Escrow cancelled!", "Failed to cancel escrow"),
            ContractCall::WithdrawEarnings => ("withdraw", "Withdrawing earnings...", "Earnings withdrawn!", "Failed to withdraw"),
        };
        Self { tag, pending, success, failure }
    }
}

impl EscrowClient {
    pub fn new(session: WalletSession, binder: Arc<dyn ContractBinder>, config: ClientConfig) -> Self {
        Self::with_notifier(session, binder, config, Arc::new(TracingNotifier))
    }

    pub fn with_notifier(
        session: WalletSession,
        binder: Arc<dyn ContractBinder>,
        config: ClientConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let epoch = session.snapshot().epoch;
        Self {
            inner: Arc::new(ClientShared {
                session,
                binder,
                notifier,
                config,
                binding: Mutex::new(None),
                view: RwLock::new(Arc::new(EscrowView::empty(epoch))),
                busy: AtomicBool::new(false),
                refresh_seq: AtomicU64::new(0),
                op_seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn session(&self) -> &WalletSession {
        &self.inner.session
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------
    // Readiness and binding
    // ------------------------------------------------------------------

    /// Session connected, contract configured, network as expected.
    pub fn is_ready(&self) -> bool {
        self.check_ready(&self.inner.session.snapshot()).is_ok()
    }

    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    fn check_ready<'s>(&self, snapshot: &'s SessionSnapshot) -> EscrowResult<(&'s SessionHandle, Address)> {
        let handle = snapshot
            .handle()
            .filter(|_| snapshot.is_connected())
            .ok_or_else(|| EscrowError::not_ready("wallet not connected"))?;
        let contract = self
            .inner
            .config
            .contract_address
            .clone()
            .ok_or_else(|| EscrowError::not_ready("escrow contract address not configured"))?;
        if let Some(expected) = self.inner.config.expected_chain_id {
            if handle.chain_id != expected {
                return Err(EscrowError::NotReady(format!(
                    "wrong network: connected to chain {}, expected {}",
                    handle.chain_id, expected
                )));
            }
        }
        Ok((handle, contract))
    }

    /// Current binding, rebuilt when the session identity moved on.
    fn ready_binding(&self) -> EscrowResult<Binding> {
        let snapshot = self.inner.session.snapshot();
        let (handle, contract) = match self.check_ready(&snapshot) {
            Ok(ready) => ready,
            Err(err) => {
                self.invalidate(snapshot.epoch);
                return Err(err);
            }
        };

        let mut slot = self.inner.binding.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(existing) = slot.as_ref().filter(|b| b.epoch == handle.epoch) {
            return Ok(existing.clone());
        }

        let bound = self
            .inner
            .binder
            .bind(&contract, handle)
            .map_err(|err| EscrowError::NotReady(format!("contract binding failed: {}", err)))?;
        let binding = Binding { contract: bound, account: handle.address.clone(), epoch: handle.epoch };
        *slot = Some(binding.clone());
        drop(slot);

        debug!(account = %binding.account, epoch = binding.epoch, %contract, "Bound escrow contract");
        self.reset_view_for(&binding);
        Ok(binding)
    }

    /// Drop binding and cache (session gone or changed identity).
    fn invalidate(&self, epoch: u64) {
        *self.inner.binding.lock().unwrap_or_else(|p| p.into_inner()) = None;
        let mut view = self.inner.view.write().unwrap_or_else(|p| p.into_inner());
        if view.epoch != epoch || view.generation != 0 {
            *view = Arc::new(EscrowView::empty(epoch));
        }
    }

    fn reset_view_for(&self, binding: &Binding) {
        let mut view = self.inner.view.write().unwrap_or_else(|p| p.into_inner());
        if view.epoch != binding.epoch {
            *view = Arc::new(EscrowView {
                account: Some(binding.account.clone()),
                ..EscrowView::empty(binding.epoch)
            });
        }
    }

    // ------------------------------------------------------------------
    // Views (no network access)
    // ------------------------------------------------------------------

    /// Cached view, or an empty one if it belongs to an older session identity.
    pub fn view(&self) -> Arc<EscrowView> {
        let epoch = self.inner.session.snapshot().epoch;
        let view = self.inner.view.read().unwrap_or_else(|p| p.into_inner()).clone();
        if view.epoch == epoch {
            view
        } else {
            Arc::new(EscrowView::empty(epoch))
        }
    }

    /// All cached records, newest first.
    pub fn escrows(&self) -> Vec<EscrowRecord> {
        self.view().records.clone()
    }

    pub fn client_records(&self) -> Vec<EscrowRecord> {
        self.view().client_records()
    }

    pub fn freelancer_records(&self) -> Vec<EscrowRecord> {
        self.view().freelancer_records()
    }

    pub fn earnings(&self) -> EarningsBalance {
        self.view().earnings
    }

    pub fn stats(&self) -> EscrowStats {
        self.view().stats()
    }

    // ------------------------------------------------------------------
    // Refresh
    // ------------------------------------------------------------------

    /// Refetch ids, earnings and every record; replace the cache atomically.
    ///
    /// On failure the previous view is kept and the error is both returned
    /// and reported to the notifier.
    pub async fn refresh(&self) -> EscrowResult<Arc<EscrowView>> {
        let binding = self.ready_binding()?;
        let seq = self.inner.refresh_seq.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(seq, account = %binding.account, "Refreshing escrows");

        match fetch_view(binding.contract.as_ref()).await {
            Ok((records, earnings)) => Ok(self.apply_refresh(&binding, seq, records, earnings)),
            Err(err) => {
                let err = EscrowError::from(err);
                warn!(seq, error = %err, "Escrow refresh failed, keeping previous view");
                self.notify(
                    Severity::Error,
                    "Failed to fetch escrows",
                    Some(err.to_string()),
                    &CorrelationId::new("refresh", None, seq),
                );
                Err(err)
            }
        }
    }

    fn apply_refresh(&self, binding: &Binding, seq: u64, records: Vec<EscrowRecord>, earnings: Wei) -> Arc<EscrowView> {
        let mut view = self.inner.view.write().unwrap_or_else(|p| p.into_inner());
        let current_epoch = self.inner.session.snapshot().epoch;

        if binding.epoch != current_epoch || (view.epoch == binding.epoch && seq < view.generation) {
            debug!(seq, current = view.generation, "Discarding stale refresh result");
            return view.clone();
        }

        let next = Arc::new(EscrowView {
            records,
            earnings: EarningsBalance::confirmed(earnings),
            account: Some(binding.account.clone()),
            epoch: binding.epoch,
            generation: seq,
        });
        *view = next.clone();
        info!(seq, count = next.records.len(), earnings = %next.earnings.amount, "Escrows refreshed");
        next
    }

    /// Keep the cache aligned with the session: on every identity change drop
    /// the binding and cache, then refresh if still connected.
    pub fn follow_session(&self) -> JoinHandle<()> {
        let client = self.clone();
        let mut rx = self.inner.session.watch();
        let shutdown = self.inner.session.shutdown().clone();

        tokio::spawn(async move {
            loop {
                let snapshot = rx.borrow_and_update().clone();
                if snapshot.is_connected() {
                    if let Err(err) = client.refresh().await {
                        debug!(error = %err, "Refresh after session change failed");
                    }
                } else {
                    client.invalidate(snapshot.epoch);
                }

                tokio::select! {
                    _ = shutdown.wait() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        })
    }

    // ------------------------------------------------------------------
    // Lifecycle operations
    // ------------------------------------------------------------------

    /// Create an escrow funded with `draft.amount`.
    pub async fn create_escrow(&self, draft: EscrowDraft) -> EscrowResult<TxReceipt> {
        self.execute(ContractCall::CreateEscrow {
            description: draft.description,
            freelancer: draft.freelancer,
            value: draft.amount,
        })
        .await
    }

    pub async fn accept_escrow(&self, id: u64) -> EscrowResult<TxReceipt> {
        self.execute(ContractCall::AcceptEscrow { id }).await
    }

    pub async fn submit_work(&self, id: u64) -> EscrowResult<TxReceipt> {
        self.execute(ContractCall::SubmitWork { id }).await
    }

    pub async fn approve_and_release(&self, id: u64) -> EscrowResult<TxReceipt> {
        self.execute(ContractCall::ApproveAndRelease { id }).await
    }

    pub async fn dispute(&self, id: u64) -> EscrowResult<TxReceipt> {
        self.execute(ContractCall::Dispute { id }).await
    }

    pub async fn cancel_escrow(&self, id: u64) -> EscrowResult<TxReceipt> {
        self.execute(ContractCall::CancelEscrow { id }).await
    }

    /// Withdraw accumulated earnings. A balance known to be zero (refreshed or
    /// already withdrawn for this session identity) is rejected locally; on
    /// success the balance reads as optimistic zero until the follow-up
    /// refresh confirms it.
    pub async fn withdraw_earnings(&self) -> EscrowResult<TxReceipt> {
        let binding = self.ready_binding()?;
        let cached = self.view();
        let known = cached.epoch == binding.epoch && cached.generation != 0;
        if known && cached.earnings.amount.is_zero() {
            return Err(EscrowError::InvalidInput("no earnings to withdraw".into()));
        }
        self.execute(ContractCall::WithdrawEarnings).await
    }

    async fn execute(&self, call: ContractCall) -> EscrowResult<TxReceipt> {
        let binding = self.ready_binding()?;
        let _busy = BusyGuard::acquire(&self.inner.busy)
            .ok_or_else(|| EscrowError::not_ready("another transaction is in progress"))?;

        let seq = self.inner.op_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let text = OpText::for_call(&call);
        let cid = CorrelationId::new(text.tag, call.escrow_id(), seq);
        info!(id = %cid, method = call.method(), account = %binding.account, "Submitting transaction");

        let outcome: Result<TxReceipt, ContractError> = async {
            let tx = binding.contract.submit(&call).await?;
            self.notify(Severity::Pending, text.pending, Some(format!("Transaction sent: {}...", tx.short())), &cid);
            binding.contract.confirm(&tx).await
        }
        .await;

        match outcome {
            Ok(receipt) => {
                info!(id = %cid, tx = %receipt.hash, block = receipt.block_number, "Transaction confirmed");
                self.notify(
                    Severity::Success,
                    text.success,
                    Some(format!("Transaction confirmed: {}...", receipt.hash.short())),
                    &cid,
                );
                if call == ContractCall::WithdrawEarnings {
                    self.mark_earnings_withdrawn(binding.epoch);
                }
                if let Err(err) = self.refresh().await {
                    warn!(id = %cid, error = %err, "Post-transaction refresh failed");
                }
                Ok(receipt)
            }
            Err(err) => {
                let err = EscrowError::from(err);
                let (message, detail) = match &err {
                    EscrowError::UserRejected => ("Transaction rejected in wallet", "You declined the signature request".to_string()),
                    EscrowError::RemoteReverted { reason } => {
                        (text.failure, reason.clone().unwrap_or_else(|| "Transaction reverted".into()))
                    }
                    other => (text.failure, other.to_string()),
                };
                warn!(id = %cid, kind = err.kind(), error = %err, "Transaction failed");
                self.notify(Severity::Error, message, Some(detail), &cid);
                Err(err)
            }
        }
    }

    /// Takes a refresh sequence number so refreshes started before the
    /// withdrawal cannot bring the old balance back.
    fn mark_earnings_withdrawn(&self, epoch: u64) {
        let mut view = self.inner.view.write().unwrap_or_else(|p| p.into_inner());
        if view.epoch == epoch {
            let seq = self.inner.refresh_seq.fetch_add(1, Ordering::SeqCst) + 1;
            let mut next = EscrowView::clone(&view);
            next.earnings = EarningsBalance::optimistic_zero();
            next.generation = seq;
            *view = Arc::new(next);
        }
    }

    fn notify(&self, severity: Severity, message: &str, detail: Option<String>, id: &CorrelationId) {
        self.inner.notifier.notify(Notification {
            severity,
            message: message.to_string(),
            detail,
            correlation_id: id.clone(),
        });
    }
}

/// Both id sets and earnings in parallel, then every record in parallel.
async fn fetch_view(contract: &dyn EscrowContract) -> Result<(Vec<EscrowRecord>, Wei), ContractError> {
    let (client_ids, freelancer_ids, earnings) = tokio::try_join!(
        contract.my_client_escrows(),
        contract.my_freelancer_escrows(),
        contract.my_earnings(),
    )?;

    let ids: BTreeSet<u64> = client_ids.into_iter().chain(freelancer_ids).collect();
    let fetched = try_join_all(ids.iter().map(|id| contract.get_escrow(*id))).await?;
    Ok((merge_records(fetched), earnings))
}

/// One record per id, newest first (ties broken by id, descending).
fn merge_records(fetched: Vec<EscrowRecord>) -> Vec<EscrowRecord> {
    let by_id: BTreeMap<u64, EscrowRecord> = fetched.into_iter().map(|r| (r.id, r)).collect();
    let mut records: Vec<EscrowRecord> = by_id.into_values().collect();
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::types::EscrowStatus;
    use chrono::{TimeZone, Utc};

    fn record(id: u64, ts: i64) -> EscrowRecord {
        let a = Address::parse("0x00000000000000000000000000000000000000aa").unwrap();
        let b = Address::parse("0x00000000000000000000000000000000000000bb").unwrap();
        EscrowRecord {
            id,
            client: a,
            freelancer: b,
            description: String::new(),
            amount: Wei(1),
            status: EscrowStatus::Open,
            created_at: Utc.timestamp_opt(ts, 0).unwrap(),
        }
    }

    #[test]
    fn test_merge_dedups_and_sorts_newest_first() {
        let merged = merge_records(vec![record(1, 100), record(3, 300), record(1, 100), record(2, 300)]);
        let ids: Vec<u64> = merged.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[cfg(feature = "devnet")]
    #[tokio::test]
    async fn test_refresh_started_before_withdrawal_is_discarded() {
        use crate::devnet::Devnet;
        use crate::wallet::{InjectedProviders, ProviderKind};

        let devnet = Devnet::new();
        let wallet = devnet.wallet(ProviderKind::Metamask, vec![Devnet::account(1)]);
        let session = WalletSession::new(InjectedProviders::new().with(wallet));
        session.connect(None).await.unwrap();
        let config = ClientConfig::new().with_contract(devnet.contract_address());
        let client = EscrowClient::new(session, devnet.binder(), config);

        let binding = client.ready_binding().unwrap();
        let stale = client.inner.refresh_seq.fetch_add(1, Ordering::SeqCst) + 1;
        client.mark_earnings_withdrawn(binding.epoch);

        let view = client.apply_refresh(&binding, stale, vec![], Wei(950));
        assert!(view.earnings.is_pending());
        assert!(client.earnings().amount.is_zero());

        let fresh = client.inner.refresh_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let view = client.apply_refresh(&binding, fresh, vec![], Wei::ZERO);
        assert!(!view.earnings.is_pending());
        assert_eq!(view.generation, fresh);
    }

    #[test]
    fn test_busy_guard_is_exclusive() {
        let flag = AtomicBool::new(false);
        let first = BusyGuard::acquire(&flag);
        assert!(first.is_some());
        assert!(BusyGuard::acquire(&flag).is_none());
        drop(first);
        assert!(BusyGuard::acquire(&flag).is_some());
    }
}
