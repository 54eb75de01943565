//! Devnet - in-process chain for the CLI and tests
//!
//! One `Devnet` is one chain with one deployed escrow contract. It serves
//! both outer boundaries of the client:
//!
//! ```text
//!   WalletSession ──▶ DevnetWallet  (WalletProvider)  ─┐
//!                                                      ├──▶ Devnet { Ledger }
//!   EscrowClient  ──▶ DevnetContract (EscrowContract) ─┘
//! ```
//!
//! Faults (rejected signatures, failing reads, latency) are switched on
//! through the `Devnet` handle so callers can drive every error path.

mod contract;
mod ledger;
mod wallet;

pub use contract::{DevnetBinder, DevnetContract};
pub use ledger::Ledger;
pub use wallet::DevnetWallet;

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::core::{Address, Wei};
use crate::escrow::{ContractCall, EscrowRecord, TxHash};
use crate::wallet::ProviderKind;

pub const DEVNET_CHAIN_ID: u64 = 31337;
pub const DEVNET_CONTRACT: &str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";
/// 5% platform fee taken on release.
pub const PLATFORM_FEE_BPS: u32 = 500;

#[derive(Debug, Default)]
struct Faults {
    reject_signatures: u32,
    fail_reads: bool,
    fail_record: Option<u64>,
    read_delay: Option<Duration>,
    confirm_delay: Option<Duration>,
}

struct PendingTx {
    sender: Address,
    call: ContractCall,
}

struct DevnetShared {
    ledger: Mutex<Ledger>,
    pending: Mutex<HashMap<TxHash, PendingTx>>,
    faults: Mutex<Faults>,
    contract: Address,
    chain_id: u64,
    nonce: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
}

/// Handle to a simulated chain. Clones share the chain.
#[derive(Clone)]
pub struct Devnet {
    inner: Arc<DevnetShared>,
}

impl Default for Devnet {
    fn default() -> Self {
        Self::new()
    }
}

impl Devnet {
    pub fn new() -> Self {
        Self::with_chain(DEVNET_CHAIN_ID)
    }

    pub fn with_chain(chain_id: u64) -> Self {
        let contract = Address::parse(DEVNET_CONTRACT).unwrap_or_else(|_| Address::zero());
        Self {
            inner: Arc::new(DevnetShared {
                ledger: Mutex::new(Ledger::new(PLATFORM_FEE_BPS)),
                pending: Mutex::new(HashMap::new()),
                faults: Mutex::new(Faults::default()),
                contract,
                chain_id,
                nonce: AtomicU64::new(0),
                reads: AtomicU64::new(0),
                writes: AtomicU64::new(0),
            }),
        }
    }

    /// Deterministic developer account `index`.
    pub fn account(index: u32) -> Address {
        let digest = Sha256::digest(format!("escrow-devnet-account-{}", index).as_bytes());
        let hex = hex::encode(&digest[..20]);
        Address::parse(&format!("0x{}", hex)).unwrap_or_else(|_| Address::zero())
    }

    pub fn chain_id(&self) -> u64 {
        self.inner.chain_id
    }

    pub fn contract_address(&self) -> Address {
        self.inner.contract.clone()
    }

    /// Wallet on this chain holding `accounts`; the first one is active.
    pub fn wallet(&self, kind: ProviderKind, accounts: Vec<Address>) -> Arc<DevnetWallet> {
        Arc::new(DevnetWallet::new(self.clone(), kind, accounts))
    }

    pub fn binder(&self) -> Arc<DevnetBinder> {
        Arc::new(DevnetBinder::new(self.clone()))
    }

    // ------------------------------------------------------------------
    // Ledger access
    // ------------------------------------------------------------------

    pub fn fund(&self, account: &Address, amount: Wei) {
        self.ledger().fund(account, amount);
    }

    pub fn balance(&self, account: &Address) -> Wei {
        self.ledger().balance(account)
    }

    pub fn earnings(&self, account: &Address) -> Wei {
        self.ledger().earnings(account)
    }

    pub fn platform_earnings(&self) -> Wei {
        self.ledger().platform_earnings()
    }

    pub fn escrow(&self, id: u64) -> Option<EscrowRecord> {
        self.ledger().escrow(id).cloned()
    }

    /// Place a record on chain without running the contract rules.
    pub fn seed_escrow(&self, record: EscrowRecord) {
        self.ledger().seed(record);
    }

    /// Mutating calls that reached the chain (rejected signatures excluded).
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::SeqCst)
    }

    pub fn read_count(&self) -> u64 {
        self.inner.reads.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Faults
    // ------------------------------------------------------------------

    /// The next signature request is declined by the user.
    pub fn reject_next_signature(&self) {
        self.faults().reject_signatures += 1;
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.faults().fail_reads = fail;
    }

    /// Reads of one record fail while set.
    pub fn fail_record_reads(&self, id: Option<u64>) {
        self.faults().fail_record = id;
    }

    pub fn set_read_delay(&self, delay: Option<Duration>) {
        self.faults().read_delay = delay;
    }

    pub fn set_confirm_delay(&self, delay: Option<Duration>) {
        self.faults().confirm_delay = delay;
    }

    // ------------------------------------------------------------------
    // Internals used by the wallet and contract halves
    // ------------------------------------------------------------------

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.inner.ledger.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.inner.faults.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn take_signature_rejection(&self) -> bool {
        let mut faults = self.faults();
        if faults.reject_signatures > 0 {
            faults.reject_signatures -= 1;
            true
        } else {
            false
        }
    }

    fn record_read(&self) {
        self.inner.reads.fetch_add(1, Ordering::SeqCst);
    }

    fn broadcast(&self, sender: &Address, call: ContractCall) -> TxHash {
        let nonce = self.inner.nonce.fetch_add(1, Ordering::SeqCst);
        let mut hasher = Sha256::new();
        hasher.update(self.inner.chain_id.to_be_bytes());
        hasher.update(nonce.to_be_bytes());
        hasher.update(sender.as_str().as_bytes());
        hasher.update(serde_json::to_vec(&call).unwrap_or_default());
        let hash = TxHash(format!("0x{}", hex::encode(hasher.finalize())));

        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(hash.clone(), PendingTx { sender: sender.clone(), call });
        hash
    }

    fn take_pending(&self, hash: &TxHash) -> Option<PendingTx> {
        self.inner.pending.lock().unwrap_or_else(|p| p.into_inner()).remove(hash)
    }
}
