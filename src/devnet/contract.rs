//! DevnetContract - escrow contract binding on the devnet

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::Devnet;
use crate::core::{Address, Wei};
use crate::escrow::{ContractBinder, ContractCall, ContractError, EscrowContract, EscrowRecord, TxHash, TxReceipt};
use crate::wallet::SessionHandle;

/// Binds the devnet's escrow contract for the session's account.
pub struct DevnetBinder {
    devnet: Devnet,
}

impl DevnetBinder {
    pub fn new(devnet: Devnet) -> Self {
        Self { devnet }
    }
}

impl ContractBinder for DevnetBinder {
    fn bind(&self, contract: &Address, session: &SessionHandle) -> Result<Arc<dyn EscrowContract>, ContractError> {
        if session.chain_id != self.devnet.chain_id() {
            return Err(ContractError::Transport(format!("no escrow contract on chain {}", session.chain_id)));
        }
        if contract != &self.devnet.contract_address() {
            return Err(ContractError::Transport(format!("no contract code at {}", contract)));
        }
        Ok(Arc::new(DevnetContract { devnet: self.devnet.clone(), sender: session.address.clone() }))
    }
}

/// Calls are made as `sender`.
pub struct DevnetContract {
    devnet: Devnet,
    sender: Address,
}

impl DevnetContract {
    async fn before_read(&self) -> Result<(), ContractError> {
        let (fail, delay) = {
            let faults = self.devnet.faults();
            (faults.fail_reads, faults.read_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.devnet.record_read();
        if fail {
            return Err(ContractError::Transport("devnet unreachable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl EscrowContract for DevnetContract {
    async fn get_escrow(&self, id: u64) -> Result<EscrowRecord, ContractError> {
        self.before_read().await?;
        if self.devnet.faults().fail_record == Some(id) {
            return Err(ContractError::Transport(format!("timeout reading escrow {}", id)));
        }
        self.devnet
            .escrow(id)
            .ok_or_else(|| ContractError::Reverted(Some("Escrow does not exist".into())))
    }

    async fn my_client_escrows(&self) -> Result<Vec<u64>, ContractError> {
        self.before_read().await?;
        Ok(self.devnet.ledger().client_escrows(&self.sender))
    }

    async fn my_freelancer_escrows(&self) -> Result<Vec<u64>, ContractError> {
        self.before_read().await?;
        Ok(self.devnet.ledger().freelancer_escrows(&self.sender))
    }

    async fn my_earnings(&self) -> Result<Wei, ContractError> {
        self.before_read().await?;
        Ok(self.devnet.earnings(&self.sender))
    }

    async fn submit(&self, call: &ContractCall) -> Result<TxHash, ContractError> {
        if self.devnet.take_signature_rejection() {
            return Err(ContractError::from_rpc(4001, "MetaMask Tx Signature: User denied transaction signature."));
        }
        let hash = self.devnet.broadcast(&self.sender, call.clone());
        debug!(tx = %hash, method = call.method(), from = %self.sender, "Devnet transaction broadcast");
        Ok(hash)
    }

    async fn confirm(&self, tx: &TxHash) -> Result<TxReceipt, ContractError> {
        let delay = self.devnet.faults().confirm_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let pending = self
            .devnet
            .take_pending(tx)
            .ok_or_else(|| ContractError::Transport(format!("unknown transaction {}", tx)))?;

        let mut ledger = self.devnet.ledger();
        let escrow_id = ledger
            .apply(&pending.sender, &pending.call)
            .map_err(|reason| ContractError::from_rpc(3, &format!("execution reverted: {}", reason)))?;
        Ok(TxReceipt { hash: tx.clone(), block_number: ledger.block(), escrow_id })
    }
}
