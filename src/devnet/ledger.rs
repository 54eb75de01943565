//! Ledger - contract state and transition rules of the simulated chain

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap};

use crate::core::{Address, Wei};
use crate::escrow::{ContractCall, EscrowRecord, EscrowStatus};

/// Seconds between simulated blocks.
const BLOCK_TIME: i64 = 12;

pub struct Ledger {
    escrows: BTreeMap<u64, EscrowRecord>,
    next_id: u64,
    balances: HashMap<Address, Wei>,
    earnings: HashMap<Address, Wei>,
    platform_earnings: Wei,
    fee_bps: u32,
    block: u64,
    genesis: DateTime<Utc>,
}

/// Revert reason, as the contract would report it.
pub type Revert = String;

impl Ledger {
    pub fn new(fee_bps: u32) -> Self {
        Self {
            escrows: BTreeMap::new(),
            next_id: 0,
            balances: HashMap::new(),
            earnings: HashMap::new(),
            platform_earnings: Wei::ZERO,
            fee_bps,
            block: 0,
            genesis: Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_else(Utc::now),
        }
    }

    pub fn block(&self) -> u64 {
        self.block
    }

    pub fn block_time(&self) -> DateTime<Utc> {
        self.genesis + Duration::seconds(self.block as i64 * BLOCK_TIME)
    }

    pub fn balance(&self, account: &Address) -> Wei {
        self.balances.get(account).copied().unwrap_or_default()
    }

    pub fn fund(&mut self, account: &Address, amount: Wei) {
        let entry = self.balances.entry(account.clone()).or_default();
        *entry = *entry + amount;
    }

    pub fn earnings(&self, account: &Address) -> Wei {
        self.earnings.get(account).copied().unwrap_or_default()
    }

    pub fn platform_earnings(&self) -> Wei {
        self.platform_earnings
    }

    pub fn escrow(&self, id: u64) -> Option<&EscrowRecord> {
        self.escrows.get(&id)
    }

    /// Insert a record as-is, bypassing the transition rules.
    pub fn seed(&mut self, record: EscrowRecord) {
        self.next_id = self.next_id.max(record.id + 1);
        self.escrows.insert(record.id, record);
    }

    pub fn client_escrows(&self, account: &Address) -> Vec<u64> {
        self.escrows.values().filter(|e| &e.client == account).map(|e| e.id).collect()
    }

    pub fn freelancer_escrows(&self, account: &Address) -> Vec<u64> {
        self.escrows.values().filter(|e| &e.freelancer == account).map(|e| e.id).collect()
    }

    /// Execute one mutating call in a new block. Returns the created escrow
    /// id for `CreateEscrow`.
    pub fn apply(&mut self, sender: &Address, call: &ContractCall) -> Result<Option<u64>, Revert> {
        let created = match call {
            ContractCall::CreateEscrow { description, freelancer, value } => {
                Some(self.create(sender, description, freelancer, *value)?)
            }
            ContractCall::AcceptEscrow { id } => {
                let e = self.escrow_mut(*id)?;
                require(&e.freelancer == sender, "Only freelancer can accept")?;
                require(e.status == EscrowStatus::Open, "Escrow not open")?;
                e.status = EscrowStatus::InProgress;
                None
            }
            ContractCall::SubmitWork { id } => {
                let e = self.escrow_mut(*id)?;
                require(&e.freelancer == sender, "Only freelancer can submit work")?;
                require(e.status == EscrowStatus::InProgress, "Escrow not in progress")?;
                e.status = EscrowStatus::Completed;
                None
            }
            ContractCall::ApproveAndRelease { id } => {
                self.release(sender, *id)?;
                None
            }
            ContractCall::Dispute { id } => {
                let e = self.escrow_mut(*id)?;
                require(&e.client == sender || &e.freelancer == sender, "Only participants can dispute")?;
                require(
                    matches!(e.status, EscrowStatus::InProgress | EscrowStatus::Completed),
                    "Cannot dispute in current state",
                )?;
                e.status = EscrowStatus::Disputed;
                None
            }
            ContractCall::CancelEscrow { id } => {
                let e = self.escrow_mut(*id)?;
                require(&e.client == sender, "Only client can cancel")?;
                require(e.status == EscrowStatus::Open, "Can only cancel open escrows")?;
                e.status = EscrowStatus::Cancelled;
                let (client, amount) = (e.client.clone(), e.amount);
                self.fund(&client, amount);
                None
            }
            ContractCall::WithdrawEarnings => {
                let amount = self.earnings(sender);
                require(!amount.is_zero(), "No earnings to withdraw")?;
                self.earnings.insert(sender.clone(), Wei::ZERO);
                self.fund(sender, amount);
                None
            }
        };
        self.block += 1;
        Ok(created)
    }

    fn create(&mut self, sender: &Address, description: &str, freelancer: &Address, value: Wei) -> Result<u64, Revert> {
        require(!value.is_zero(), "Amount must be greater than 0")?;
        require(!freelancer.is_zero(), "Invalid freelancer address")?;
        require(freelancer != sender, "Client cannot be freelancer")?;
        let remaining = self.balance(sender).checked_sub(value).ok_or_else(|| "Insufficient funds".to_string())?;
        self.balances.insert(sender.clone(), remaining);

        let id = self.next_id;
        self.next_id += 1;
        let created_at = self.block_time();
        self.escrows.insert(
            id,
            EscrowRecord {
                id,
                client: sender.clone(),
                freelancer: freelancer.clone(),
                description: description.to_string(),
                amount: value,
                status: EscrowStatus::Open,
                created_at,
            },
        );
        Ok(id)
    }

    fn release(&mut self, sender: &Address, id: u64) -> Result<(), Revert> {
        let fee_bps = self.fee_bps;
        let e = self.escrow_mut(id)?;
        require(&e.client == sender, "Only client can approve")?;
        require(e.status == EscrowStatus::Completed, "Work not submitted")?;
        e.status = EscrowStatus::Released;

        let fee = e.amount.basis_points(fee_bps);
        let payout = e.amount - fee;
        let freelancer = e.freelancer.clone();
        let entry = self.earnings.entry(freelancer).or_default();
        *entry = *entry + payout;
        self.platform_earnings = self.platform_earnings + fee;
        Ok(())
    }

    fn escrow_mut(&mut self, id: u64) -> Result<&mut EscrowRecord, Revert> {
        self.escrows.get_mut(&id).ok_or_else(|| "Escrow does not exist".to_string())
    }
}

fn require(condition: bool, reason: &str) -> Result<(), Revert> {
    if condition {
        Ok(())
    } else {
        Err(reason.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ETHER: u128 = 1_000_000_000_000_000_000;

    fn addr(n: u8) -> Address {
        Address::parse(&format!("0x{:040x}", n)).unwrap()
    }

    fn funded() -> Ledger {
        let mut ledger = Ledger::new(500);
        ledger.fund(&addr(1), Wei(10 * ETHER));
        ledger
    }

    fn create(ledger: &mut Ledger) -> u64 {
        let call = ContractCall::CreateEscrow { description: "logo".into(), freelancer: addr(2), value: Wei(ETHER) };
        ledger.apply(&addr(1), &call).unwrap().unwrap()
    }

    #[test]
    fn test_full_happy_path_pays_minus_fee() {
        let mut ledger = funded();
        let id = create(&mut ledger);
        assert_eq!(ledger.balance(&addr(1)), Wei(9 * ETHER));

        ledger.apply(&addr(2), &ContractCall::AcceptEscrow { id }).unwrap();
        ledger.apply(&addr(2), &ContractCall::SubmitWork { id }).unwrap();
        ledger.apply(&addr(1), &ContractCall::ApproveAndRelease { id }).unwrap();

        assert_eq!(ledger.escrow(id).unwrap().status, EscrowStatus::Released);
        assert_eq!(ledger.earnings(&addr(2)), Wei(ETHER * 95 / 100));
        assert_eq!(ledger.platform_earnings(), Wei(ETHER * 5 / 100));

        ledger.apply(&addr(2), &ContractCall::WithdrawEarnings).unwrap();
        assert_eq!(ledger.earnings(&addr(2)), Wei::ZERO);
        assert_eq!(ledger.balance(&addr(2)), Wei(ETHER * 95 / 100));
    }

    #[test]
    fn test_role_gating() {
        let mut ledger = funded();
        let id = create(&mut ledger);
        let err = ledger.apply(&addr(3), &ContractCall::AcceptEscrow { id }).unwrap_err();
        assert_eq!(err, "Only freelancer can accept");
        let err = ledger.apply(&addr(2), &ContractCall::CancelEscrow { id }).unwrap_err();
        assert_eq!(err, "Only client can cancel");
        let err = ledger.apply(&addr(1), &ContractCall::ApproveAndRelease { id }).unwrap_err();
        assert_eq!(err, "Work not submitted");
    }

    #[test]
    fn test_cancel_refunds_client() {
        let mut ledger = funded();
        let id = create(&mut ledger);
        ledger.apply(&addr(1), &ContractCall::CancelEscrow { id }).unwrap();
        assert_eq!(ledger.balance(&addr(1)), Wei(10 * ETHER));
        assert_eq!(ledger.escrow(id).unwrap().status, EscrowStatus::Cancelled);
    }

    #[test]
    fn test_create_rejections() {
        let mut ledger = funded();
        let to_self = ContractCall::CreateEscrow { description: "x".into(), freelancer: addr(1), value: Wei(1) };
        assert_eq!(ledger.apply(&addr(1), &to_self).unwrap_err(), "Client cannot be freelancer");
        let too_much = ContractCall::CreateEscrow { description: "x".into(), freelancer: addr(2), value: Wei(11 * ETHER) };
        assert_eq!(ledger.apply(&addr(1), &too_much).unwrap_err(), "Insufficient funds");
        assert_eq!(ledger.apply(&addr(2), &ContractCall::WithdrawEarnings).unwrap_err(), "No earnings to withdraw");
    }

    #[test]
    fn test_blocks_advance_creation_time() {
        let mut ledger = funded();
        let first = create(&mut ledger);
        let second = create(&mut ledger);
        assert!(ledger.escrow(second).unwrap().created_at > ledger.escrow(first).unwrap().created_at);
    }
}
