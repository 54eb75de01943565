//! Escrow records and the views derived from them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::{format_ether, parse_ether, Address, Wei};
use crate::error::{EscrowError, EscrowResult};

/// Remote contract status, wire codes 0..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Open,
    InProgress,
    Completed,
    Disputed,
    Released,
    Cancelled,
}

impl EscrowStatus {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Open),
            1 => Some(Self::InProgress),
            2 => Some(Self::Completed),
            3 => Some(Self::Disputed),
            4 => Some(Self::Released),
            5 => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::Open => 0,
            Self::InProgress => 1,
            Self::Completed => 2,
            Self::Disputed => 3,
            Self::Released => 4,
            Self::Cancelled => 5,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::InProgress => "In Progress",
            Self::Completed => "Completed",
            Self::Disputed => "Disputed",
            Self::Released => "Released",
            Self::Cancelled => "Cancelled",
        }
    }

    /// No further lifecycle call can change the record.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Cancelled)
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Relationship between an account and a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Client,
    Freelancer,
}

/// One job agreement as last seen on the remote contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowRecord {
    pub id: u64,
    pub client: Address,
    pub freelancer: Address,
    pub description: String,
    pub amount: Wei,
    pub status: EscrowStatus,
    pub created_at: DateTime<Utc>,
}

/// What the UI would offer an account for a record. Hints only; the remote
/// contract decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowAction {
    Accept,
    SubmitWork,
    ApproveAndRelease,
    Cancel,
    Dispute,
}

impl EscrowRecord {
    pub fn is_client(&self, account: &Address) -> bool {
        self.client.matches(account.as_str())
    }

    pub fn is_freelancer(&self, account: &Address) -> bool {
        self.freelancer.matches(account.as_str())
    }

    /// Roles `account` holds on this record (possibly both).
    pub fn roles(&self, account: &Address) -> Vec<Role> {
        let mut roles = Vec::with_capacity(2);
        if self.is_client(account) {
            roles.push(Role::Client);
        }
        if self.is_freelancer(account) {
            roles.push(Role::Freelancer);
        }
        roles
    }

    pub fn available_actions(&self, account: &Address) -> Vec<EscrowAction> {
        let client = self.is_client(account);
        let freelancer = self.is_freelancer(account);
        let mut actions = Vec::new();

        if freelancer && self.status == EscrowStatus::Open {
            actions.push(EscrowAction::Accept);
        }
        if freelancer && self.status == EscrowStatus::InProgress {
            actions.push(EscrowAction::SubmitWork);
        }
        if client && self.status == EscrowStatus::Completed {
            actions.push(EscrowAction::ApproveAndRelease);
        }
        if client && self.status == EscrowStatus::Open {
            actions.push(EscrowAction::Cancel);
        }
        if (client || freelancer) && matches!(self.status, EscrowStatus::InProgress | EscrowStatus::Completed) {
            actions.push(EscrowAction::Dispute);
        }
        actions
    }

    pub fn amount_ether(&self) -> String {
        format_ether(self.amount)
    }
}

/// Validated input for a new escrow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowDraft {
    pub description: String,
    pub freelancer: Address,
    pub amount: Wei,
}

impl EscrowDraft {
    pub fn new(description: impl Into<String>, freelancer: Address, amount: Wei) -> EscrowResult<Self> {
        let description = description.into().trim().to_string();
        if description.is_empty() {
            return Err(EscrowError::InvalidInput("Job description is required".into()));
        }
        if freelancer.is_zero() {
            return Err(EscrowError::InvalidInput("Freelancer cannot be the zero address".into()));
        }
        if amount.is_zero() {
            return Err(EscrowError::InvalidInput("Amount must be greater than 0".into()));
        }
        Ok(Self { description, freelancer, amount })
    }

    /// From raw form input; `amount` is in ether.
    pub fn parse(description: &str, freelancer: &str, amount: &str) -> EscrowResult<Self> {
        let freelancer = Address::parse(freelancer)
            .map_err(|_| EscrowError::InvalidInput("Invalid Ethereum address".into()))?;
        Self::new(description, freelancer, parse_ether(amount)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EarningsState {
    /// Value read from the remote.
    Confirmed,
    /// Zeroed locally after a withdrawal, awaiting the next refresh.
    Optimistic,
}

/// Withdrawable proceeds of the connected account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EarningsBalance {
    pub amount: Wei,
    pub state: EarningsState,
}

impl Default for EarningsBalance {
    fn default() -> Self {
        Self::confirmed(Wei::ZERO)
    }
}

impl EarningsBalance {
    pub fn confirmed(amount: Wei) -> Self {
        Self { amount, state: EarningsState::Confirmed }
    }

    pub fn optimistic_zero() -> Self {
        Self { amount: Wei::ZERO, state: EarningsState::Optimistic }
    }

    pub fn is_pending(&self) -> bool {
        self.state == EarningsState::Optimistic
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EscrowStats {
    pub total: usize,
    pub in_progress: usize,
    /// Completed or Released.
    pub completed: usize,
    pub disputed: usize,
}

impl EscrowStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a EscrowRecord>) -> Self {
        records.into_iter().fold(Self::default(), |mut stats, r| {
            stats.total += 1;
            match r.status {
                EscrowStatus::InProgress => stats.in_progress += 1,
                EscrowStatus::Completed | EscrowStatus::Released => stats.completed += 1,
                EscrowStatus::Disputed => stats.disputed += 1,
                _ => {}
            }
            stats
        })
    }
}

/// The cached, reconciled view. Replaced wholesale, never edited in place.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EscrowView {
    /// Newest first.
    pub records: Vec<EscrowRecord>,
    pub earnings: EarningsBalance,
    /// Account the view was fetched for.
    pub account: Option<Address>,
    /// Session epoch the view belongs to.
    pub epoch: u64,
    /// Refresh sequence that produced it (0 = never refreshed).
    pub generation: u64,
}

impl EscrowView {
    pub fn empty(epoch: u64) -> Self {
        Self { epoch, ..Default::default() }
    }

    pub fn client_records(&self) -> Vec<EscrowRecord> {
        match &self.account {
            Some(account) => self.records.iter().filter(|r| r.is_client(account)).cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn freelancer_records(&self) -> Vec<EscrowRecord> {
        match &self.account {
            Some(account) => self.records.iter().filter(|r| r.is_freelancer(account)).cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn get(&self, id: u64) -> Option<&EscrowRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn stats(&self) -> EscrowStats {
        EscrowStats::from_records(&self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn addr(n: u8) -> Address {
        Address::parse(&format!("0x{:040x}", n)).unwrap()
    }

    fn record(id: u64, client: u8, freelancer: u8, status: EscrowStatus) -> EscrowRecord {
        EscrowRecord {
            id,
            client: addr(client),
            freelancer: addr(freelancer),
            description: format!("job {}", id),
            amount: Wei(1_000),
            status,
            created_at: Utc.timestamp_opt(1_700_000_000 + id as i64, 0).unwrap(),
        }
    }

    #[test]
    fn test_status_codes() {
        for code in 0..=5 {
            assert_eq!(EscrowStatus::from_code(code).unwrap().code(), code);
        }
        assert!(EscrowStatus::from_code(6).is_none());
        assert_eq!(EscrowStatus::InProgress.label(), "In Progress");
    }

    #[test]
    fn test_actions_follow_role_and_status() {
        let open = record(1, 1, 2, EscrowStatus::Open);
        assert_eq!(open.available_actions(&addr(2)), vec![EscrowAction::Accept]);
        assert_eq!(open.available_actions(&addr(1)), vec![EscrowAction::Cancel]);
        assert!(open.available_actions(&addr(3)).is_empty());

        let working = record(2, 1, 2, EscrowStatus::InProgress);
        assert_eq!(working.available_actions(&addr(2)), vec![EscrowAction::SubmitWork, EscrowAction::Dispute]);
        assert_eq!(working.available_actions(&addr(1)), vec![EscrowAction::Dispute]);

        let done = record(3, 1, 2, EscrowStatus::Completed);
        assert_eq!(done.available_actions(&addr(1)), vec![EscrowAction::ApproveAndRelease, EscrowAction::Dispute]);

        assert!(record(4, 1, 2, EscrowStatus::Released).available_actions(&addr(1)).is_empty());
    }

    #[test]
    fn test_dual_role_record_in_both_views() {
        let view = EscrowView {
            records: vec![record(7, 1, 1, EscrowStatus::Open), record(8, 1, 2, EscrowStatus::Open)],
            account: Some(addr(1)),
            ..Default::default()
        };
        assert_eq!(view.client_records().len(), 2);
        assert_eq!(view.freelancer_records().iter().map(|r| r.id).collect::<Vec<_>>(), vec![7]);
        assert_eq!(view.records[0].roles(&addr(1)), vec![Role::Client, Role::Freelancer]);
    }

    #[test]
    fn test_stats() {
        let records = [
            record(1, 1, 2, EscrowStatus::Open),
            record(2, 1, 2, EscrowStatus::InProgress),
            record(3, 1, 2, EscrowStatus::Completed),
            record(4, 1, 2, EscrowStatus::Released),
            record(5, 1, 2, EscrowStatus::Disputed),
        ];
        let stats = EscrowStats::from_records(&records);
        assert_eq!(stats, EscrowStats { total: 5, in_progress: 1, completed: 2, disputed: 1 });
    }

    #[test]
    fn test_draft_validation() {
        let draft = EscrowDraft::parse("  Build landing page ", &format!("0x{:040x}", 9), "1.0").unwrap();
        assert_eq!(draft.description, "Build landing page");
        assert_eq!(draft.amount, Wei(1_000_000_000_000_000_000));

        let zero = format!("0x{:040x}", 0);
        assert!(EscrowDraft::parse("   ", &format!("0x{:040x}", 9), "1").is_err());
        assert!(EscrowDraft::parse("job", "0x123", "1").is_err());
        assert!(EscrowDraft::parse("job", &zero, "1").is_err());
        assert!(EscrowDraft::parse("job", &format!("0x{:040x}", 9), "0").is_err());
        assert!(EscrowDraft::parse("job", &format!("0x{:040x}", 9), "-2").is_err());
    }

    #[test]
    fn test_earnings_states() {
        assert!(!EarningsBalance::default().is_pending());
        let pending = EarningsBalance::optimistic_zero();
        assert!(pending.is_pending());
        assert!(pending.amount.is_zero());
    }
}
