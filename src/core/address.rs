//! Address - Lowercase-normalized account identifiers
//!
//! Wallets and contracts hand out checksummed (mixed-case) hex addresses.
//! Everything inside the client compares addresses case-insensitively, so the
//! type stores the lowercase form and equality is plain string equality.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use crate::error::{EscrowError, EscrowResult};

static ADDRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("static regex"));

/// Account identifier, always stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// The zero address. Never a valid counterparty.
    pub const ZERO_HEX: &'static str = "0x0000000000000000000000000000000000000000";

    /// Parse and normalize a `0x`-prefixed 20-byte hex address.
    pub fn parse(raw: &str) -> EscrowResult<Self> {
        let trimmed = raw.trim();
        if !ADDRESS_RE.is_match(trimmed) {
            return Err(EscrowError::InvalidInput(format!("Invalid address: {}", raw)));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn zero() -> Self {
        Self(Self::ZERO_HEX.to_string())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == Self::ZERO_HEX
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against an arbitrary string.
    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other.trim())
    }

    /// `0x742d...db21` style short form.
    pub fn truncated(&self) -> String {
        format!("{}...{}", &self.0[..6], &self.0[self.0.len() - 4..])
    }
}

/// Format check without allocating an `Address`.
pub fn is_valid_address(raw: &str) -> bool {
    ADDRESS_RE.is_match(raw.trim())
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Address {
    type Error = EscrowError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

impl std::str::FromStr for Address {
    type Err = EscrowError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECKSUMMED: &str = "0x742d35Cc6634C0532925a3b844Bc9e7595f8dB21";

    #[test]
    fn test_parse_normalizes_case() {
        let addr = Address::parse(CHECKSUMMED).unwrap();
        assert_eq!(addr.as_str(), "0x742d35cc6634c0532925a3b844bc9e7595f8db21");
        assert_eq!(addr, Address::parse(&CHECKSUMMED.to_uppercase().replace("0X", "0x")).unwrap());
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(Address::parse("742d35Cc6634C0532925a3b844Bc9e7595f8dB21").is_err());
        assert!(Address::parse("0x742d35").is_err());
        assert!(Address::parse("0xZZ2d35Cc6634C0532925a3b844Bc9e7595f8dB21").is_err());
        assert!(!is_valid_address(""));
    }

    #[test]
    fn test_matches_ignores_case() {
        let addr = Address::parse(CHECKSUMMED).unwrap();
        assert!(addr.matches(CHECKSUMMED));
        assert!(addr.matches(&CHECKSUMMED.to_lowercase()));
    }

    #[test]
    fn test_truncated() {
        let addr = Address::parse(CHECKSUMMED).unwrap();
        assert_eq!(addr.truncated(), "0x742d...db21");
    }

    #[test]
    fn test_serde_validates() {
        let json = format!("\"{}\"", CHECKSUMMED);
        let addr: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(addr.as_str(), CHECKSUMMED.to_lowercase());
        assert!(serde_json::from_str::<Address>("\"0x12\"").is_err());
    }
}
