//! Native-currency units
//!
//! Amounts travel as integer wei (`10^-18` ether). Human input and display use
//! decimal ether strings; conversion is exact, no floating point involved.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

use crate::error::{EscrowError, EscrowResult};

pub const DECIMALS: usize = 18;
const WEI_PER_ETHER: u128 = 1_000_000_000_000_000_000;

/// Integer amount in the smallest currency unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Wei(pub u128);

impl Wei {
    pub const ZERO: Wei = Wei(0);

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_sub(self, other: Wei) -> Option<Wei> {
        self.0.checked_sub(other.0).map(Wei)
    }

    /// `amount * bps / 10_000`, rounded down.
    pub fn basis_points(self, bps: u32) -> Wei {
        Wei(self.0 / 10_000 * bps as u128 + self.0 % 10_000 * bps as u128 / 10_000)
    }
}

impl Add for Wei {
    type Output = Wei;
    fn add(self, rhs: Wei) -> Wei {
        Wei(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Wei {
    type Output = Wei;
    fn sub(self, rhs: Wei) -> Wei {
        Wei(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for Wei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse a decimal ether string (`"1"`, `"0.25"`, `".5"`) into wei.
pub fn parse_ether(raw: &str) -> EscrowResult<Wei> {
    let s = raw.trim();
    let invalid = || EscrowError::InvalidInput(format!("Invalid amount: {}", raw));

    if s.is_empty() || s.starts_with('-') || s.starts_with('+') {
        return Err(invalid());
    }
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(invalid());
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    if frac.len() > DECIMALS {
        return Err(EscrowError::InvalidInput(format!(
            "Too many decimal places: {} (max {})",
            raw, DECIMALS
        )));
    }

    let whole_wei = if whole.is_empty() {
        0
    } else {
        whole
            .parse::<u128>()
            .ok()
            .and_then(|w| w.checked_mul(WEI_PER_ETHER))
            .ok_or_else(invalid)?
    };
    let frac_wei = if frac.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", frac, width = DECIMALS);
        padded.parse::<u128>().map_err(|_| invalid())?
    };

    whole_wei.checked_add(frac_wei).map(Wei).ok_or_else(invalid)
}

/// Format wei as a decimal ether string with trailing zeros trimmed
/// (always at least one fractional digit: `1.0`, `2.547`).
pub fn format_ether(wei: Wei) -> String {
    let whole = wei.0 / WEI_PER_ETHER;
    let frac = wei.0 % WEI_PER_ETHER;
    let frac_str = format!("{:0>width$}", frac, width = DECIMALS);
    let trimmed = frac_str.trim_end_matches('0');
    if trimmed.is_empty() {
        format!("{}.0", whole)
    } else {
        format!("{}.{}", whole, trimmed)
    }
}

/// Format with a fixed number of fractional digits, truncating.
pub fn format_ether_fixed(wei: Wei, places: usize) -> String {
    let places = places.min(DECIMALS);
    let whole = wei.0 / WEI_PER_ETHER;
    if places == 0 {
        return whole.to_string();
    }
    let frac_str = format!("{:0>width$}", wei.0 % WEI_PER_ETHER, width = DECIMALS);
    format!("{}.{}", whole, &frac_str[..places])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_whole_and_fractional() {
        assert_eq!(parse_ether("1").unwrap(), Wei(WEI_PER_ETHER));
        assert_eq!(parse_ether("1.0").unwrap(), Wei(WEI_PER_ETHER));
        assert_eq!(parse_ether("0.25").unwrap(), Wei(250_000_000_000_000_000));
        assert_eq!(parse_ether(".5").unwrap(), Wei(500_000_000_000_000_000));
        assert_eq!(parse_ether("0.000000000000000001").unwrap(), Wei(1));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", ".", "-1", "1e18", "abc", "1.2.3", "0.0000000000000000001"] {
            assert!(parse_ether(bad).is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn test_format_ether() {
        assert_eq!(format_ether(Wei(WEI_PER_ETHER)), "1.0");
        assert_eq!(format_ether(Wei(2_547_000_000_000_000_000)), "2.547");
        assert_eq!(format_ether(Wei::ZERO), "0.0");
        assert_eq!(format_ether(Wei(1)), "0.000000000000000001");
    }

    #[test]
    fn test_format_fixed_truncates() {
        assert_eq!(format_ether_fixed(Wei(950_000_000_000_000_000), 4), "0.9500");
        assert_eq!(format_ether_fixed(Wei(123_456_789_000_000_000), 4), "0.1234");
        assert_eq!(format_ether_fixed(Wei(3 * WEI_PER_ETHER), 0), "3");
    }

    #[test]
    fn test_basis_points() {
        assert_eq!(Wei(WEI_PER_ETHER).basis_points(500), Wei(50_000_000_000_000_000));
        assert_eq!(Wei(19_999).basis_points(500), Wei(999));
        assert_eq!(Wei(u128::MAX).basis_points(10_000), Wei(u128::MAX));
    }
}
