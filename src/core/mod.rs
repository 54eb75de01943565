//! Core value types shared by the wallet session and the escrow client.

pub mod address;
pub mod units;

pub use address::{is_valid_address, Address};
pub use units::{format_ether, format_ether_fixed, parse_ether, Wei};
