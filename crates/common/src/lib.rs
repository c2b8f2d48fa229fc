//! Shared types and plumbing for the drip faucet.

pub mod types;
pub mod utils;

pub use types::{Address, AddressError, TxHash};
