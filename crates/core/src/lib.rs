//! GrantCraft Core Types
//!
//! This crate defines the fundamental data structures used throughout GrantCraft:
//! ledger addresses and amounts, transaction references, and the subject record
//! that every allocation and faucet request reads and updates.

mod address;
mod error;
mod record;
mod types;

pub use address::*;
pub use error::*;
pub use record::*;
pub use types::*;
