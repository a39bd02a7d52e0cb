//! Ledger-side building blocks for native and SPL token transfers.
//!
//! This crate handles address parsing, amount normalization, instruction
//! encodings (System, SPL Token, Associated Token Account, Compute Budget),
//! message compilation, signing and the compact wire format, all without
//! pulling in `solana-sdk` (which drags in tokio and 200+ transitive
//! dependencies). Nothing here performs I/O.

pub mod address;
pub mod amount;
pub mod compute_budget;
pub mod error;
pub mod spl_token;
pub mod transaction;

// Re-export key public types for ergonomic imports.
pub use address::{validate_address, Address, Signature};
pub use amount::{format_amount, normalize, LAMPORTS_PER_SOL, NATIVE_DECIMALS};
pub use compute_budget::{
    set_compute_unit_limit, set_compute_unit_price, COMPUTE_BUDGET_PROGRAM_ID,
};
pub use error::SolError;
pub use spl_token::{
    build_create_associated_token_account, build_transfer_checked,
    derive_associated_token_address, ASSOCIATED_TOKEN_PROGRAM_ID, TOKEN_PROGRAM_ID,
};
pub use transaction::{
    compile_message, decode_transaction, public_key_for_seed, sign_message,
    system_transfer_instruction, CompiledInstruction, CompiledMessage, DecodedTransaction,
    SignedTransaction, SolAccountMeta, SolInstruction, SYSTEM_PROGRAM_ID,
};
