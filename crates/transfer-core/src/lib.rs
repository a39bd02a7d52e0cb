//! Build, submit and confirm native and SPL token transfers.
//!
//! The pipeline runs one user-initiated attempt end to end:
//!
//! 1. normalize the human amount into base units ([`chain_sol::normalize`])
//! 2. plan the ordered instructions ([`builder`])
//! 3. attach a fresh block reference and fee payer ([`assembler`])
//! 4. sign, submit and wait for a verdict ([`engine`])
//! 5. classify whatever went wrong ([`classify`])
//!
//! The ledger node and the wallet are collaborators behind the
//! [`LedgerRpc`] and [`WalletSigner`] traits. [`memory::InMemoryLedger`]
//! implements the former for tests and demos.

pub mod assembler;
pub mod builder;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod memory;
pub mod retry;
pub mod rpc;
pub mod session;
pub mod signer;
pub mod transfer;

pub use assembler::{assemble, Transaction};
pub use builder::{
    build_transfer_instructions, plan_transfer_instructions, resolve_decimals, InstructionPlan,
    TransferKind,
};
pub use classify::{classify, RawFailure};
pub use config::{
    load_config, ConfigError, ConfirmationLevel, LoggingConfig, PriorityFee, SubmitOptions,
    TransferConfig,
};
pub use engine::{ConfirmationEngine, Outcome, TransferState};
pub use error::{ErrorKind, TransferError, TransferResult};
pub use logging::init_logging;
pub use retry::RetryPolicy;
pub use rpc::{
    AccountInfo, BackendError, ExecutionError, FreshnessToken, InstructionError, LedgerRpc,
    SignatureStatus,
};
pub use session::WalletSession;
pub use signer::{KeypairSigner, SignerError, WalletSigner};
pub use transfer::{execute_transfer, execute_transfer_observed, TransferReport, TransferRequest};
