//! The ledger backend seam.
//!
//! Everything this crate needs from a remote ledger node is expressed by
//! [`LedgerRpc`]. Implementations own their transport and wire format; the
//! pipeline only sees the structured values and errors defined here.

use std::time::Duration;

use async_trait::async_trait;
use chain_sol::{Address, Signature};
use serde::Serialize;
use thiserror::Error;

use crate::config::{ConfirmationLevel, SubmitOptions};

/// JSON-RPC error codes a ledger node reports for well-known conditions.
pub mod codes {
    pub const INVALID_PARAMS: i64 = -32602;
    pub const PREFLIGHT_FAILURE: i64 = -32002;
    pub const SIGNATURE_VERIFICATION_FAILURE: i64 = -32003;
    pub const BLOCK_NOT_AVAILABLE: i64 = -32004;
    pub const NODE_UNHEALTHY: i64 = -32005;
    pub const TOO_MANY_REQUESTS: i64 = 429;
}

/// A recent block reference plus the last block height at which a
/// transaction carrying it is still accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessToken {
    pub blockhash: [u8; 32],
    pub last_valid_block_height: u64,
}

impl FreshnessToken {
    pub fn is_expired_at(&self, block_height: u64) -> bool {
        block_height > self.last_valid_block_height
    }
}

/// The parts of an on-chain account the pipeline looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub lamports: u64,
    /// Program that owns the account.
    pub owner: Address,
    pub data_len: usize,
}

/// What the backend knows about a submitted signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureStatus {
    /// The requested confirmation level has been reached.
    pub level_reached: bool,
    /// Set when the transaction landed but execution failed.
    pub error: Option<ExecutionError>,
}

/// Per-instruction execution failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum InstructionError {
    /// Program-specific error code. Code 1 is "insufficient funds" for both
    /// the System Program and the Token Program.
    #[error("custom program error: 0x{0:x}")]
    Custom(u32),
    #[error("invalid instruction data")]
    InvalidInstructionData,
    #[error("invalid account data for instruction")]
    InvalidAccountData,
    #[error("missing required signature for instruction")]
    MissingRequiredSignature,
    #[error("provided seeds do not result in a valid address")]
    InvalidSeeds,
    #[error("insufficient account keys for instruction")]
    NotEnoughAccountKeys,
    #[error("unsupported program id")]
    UnsupportedProgramId,
}

/// Transaction-level execution failure reported by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionError {
    #[error("insufficient funds for fee")]
    InsufficientFundsForFee,
    #[error("insufficient funds for rent")]
    InsufficientFundsForRent,
    #[error("blockhash not found")]
    BlockhashNotFound,
    #[error("account not found")]
    AccountNotFound,
    #[error("this transaction has already been processed")]
    AlreadyProcessed,
    #[error("error processing instruction {index}: {error}")]
    Instruction { index: u8, error: InstructionError },
    #[error("{0}")]
    Other(String),
}

/// Errors raised by a [`LedgerRpc`] call.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// Connection-level failure; the request may not have reached the node.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The node answered with an error object.
    #[error("rpc error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<ExecutionError>,
    },
}

impl BackendError {
    pub fn rpc(code: i64, message: impl Into<String>, data: Option<ExecutionError>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
            data,
        }
    }

    /// Failures where repeating the identical request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Rpc { code, .. } => matches!(
                *code,
                codes::BLOCK_NOT_AVAILABLE | codes::NODE_UNHEALTHY | codes::TOO_MANY_REQUESTS
            ),
        }
    }

    pub fn execution_error(&self) -> Option<&ExecutionError> {
        match self {
            Self::Rpc { data, .. } => data.as_ref(),
            _ => None,
        }
    }
}

/// A remote ledger node.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    async fn latest_freshness_token(
        &self,
        level: ConfirmationLevel,
    ) -> Result<FreshnessToken, BackendError>;

    async fn block_height(&self, level: ConfirmationLevel) -> Result<u64, BackendError>;

    async fn get_account_info(&self, address: &Address)
        -> Result<Option<AccountInfo>, BackendError>;

    async fn get_mint_decimals(&self, mint: &Address) -> Result<u8, BackendError>;

    /// Broadcast signed wire bytes. Honors `skip_preflight` and passes
    /// `max_retries` on to the node's own rebroadcast loop.
    async fn submit(
        &self,
        signed_transaction: &[u8],
        options: &SubmitOptions,
    ) -> Result<Signature, BackendError>;

    /// `None` until the node has seen the signature land.
    async fn signature_status(
        &self,
        signature: &Signature,
        level: ConfirmationLevel,
    ) -> Result<Option<SignatureStatus>, BackendError>;

    /// Native balance in lamports.
    async fn get_balance(&self, address: &Address) -> Result<u64, BackendError>;

    /// Token balance of a token account, in the mint's base units.
    async fn get_token_balance(&self, token_account: &Address) -> Result<u64, BackendError>;
}
