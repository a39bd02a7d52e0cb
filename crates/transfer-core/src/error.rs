use chain_sol::{Address, Signature, SolError};
use serde::Serialize;
use thiserror::Error;

/// The small failure taxonomy surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed address or amount, or no connected wallet.
    InvalidInput,
    /// Backend unreachable while fetching the block reference.
    FreshnessFetchFailed,
    /// The user declined to sign.
    UserCancelled,
    /// Preflight caught an invalid instruction sequence.
    SimulationRejected,
    InsufficientBalance,
    /// Submitted, but the ledger rejected it.
    ExecutionFailed,
    /// Not confirmed before the block reference expired. Indeterminate.
    Expired,
    NetworkOrTimeout,
    Unclassified,
}

impl ErrorKind {
    /// Whether a caller may retry the same transfer without first checking
    /// resulting balances.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::FreshnessFetchFailed | Self::NetworkOrTimeout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::FreshnessFetchFailed => "freshness_fetch_failed",
            Self::UserCancelled => "user_cancelled",
            Self::SimulationRejected => "simulation_rejected",
            Self::InsufficientBalance => "insufficient_balance",
            Self::ExecutionFailed => "execution_failed",
            Self::Expired => "expired",
            Self::NetworkOrTimeout => "network_or_timeout",
            Self::Unclassified => "unclassified",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that end a transfer attempt without a ledger verdict.
///
/// Ledger verdicts (confirmed, failed, expired, cancelled) are
/// [`Outcome`](crate::engine::Outcome)s, not errors.
#[derive(Debug, Clone, Error)]
pub enum TransferError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("wallet not connected")]
    WalletNotConnected,

    #[error("invalid instruction order: {0}")]
    InstructionOrder(String),

    #[error("decimals for mint {mint} unavailable: {reason}")]
    DecimalsUnavailable {
        mint: Address,
        kind: ErrorKind,
        reason: String,
    },

    #[error("account lookup for {address} failed: {reason}")]
    AccountLookupFailed {
        address: Address,
        kind: ErrorKind,
        reason: String,
    },

    #[error("failed to fetch a recent blockhash: {0}")]
    FreshnessFetchFailed(String),

    #[error("preflight simulation rejected the transaction: {0}")]
    SimulationRejected(String),

    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("network error or timeout: {detail}")]
    NetworkOrTimeout {
        /// Present when the transaction was already submitted, in which case
        /// it may still land.
        signature: Option<Signature>,
        detail: String,
    },

    #[error("unclassified failure: {0}")]
    Unclassified(String),
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) | Self::WalletNotConnected | Self::InstructionOrder(_) => {
                ErrorKind::InvalidInput
            }
            Self::DecimalsUnavailable { kind, .. } | Self::AccountLookupFailed { kind, .. } => *kind,
            Self::FreshnessFetchFailed(_) => ErrorKind::FreshnessFetchFailed,
            Self::SimulationRejected(_) => ErrorKind::SimulationRejected,
            Self::InsufficientBalance(_) => ErrorKind::InsufficientBalance,
            Self::NetworkOrTimeout { .. } => ErrorKind::NetworkOrTimeout,
            Self::Unclassified(_) => ErrorKind::Unclassified,
        }
    }

    /// False once a signature exists: that transaction may still land.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable() && self.signature().is_none()
    }

    /// Signature of the submitted transaction, if submission happened.
    pub fn signature(&self) -> Option<&Signature> {
        match self {
            Self::NetworkOrTimeout { signature, .. } => signature.as_ref(),
            _ => None,
        }
    }

    /// The single human-readable message shown for this failure.
    pub fn user_message(&self) -> String {
        match self {
            Self::WalletNotConnected => "Connect a wallet before sending.".into(),
            Self::InvalidInput(detail) | Self::InstructionOrder(detail) => {
                format!("Please check the addresses and amount: {detail}.")
            }
            Self::DecimalsUnavailable { mint, .. } => format!(
                "Could not read the token precision for mint {mint}. Nothing was sent."
            ),
            Self::AccountLookupFailed { .. } => {
                "Could not look up the token accounts for this transfer. Nothing was sent.".into()
            }
            Self::FreshnessFetchFailed(_) => {
                "Could not reach the network to prepare the transaction. Please try again.".into()
            }
            Self::SimulationRejected(detail) => {
                format!("The network rejected this transaction during simulation: {detail}")
            }
            Self::InsufficientBalance(_) => {
                "Insufficient balance to cover this transfer and its fees.".into()
            }
            Self::NetworkOrTimeout {
                signature: Some(signature),
                ..
            } => format!(
                "Lost contact with the network while confirming transaction {signature}. \
                 Check your balance before retrying."
            ),
            Self::NetworkOrTimeout { signature: None, .. } => {
                "Network error. Please try again.".into()
            }
            Self::Unclassified(_) => "Transaction failed. Please try again.".into(),
        }
    }
}

impl From<SolError> for TransferError {
    fn from(e: SolError) -> Self {
        TransferError::InvalidInput(e.to_string())
    }
}

pub type TransferResult<T> = Result<T, TransferError>;
