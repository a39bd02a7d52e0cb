use thiserror::Error;

/// Ledger encoding and construction errors.
///
/// Everything in this crate is pure, so every variant describes a problem
/// with the caller's input rather than with the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SolError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("transaction build error: {0}")]
    TransactionBuildError(String),

    #[error("signing error: {0}")]
    SigningError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),
}
