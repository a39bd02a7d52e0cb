//! Map heterogeneous failure signals onto [`ErrorKind`].
//!
//! Structured data (error variants, RPC codes, execution errors) is checked
//! first. Free-form messages are matched only as a fallback, and that
//! matching is best effort: backend message formats are not a stable
//! contract.

use std::fmt;

use chain_sol::Signature;

use crate::error::{ErrorKind, TransferError};
use crate::rpc::{codes, BackendError, ExecutionError, InstructionError};
use crate::signer::SignerError;

/// A raw failure as received from a collaborator.
#[derive(Debug, Clone, Copy)]
pub enum RawFailure<'a> {
    Signer(&'a SignerError),
    Backend(&'a BackendError),
    /// Execution error reported for a landed transaction.
    Execution(&'a ExecutionError),
    Message(&'a str),
}

impl fmt::Display for RawFailure<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signer(e) => write!(f, "{e}"),
            Self::Backend(e) => write!(f, "{e}"),
            Self::Execution(e) => write!(f, "{e}"),
            Self::Message(m) => f.write_str(m),
        }
    }
}

/// Classify a failure. Pure: the same input always yields the same kind.
pub fn classify(failure: &RawFailure<'_>) -> ErrorKind {
    match failure {
        RawFailure::Signer(e) => classify_signer(e),
        RawFailure::Backend(e) => classify_backend(e),
        RawFailure::Execution(e) => classify_execution(e),
        RawFailure::Message(m) => classify_message(m),
    }
}

fn classify_signer(error: &SignerError) -> ErrorKind {
    match error {
        SignerError::UserRejected => ErrorKind::UserCancelled,
        SignerError::NotConnected => ErrorKind::InvalidInput,
        SignerError::Backend(e) | SignerError::Broadcast { source: e, .. } => classify_backend(e),
        SignerError::Signing(m) | SignerError::Other(m) => classify_message(m),
    }
}

fn classify_backend(error: &BackendError) -> ErrorKind {
    match error {
        BackendError::Transport(_) | BackendError::Timeout(_) => ErrorKind::NetworkOrTimeout,
        BackendError::Rpc {
            code,
            message,
            data,
        } => {
            if let Some(data) = data {
                if is_insufficient_funds(data) {
                    return ErrorKind::InsufficientBalance;
                }
                if matches!(data, ExecutionError::BlockhashNotFound) {
                    return ErrorKind::NetworkOrTimeout;
                }
            }
            match *code {
                codes::PREFLIGHT_FAILURE => ErrorKind::SimulationRejected,
                codes::BLOCK_NOT_AVAILABLE | codes::NODE_UNHEALTHY | codes::TOO_MANY_REQUESTS => {
                    ErrorKind::NetworkOrTimeout
                }
                _ if data.is_some() => ErrorKind::ExecutionFailed,
                _ => classify_message(message),
            }
        }
    }
}

fn classify_execution(error: &ExecutionError) -> ErrorKind {
    if is_insufficient_funds(error) {
        return ErrorKind::InsufficientBalance;
    }
    match error {
        ExecutionError::BlockhashNotFound => ErrorKind::NetworkOrTimeout,
        ExecutionError::Other(m) => match classify_message(m) {
            ErrorKind::Unclassified => ErrorKind::ExecutionFailed,
            kind => kind,
        },
        _ => ErrorKind::ExecutionFailed,
    }
}

/// Custom error 1 is `ResultWithNegativeLamports` in the System Program and
/// `InsufficientFunds` in the Token Program.
fn is_insufficient_funds(error: &ExecutionError) -> bool {
    matches!(
        error,
        ExecutionError::InsufficientFundsForFee
            | ExecutionError::InsufficientFundsForRent
            | ExecutionError::Instruction {
                error: InstructionError::Custom(1),
                ..
            }
    )
}

fn classify_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["user rejected", "rejected the request", "declined", "cancelled by user"]) {
        ErrorKind::UserCancelled
    } else if has(&["insufficient funds", "insufficient lamports", "insufficient balance"]) {
        ErrorKind::InsufficientBalance
    } else if has(&["simulation failed", "preflight"]) {
        ErrorKind::SimulationRejected
    } else if has(&[
        "timeout",
        "timed out",
        "network",
        "connection",
        "429",
        "rate limit",
        "too many requests",
    ]) {
        ErrorKind::NetworkOrTimeout
    } else {
        ErrorKind::Unclassified
    }
}

/// Classify `failure` and wrap it in the matching [`TransferError`].
///
/// Kinds that are ledger verdicts rather than errors (cancellation,
/// execution failure, expiry) become `Unclassified` here; callers that can
/// report them as outcomes should check [`classify`] first.
pub fn to_transfer_error(failure: &RawFailure<'_>, signature: Option<Signature>) -> TransferError {
    let detail = failure.to_string();
    let signature = match failure {
        RawFailure::Signer(SignerError::Broadcast { signature, .. }) => Some(*signature),
        _ => signature,
    };
    match classify(failure) {
        ErrorKind::InvalidInput => match failure {
            RawFailure::Signer(SignerError::NotConnected) => TransferError::WalletNotConnected,
            _ => TransferError::InvalidInput(detail),
        },
        ErrorKind::FreshnessFetchFailed => TransferError::FreshnessFetchFailed(detail),
        ErrorKind::SimulationRejected => TransferError::SimulationRejected(detail),
        ErrorKind::InsufficientBalance => TransferError::InsufficientBalance(detail),
        ErrorKind::NetworkOrTimeout => TransferError::NetworkOrTimeout { signature, detail },
        ErrorKind::UserCancelled
        | ErrorKind::ExecutionFailed
        | ErrorKind::Expired
        | ErrorKind::Unclassified => TransferError::Unclassified(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn rpc(code: i64, message: &str, data: Option<ExecutionError>) -> BackendError {
        BackendError::rpc(code, message, data)
    }

    // -- structured rules ---------------------------------------------------

    #[test]
    fn user_rejection_is_cancelled() {
        let e = SignerError::UserRejected;
        assert_eq!(classify(&RawFailure::Signer(&e)), ErrorKind::UserCancelled);
    }

    #[test]
    fn not_connected_is_invalid_input() {
        let e = SignerError::NotConnected;
        assert_eq!(classify(&RawFailure::Signer(&e)), ErrorKind::InvalidInput);
        assert!(matches!(
            to_transfer_error(&RawFailure::Signer(&e), None),
            TransferError::WalletNotConnected
        ));
    }

    #[test]
    fn transport_and_timeout_are_network() {
        let t = BackendError::Transport("connection reset by peer".into());
        let d = BackendError::Timeout(Duration::from_secs(30));
        assert_eq!(classify(&RawFailure::Backend(&t)), ErrorKind::NetworkOrTimeout);
        assert_eq!(classify(&RawFailure::Backend(&d)), ErrorKind::NetworkOrTimeout);
    }

    #[test]
    fn preflight_failure_is_simulation_rejected() {
        let e = rpc(
            codes::PREFLIGHT_FAILURE,
            "Transaction simulation failed: Error processing Instruction 0",
            Some(ExecutionError::Instruction {
                index: 0,
                error: InstructionError::InvalidAccountData,
            }),
        );
        assert_eq!(classify(&RawFailure::Backend(&e)), ErrorKind::SimulationRejected);
    }

    #[test]
    fn insufficient_funds_wins_over_preflight_code() {
        let e = rpc(
            codes::PREFLIGHT_FAILURE,
            "Transaction simulation failed",
            Some(ExecutionError::Instruction {
                index: 1,
                error: InstructionError::Custom(1),
            }),
        );
        assert_eq!(classify(&RawFailure::Backend(&e)), ErrorKind::InsufficientBalance);

        let fee = ExecutionError::InsufficientFundsForFee;
        assert_eq!(classify(&RawFailure::Execution(&fee)), ErrorKind::InsufficientBalance);
    }

    #[test]
    fn unhealthy_node_and_rate_limit_are_network() {
        for code in [
            codes::BLOCK_NOT_AVAILABLE,
            codes::NODE_UNHEALTHY,
            codes::TOO_MANY_REQUESTS,
        ] {
            let e = rpc(code, "try later", None);
            assert_eq!(classify(&RawFailure::Backend(&e)), ErrorKind::NetworkOrTimeout);
        }
    }

    #[test]
    fn blockhash_not_found_is_network() {
        let e = rpc(
            codes::PREFLIGHT_FAILURE,
            "Blockhash not found",
            Some(ExecutionError::BlockhashNotFound),
        );
        assert_eq!(classify(&RawFailure::Backend(&e)), ErrorKind::NetworkOrTimeout);
    }

    #[test]
    fn landed_instruction_failure_is_execution_failed() {
        let e = ExecutionError::Instruction {
            index: 0,
            error: InstructionError::Custom(4),
        };
        assert_eq!(classify(&RawFailure::Execution(&e)), ErrorKind::ExecutionFailed);
    }

    #[test]
    fn signer_wrapped_backend_error_uses_backend_rules() {
        let e = SignerError::Backend(rpc(codes::PREFLIGHT_FAILURE, "simulation failed", None));
        assert_eq!(classify(&RawFailure::Signer(&e)), ErrorKind::SimulationRejected);
    }

    // -- message fallback ---------------------------------------------------

    #[test]
    fn message_fallback_matches_case_insensitively() {
        let cases = [
            ("User rejected the request.", ErrorKind::UserCancelled),
            ("Attempt to debit an account but found no record of a prior credit; insufficient funds", ErrorKind::InsufficientBalance),
            ("Transaction simulation failed", ErrorKind::SimulationRejected),
            ("Request TIMED OUT", ErrorKind::NetworkOrTimeout),
            ("HTTP 429 Too Many Requests", ErrorKind::NetworkOrTimeout),
            ("something odd happened", ErrorKind::Unclassified),
        ];
        for (message, expected) in cases {
            assert_eq!(classify(&RawFailure::Message(message)), expected, "{message}");
        }
    }

    #[test]
    fn unknown_rpc_code_falls_back_to_message() {
        let e = rpc(-32000, "Node is behind: connection lagging", None);
        assert_eq!(classify(&RawFailure::Backend(&e)), ErrorKind::NetworkOrTimeout);
        let e = rpc(-32000, "mystery", None);
        assert_eq!(classify(&RawFailure::Backend(&e)), ErrorKind::Unclassified);
    }

    // -- properties ---------------------------------------------------------

    #[test]
    fn classification_is_idempotent() {
        let signer = SignerError::Other("wallet closed the connection".into());
        let backend = rpc(codes::NODE_UNHEALTHY, "unhealthy", None);
        let exec = ExecutionError::AccountNotFound;
        let failures = [
            RawFailure::Signer(&signer),
            RawFailure::Backend(&backend),
            RawFailure::Execution(&exec),
            RawFailure::Message("preflight check failed"),
        ];
        for failure in &failures {
            assert_eq!(classify(failure), classify(failure));
            assert_eq!(
                to_transfer_error(failure, None).kind(),
                to_transfer_error(failure, None).kind()
            );
        }
    }

    #[test]
    fn network_error_keeps_signature() {
        let sig = Signature::new([8u8; 64]);
        let e = BackendError::Timeout(Duration::from_secs(1));
        let err = to_transfer_error(&RawFailure::Backend(&e), Some(sig));
        assert_eq!(err.signature(), Some(&sig));
    }

    #[test]
    fn unacknowledged_broadcast_carries_its_signature() {
        let sig = Signature::new([9u8; 64]);
        let e = SignerError::Broadcast {
            signature: sig,
            source: BackendError::Transport("connection closed".into()),
        };
        let err = to_transfer_error(&RawFailure::Signer(&e), None);
        assert_eq!(err.kind(), ErrorKind::NetworkOrTimeout);
        assert_eq!(err.signature(), Some(&sig));
    }
}
