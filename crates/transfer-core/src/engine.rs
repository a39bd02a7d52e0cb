//! Submission and confirmation.
//!
//! A [`ConfirmationEngine`] drives one attempt through an explicit state
//! machine:
//!
//! ```text
//! Idle -> Built -> Submitted -> Confirmed | Failed | Expired
//!               \-> Cancelled
//!               \-> Aborted (classified error, no ledger verdict)
//! ```
//!
//! The current state is published on a `tokio::sync::watch` channel so a
//! caller can render progress without polling the engine.

use std::fmt::Display;
use std::time::Duration;

use chain_sol::Signature;
use serde::{Serialize, Serializer};
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::assembler::Transaction;
use crate::classify::{classify, to_transfer_error, RawFailure};
use crate::config::{ConfirmationLevel, SubmitOptions, TransferConfig};
use crate::error::{ErrorKind, TransferError, TransferResult};
use crate::retry::RetryPolicy;
use crate::rpc::{BackendError, ExecutionError, FreshnessToken, LedgerRpc, SignatureStatus};
use crate::session::WalletSession;
use crate::signer::SignerError;

fn as_display<T: Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Observable state of a transfer attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TransferState {
    /// No attempt has started.
    Idle,
    /// Assembled and handed to the signer.
    Built,
    Submitted {
        #[serde(serialize_with = "as_display")]
        signature: Signature,
    },
    Confirmed {
        #[serde(serialize_with = "as_display")]
        signature: Signature,
    },
    Failed {
        #[serde(serialize_with = "as_display")]
        signature: Signature,
    },
    Expired {
        #[serde(serialize_with = "as_display")]
        signature: Signature,
    },
    Cancelled,
    Aborted {
        kind: ErrorKind,
    },
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Confirmed { .. }
                | Self::Failed { .. }
                | Self::Expired { .. }
                | Self::Cancelled
                | Self::Aborted { .. }
        )
    }

    /// Waiting on the signer or the ledger.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Built | Self::Submitted { .. })
    }
}

/// The ledger's verdict on an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Confirmed {
        #[serde(serialize_with = "as_display")]
        signature: Signature,
        level: ConfirmationLevel,
        /// Recipient balance in base units after confirmation, when it
        /// could be read.
        recipient_balance: Option<u64>,
    },
    /// Landed, but execution failed. Fees were still charged.
    Failed {
        #[serde(serialize_with = "as_display")]
        signature: Signature,
        kind: ErrorKind,
        error: ExecutionError,
    },
    /// Not observed before the freshness token's expiry height. It is
    /// unknown whether funds moved.
    Expired {
        #[serde(serialize_with = "as_display")]
        signature: Signature,
        last_valid_block_height: u64,
    },
    /// The user declined to sign; nothing was submitted.
    Cancelled,
}

impl Outcome {
    pub fn signature(&self) -> Option<&Signature> {
        match self {
            Self::Confirmed { signature, .. }
            | Self::Failed { signature, .. }
            | Self::Expired { signature, .. } => Some(signature),
            Self::Cancelled => None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed { .. })
    }

    /// Failure kind, or `None` on success.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Confirmed { .. } => None,
            Self::Failed { kind, .. } => Some(*kind),
            Self::Expired { .. } => Some(ErrorKind::Expired),
            Self::Cancelled => Some(ErrorKind::UserCancelled),
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::Confirmed { signature, .. } => {
                format!("Transfer successful! Signature: {signature}")
            }
            Self::Failed {
                kind: ErrorKind::InsufficientBalance,
                signature,
                ..
            } => format!(
                "Insufficient balance to cover this transfer and its fees. \
                 Transaction {signature} failed."
            ),
            Self::Failed { signature, .. } => {
                format!("Transaction {signature} failed. Please try again.")
            }
            Self::Expired { signature, .. } => format!(
                "Transaction {signature} was not confirmed before its blockhash expired. \
                 Check your balance before retrying."
            ),
            Self::Cancelled => "Transaction cancelled by user.".into(),
        }
    }

    fn state(&self) -> TransferState {
        match self {
            Self::Confirmed { signature, .. } => TransferState::Confirmed {
                signature: *signature,
            },
            Self::Failed { signature, .. } => TransferState::Failed {
                signature: *signature,
            },
            Self::Expired { signature, .. } => TransferState::Expired {
                signature: *signature,
            },
            Self::Cancelled => TransferState::Cancelled,
        }
    }
}

/// Submits a transaction through the session's signer and waits for a
/// verdict.
#[derive(Debug)]
pub struct ConfirmationEngine {
    poll_interval: Duration,
    confirm_timeout: Duration,
    retry: RetryPolicy,
    state: watch::Sender<TransferState>,
}

impl ConfirmationEngine {
    pub fn new(config: &TransferConfig) -> Self {
        let (state, _) = watch::channel(TransferState::Idle);
        Self {
            poll_interval: config.poll_interval(),
            confirm_timeout: config.confirm_timeout(),
            retry: config.retry.clone(),
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<TransferState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> TransferState {
        self.state.borrow().clone()
    }

    fn transition(&self, next: TransferState) {
        info!(state = ?next, "transfer state");
        self.state.send_replace(next);
    }

    /// Hand `transaction` to the signer and wait for the ledger's verdict.
    ///
    /// Returns `Err` only for classified failures that carry no verdict:
    /// a rejected submission, or lost contact with the backend.
    pub async fn submit_and_confirm(
        &self,
        session: &WalletSession,
        transaction: &Transaction,
        options: &SubmitOptions,
    ) -> TransferResult<Outcome> {
        self.transition(TransferState::Built);

        let signature = match session.signer().sign_and_send(transaction, options).await {
            Ok(signature) => signature,
            Err(SignerError::Broadcast { signature, source }) => {
                warn!(
                    signature = %signature,
                    error = %source,
                    "submission unacknowledged, polling for the broadcast transaction"
                );
                signature
            }
            Err(e) => {
                let failure = RawFailure::Signer(&e);
                let kind = classify(&failure);
                if kind == ErrorKind::UserCancelled {
                    self.transition(TransferState::Cancelled);
                    return Ok(Outcome::Cancelled);
                }
                warn!(error = %e, kind = %kind, "submission failed");
                self.transition(TransferState::Aborted { kind });
                return Err(to_transfer_error(&failure, None));
            }
        };

        self.transition(TransferState::Submitted { signature });

        let freshness = *transaction.freshness();
        let result = self
            .await_verdict(session.rpc(), &signature, &freshness, options)
            .await;

        match &result {
            Ok(outcome) => self.transition(outcome.state()),
            Err(e) => self.transition(TransferState::Aborted { kind: e.kind() }),
        }
        result
    }

    /// Poll until a verdict. Before the signature is seen, only the
    /// freshness token bounds the wait; once seen, `confirm_timeout` does.
    async fn await_verdict(
        &self,
        rpc: &dyn LedgerRpc,
        signature: &Signature,
        freshness: &FreshnessToken,
        options: &SubmitOptions,
    ) -> TransferResult<Outcome> {
        let mut ticker = time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_failures = 0u32;
        let mut seen_at: Option<Instant> = None;

        loop {
            ticker.tick().await;

            if let Some(seen_at) = seen_at {
                if seen_at.elapsed() >= self.confirm_timeout {
                    return Err(TransferError::NetworkOrTimeout {
                        signature: Some(*signature),
                        detail: format!("not confirmed within {:?}", self.confirm_timeout),
                    });
                }
            }

            match self
                .poll_once(rpc, signature, freshness, options.confirmation_level)
                .await
            {
                Ok(Poll::Verdict(outcome)) => return Ok(outcome),
                Ok(Poll::Landed) => {
                    consecutive_failures = 0;
                    seen_at.get_or_insert_with(Instant::now);
                }
                Ok(Poll::Unseen) => consecutive_failures = 0,
                Err(e) if e.is_transient() && consecutive_failures < options.max_retries => {
                    let delay = self.retry.delay_for(consecutive_failures);
                    consecutive_failures += 1;
                    warn!(
                        signature = %signature,
                        error = %e,
                        attempt = consecutive_failures,
                        max_retries = options.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "status poll failed, retrying"
                    );
                    time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(to_transfer_error(&RawFailure::Backend(&e), Some(*signature)))
                }
            }
        }
    }

    async fn poll_once(
        &self,
        rpc: &dyn LedgerRpc,
        signature: &Signature,
        freshness: &FreshnessToken,
        level: ConfirmationLevel,
    ) -> Result<Poll, BackendError> {
        let status = rpc.signature_status(signature, level).await?;
        if let Some(outcome) = verdict(status.as_ref(), signature, level) {
            return Ok(Poll::Verdict(outcome));
        }
        if status.is_some() {
            // Expiry no longer applies once landed.
            debug!(signature = %signature, "landed, awaiting confirmation level");
            return Ok(Poll::Landed);
        }

        let height = rpc.block_height(level).await?;
        debug!(
            signature = %signature,
            block_height = height,
            last_valid_block_height = freshness.last_valid_block_height,
            "not yet seen"
        );
        if !freshness.is_expired_at(height) {
            return Ok(Poll::Unseen);
        }

        // It may have landed between the two queries.
        let status = rpc.signature_status(signature, level).await?;
        Ok(match verdict(status.as_ref(), signature, level) {
            Some(outcome) => Poll::Verdict(outcome),
            None if status.is_some() => Poll::Landed,
            None => Poll::Verdict(Outcome::Expired {
                signature: *signature,
                last_valid_block_height: freshness.last_valid_block_height,
            }),
        })
    }
}

/// Result of one status poll.
enum Poll {
    Verdict(Outcome),
    /// Landed below the requested level.
    Landed,
    /// Not seen, block reference still valid.
    Unseen,
}

fn verdict(
    status: Option<&SignatureStatus>,
    signature: &Signature,
    level: ConfirmationLevel,
) -> Option<Outcome> {
    let status = status?;
    if let Some(error) = &status.error {
        return Some(Outcome::Failed {
            signature: *signature,
            kind: classify(&RawFailure::Execution(error)),
            error: error.clone(),
        });
    }
    status.level_reached.then(|| Outcome::Confirmed {
        signature: *signature,
        level,
        recipient_balance: None,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::assembler::assemble;
    use crate::memory::{InMemoryLedger, RpcOp};
    use crate::signer::KeypairSigner;
    use chain_sol::{system_transfer_instruction, Address};

    const SEED: [u8; 32] = [0x21; 32];

    fn fast_config() -> TransferConfig {
        TransferConfig {
            poll_interval_ms: 100,
            retry: RetryPolicy::fixed(50, 400, 2.0),
            ..TransferConfig::default()
        }
    }

    async fn setup(lamports: u64, amount: u64) -> (Arc<InMemoryLedger>, WalletSession, Transaction) {
        let ledger = Arc::new(InMemoryLedger::new());
        let signer = KeypairSigner::new(SEED, ledger.clone());
        let from = signer.address();
        ledger.fund(&from, lamports);
        let session = WalletSession::new(Arc::new(signer), ledger.clone());

        let ix = system_transfer_instruction(&from, &Address::new([3u8; 32]), amount).unwrap();
        let tx = assemble(&*ledger, vec![ix], from, ConfirmationLevel::Finalized)
            .await
            .unwrap();
        (ledger, session, tx)
    }

    #[test]
    fn state_predicates() {
        let sig = Signature::new([1u8; 64]);
        assert!(!TransferState::Idle.is_in_flight());
        assert!(TransferState::Built.is_in_flight());
        assert!(TransferState::Submitted { signature: sig }.is_in_flight());
        assert!(TransferState::Expired { signature: sig }.is_terminal());
        assert!(TransferState::Aborted {
            kind: ErrorKind::NetworkOrTimeout
        }
        .is_terminal());
        assert!(!TransferState::Submitted { signature: sig }.is_terminal());
    }

    #[test]
    fn state_serializes_with_tag_and_base58_signature() {
        let sig = Signature::new([1u8; 64]);
        let json = serde_json::to_value(TransferState::Submitted { signature: sig }).unwrap();
        assert_eq!(json["state"], "submitted");
        assert_eq!(json["signature"], sig.to_string());
    }

    #[tokio::test(start_paused = true)]
    async fn confirms_at_requested_level() {
        let (ledger, session, tx) = setup(1_000_000_000, 1_000).await;
        let engine = ConfirmationEngine::new(&fast_config());

        let outcome = engine
            .submit_and_confirm(&session, &tx, &SubmitOptions::default())
            .await
            .unwrap();

        assert!(outcome.is_confirmed());
        assert_eq!(outcome.kind(), None);
        assert!(matches!(engine.state(), TransferState::Confirmed { .. }));
        assert_eq!(ledger.balance(&Address::new([3u8; 32])), 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_see_the_terminal_state() {
        let (_ledger, session, tx) = setup(1_000_000_000, 1_000).await;
        let engine = ConfirmationEngine::new(&fast_config());
        let mut rx = engine.subscribe();
        assert_eq!(*rx.borrow(), TransferState::Idle);

        engine
            .submit_and_confirm(&session, &tx, &SubmitOptions::default())
            .await
            .unwrap();

        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_transaction_expires() {
        let (ledger, session, tx) = setup(1_000_000_000, 1_000).await;
        ledger.set_drop_submissions(true);
        let engine = ConfirmationEngine::new(&fast_config());

        let outcome = engine
            .submit_and_confirm(&session, &tx, &SubmitOptions::default())
            .await
            .unwrap();

        match &outcome {
            Outcome::Expired {
                last_valid_block_height,
                ..
            } => assert_eq!(*last_valid_block_height, tx.freshness().last_valid_block_height),
            other => panic!("expected Expired, got {other:?}"),
        }
        assert_eq!(outcome.kind(), Some(ErrorKind::Expired));
        assert!(outcome.user_message().contains("Check your balance"));
        assert!(ledger.height() > tx.freshness().last_valid_block_height);
    }

    #[tokio::test(start_paused = true)]
    async fn confirm_timeout_does_not_cut_short_an_unseen_transaction() {
        let (ledger, session, tx) = setup(1_000_000_000, 1_000).await;
        ledger.set_drop_submissions(true);
        // Far shorter than the time to the expiry height at this cadence.
        let config = TransferConfig {
            confirm_timeout_ms: 1_000,
            ..fast_config()
        };
        let engine = ConfirmationEngine::new(&config);

        let outcome = engine
            .submit_and_confirm(&session, &tx, &SubmitOptions::default())
            .await
            .unwrap();

        assert!(matches!(outcome, Outcome::Expired { .. }));
        assert!(ledger.height() > tx.freshness().last_valid_block_height);
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_broadcast_is_still_confirmed() {
        let (ledger, session, tx) = setup(1_000_000_000, 1_000).await;
        ledger.lose_submit_responses(1);
        let options = SubmitOptions {
            max_retries: 0,
            ..SubmitOptions::default()
        };
        let engine = ConfirmationEngine::new(&fast_config());

        let outcome = engine.submit_and_confirm(&session, &tx, &options).await.unwrap();

        assert!(outcome.is_confirmed());
        assert_eq!(ledger.submission_count(), 1);
        assert_eq!(ledger.landed_count(), 1);
        assert!(matches!(engine.state(), TransferState::Confirmed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn landed_failure_is_failed_with_kind() {
        let (ledger, session, tx) = setup(1_000_000, 5_000_000).await;
        let engine = ConfirmationEngine::new(&fast_config());
        let options = SubmitOptions {
            skip_preflight: true,
            ..SubmitOptions::default()
        };

        let outcome = engine.submit_and_confirm(&session, &tx, &options).await.unwrap();

        assert!(matches!(outcome, Outcome::Failed { .. }));
        assert_eq!(outcome.kind(), Some(ErrorKind::InsufficientBalance));
        assert!(ledger.has_landed(outcome.signature().unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_poll_errors_are_retried() {
        let (ledger, session, tx) = setup(1_000_000_000, 1_000).await;
        ledger.inject_failures(
            RpcOp::SignatureStatus,
            vec![BackendError::Transport("reset".into()); 3],
        );
        let engine = ConfirmationEngine::new(&fast_config());

        let outcome = engine
            .submit_and_confirm(&session, &tx, &SubmitOptions::default())
            .await
            .unwrap();

        assert!(outcome.is_confirmed());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_retries_is_network_error_with_signature() {
        let (ledger, session, tx) = setup(1_000_000_000, 1_000).await;
        let options = SubmitOptions {
            max_retries: 2,
            ..SubmitOptions::default()
        };
        ledger.inject_failures(
            RpcOp::SignatureStatus,
            vec![BackendError::Timeout(Duration::from_secs(10)); 3],
        );
        let engine = ConfirmationEngine::new(&fast_config());

        let err = engine
            .submit_and_confirm(&session, &tx, &options)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NetworkOrTimeout);
        assert!(err.signature().is_some());
        assert_eq!(
            engine.state(),
            TransferState::Aborted {
                kind: ErrorKind::NetworkOrTimeout
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn overall_timeout_bounds_waiting_for_level() {
        let (ledger, session, tx) = setup(1_000_000_000, 1_000).await;
        // Landed but never finalized.
        ledger.set_confirmation_depths(1, u64::MAX);
        let config = TransferConfig {
            confirm_timeout_ms: 2_000,
            ..fast_config()
        };
        let engine = ConfirmationEngine::new(&config);

        let err = engine
            .submit_and_confirm(&session, &tx, &SubmitOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TransferError::NetworkOrTimeout {
                signature: Some(_),
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn preflight_rejection_aborts_without_landing() {
        let (ledger, session, tx) = setup(1_000_000, 5_000_000).await;
        let engine = ConfirmationEngine::new(&fast_config());

        let err = engine
            .submit_and_confirm(&session, &tx, &SubmitOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InsufficientBalance);
        assert!(matches!(engine.state(), TransferState::Aborted { .. }));
        assert_eq!(ledger.landed_count(), 0);
    }
}
