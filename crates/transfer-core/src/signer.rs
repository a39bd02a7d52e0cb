//! The signer/broadcaster seam and a local keypair implementation.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chain_sol::{public_key_for_seed, sign_message, Address, Signature};
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::assembler::Transaction;
use crate::config::SubmitOptions;
use crate::retry::RetryPolicy;
use crate::rpc::{BackendError, ExecutionError, LedgerRpc};

/// Errors raised by a [`WalletSigner`].
#[derive(Debug, Clone, Error)]
pub enum SignerError {
    /// The user declined the signing request.
    #[error("user rejected the request")]
    UserRejected,

    #[error("wallet not connected")]
    NotConnected,

    #[error("signing failed: {0}")]
    Signing(String),

    /// The wallet signed, but the ledger rejected the submission.
    #[error("broadcast failed: {0}")]
    Backend(#[from] BackendError),

    /// The signed bytes went out but no acknowledgement came back. The
    /// transaction may still land under `signature`.
    #[error("broadcast of {signature} unacknowledged: {source}")]
    Broadcast {
        signature: Signature,
        source: BackendError,
    },

    #[error("{0}")]
    Other(String),
}

/// Signs a transaction and hands it to the ledger.
///
/// Implementations may block indefinitely while waiting for the user.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// The connected account, if any.
    fn public_key(&self) -> Option<Address>;

    fn is_connected(&self) -> bool {
        self.public_key().is_some()
    }

    /// Sign `transaction` and submit it, returning the submission id.
    async fn sign_and_send(
        &self,
        transaction: &Transaction,
        options: &SubmitOptions,
    ) -> Result<Signature, SignerError>;
}

/// A [`WalletSigner`] holding an Ed25519 seed in process memory.
///
/// Signs once, then rebroadcasts the same signed bytes on transient
/// backend failures, at most `max_retries` times.
pub struct KeypairSigner {
    seed: Zeroizing<[u8; 32]>,
    public_key: Address,
    rpc: Arc<dyn LedgerRpc>,
    retry: RetryPolicy,
}

impl KeypairSigner {
    pub fn new(seed: [u8; 32], rpc: Arc<dyn LedgerRpc>) -> Self {
        let seed = Zeroizing::new(seed);
        let public_key = public_key_for_seed(&seed);
        Self {
            seed,
            public_key,
            rpc,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn address(&self) -> Address {
        self.public_key
    }
}

impl fmt::Debug for KeypairSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeypairSigner")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl WalletSigner for KeypairSigner {
    fn public_key(&self) -> Option<Address> {
        Some(self.public_key)
    }

    async fn sign_and_send(
        &self,
        transaction: &Transaction,
        options: &SubmitOptions,
    ) -> Result<Signature, SignerError> {
        let message = transaction
            .compile()
            .map_err(|e| SignerError::Signing(e.to_string()))?;
        let signed =
            sign_message(&message, &self.seed).map_err(|e| SignerError::Signing(e.to_string()))?;

        let mut attempt = 0u32;
        loop {
            match self.rpc.submit(&signed.wire, options).await {
                Ok(signature) => {
                    debug!(signature = %signature, attempt, "submitted");
                    return Ok(signature);
                }
                // An earlier broadcast of these bytes already landed.
                Err(BackendError::Rpc {
                    data: Some(ExecutionError::AlreadyProcessed),
                    ..
                }) if attempt > 0 => return Ok(signed.signature),
                Err(e) if e.is_transient() && attempt < options.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        error = %e,
                        attempt = attempt + 1,
                        max_retries = options.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "submission failed, rebroadcasting"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    return Err(SignerError::Broadcast {
                        signature: signed.signature,
                        source: e,
                    })
                }
                Err(e) => return Err(SignerError::Backend(e)),
            }
        }
    }
}
