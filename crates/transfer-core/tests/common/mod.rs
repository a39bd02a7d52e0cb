//! Shared fixtures for the pipeline integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chain_sol::{Address, Signature};
use transfer_core::memory::InMemoryLedger;
use transfer_core::*;

pub const SENDER_SEED: [u8; 32] = [0x17; 32];
pub const MINT: Address = Address::new([0xAA; 32]);
pub const ONE_SOL: u64 = 1_000_000_000;

pub fn recipient() -> Address {
    Address::new([0x42; 32])
}

/// Polls every 100 ms with a short, jitter-free backoff.
pub fn test_config() -> TransferConfig {
    TransferConfig {
        poll_interval_ms: 100,
        retry: RetryPolicy::fixed(50, 400, 2.0),
        ..TransferConfig::default()
    }
}

pub struct Harness {
    pub ledger: Arc<InMemoryLedger>,
    pub session: WalletSession,
    pub sender: Address,
}

/// A ledger with a funded keypair wallet connected.
pub fn harness(lamports: u64) -> Harness {
    let ledger = Arc::new(InMemoryLedger::new());
    let signer = KeypairSigner::new(SENDER_SEED, ledger.clone())
        .with_retry_policy(RetryPolicy::fixed(50, 400, 2.0));
    let sender = signer.address();
    ledger.fund(&sender, lamports);

    Harness {
        session: WalletSession::new(Arc::new(signer), ledger.clone()),
        ledger,
        sender,
    }
}

/// Same ledger and sender, but a different wallet in front of it.
pub fn with_signer(harness: &Harness, signer: Arc<dyn WalletSigner>) -> WalletSession {
    WalletSession::new(signer, harness.ledger.clone())
}

/// A wallet whose user declines every request.
pub struct DecliningSigner {
    pub key: Address,
    pub requests: AtomicUsize,
}

impl DecliningSigner {
    pub fn new(key: Address) -> Self {
        Self {
            key,
            requests: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl WalletSigner for DecliningSigner {
    fn public_key(&self) -> Option<Address> {
        Some(self.key)
    }

    async fn sign_and_send(
        &self,
        _transaction: &Transaction,
        _options: &SubmitOptions,
    ) -> Result<Signature, SignerError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Err(SignerError::UserRejected)
    }
}

/// A browser-style wallet that reports failures only as text.
pub struct OpaqueErrorSigner {
    pub key: Address,
    pub message: &'static str,
}

#[async_trait]
impl WalletSigner for OpaqueErrorSigner {
    fn public_key(&self) -> Option<Address> {
        Some(self.key)
    }

    async fn sign_and_send(
        &self,
        _transaction: &Transaction,
        _options: &SubmitOptions,
    ) -> Result<Signature, SignerError> {
        Err(SignerError::Other(self.message.to_string()))
    }
}

pub struct DisconnectedSigner;

#[async_trait]
impl WalletSigner for DisconnectedSigner {
    fn public_key(&self) -> Option<Address> {
        None
    }

    async fn sign_and_send(
        &self,
        _transaction: &Transaction,
        _options: &SubmitOptions,
    ) -> Result<Signature, SignerError> {
        Err(SignerError::NotConnected)
    }
}
