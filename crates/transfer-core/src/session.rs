use std::fmt;
use std::sync::Arc;

use chain_sol::Address;

use crate::error::{TransferError, TransferResult};
use crate::rpc::LedgerRpc;
use crate::signer::WalletSigner;

/// The connected wallet and ledger backend for a run of transfers.
///
/// Passed explicitly into every attempt; the crate keeps no global wallet
/// state.
#[derive(Clone)]
pub struct WalletSession {
    signer: Arc<dyn WalletSigner>,
    rpc: Arc<dyn LedgerRpc>,
}

impl WalletSession {
    pub fn new(signer: Arc<dyn WalletSigner>, rpc: Arc<dyn LedgerRpc>) -> Self {
        Self { signer, rpc }
    }

    pub fn signer(&self) -> &dyn WalletSigner {
        self.signer.as_ref()
    }

    pub fn rpc(&self) -> &dyn LedgerRpc {
        self.rpc.as_ref()
    }

    /// The initiating account: fee payer and transfer source.
    pub fn identity(&self) -> TransferResult<Address> {
        if !self.signer.is_connected() {
            return Err(TransferError::WalletNotConnected);
        }
        self.signer
            .public_key()
            .ok_or(TransferError::WalletNotConnected)
    }
}

impl fmt::Debug for WalletSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletSession")
            .field("public_key", &self.signer.public_key())
            .finish_non_exhaustive()
    }
}
