//! Wrap an instruction list into an unsigned transaction.

use chain_sol::{compile_message, Address, CompiledMessage, SolInstruction};
use tracing::debug;

use crate::config::ConfirmationLevel;
use crate::error::{TransferError, TransferResult};
use crate::rpc::{FreshnessToken, LedgerRpc};

/// An unsigned transaction owned by a single transfer attempt.
///
/// The freshness token bounds how long the ledger will accept it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    instructions: Vec<SolInstruction>,
    fee_payer: Address,
    freshness: FreshnessToken,
}

impl Transaction {
    pub fn instructions(&self) -> &[SolInstruction] {
        &self.instructions
    }

    pub fn fee_payer(&self) -> &Address {
        &self.fee_payer
    }

    pub fn freshness(&self) -> &FreshnessToken {
        &self.freshness
    }

    /// The message a signer signs.
    pub fn compile(&self) -> TransferResult<CompiledMessage> {
        Ok(compile_message(
            &self.instructions,
            &self.fee_payer,
            &self.freshness.blockhash,
        )?)
    }

    /// The exact bytes covered by the fee payer's signature.
    pub fn message_bytes(&self) -> TransferResult<Vec<u8>> {
        Ok(self.compile()?.serialize()?)
    }
}

/// Fetch a freshness token and assemble `instructions` under `fee_payer`.
///
/// The token is fetched here, immediately before use, and never reused
/// across attempts.
pub async fn assemble(
    rpc: &dyn LedgerRpc,
    instructions: Vec<SolInstruction>,
    fee_payer: Address,
    level: ConfirmationLevel,
) -> TransferResult<Transaction> {
    if instructions.is_empty() {
        return Err(TransferError::InvalidInput(
            "no instructions to assemble".into(),
        ));
    }

    let freshness = rpc
        .latest_freshness_token(level)
        .await
        .map_err(|e| TransferError::FreshnessFetchFailed(e.to_string()))?;

    debug!(
        fee_payer = %fee_payer,
        last_valid_block_height = freshness.last_valid_block_height,
        instructions = instructions.len(),
        "assembled transaction"
    );

    let transaction = Transaction {
        instructions,
        fee_payer,
        freshness,
    };
    // Surface compile errors (e.g. too many accounts) before signing.
    transaction.compile()?;

    Ok(transaction)
}
