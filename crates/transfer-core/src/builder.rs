//! Plan the ordered instruction list for a transfer.
//!
//! Planning is split in two: [`plan_transfer_instructions`] is pure and
//! takes the recipient account's existence as input, while
//! [`build_transfer_instructions`] performs the account lookups and then
//! delegates to it.

use chain_sol::compute_budget::COMPUTE_BUDGET_PROGRAM_ID;
use chain_sol::spl_token::{created_associated_account, transfer_destination};
use chain_sol::{
    build_create_associated_token_account, build_transfer_checked,
    derive_associated_token_address, set_compute_unit_limit, set_compute_unit_price,
    system_transfer_instruction, Address, SolInstruction,
};
use tracing::debug;

use crate::classify::{classify, RawFailure};
use crate::config::PriorityFee;
use crate::error::{TransferError, TransferResult};
use crate::rpc::LedgerRpc;

/// What is being moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Lamports, via the System Program.
    Native,
    /// SPL tokens of `mint`, whose precision is `decimals`.
    Token { mint: Address, decimals: u8 },
}

/// Ordered instructions for one transfer plus what the planner decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionPlan {
    pub instructions: Vec<SolInstruction>,
    /// An account-creation instruction precedes the transfer.
    pub creates_recipient_account: bool,
    pub amount_base_units: u64,
    /// Account whose balance the transfer credits: the recipient itself
    /// for native transfers, its token account otherwise.
    pub destination: Address,
}

impl InstructionPlan {
    /// Check the ordering rules the ledger enforces implicitly:
    /// compute-budget instructions come first, and any account creation
    /// targets the transfer destination and precedes the transfer.
    pub fn validate_order(&self) -> TransferResult<()> {
        let is_budget = |ix: &SolInstruction| ix.program_id == COMPUTE_BUDGET_PROGRAM_ID;

        if let Some(pos) = self.instructions.iter().rposition(is_budget) {
            if self.instructions[..pos].iter().any(|ix| !is_budget(ix)) {
                return Err(TransferError::InstructionOrder(
                    "compute budget instructions must precede all others".into(),
                ));
            }
        }

        let transfer_index = self
            .instructions
            .iter()
            .position(|ix| is_value_transfer(ix, &self.destination))
            .ok_or_else(|| {
                TransferError::InstructionOrder(format!(
                    "no transfer to {} in plan",
                    self.destination
                ))
            })?;

        let mut creates = 0usize;
        for (index, ix) in self.instructions.iter().enumerate() {
            let Some(created) = created_associated_account(ix) else {
                continue;
            };
            if created != self.destination {
                return Err(TransferError::InstructionOrder(format!(
                    "creation targets {created}, transfer credits {}",
                    self.destination
                )));
            }
            if index > transfer_index {
                return Err(TransferError::InstructionOrder(
                    "account creation must precede the transfer".into(),
                ));
            }
            creates += 1;
        }

        if creates != usize::from(self.creates_recipient_account) {
            return Err(TransferError::InstructionOrder(format!(
                "plan declares creates_recipient_account={} but has {creates} creation(s)",
                self.creates_recipient_account
            )));
        }

        Ok(())
    }
}

fn is_value_transfer(ix: &SolInstruction, destination: &Address) -> bool {
    if let Some(dest) = transfer_destination(ix) {
        return dest == *destination;
    }
    ix.program_id == chain_sol::SYSTEM_PROGRAM_ID
        && chain_sol::transaction::parse_system_transfer(&ix.data).is_some()
        && ix.accounts.get(1).map(|m| m.pubkey) == Some(*destination)
}

/// Compute-budget instructions for a priority fee bid: limit, then price.
pub fn priority_fee_instructions(fee: &PriorityFee) -> Vec<SolInstruction> {
    let mut out = Vec::with_capacity(2);
    if let Some(limit) = fee.compute_unit_limit {
        out.push(set_compute_unit_limit(limit));
    }
    out.push(set_compute_unit_price(fee.micro_lamports_per_cu));
    out
}

/// Plan a transfer without touching the network.
///
/// `recipient_account_exists` is ignored for native transfers.
pub fn plan_transfer_instructions(
    kind: &TransferKind,
    sender: &Address,
    recipient: &Address,
    amount_base_units: u64,
    recipient_account_exists: bool,
    priority_fee: Option<&PriorityFee>,
) -> TransferResult<InstructionPlan> {
    if amount_base_units == 0 {
        return Err(TransferError::InvalidInput(
            "amount must be greater than zero".into(),
        ));
    }

    let mut instructions = priority_fee.map(priority_fee_instructions).unwrap_or_default();

    let (destination, creates_recipient_account) = match kind {
        TransferKind::Native => {
            instructions.push(system_transfer_instruction(
                sender,
                recipient,
                amount_base_units,
            )?);
            (*recipient, false)
        }
        TransferKind::Token { mint, decimals } => {
            let source = derive_associated_token_address(sender, mint)?;
            let destination = derive_associated_token_address(recipient, mint)?;

            if !recipient_account_exists {
                instructions.push(build_create_associated_token_account(
                    sender,
                    &destination,
                    recipient,
                    mint,
                ));
            }
            instructions.push(build_transfer_checked(
                &source,
                mint,
                &destination,
                sender,
                amount_base_units,
                *decimals,
            )?);
            (destination, !recipient_account_exists)
        }
    };

    Ok(InstructionPlan {
        instructions,
        creates_recipient_account,
        amount_base_units,
        destination,
    })
}

/// Plan a transfer, looking up token accounts on the ledger.
///
/// For token transfers the sender's token account must exist; the
/// recipient's is created in the same transaction when missing.
pub async fn build_transfer_instructions(
    rpc: &dyn LedgerRpc,
    kind: &TransferKind,
    sender: &Address,
    recipient: &Address,
    amount_base_units: u64,
    priority_fee: Option<&PriorityFee>,
) -> TransferResult<InstructionPlan> {
    let recipient_account_exists = match kind {
        TransferKind::Native => true,
        TransferKind::Token { mint, .. } => {
            let source = derive_associated_token_address(sender, mint)?;
            if !account_exists(rpc, &source).await? {
                return Err(TransferError::InvalidInput(format!(
                    "sender has no token account for mint {mint}"
                )));
            }

            let destination = derive_associated_token_address(recipient, mint)?;
            let exists = account_exists(rpc, &destination).await?;
            debug!(
                destination = %destination,
                exists,
                "checked recipient token account"
            );
            exists
        }
    };

    plan_transfer_instructions(
        kind,
        sender,
        recipient,
        amount_base_units,
        recipient_account_exists,
        priority_fee,
    )
}

async fn account_exists(rpc: &dyn LedgerRpc, address: &Address) -> TransferResult<bool> {
    rpc.get_account_info(address)
        .await
        .map(|info| info.is_some())
        .map_err(|e| TransferError::AccountLookupFailed {
            address: *address,
            kind: classify(&RawFailure::Backend(&e)),
            reason: e.to_string(),
        })
}

/// Decimals for `mint`: the caller's value when given, else the ledger's.
///
/// Any lookup failure fails the attempt before an instruction is built.
pub async fn resolve_decimals(
    rpc: &dyn LedgerRpc,
    mint: &Address,
    supplied: Option<u8>,
) -> TransferResult<u8> {
    if let Some(decimals) = supplied {
        return Ok(decimals);
    }
    rpc.get_mint_decimals(mint)
        .await
        .map_err(|e| TransferError::DecimalsUnavailable {
            mint: *mint,
            kind: classify(&RawFailure::Backend(&e)),
            reason: e.to_string(),
        })
}
