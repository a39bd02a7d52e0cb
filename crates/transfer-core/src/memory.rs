//! An in-process ledger implementing [`LedgerRpc`].
//!
//! Decodes signed wire bytes, verifies signatures and executes the System,
//! Associated Token Account, SPL Token (`TransferChecked`) and Compute
//! Budget instructions atomically. Enough to drive the whole pipeline in
//! tests and demos without a node.
//!
//! The chain advances one block on every `block_height` or
//! `signature_status` query. A landed transaction reaches the optimistic
//! and finalized levels after a configurable number of further blocks.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use chain_sol::compute_budget::{parse_compute_budget, ComputeBudgetDirective};
use chain_sol::spl_token::parse_transfer_checked;
use chain_sol::transaction::parse_system_transfer;
use chain_sol::{
    decode_transaction, derive_associated_token_address, Address, CompiledMessage, Signature,
    ASSOCIATED_TOKEN_PROGRAM_ID, COMPUTE_BUDGET_PROGRAM_ID, SYSTEM_PROGRAM_ID, TOKEN_PROGRAM_ID,
};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::{ConfirmationLevel, SubmitOptions};
use crate::rpc::{
    codes, AccountInfo, BackendError, ExecutionError, FreshnessToken, InstructionError, LedgerRpc,
    SignatureStatus,
};

/// Base fee per signature, in lamports.
pub const FEE_PER_SIGNATURE: u64 = 5_000;

/// Rent-exempt minimum for a 165-byte token account.
pub const TOKEN_ACCOUNT_RENT: u64 = 2_039_280;

/// Blocks a freshness token stays valid for.
pub const DEFAULT_VALIDITY_HORIZON: u64 = 150;

const TOKEN_ACCOUNT_LEN: usize = 165;
const MINT_LEN: usize = 82;
const DEFAULT_UNITS_PER_INSTRUCTION: u64 = 200_000;
const MAX_COMPUTE_UNITS: u64 = 1_400_000;

// SPL Token program error codes.
const TOKEN_INSUFFICIENT_FUNDS: u32 = 1;
const TOKEN_MINT_MISMATCH: u32 = 3;
const TOKEN_OWNER_MISMATCH: u32 = 4;
const TOKEN_DECIMALS_MISMATCH: u32 = 18;
// System Program: account already in use.
const SYSTEM_ACCOUNT_IN_USE: u32 = 0;
// System Program: ResultWithNegativeLamports.
const SYSTEM_INSUFFICIENT_FUNDS: u32 = 1;

/// Backend calls that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcOp {
    LatestFreshnessToken,
    BlockHeight,
    GetAccountInfo,
    GetMintDecimals,
    Submit,
    SignatureStatus,
    GetBalance,
    GetTokenBalance,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TokenAccount {
    mint: Address,
    owner: Address,
    amount: u64,
}

/// The part of the state a transaction mutates; cloned for atomic
/// execution.
#[derive(Debug, Clone, Default)]
struct Accounts {
    lamports: HashMap<Address, u64>,
    tokens: HashMap<Address, TokenAccount>,
}

impl Accounts {
    fn lamports(&self, address: &Address) -> u64 {
        self.lamports.get(address).copied().unwrap_or(0)
    }

    fn debit(&mut self, address: &Address, amount: u64) -> bool {
        let balance = self.lamports(address);
        if balance < amount {
            return false;
        }
        self.lamports.insert(*address, balance - amount);
        true
    }

    fn credit(&mut self, address: &Address, amount: u64) {
        let entry = self.lamports.entry(*address).or_insert(0);
        *entry = entry.saturating_add(amount);
    }
}

#[derive(Debug)]
struct Landed {
    height: u64,
    error: Option<ExecutionError>,
}

#[derive(Debug)]
struct State {
    height: u64,
    accounts: Accounts,
    mints: HashMap<Address, u8>,
    issued: HashMap<[u8; 32], u64>,
    landed: HashMap<Signature, Landed>,
    failures: HashMap<RpcOp, VecDeque<BackendError>>,
    submissions: Vec<Vec<u8>>,
    validity_horizon: u64,
    optimistic_depth: u64,
    finalized_depth: u64,
    drop_submissions: bool,
    lost_responses: u32,
}

impl State {
    fn take_failure(&mut self, op: RpcOp) -> Result<(), BackendError> {
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn tick(&mut self) -> u64 {
        self.height += 1;
        self.height
    }
}

/// In-memory [`LedgerRpc`].
#[derive(Debug)]
pub struct InMemoryLedger {
    state: Mutex<State>,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                height: 1,
                accounts: Accounts::default(),
                mints: HashMap::new(),
                issued: HashMap::new(),
                landed: HashMap::new(),
                failures: HashMap::new(),
                submissions: Vec::new(),
                validity_horizon: DEFAULT_VALIDITY_HORIZON,
                optimistic_depth: 1,
                finalized_depth: 2,
                drop_submissions: false,
                lost_responses: 0,
            }),
        }
    }

    // -- setup --------------------------------------------------------------

    pub fn fund(&self, address: &Address, lamports: u64) {
        self.state.lock().accounts.credit(address, lamports);
    }

    pub fn create_mint(&self, mint: &Address, decimals: u8) {
        let mut state = self.state.lock();
        state.mints.insert(*mint, decimals);
        state.accounts.credit(mint, 1_461_600);
    }

    /// Credit `owner`'s associated token account, creating it if needed.
    /// The mint must exist.
    pub fn mint_to(&self, mint: &Address, owner: &Address, amount: u64) {
        let Ok(ata) = derive_associated_token_address(owner, mint) else {
            return;
        };
        let mut state = self.state.lock();
        if !state.mints.contains_key(mint) {
            return;
        }
        if !state.accounts.tokens.contains_key(&ata) {
            state.accounts.credit(&ata, TOKEN_ACCOUNT_RENT);
        }
        let account = state.accounts.tokens.entry(ata).or_insert(TokenAccount {
            mint: *mint,
            owner: *owner,
            amount: 0,
        });
        account.amount = account.amount.saturating_add(amount);
    }

    /// Queue errors returned by the next calls of `op`, in order.
    pub fn inject_failures(&self, op: RpcOp, errors: Vec<BackendError>) {
        self.state
            .lock()
            .failures
            .entry(op)
            .or_default()
            .extend(errors);
    }

    pub fn set_validity_horizon(&self, blocks: u64) {
        self.state.lock().validity_horizon = blocks;
    }

    /// Blocks after landing until each level is reached.
    pub fn set_confirmation_depths(&self, optimistic: u64, finalized: u64) {
        let mut state = self.state.lock();
        state.optimistic_depth = optimistic;
        state.finalized_depth = finalized;
    }

    /// Accept submissions but never process them, as a congested leader
    /// would.
    pub fn set_drop_submissions(&self, drop: bool) {
        self.state.lock().drop_submissions = drop;
    }

    /// Process the next `count` submissions but answer them with a
    /// transport error.
    pub fn lose_submit_responses(&self, count: u32) {
        self.state.lock().lost_responses = count;
    }

    pub fn advance_blocks(&self, blocks: u64) {
        let mut state = self.state.lock();
        state.height = state.height.saturating_add(blocks);
    }

    // -- introspection ------------------------------------------------------

    pub fn height(&self) -> u64 {
        self.state.lock().height
    }

    pub fn balance(&self, address: &Address) -> u64 {
        self.state.lock().accounts.lamports(address)
    }

    /// Balance of `owner`'s associated token account for `mint`.
    pub fn token_balance(&self, owner: &Address, mint: &Address) -> Option<u64> {
        let ata = derive_associated_token_address(owner, mint).ok()?;
        self.state.lock().accounts.tokens.get(&ata).map(|a| a.amount)
    }

    pub fn is_known_blockhash(&self, blockhash: &[u8; 32]) -> bool {
        self.state.lock().issued.contains_key(blockhash)
    }

    /// Calls to `submit`, including failed ones.
    pub fn submission_count(&self) -> usize {
        self.state.lock().submissions.len()
    }

    pub fn distinct_payloads(&self) -> usize {
        let state = self.state.lock();
        state.submissions.iter().collect::<HashSet<_>>().len()
    }

    pub fn has_landed(&self, signature: &Signature) -> bool {
        self.state.lock().landed.contains_key(signature)
    }

    pub fn landed_count(&self) -> usize {
        self.state.lock().landed.len()
    }
}

fn blockhash_for(height: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"blockhash");
    hasher.update(height.to_le_bytes());
    hasher.finalize().into()
}

fn not_found(what: &str, address: &Address) -> BackendError {
    BackendError::rpc(
        codes::INVALID_PARAMS,
        format!("Invalid param: could not find {what} {address}"),
        None,
    )
}

fn preflight_failure(error: ExecutionError) -> BackendError {
    BackendError::rpc(
        codes::PREFLIGHT_FAILURE,
        format!("Transaction simulation failed: {error}"),
        Some(error),
    )
}

/// Lamport fee for `message`: the signature fee plus any priority bid.
fn fee_for(message: &CompiledMessage) -> u64 {
    let mut limit = None;
    let mut price = 0u64;
    let mut program_instructions = 0u64;

    for ix in &message.instructions {
        let program = message.account_keys[ix.program_id_index as usize];
        if program != COMPUTE_BUDGET_PROGRAM_ID {
            program_instructions += 1;
            continue;
        }
        match parse_compute_budget(&ix.data) {
            Some(ComputeBudgetDirective::UnitLimit(units)) => limit = Some(u64::from(units)),
            Some(ComputeBudgetDirective::UnitPrice(micro_lamports)) => price = micro_lamports,
            None => {}
        }
    }

    let units = limit
        .unwrap_or(program_instructions * DEFAULT_UNITS_PER_INSTRUCTION)
        .min(MAX_COMPUTE_UNITS);
    let priority = (u128::from(price) * u128::from(units)).div_ceil(1_000_000);

    FEE_PER_SIGNATURE
        .saturating_mul(u64::from(message.num_required_signatures))
        .saturating_add(u64::try_from(priority).unwrap_or(u64::MAX))
}

/// Run every instruction against `accounts`. Mutates only on success.
fn execute(
    accounts: &mut Accounts,
    mints: &HashMap<Address, u8>,
    message: &CompiledMessage,
) -> Result<(), ExecutionError> {
    let mut scratch = accounts.clone();

    for (index, ix) in message.instructions.iter().enumerate() {
        let index = u8::try_from(index).unwrap_or(u8::MAX);
        let fail = |error| ExecutionError::Instruction { index, error };

        let program = message.account_keys[ix.program_id_index as usize];
        let keys: Vec<Address> = ix
            .account_indices
            .iter()
            .map(|i| message.account_keys[*i as usize])
            .collect();
        let signed = |position: usize| {
            ix.account_indices
                .get(position)
                .is_some_and(|i| message.is_signer(*i as usize))
        };

        if program == SYSTEM_PROGRAM_ID {
            let lamports =
                parse_system_transfer(&ix.data).ok_or(fail(InstructionError::InvalidInstructionData))?;
            let [from, to] = keys[..] else {
                return Err(fail(InstructionError::NotEnoughAccountKeys));
            };
            if !signed(0) {
                return Err(fail(InstructionError::MissingRequiredSignature));
            }
            if !scratch.debit(&from, lamports) {
                return Err(fail(InstructionError::Custom(SYSTEM_INSUFFICIENT_FUNDS)));
            }
            scratch.credit(&to, lamports);
        } else if program == ASSOCIATED_TOKEN_PROGRAM_ID {
            if !ix.data.is_empty() {
                return Err(fail(InstructionError::InvalidInstructionData));
            }
            let [payer, ata, owner, mint, ..] = keys[..] else {
                return Err(fail(InstructionError::NotEnoughAccountKeys));
            };
            if !signed(0) {
                return Err(fail(InstructionError::MissingRequiredSignature));
            }
            if derive_associated_token_address(&owner, &mint).ok() != Some(ata) {
                return Err(fail(InstructionError::InvalidSeeds));
            }
            if !mints.contains_key(&mint) {
                return Err(fail(InstructionError::InvalidAccountData));
            }
            if scratch.tokens.contains_key(&ata) {
                return Err(fail(InstructionError::Custom(SYSTEM_ACCOUNT_IN_USE)));
            }
            if !scratch.debit(&payer, TOKEN_ACCOUNT_RENT) {
                return Err(fail(InstructionError::Custom(SYSTEM_INSUFFICIENT_FUNDS)));
            }
            scratch.credit(&ata, TOKEN_ACCOUNT_RENT);
            scratch.tokens.insert(
                ata,
                TokenAccount {
                    mint,
                    owner,
                    amount: 0,
                },
            );
        } else if program == TOKEN_PROGRAM_ID {
            let (amount, decimals) =
                parse_transfer_checked(&ix.data).ok_or(fail(InstructionError::InvalidInstructionData))?;
            let [source, mint, destination, owner] = keys[..] else {
                return Err(fail(InstructionError::NotEnoughAccountKeys));
            };

            let mint_decimals = *mints
                .get(&mint)
                .ok_or(fail(InstructionError::InvalidAccountData))?;
            let src = scratch
                .tokens
                .get(&source)
                .cloned()
                .ok_or(fail(InstructionError::InvalidAccountData))?;
            let dst = scratch
                .tokens
                .get(&destination)
                .cloned()
                .ok_or(fail(InstructionError::InvalidAccountData))?;

            if src.mint != mint || dst.mint != mint {
                return Err(fail(InstructionError::Custom(TOKEN_MINT_MISMATCH)));
            }
            if decimals != mint_decimals {
                return Err(fail(InstructionError::Custom(TOKEN_DECIMALS_MISMATCH)));
            }
            if src.owner != owner || !signed(3) {
                return Err(fail(InstructionError::Custom(TOKEN_OWNER_MISMATCH)));
            }
            if src.amount < amount {
                return Err(fail(InstructionError::Custom(TOKEN_INSUFFICIENT_FUNDS)));
            }

            if let Some(account) = scratch.tokens.get_mut(&source) {
                account.amount -= amount;
            }
            if let Some(account) = scratch.tokens.get_mut(&destination) {
                account.amount = account.amount.saturating_add(amount);
            }
        } else if program == COMPUTE_BUDGET_PROGRAM_ID {
            parse_compute_budget(&ix.data).ok_or(fail(InstructionError::InvalidInstructionData))?;
        } else {
            return Err(fail(InstructionError::UnsupportedProgramId));
        }
    }

    *accounts = scratch;
    Ok(())
}

#[async_trait]
impl LedgerRpc for InMemoryLedger {
    async fn latest_freshness_token(
        &self,
        _level: ConfirmationLevel,
    ) -> Result<FreshnessToken, BackendError> {
        let mut state = self.state.lock();
        state.take_failure(RpcOp::LatestFreshnessToken)?;

        let blockhash = blockhash_for(state.height);
        let last_valid_block_height = state.height + state.validity_horizon;
        state.issued.insert(blockhash, last_valid_block_height);
        Ok(FreshnessToken {
            blockhash,
            last_valid_block_height,
        })
    }

    async fn block_height(&self, _level: ConfirmationLevel) -> Result<u64, BackendError> {
        let mut state = self.state.lock();
        state.take_failure(RpcOp::BlockHeight)?;
        Ok(state.tick())
    }

    async fn get_account_info(
        &self,
        address: &Address,
    ) -> Result<Option<AccountInfo>, BackendError> {
        let mut state = self.state.lock();
        state.take_failure(RpcOp::GetAccountInfo)?;

        let lamports = state.accounts.lamports(address);
        let info = if state.accounts.tokens.contains_key(address) {
            Some(AccountInfo {
                lamports,
                owner: TOKEN_PROGRAM_ID,
                data_len: TOKEN_ACCOUNT_LEN,
            })
        } else if state.mints.contains_key(address) {
            Some(AccountInfo {
                lamports,
                owner: TOKEN_PROGRAM_ID,
                data_len: MINT_LEN,
            })
        } else if lamports > 0 {
            Some(AccountInfo {
                lamports,
                owner: SYSTEM_PROGRAM_ID,
                data_len: 0,
            })
        } else {
            None
        };
        Ok(info)
    }

    async fn get_mint_decimals(&self, mint: &Address) -> Result<u8, BackendError> {
        let mut state = self.state.lock();
        state.take_failure(RpcOp::GetMintDecimals)?;
        state
            .mints
            .get(mint)
            .copied()
            .ok_or_else(|| not_found("mint", mint))
    }

    async fn submit(
        &self,
        signed_transaction: &[u8],
        options: &SubmitOptions,
    ) -> Result<Signature, BackendError> {
        let mut state = self.state.lock();
        state.submissions.push(signed_transaction.to_vec());
        state.take_failure(RpcOp::Submit)?;

        let tx = decode_transaction(signed_transaction).map_err(|e| {
            BackendError::rpc(
                codes::INVALID_PARAMS,
                format!("failed to deserialize transaction: {e}"),
                None,
            )
        })?;
        tx.verify_signatures().map_err(|e| {
            BackendError::rpc(
                codes::SIGNATURE_VERIFICATION_FAILURE,
                format!("Transaction signature verification failure: {e}"),
                None,
            )
        })?;
        let signature = tx.signatures[0];
        let message = &tx.message;

        let outcome = if state.landed.contains_key(&signature) {
            Err(ExecutionError::AlreadyProcessed)
        } else {
            match state.issued.get(&message.recent_blockhash) {
                Some(last_valid) if *last_valid >= state.height => Ok(()),
                _ => Err(ExecutionError::BlockhashNotFound),
            }
        };

        let payer = message.account_keys[0];
        let fee = fee_for(message);
        let outcome = outcome.and_then(|()| {
            if state.accounts.lamports(&payer) < fee {
                Err(ExecutionError::InsufficientFundsForFee)
            } else {
                Ok(())
            }
        });

        if let Err(error) = outcome {
            // Without preflight the node forwards it and the leader drops it.
            if options.skip_preflight {
                debug!(signature = %signature, %error, "dropping unprocessable transaction");
                return Ok(signature);
            }
            return Err(preflight_failure(error));
        }

        if !options.skip_preflight {
            let mut simulated = state.accounts.clone();
            simulated.debit(&payer, fee);
            if let Err(error) = execute(&mut simulated, &state.mints, message) {
                return Err(preflight_failure(error));
            }
        }

        if state.drop_submissions {
            debug!(signature = %signature, "dropping submission");
            return Ok(signature);
        }

        let State {
            accounts, mints, ..
        } = &mut *state;
        accounts.debit(&payer, fee);
        let error = execute(accounts, mints, message).err();

        let height = state.height;
        debug!(signature = %signature, height, failed = error.is_some(), "landed");
        state.landed.insert(signature, Landed { height, error });

        if state.lost_responses > 0 {
            state.lost_responses -= 1;
            return Err(BackendError::Transport(
                "connection closed before response".into(),
            ));
        }
        Ok(signature)
    }

    async fn signature_status(
        &self,
        signature: &Signature,
        level: ConfirmationLevel,
    ) -> Result<Option<SignatureStatus>, BackendError> {
        let mut state = self.state.lock();
        state.take_failure(RpcOp::SignatureStatus)?;
        let height = state.tick();

        let depth = match level {
            ConfirmationLevel::Optimistic => state.optimistic_depth,
            ConfirmationLevel::Finalized => state.finalized_depth,
        };
        Ok(state.landed.get(signature).map(|landed| SignatureStatus {
            level_reached: height.saturating_sub(landed.height) >= depth,
            error: landed.error.clone(),
        }))
    }

    async fn get_balance(&self, address: &Address) -> Result<u64, BackendError> {
        let mut state = self.state.lock();
        state.take_failure(RpcOp::GetBalance)?;
        Ok(state.accounts.lamports(address))
    }

    async fn get_token_balance(&self, token_account: &Address) -> Result<u64, BackendError> {
        let mut state = self.state.lock();
        state.take_failure(RpcOp::GetTokenBalance)?;
        state
            .accounts
            .tokens
            .get(token_account)
            .map(|a| a.amount)
            .ok_or_else(|| not_found("token account", token_account))
    }
}
