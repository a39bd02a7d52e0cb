//! SPL Token instructions and associated token account derivation.
//!
//! Only the handful of instruction encodings a transfer needs are
//! implemented here, without the `spl-token` crates.

use sha2::{Digest, Sha256};

use crate::address::Address;
use crate::error::SolError;
use crate::transaction::{SolAccountMeta, SolInstruction, SYSTEM_PROGRAM_ID};

// ---------------------------------------------------------------------------
// Well-known program IDs
// ---------------------------------------------------------------------------

/// SPL Token Program ID: `TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA`
pub const TOKEN_PROGRAM_ID: Address = Address::new([
    0x06, 0xdd, 0xf6, 0xe1, 0xd7, 0x65, 0xa1, 0x93, 0xd9, 0xcb, 0xe1, 0x46, 0xce, 0xeb,
    0x79, 0xac, 0x1c, 0xb4, 0x85, 0xed, 0x5f, 0x5b, 0x37, 0x91, 0x3a, 0x8c, 0xf5, 0x85,
    0x7e, 0xff, 0x00, 0xa9,
]);

/// Associated Token Account Program ID: `ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL`
pub const ASSOCIATED_TOKEN_PROGRAM_ID: Address = Address::new([
    0x8c, 0x97, 0x25, 0x8f, 0x4e, 0x24, 0x89, 0xf1, 0xbb, 0x3d, 0x10, 0x29, 0x14, 0x8e,
    0x0d, 0x83, 0x0b, 0x5a, 0x13, 0x99, 0xda, 0xff, 0x10, 0x84, 0x04, 0x8e, 0x7b, 0xd8,
    0xdb, 0xe9, 0xf8, 0x59,
]);

/// SPL Token `TransferChecked` instruction index.
pub const TRANSFER_CHECKED_IX_INDEX: u8 = 12;

/// The string appended to PDA derivation: "ProgramDerivedAddress".
const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

// ---------------------------------------------------------------------------
// Instructions
// ---------------------------------------------------------------------------

/// Build an SPL Token `TransferChecked` instruction.
///
/// The mint and its decimals travel with the instruction, so the token
/// program rejects the transfer if `decimals` does not match the mint.
///
/// Accounts: source (writable), mint, destination (writable), owner
/// (signer). Data: `[12] ++ amount u64 LE ++ decimals u8`, 10 bytes.
pub fn build_transfer_checked(
    source: &Address,
    mint: &Address,
    destination: &Address,
    owner: &Address,
    amount: u64,
    decimals: u8,
) -> Result<SolInstruction, SolError> {
    if amount == 0 {
        return Err(SolError::TransactionBuildError(
            "SPL transfer amount must be > 0".into(),
        ));
    }

    let mut data = Vec::with_capacity(10);
    data.push(TRANSFER_CHECKED_IX_INDEX);
    data.extend_from_slice(&amount.to_le_bytes());
    data.push(decimals);

    Ok(SolInstruction {
        program_id: TOKEN_PROGRAM_ID,
        accounts: vec![
            SolAccountMeta::writable(*source, false),
            SolAccountMeta::readonly(*mint, false),
            SolAccountMeta::writable(*destination, false),
            SolAccountMeta::readonly(*owner, true),
        ],
        data,
    })
}

/// Decode a `TransferChecked` payload into `(amount, decimals)`.
pub fn parse_transfer_checked(data: &[u8]) -> Option<(u64, u8)> {
    if data.len() != 10 || data[0] != TRANSFER_CHECKED_IX_INDEX {
        return None;
    }
    let amount = u64::from_le_bytes(data[1..9].try_into().ok()?);
    Some((amount, data[9]))
}

/// Build an Associated Token Account program `Create` instruction.
///
/// `payer` funds the new account's rent. The payload is empty.
pub fn build_create_associated_token_account(
    payer: &Address,
    associated_account: &Address,
    owner: &Address,
    mint: &Address,
) -> SolInstruction {
    SolInstruction {
        program_id: ASSOCIATED_TOKEN_PROGRAM_ID,
        accounts: vec![
            SolAccountMeta::writable(*payer, true),
            SolAccountMeta::writable(*associated_account, false),
            SolAccountMeta::readonly(*owner, false),
            SolAccountMeta::readonly(*mint, false),
            SolAccountMeta::readonly(SYSTEM_PROGRAM_ID, false),
            SolAccountMeta::readonly(TOKEN_PROGRAM_ID, false),
        ],
        data: Vec::new(),
    }
}

/// Whether an instruction is an ATA `Create`, and if so the account it
/// creates.
pub fn created_associated_account(ix: &SolInstruction) -> Option<Address> {
    if ix.program_id != ASSOCIATED_TOKEN_PROGRAM_ID || !ix.data.is_empty() {
        return None;
    }
    ix.accounts.get(1).map(|meta| meta.pubkey)
}

/// Destination token account of a `TransferChecked` instruction.
pub fn transfer_destination(ix: &SolInstruction) -> Option<Address> {
    if ix.program_id != TOKEN_PROGRAM_ID || parse_transfer_checked(&ix.data).is_none() {
        return None;
    }
    ix.accounts.get(2).map(|meta| meta.pubkey)
}

// ---------------------------------------------------------------------------
// Associated Token Account (PDA) derivation
// ---------------------------------------------------------------------------

/// Derive the associated token account address for a wallet + mint pair.
///
/// The ATA is a Program Derived Address with seeds
/// `[wallet_address, token_program_id, mint_address]` under the Associated
/// Token Account program.
pub fn derive_associated_token_address(
    wallet: &Address,
    mint: &Address,
) -> Result<Address, SolError> {
    find_program_address(
        &[wallet.as_ref(), TOKEN_PROGRAM_ID.as_ref(), mint.as_ref()],
        &ASSOCIATED_TOKEN_PROGRAM_ID,
    )
    .map(|(address, _bump)| address)
}

/// Find a PDA for the given seeds: bump seeds are tried from 255 down to 0
/// and the first hash that is NOT an Ed25519 point wins.
pub fn find_program_address(
    seeds: &[&[u8]],
    program_id: &Address,
) -> Result<(Address, u8), SolError> {
    for bump in (0u8..=255).rev() {
        if let Some(address) = try_create_program_address(seeds, &[bump], program_id) {
            return Ok((address, bump));
        }
    }

    Err(SolError::InvalidAddress(
        "could not find valid PDA bump seed".into(),
    ))
}

fn try_create_program_address(
    seeds: &[&[u8]],
    bump_seed: &[u8],
    program_id: &Address,
) -> Option<Address> {
    let mut hasher = Sha256::new();

    for seed in seeds {
        hasher.update(seed);
    }
    hasher.update(bump_seed);
    hasher.update(program_id.as_bytes());
    hasher.update(PDA_MARKER);

    let hash: [u8; 32] = hasher.finalize().into();

    if is_on_curve(&hash) {
        return None;
    }

    Some(Address::new(hash))
}

/// Whether 32 bytes decompress to an Ed25519 point.
pub fn is_on_curve(bytes: &[u8; 32]) -> bool {
    curve25519_dalek::edwards::CompressedEdwardsY(*bytes)
        .decompress()
        .is_some()
}
