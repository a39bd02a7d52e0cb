//! Message compilation, signing and the transaction wire format.
//!
//! Transactions are encoded by hand in the ledger's compact binary layout:
//!
//! ```text
//! Transaction:
//!   num_signatures          compact-u16
//!   signatures              64 bytes * num_signatures
//!   message:
//!     num_required_sigs     u8
//!     num_readonly_signed   u8
//!     num_readonly_unsigned u8
//!     num_accounts          compact-u16
//!     account_keys          32 bytes * num_accounts
//!     recent_blockhash      32 bytes
//!     num_instructions      compact-u16
//!     instructions[]        (see below)
//!
//! Instruction:
//!   program_id_index        u8
//!   num_accounts            compact-u16
//!   account_indices         u8 * num_accounts
//!   data_len                compact-u16
//!   data                    u8 * data_len
//! ```

use ed25519_dalek::{Signer, Verifier};
use zeroize::Zeroize;

use crate::address::{Address, Signature};
use crate::error::SolError;

// ---------------------------------------------------------------------------
// System Program
// ---------------------------------------------------------------------------

/// The System Program: 32 zero bytes, `11111111111111111111111111111111`.
pub const SYSTEM_PROGRAM_ID: Address = Address::new([0u8; 32]);

/// System Program `Transfer` instruction index (little-endian u32).
pub const SYSTEM_TRANSFER_IX_INDEX: u32 = 2;

/// Largest serialized transaction the ledger accepts (one network packet
/// minus headers).
pub const MAX_TRANSACTION_SIZE: usize = 1232;

// ---------------------------------------------------------------------------
// Compact-u16 encoding
// ---------------------------------------------------------------------------

/// Encode a `u16` value in the compact-u16 format.
///
/// - Values 0..0x7f       -> 1 byte
/// - Values 0x80..0x3fff  -> 2 bytes
/// - Values 0x4000..      -> 3 bytes
pub fn encode_compact_u16(value: u16) -> Vec<u8> {
    let mut val = value as u32;
    let mut out = Vec::with_capacity(3);

    loop {
        let mut byte = (val & 0x7f) as u8;
        val >>= 7;
        if val > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if val == 0 {
            break;
        }
    }

    out
}

/// Decode a compact-u16 value, returning `(value, bytes_consumed)`.
pub fn decode_compact_u16(data: &[u8]) -> Result<(u16, usize), SolError> {
    let mut value: u32 = 0;
    let mut consumed = 0usize;

    loop {
        let byte = *data.get(consumed).ok_or_else(|| {
            SolError::SerializationError(
                "unexpected end of data while decoding compact-u16".into(),
            )
        })?;
        value |= ((byte & 0x7f) as u32) << (7 * consumed);
        consumed += 1;

        if byte & 0x80 == 0 || consumed >= 3 {
            break;
        }
    }

    u16::try_from(value)
        .map(|v| (v, consumed))
        .map_err(|_| SolError::SerializationError("compact-u16 value overflow".into()))
}

fn compact_len(len: usize, what: &str) -> Result<Vec<u8>, SolError> {
    let len = u16::try_from(len)
        .map_err(|_| SolError::SerializationError(format!("too many {what}: {len}")))?;
    Ok(encode_compact_u16(len))
}

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// A single account reference in an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolAccountMeta {
    pub pubkey: Address,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl SolAccountMeta {
    pub fn writable(pubkey: Address, is_signer: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable: true,
        }
    }

    pub fn readonly(pubkey: Address, is_signer: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable: false,
        }
    }
}

/// An instruction before it is compiled into a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolInstruction {
    pub program_id: Address,
    pub accounts: Vec<SolAccountMeta>,
    pub data: Vec<u8>,
}

/// A compiled instruction where account references are replaced by u8
/// indices into the message's `account_keys`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledInstruction {
    pub program_id_index: u8,
    pub account_indices: Vec<u8>,
    pub data: Vec<u8>,
}

/// The signable part of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledMessage {
    /// All account keys referenced by the message, in canonical order:
    ///   1. writable signers (fee payer first)
    ///   2. read-only signers
    ///   3. writable non-signers
    ///   4. read-only non-signers
    pub account_keys: Vec<Address>,
    pub num_required_signatures: u8,
    pub num_readonly_signed: u8,
    pub num_readonly_unsigned: u8,
    pub recent_blockhash: [u8; 32],
    pub instructions: Vec<CompiledInstruction>,
}

impl CompiledMessage {
    /// The account paying fees: always the first key.
    pub fn fee_payer(&self) -> Option<&Address> {
        self.account_keys.first()
    }

    pub fn signer_keys(&self) -> &[Address] {
        let n = (self.num_required_signatures as usize).min(self.account_keys.len());
        &self.account_keys[..n]
    }

    pub fn is_signer(&self, index: usize) -> bool {
        index < self.num_required_signatures as usize
    }

    pub fn is_writable(&self, index: usize) -> bool {
        let signers = self.num_required_signatures as usize;
        if index < signers {
            index < signers.saturating_sub(self.num_readonly_signed as usize)
        } else {
            index
                < self
                    .account_keys
                    .len()
                    .saturating_sub(self.num_readonly_unsigned as usize)
        }
    }

    /// Serialize the message (the bytes that get signed).
    pub fn serialize(&self) -> Result<Vec<u8>, SolError> {
        let mut buf = Vec::with_capacity(256);

        buf.push(self.num_required_signatures);
        buf.push(self.num_readonly_signed);
        buf.push(self.num_readonly_unsigned);

        buf.extend_from_slice(&compact_len(self.account_keys.len(), "account keys")?);
        for key in &self.account_keys {
            buf.extend_from_slice(key.as_bytes());
        }

        buf.extend_from_slice(&self.recent_blockhash);

        buf.extend_from_slice(&compact_len(self.instructions.len(), "instructions")?);
        for ix in &self.instructions {
            buf.push(ix.program_id_index);

            buf.extend_from_slice(&compact_len(ix.account_indices.len(), "instruction accounts")?);
            buf.extend_from_slice(&ix.account_indices);

            buf.extend_from_slice(&compact_len(ix.data.len(), "instruction data bytes")?);
            buf.extend_from_slice(&ix.data);
        }

        Ok(buf)
    }
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Compile instructions into a message with a single fee payer.
///
/// Keys are deduplicated with their permission bits OR-ed together, then
/// sorted into canonical order. The fee payer is always key 0.
pub fn compile_message(
    instructions: &[SolInstruction],
    fee_payer: &Address,
    recent_blockhash: &[u8; 32],
) -> Result<CompiledMessage, SolError> {
    if instructions.is_empty() {
        return Err(SolError::TransactionBuildError(
            "a transaction needs at least one instruction".into(),
        ));
    }

    struct AccountEntry {
        pubkey: Address,
        is_signer: bool,
        is_writable: bool,
    }

    let mut entries: Vec<AccountEntry> = Vec::new();

    let mut upsert = |pubkey: Address, signer: bool, writable: bool| {
        if let Some(entry) = entries.iter_mut().find(|e| e.pubkey == pubkey) {
            entry.is_signer |= signer;
            entry.is_writable |= writable;
        } else {
            entries.push(AccountEntry {
                pubkey,
                is_signer: signer,
                is_writable: writable,
            });
        }
    };

    upsert(*fee_payer, true, true);

    for ix in instructions {
        for meta in &ix.accounts {
            upsert(meta.pubkey, meta.is_signer, meta.is_writable);
        }
        upsert(ix.program_id, false, false);
    }

    // Stable sort keeps insertion order inside a category, so the fee payer
    // (inserted first as a writable signer) stays at index 0.
    entries.sort_by_key(|e| match (e.is_signer, e.is_writable) {
        (true, true) => 0u8,
        (true, false) => 1,
        (false, true) => 2,
        (false, false) => 3,
    });

    if entries.len() > usize::from(u8::MAX) {
        return Err(SolError::TransactionBuildError(format!(
            "too many accounts: {}",
            entries.len()
        )));
    }

    let count = |pred: fn(&AccountEntry) -> bool| entries.iter().filter(|e| pred(e)).count() as u8;
    let num_required_signatures = count(|e| e.is_signer);
    let num_readonly_signed = count(|e| e.is_signer && !e.is_writable);
    let num_readonly_unsigned = count(|e| !e.is_signer && !e.is_writable);

    let account_keys: Vec<Address> = entries.iter().map(|e| e.pubkey).collect();

    let index_of = |key: &Address| -> Result<u8, SolError> {
        account_keys
            .iter()
            .position(|k| k == key)
            .map(|i| i as u8)
            .ok_or_else(|| SolError::TransactionBuildError(format!("{key} not in account keys")))
    };

    let mut compiled = Vec::with_capacity(instructions.len());
    for ix in instructions {
        let account_indices = ix
            .accounts
            .iter()
            .map(|meta| index_of(&meta.pubkey))
            .collect::<Result<Vec<u8>, SolError>>()?;

        compiled.push(CompiledInstruction {
            program_id_index: index_of(&ix.program_id)?,
            account_indices,
            data: ix.data.clone(),
        });
    }

    Ok(CompiledMessage {
        account_keys,
        num_required_signatures,
        num_readonly_signed,
        num_readonly_unsigned,
        recent_blockhash: *recent_blockhash,
        instructions: compiled,
    })
}

// ---------------------------------------------------------------------------
// Signing
// ---------------------------------------------------------------------------

/// A fully signed transaction ready for broadcast.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    /// First (and only) signature; the submission id.
    pub signature: Signature,
    /// Complete wire bytes.
    pub wire: Vec<u8>,
}

/// Public key for a 32-byte Ed25519 seed.
pub fn public_key_for_seed(private_key: &[u8; 32]) -> Address {
    let mut seed = *private_key;
    let signing_key = ed25519_dalek::SigningKey::from_bytes(&seed);
    seed.zeroize();
    Address::new(signing_key.verifying_key().to_bytes())
}

/// Sign a single-signer message and serialize it into wire format.
///
/// The seed must belong to the message's fee payer.
pub fn sign_message(
    message: &CompiledMessage,
    private_key: &[u8; 32],
) -> Result<SignedTransaction, SolError> {
    if message.num_required_signatures != 1 {
        return Err(SolError::SigningError(format!(
            "expected exactly one signer, message requires {}",
            message.num_required_signatures
        )));
    }

    let mut seed = *private_key;
    let signing_key = ed25519_dalek::SigningKey::from_bytes(&seed);
    seed.zeroize();

    let our_key = Address::new(signing_key.verifying_key().to_bytes());
    if message.fee_payer() != Some(&our_key) {
        return Err(SolError::SigningError(format!(
            "signing key {our_key} is not the message fee payer"
        )));
    }

    let message_bytes = message.serialize()?;
    let signature = Signature::new(signing_key.sign(&message_bytes).to_bytes());

    let mut wire = Vec::with_capacity(1 + 64 + message_bytes.len());
    wire.extend_from_slice(&encode_compact_u16(1));
    wire.extend_from_slice(signature.as_bytes());
    wire.extend_from_slice(&message_bytes);

    if wire.len() > MAX_TRANSACTION_SIZE {
        return Err(SolError::TransactionBuildError(format!(
            "transaction is {} bytes, limit is {MAX_TRANSACTION_SIZE}",
            wire.len()
        )));
    }

    Ok(SignedTransaction { signature, wire })
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// A transaction parsed back out of its wire bytes.
#[derive(Debug, Clone)]
pub struct DecodedTransaction {
    pub signatures: Vec<Signature>,
    pub message: CompiledMessage,
    pub message_bytes: Vec<u8>,
}

impl DecodedTransaction {
    /// Check every signature slot against the matching signer key.
    pub fn verify_signatures(&self) -> Result<(), SolError> {
        let signers = self.message.signer_keys();
        if signers.len() != self.signatures.len() {
            return Err(SolError::SigningError(format!(
                "{} signatures for {} required signers",
                self.signatures.len(),
                signers.len()
            )));
        }

        for (key, sig) in signers.iter().zip(&self.signatures) {
            let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(key.as_bytes())
                .map_err(|e| SolError::SigningError(format!("signer {key} is not a public key: {e}")))?;
            let signature = ed25519_dalek::Signature::from_bytes(sig.as_bytes());
            verifying_key
                .verify(&self.message_bytes, &signature)
                .map_err(|_| SolError::SigningError(format!("signature mismatch for {key}")))?;
        }

        Ok(())
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], SolError> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.data.len());
        let end = end.ok_or_else(|| {
            SolError::SerializationError(format!(
                "truncated transaction: need {n} bytes at offset {}",
                self.pos
            ))
        })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, SolError> {
        Ok(self.take(1)?[0])
    }

    fn compact_u16(&mut self) -> Result<usize, SolError> {
        let (value, consumed) = decode_compact_u16(&self.data[self.pos.min(self.data.len())..])?;
        self.pos += consumed;
        Ok(value as usize)
    }

    fn array32(&mut self) -> Result<[u8; 32], SolError> {
        let mut out = [0u8; 32];
        out.copy_from_slice(self.take(32)?);
        Ok(out)
    }
}

/// Parse wire bytes into signatures and message.
pub fn decode_transaction(wire: &[u8]) -> Result<DecodedTransaction, SolError> {
    let mut reader = Reader { data: wire, pos: 0 };

    let num_sigs = reader.compact_u16()?;
    if num_sigs == 0 {
        return Err(SolError::SerializationError(
            "transaction has zero signatures".into(),
        ));
    }
    let mut signatures = Vec::with_capacity(num_sigs);
    for _ in 0..num_sigs {
        let mut sig = [0u8; 64];
        sig.copy_from_slice(reader.take(64)?);
        signatures.push(Signature::new(sig));
    }

    let message_start = reader.pos;

    let num_required_signatures = reader.u8()?;
    let num_readonly_signed = reader.u8()?;
    let num_readonly_unsigned = reader.u8()?;

    let num_accounts = reader.compact_u16()?;
    let mut account_keys = Vec::with_capacity(num_accounts);
    for _ in 0..num_accounts {
        account_keys.push(Address::new(reader.array32()?));
    }

    let recent_blockhash = reader.array32()?;

    let num_instructions = reader.compact_u16()?;
    let mut instructions = Vec::with_capacity(num_instructions);
    for _ in 0..num_instructions {
        let program_id_index = reader.u8()?;
        let n = reader.compact_u16()?;
        let account_indices = reader.take(n)?.to_vec();
        let len = reader.compact_u16()?;
        let data = reader.take(len)?.to_vec();

        let out_of_range = std::iter::once(&program_id_index)
            .chain(&account_indices)
            .any(|i| *i as usize >= account_keys.len());
        if out_of_range {
            return Err(SolError::SerializationError(
                "instruction references an account index out of range".into(),
            ));
        }

        instructions.push(CompiledInstruction {
            program_id_index,
            account_indices,
            data,
        });
    }

    if reader.pos != wire.len() {
        return Err(SolError::SerializationError(format!(
            "{} trailing bytes after message",
            wire.len() - reader.pos
        )));
    }

    Ok(DecodedTransaction {
        signatures,
        message: CompiledMessage {
            account_keys,
            num_required_signatures,
            num_readonly_signed,
            num_readonly_unsigned,
            recent_blockhash,
            instructions,
        },
        message_bytes: wire[message_start..].to_vec(),
    })
}

// ---------------------------------------------------------------------------
// System Program instructions
// ---------------------------------------------------------------------------

/// Build a System Program `Transfer` instruction moving `lamports`.
pub fn system_transfer_instruction(
    from: &Address,
    to: &Address,
    lamports: u64,
) -> Result<SolInstruction, SolError> {
    if lamports == 0 {
        return Err(SolError::TransactionBuildError(
            "lamports must be > 0".into(),
        ));
    }

    // u32 LE instruction index (2 = Transfer) + u64 LE lamports.
    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&SYSTEM_TRANSFER_IX_INDEX.to_le_bytes());
    data.extend_from_slice(&lamports.to_le_bytes());

    Ok(SolInstruction {
        program_id: SYSTEM_PROGRAM_ID,
        accounts: vec![
            SolAccountMeta::writable(*from, true),
            SolAccountMeta::writable(*to, false),
        ],
        data,
    })
}

/// Decode a System Program `Transfer` payload into its lamport amount.
pub fn parse_system_transfer(data: &[u8]) -> Option<u64> {
    if data.len() != 12 || data[..4] != SYSTEM_TRANSFER_IX_INDEX.to_le_bytes() {
        return None;
    }
    data[4..12].try_into().ok().map(u64::from_le_bytes)
}
