//! Ledger addresses and submission signatures.
//!
//! An address is a Base58-encoded 32-byte value: either an Ed25519 public
//! key or a program-derived address. Nothing is hashed on the way to text
//! form, so the bytes ARE the address. Signatures are 64 raw Ed25519 bytes
//! and double as the submission identifier returned by the backend.

use std::fmt;
use std::str::FromStr;

use crate::error::SolError;

/// A parsed 32-byte ledger address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 32]);

impl Address {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn to_bytes(self) -> [u8; 32] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse a Base58 address, rejecting anything that does not decode to
    /// exactly 32 bytes.
    pub fn parse(text: &str) -> Result<Self, SolError> {
        let bytes = bs58::decode(text.trim())
            .into_vec()
            .map_err(|e| SolError::InvalidAddress(format!("base58 decode failed: {e}")))?;

        let arr: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            SolError::InvalidAddress(format!("expected 32 bytes, got {}", v.len()))
        })?;

        Ok(Self(arr))
    }
}

impl FromStr for Address {
    type Err = SolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<[u8; 32]> for Address {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

/// Validate an address string without keeping the parsed value.
pub fn validate_address(address: &str) -> Result<bool, SolError> {
    Address::parse(address).map(|_| true)
}

/// A 64-byte transaction signature.
///
/// The first signature of a transaction identifies it on the ledger, so this
/// is also the submission id handed back by a broadcast.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; 64]);

impl Signature {
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    pub fn parse(text: &str) -> Result<Self, SolError> {
        let bytes = bs58::decode(text.trim())
            .into_vec()
            .map_err(|e| SolError::SerializationError(format!("signature decode failed: {e}")))?;

        let arr: [u8; 64] = bytes.try_into().map_err(|v: Vec<u8>| {
            SolError::SerializationError(format!("expected 64 signature bytes, got {}", v.len()))
        })?;

        Ok(Self(arr))
    }
}

impl FromStr for Signature {
    type Err = SolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({self})")
    }
}
