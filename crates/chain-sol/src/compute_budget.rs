//! Compute Budget program instructions (priority fee bids).
//!
//! These carry no accounts and must sit ahead of the instructions whose
//! execution they price.

use crate::address::Address;
use crate::transaction::SolInstruction;

/// Compute Budget Program ID: `ComputeBudget111111111111111111111111111111`
pub const COMPUTE_BUDGET_PROGRAM_ID: Address = Address::new([
    0x03, 0x06, 0x46, 0x6f, 0xe5, 0x21, 0x17, 0x32, 0xff, 0xec, 0xad, 0xba, 0x72, 0xc3,
    0x9b, 0xe7, 0xbc, 0x8c, 0xe5, 0xbb, 0xc5, 0xf7, 0x12, 0x6b, 0x2c, 0x43, 0x9b, 0x3a,
    0x40, 0x00, 0x00, 0x00,
]);

const SET_COMPUTE_UNIT_LIMIT: u8 = 2;
const SET_COMPUTE_UNIT_PRICE: u8 = 3;

/// Cap the compute units the transaction may consume.
pub fn set_compute_unit_limit(units: u32) -> SolInstruction {
    let mut data = Vec::with_capacity(5);
    data.push(SET_COMPUTE_UNIT_LIMIT);
    data.extend_from_slice(&units.to_le_bytes());

    SolInstruction {
        program_id: COMPUTE_BUDGET_PROGRAM_ID,
        accounts: Vec::new(),
        data,
    }
}

/// Bid a price per compute unit, in micro-lamports.
pub fn set_compute_unit_price(micro_lamports: u64) -> SolInstruction {
    let mut data = Vec::with_capacity(9);
    data.push(SET_COMPUTE_UNIT_PRICE);
    data.extend_from_slice(&micro_lamports.to_le_bytes());

    SolInstruction {
        program_id: COMPUTE_BUDGET_PROGRAM_ID,
        accounts: Vec::new(),
        data,
    }
}

/// A decoded Compute Budget payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeBudgetDirective {
    UnitLimit(u32),
    UnitPrice(u64),
}

pub fn parse_compute_budget(data: &[u8]) -> Option<ComputeBudgetDirective> {
    match data.split_first()? {
        (&SET_COMPUTE_UNIT_LIMIT, rest) => rest
            .try_into()
            .ok()
            .map(|b| ComputeBudgetDirective::UnitLimit(u32::from_le_bytes(b))),
        (&SET_COMPUTE_UNIT_PRICE, rest) => rest
            .try_into()
            .ok()
            .map(|b| ComputeBudgetDirective::UnitPrice(u64::from_le_bytes(b))),
        _ => None,
    }
}
