//! Byte-exact instruction payloads and account lists for programs we talk to without an SDK.
//!
//! Payloads are described by a `Layout`: a tag (one opcode byte, or an 8-byte Anchor
//! discriminator) followed by little-endian fixed-width fields in declaration order.
//! Account lists are reproduced positionally; the order is part of each program's ABI.

use solana_sdk::hash::hashv;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::system_program;
use thiserror::Error;

use crate::accounts::{associated_token_program_id, token_program_id};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("{layout}: expected {expected} arguments, got {got}")]
    Arity {
        layout: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("{layout}.{field}: value {value} does not fit in {bits} bits")]
    OutOfRange {
        layout: &'static str,
        field: &'static str,
        value: u128,
        bits: u32,
    },
    #[error("{layout}: payload is {got} bytes, expected {expected}")]
    Length {
        layout: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("{layout}: tag mismatch")]
    Tag { layout: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldWidth {
    U8,
    U16,
    U32,
    U64,
    U128,
}

impl FieldWidth {
    pub const fn bytes(self) -> usize {
        match self {
            FieldWidth::U8 => 1,
            FieldWidth::U16 => 2,
            FieldWidth::U32 => 4,
            FieldWidth::U64 => 8,
            FieldWidth::U128 => 16,
        }
    }

    fn max(self) -> u128 {
        match self {
            FieldWidth::U128 => u128::MAX,
            w => (1u128 << (w.bytes() * 8)) - 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub width: FieldWidth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Opcode(u8),
    /// Anchor method name; the tag is `sha256("global:" ++ name)[..8]`.
    Anchor(&'static str),
}

impl Tag {
    pub fn bytes(&self) -> Vec<u8> {
        match self {
            Tag::Opcode(op) => vec![*op],
            Tag::Anchor(name) => anchor_discriminator(name).to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Tag::Opcode(_) => 1,
            Tag::Anchor(_) => 8,
        }
    }
}

pub fn anchor_discriminator(method: &str) -> [u8; 8] {
    let digest = hashv(&[b"global:", method.as_bytes()]);
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest.to_bytes()[..8]);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub name: &'static str,
    pub tag: Tag,
    pub fields: &'static [Field],
}

impl Layout {
    pub fn encoded_len(&self) -> usize {
        self.tag.len() + self.fields.iter().map(|f| f.width.bytes()).sum::<usize>()
    }

    /// Byte offset of `field` inside the encoded payload, tag included.
    pub fn offset_of(&self, field: &str) -> Option<usize> {
        let mut offset = self.tag.len();
        for f in self.fields {
            if f.name == field {
                return Some(offset);
            }
            offset += f.width.bytes();
        }
        None
    }

    pub fn encode(&self, values: &[u128]) -> Result<Vec<u8>, EncodeError> {
        if values.len() != self.fields.len() {
            return Err(EncodeError::Arity {
                layout: self.name,
                expected: self.fields.len(),
                got: values.len(),
            });
        }
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.tag.bytes());
        for (field, &value) in self.fields.iter().zip(values) {
            if value > field.width.max() {
                return Err(EncodeError::OutOfRange {
                    layout: self.name,
                    field: field.name,
                    value,
                    bits: (field.width.bytes() * 8) as u32,
                });
            }
            out.extend_from_slice(&value.to_le_bytes()[..field.width.bytes()]);
        }
        Ok(out)
    }

    pub fn decode(&self, data: &[u8]) -> Result<Vec<u128>, EncodeError> {
        if data.len() != self.encoded_len() {
            return Err(EncodeError::Length {
                layout: self.name,
                expected: self.encoded_len(),
                got: data.len(),
            });
        }
        let tag = self.tag.bytes();
        if data[..tag.len()] != tag[..] {
            return Err(EncodeError::Tag { layout: self.name });
        }
        let mut offset = tag.len();
        let mut values = Vec::with_capacity(self.fields.len());
        for field in self.fields {
            let width = field.width.bytes();
            let mut buf = [0u8; 16];
            buf[..width].copy_from_slice(&data[offset..offset + width]);
            values.push(u128::from_le_bytes(buf));
            offset += width;
        }
        Ok(values)
    }
}

pub const DEPOSIT_RESERVE_LIQUIDITY: Layout = Layout {
    name: "deposit_reserve_liquidity",
    tag: Tag::Opcode(1),
    fields: &[Field {
        name: "liquidity_amount",
        width: FieldWidth::U64,
    }],
};

pub const REDEEM_RESERVE_COLLATERAL: Layout = Layout {
    name: "redeem_reserve_collateral",
    tag: Tag::Opcode(2),
    fields: &[Field {
        name: "collateral_amount",
        width: FieldWidth::U64,
    }],
};

pub const STAKE_DEPOSIT: Layout = Layout {
    name: "stake_deposit",
    tag: Tag::Anchor("deposit"),
    fields: &[Field {
        name: "lamports",
        width: FieldWidth::U64,
    }],
};

#[derive(Debug, Clone)]
pub struct LendingDepositAccounts {
    pub source_liquidity: Pubkey,
    pub destination_collateral: Pubkey,
    pub reserve: Pubkey,
    pub reserve_liquidity_supply: Pubkey,
    pub reserve_collateral_mint: Pubkey,
    pub lending_market: Pubkey,
    pub lending_market_authority: Pubkey,
    pub user_transfer_authority: Pubkey,
}

pub fn lending_deposit(
    program: &Pubkey,
    accounts: &LendingDepositAccounts,
    liquidity_amount: u64,
) -> Result<Instruction, EncodeError> {
    let data = DEPOSIT_RESERVE_LIQUIDITY.encode(&[liquidity_amount as u128])?;
    Ok(Instruction {
        program_id: *program,
        accounts: vec![
            AccountMeta::new(accounts.source_liquidity, false),
            AccountMeta::new(accounts.destination_collateral, false),
            AccountMeta::new(accounts.reserve, false),
            AccountMeta::new(accounts.reserve_liquidity_supply, false),
            AccountMeta::new(accounts.reserve_collateral_mint, false),
            AccountMeta::new_readonly(accounts.lending_market, false),
            AccountMeta::new_readonly(accounts.lending_market_authority, false),
            AccountMeta::new_readonly(accounts.user_transfer_authority, true),
            AccountMeta::new_readonly(token_program_id(), false),
        ],
        data,
    })
}

#[derive(Debug, Clone)]
pub struct LendingRedeemAccounts {
    pub source_collateral: Pubkey,
    pub destination_liquidity: Pubkey,
    pub reserve: Pubkey,
    pub reserve_collateral_supply: Pubkey,
    pub lending_market: Pubkey,
    pub lending_market_authority: Pubkey,
    pub user_transfer_authority: Pubkey,
}

pub fn lending_redeem(
    program: &Pubkey,
    accounts: &LendingRedeemAccounts,
    collateral_amount: u64,
) -> Result<Instruction, EncodeError> {
    let data = REDEEM_RESERVE_COLLATERAL.encode(&[collateral_amount as u128])?;
    Ok(Instruction {
        program_id: *program,
        accounts: vec![
            AccountMeta::new(accounts.source_collateral, false),
            AccountMeta::new(accounts.destination_liquidity, false),
            AccountMeta::new(accounts.reserve, false),
            AccountMeta::new(accounts.reserve_collateral_supply, false),
            AccountMeta::new_readonly(accounts.lending_market, false),
            AccountMeta::new_readonly(accounts.lending_market_authority, false),
            AccountMeta::new_readonly(accounts.user_transfer_authority, true),
            AccountMeta::new_readonly(token_program_id(), false),
        ],
        data,
    })
}

#[derive(Debug, Clone)]
pub struct StakeDepositAccounts {
    pub state: Pubkey,
    pub st_mint: Pubkey,
    pub liq_pool_sol_leg: Pubkey,
    pub liq_pool_st_leg: Pubkey,
    pub liq_pool_st_leg_authority: Pubkey,
    pub reserve: Pubkey,
    pub transfer_from: Pubkey,
    pub mint_to: Pubkey,
    pub st_mint_authority: Pubkey,
}

pub fn stake_deposit(
    program: &Pubkey,
    accounts: &StakeDepositAccounts,
    lamports: u64,
) -> Result<Instruction, EncodeError> {
    let data = STAKE_DEPOSIT.encode(&[lamports as u128])?;
    Ok(Instruction {
        program_id: *program,
        accounts: vec![
            AccountMeta::new(accounts.state, false),
            AccountMeta::new(accounts.st_mint, false),
            AccountMeta::new(accounts.liq_pool_sol_leg, false),
            AccountMeta::new(accounts.liq_pool_st_leg, false),
            AccountMeta::new_readonly(accounts.liq_pool_st_leg_authority, false),
            AccountMeta::new(accounts.reserve, false),
            AccountMeta::new(accounts.transfer_from, true),
            AccountMeta::new(accounts.mint_to, false),
            AccountMeta::new_readonly(accounts.st_mint_authority, false),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new_readonly(token_program_id(), false),
        ],
        data,
    })
}

/// `CreateIdempotent` on the associated-token program: a no-op when the account already exists.
pub fn create_associated_token_account_idempotent(
    payer: &Pubkey,
    ata: &Pubkey,
    owner: &Pubkey,
    mint: &Pubkey,
) -> Instruction {
    Instruction {
        program_id: associated_token_program_id(),
        accounts: vec![
            AccountMeta::new(*payer, true),
            AccountMeta::new(*ata, false),
            AccountMeta::new_readonly(*owner, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new_readonly(token_program_id(), false),
        ],
        data: vec![1],
    }
}
