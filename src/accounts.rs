//! Deterministic address derivation.
//!
//! - `derive` walks the bump seed space from 255 down and returns the first off-curve
//!   address, which is the canonical program-derived address for those seeds.
//! - `associated_token_address` applies the associated-token program rule
//!   (seeds `[owner, token_program, mint]`).
//!
//! Nothing here touches the network or holds state.

use solana_sdk::pubkey::{Pubkey, PubkeyError, MAX_SEEDS, MAX_SEED_LEN};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeriveError {
    #[error("no valid bump seed found for program {program}")]
    DerivationExhausted { program: Pubkey },
    #[error("invalid seeds: {0}")]
    InvalidSeeds(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivedAddress {
    pub address: Pubkey,
    pub bump: u8,
}

pub fn token_program_id() -> Pubkey {
    spl_token::id()
}

pub fn associated_token_program_id() -> Pubkey {
    spl_associated_token_account::id()
}

/// Find the canonical program-derived address for `seeds` under `program`.
pub fn derive(seeds: &[&[u8]], program: &Pubkey) -> Result<DerivedAddress, DeriveError> {
    // One slot is reserved for the bump seed.
    if seeds.len() >= MAX_SEEDS {
        return Err(DeriveError::InvalidSeeds(format!(
            "{} seeds given, at most {} allowed",
            seeds.len(),
            MAX_SEEDS - 1
        )));
    }
    if let Some((idx, seed)) = seeds.iter().enumerate().find(|(_, s)| s.len() > MAX_SEED_LEN) {
        return Err(DeriveError::InvalidSeeds(format!(
            "seed {} is {} bytes, max {}",
            idx,
            seed.len(),
            MAX_SEED_LEN
        )));
    }

    for bump in (0..=u8::MAX).rev() {
        let bump_seed = [bump];
        let mut with_bump: Vec<&[u8]> = Vec::with_capacity(seeds.len() + 1);
        with_bump.extend_from_slice(seeds);
        with_bump.push(&bump_seed);

        match Pubkey::create_program_address(&with_bump, program) {
            Ok(address) => return Ok(DerivedAddress { address, bump }),
            // On-curve for this bump, keep searching.
            Err(PubkeyError::InvalidSeeds) => continue,
            Err(e) => return Err(DeriveError::InvalidSeeds(e.to_string())),
        }
    }

    Err(DeriveError::DerivationExhausted { program: *program })
}

pub fn associated_token_address(owner: &Pubkey, mint: &Pubkey) -> Result<Pubkey, DeriveError> {
    associated_token_address_with_program(owner, mint, &token_program_id())
}

pub fn associated_token_address_with_program(
    owner: &Pubkey,
    mint: &Pubkey,
    token_program: &Pubkey,
) -> Result<Pubkey, DeriveError> {
    derive(
        &[owner.as_ref(), token_program.as_ref(), mint.as_ref()],
        &associated_token_program_id(),
    )
    .map(|d| d.address)
}
