//! tx_builder.rs
//! Assembles v0 transactions from encoded instructions.
//! - prepends compute budget instructions from config
//! - compiles against a caller-supplied blockhash (no network access here)
//! - signs with the wallet in the fee payer's signature slot

use serde::Deserialize;
use solana_sdk::{
    compute_budget::ComputeBudgetInstruction,
    hash::Hash,
    instruction::Instruction,
    message::{v0::Message as MessageV0, VersionedMessage},
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};
use thiserror::Error;
use tracing::debug;

use crate::wallet::Wallet;

/// Runtime ceiling on compute units per transaction.
pub const MAX_COMPUTE_UNIT_LIMIT: u32 = 1_400_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Compute unit limit for the transaction; 0 leaves the runtime default.
    pub compute_unit_limit: u32,
    /// Compute unit price in micro-lamports per CU; 0 adds no priority fee.
    pub compute_unit_price_micro_lamports: u64,
}

impl TransactionConfig {
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.compute_unit_limit > MAX_COMPUTE_UNIT_LIMIT {
            return Err(BuildError::ConfigValidation(format!(
                "compute_unit_limit must be <= {MAX_COMPUTE_UNIT_LIMIT}"
            )));
        }
        Ok(())
    }

    fn budget_instructions(&self) -> Vec<Instruction> {
        let mut ixs = Vec::with_capacity(2);
        if self.compute_unit_limit > 0 {
            ixs.push(ComputeBudgetInstruction::set_compute_unit_limit(
                self.compute_unit_limit,
            ));
        }
        if self.compute_unit_price_micro_lamports > 0 {
            ixs.push(ComputeBudgetInstruction::set_compute_unit_price(
                self.compute_unit_price_micro_lamports,
            ));
        }
        ixs
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),
    #[error("transaction has no instructions")]
    EmptyInstructions,
    #[error("Failed to compile message: {0}")]
    Compile(String),
    #[error("signer {0} is not a required signer of this message")]
    MissingSigner(Pubkey),
}

#[derive(Debug, Clone, Default)]
pub struct TransactionBuilder {
    config: TransactionConfig,
}

impl TransactionBuilder {
    pub fn new(config: TransactionConfig) -> Result<Self, BuildError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Compile an unsigned v0 transaction. Signature slots are filled with defaults.
    pub fn build(
        &self,
        instructions: &[Instruction],
        payer: &Pubkey,
        recent_blockhash: Hash,
    ) -> Result<VersionedTransaction, BuildError> {
        if instructions.is_empty() {
            return Err(BuildError::EmptyInstructions);
        }

        let mut all = self.config.budget_instructions();
        all.extend_from_slice(instructions);

        let message = MessageV0::try_compile(payer, &all, &[], recent_blockhash)
            .map_err(|e| BuildError::Compile(e.to_string()))?;
        let message = VersionedMessage::V0(message);
        let required = message.header().num_required_signatures as usize;

        debug!(
            payer = %payer,
            instructions = all.len(),
            blockhash = %recent_blockhash,
            "transaction compiled"
        );

        Ok(VersionedTransaction {
            signatures: vec![Signature::default(); required],
            message,
        })
    }

    /// Place the wallet's signature in its slot. Other slots are left untouched.
    pub fn sign(
        &self,
        mut tx: VersionedTransaction,
        wallet: &Wallet,
    ) -> Result<VersionedTransaction, BuildError> {
        let signer = wallet.pubkey();
        let required = tx.message.header().num_required_signatures as usize;
        let index = tx.message.static_account_keys()[..required]
            .iter()
            .position(|k| *k == signer)
            .ok_or(BuildError::MissingSigner(signer))?;

        if tx.signatures.len() != required {
            tx.signatures.resize(required, Signature::default());
        }
        tx.signatures[index] = wallet.sign_message(&tx.message.serialize());
        Ok(tx)
    }
}
