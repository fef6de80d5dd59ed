//! Build, sign, send and confirm a list of instructions, rebuilding on every attempt.
//!
//! Notes:
//! - Each attempt fetches a fresh blockhash and compiles a new transaction from the same
//!   instructions; signed bytes are never resent.
//! - A send that fails below the RPC layer may still have reached a leader, so the attempt
//!   goes on to confirmation with the locally computed signature.
//! - Only rejected, reverted or expired transactions are retried.

use std::sync::Arc;
use std::time::Duration;

use solana_sdk::{commitment_config::CommitmentConfig, instruction::Instruction, signature::Signature};
use tracing::{debug, info, warn};

use crate::error::ExecutionError;
use crate::retry::{retry_with, RetryPolicy};
use crate::rpc_manager::{ChainGateway, Confirmation, GatewayError};
use crate::tx_builder::TransactionBuilder;
use crate::wallet::Wallet;

#[derive(Debug, Clone)]
pub struct SubmitSettings {
    pub commitment: CommitmentConfig,
    pub confirm_timeout: Duration,
    pub policy: RetryPolicy,
}

impl Default for SubmitSettings {
    fn default() -> Self {
        Self {
            commitment: CommitmentConfig::confirmed(),
            confirm_timeout: Duration::from_secs(60),
            policy: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Submitter {
    gateway: Arc<dyn ChainGateway>,
    builder: TransactionBuilder,
    settings: SubmitSettings,
}

impl Submitter {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        builder: TransactionBuilder,
        settings: SubmitSettings,
    ) -> Self {
        Self {
            gateway,
            builder,
            settings,
        }
    }

    pub fn gateway(&self) -> &Arc<dyn ChainGateway> {
        &self.gateway
    }

    /// Land `instructions` signed by `wallet`, returning the confirmed signature.
    pub async fn submit_and_confirm(
        &self,
        label: &str,
        instructions: &[Instruction],
        wallet: &Wallet,
    ) -> Result<Signature, ExecutionError> {
        let (result, attempts) = retry_with(
            &self.settings.policy,
            |attempt| self.attempt(label, attempt, instructions, wallet),
            ExecutionError::is_retryable,
            |attempt, e, will_retry| {
                warn!(
                    strategy = %label,
                    attempt,
                    error = %e,
                    will_retry,
                    "submission attempt failed"
                );
            },
        )
        .await;

        result.map_err(|e| e.exhausted_after(attempts))
    }

    async fn attempt(
        &self,
        label: &str,
        attempt: usize,
        instructions: &[Instruction],
        wallet: &Wallet,
    ) -> Result<Signature, ExecutionError> {
        let blockhash = self.gateway.latest_blockhash().await?;
        let tx = self
            .builder
            .build(instructions, &wallet.pubkey(), blockhash.hash)?;
        let tx = self.builder.sign(tx, wallet)?;
        let local_signature = tx.signatures[0];

        debug!(strategy = %label, attempt, signature = %local_signature, "submitting transaction");

        let signature = match self.gateway.submit(&tx).await {
            Ok(sig) => sig,
            Err(GatewayError::Rejected(reason)) => {
                return Err(ExecutionError::InstructionRejected(reason));
            }
            Err(e) => {
                warn!(
                    strategy = %label,
                    signature = %local_signature,
                    error = %e,
                    "send failed; checking whether the transaction landed anyway"
                );
                local_signature
            }
        };

        let confirmation = self
            .gateway
            .confirm(
                &signature,
                self.settings.commitment,
                blockhash.last_valid_block_height,
                self.settings.confirm_timeout,
            )
            .await;

        match confirmation {
            Ok(Confirmation::Landed { slot }) => {
                info!(strategy = %label, signature = %signature, slot, "transaction confirmed");
                Ok(signature)
            }
            Ok(Confirmation::Reverted(reason)) => Err(ExecutionError::InstructionRejected(reason)),
            Ok(Confirmation::Expired) => Err(ExecutionError::TransientNetwork(format!(
                "blockhash expired before {signature} landed"
            ))),
            Ok(Confirmation::TimedOut) => Err(ExecutionError::ConfirmationTimeout {
                signature: signature.to_string(),
            }),
            Err(e) => {
                warn!(strategy = %label, signature = %signature, error = %e, "confirmation failed");
                Err(ExecutionError::ConfirmationTimeout {
                    signature: signature.to_string(),
                })
            }
        }
    }
}
