//! Error taxonomy shared by strategies, the submitter and the executor.
//!
//! Lower layers have their own error enums; the `From` impls below decide which
//! class each of them falls into, and the class decides whether a retry is allowed.

use thiserror::Error;

use crate::account_layouts::LayoutError;
use crate::accounts::DeriveError;
use crate::instructions::EncodeError;
use crate::market_selector::SelectionError;
use crate::rpc_manager::GatewayError;
use crate::tx_builder::BuildError;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("transient network error: {0}")]
    TransientNetwork(String),
    #[error("data unavailable: {0}")]
    DataUnavailable(String),
    #[error("malformed account {address}: {reason}")]
    MalformedAccount { address: String, reason: String },
    #[error("instruction rejected: {0}")]
    InstructionRejected(String),
    #[error("confirmation timed out for {signature}; outcome unknown, reconcile manually")]
    ConfirmationTimeout { signature: String },
    #[error("configuration invalid: {0}")]
    ConfigurationInvalid(String),
    #[error("address derivation exhausted: {0}")]
    DerivationExhausted(String),
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("strategy panicked: {0}")]
    Panicked(String),
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: usize,
        last: Box<ExecutionError>,
    },
}

impl ExecutionError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecutionError::TransientNetwork(_) | ExecutionError::InstructionRejected(_)
        )
    }

    /// True when a transaction may have landed without us observing it.
    pub fn needs_reconciliation(&self) -> bool {
        match self {
            ExecutionError::ConfirmationTimeout { .. } => true,
            ExecutionError::RetriesExhausted { last, .. } => last.needs_reconciliation(),
            _ => false,
        }
    }

    /// Close out a retry loop: an error that was still retryable when the attempt bound ran
    /// out becomes `RetriesExhausted`, which is not retryable.
    pub fn exhausted_after(self, attempts: usize) -> Self {
        if self.is_retryable() {
            ExecutionError::RetriesExhausted {
                attempts,
                last: Box::new(self),
            }
        } else {
            self
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::TransientNetwork(_) => "transient_network",
            ExecutionError::DataUnavailable(_) => "data_unavailable",
            ExecutionError::MalformedAccount { .. } => "malformed_account",
            ExecutionError::InstructionRejected(_) => "instruction_rejected",
            ExecutionError::ConfirmationTimeout { .. } => "confirmation_timeout",
            ExecutionError::ConfigurationInvalid(_) => "configuration_invalid",
            ExecutionError::DerivationExhausted(_) => "derivation_exhausted",
            ExecutionError::InvalidTransaction(_) => "invalid_transaction",
            ExecutionError::Panicked(_) => "panicked",
            ExecutionError::RetriesExhausted { .. } => "retries_exhausted",
        }
    }
}

impl From<GatewayError> for ExecutionError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Transport(msg) => ExecutionError::TransientNetwork(msg),
            GatewayError::RateLimited(msg) => {
                ExecutionError::TransientNetwork(format!("rate limited: {msg}"))
            }
            GatewayError::NotFound(what) => {
                ExecutionError::DataUnavailable(format!("{what} not found"))
            }
            GatewayError::Rejected(reason) => ExecutionError::InstructionRejected(reason),
            GatewayError::Decode(msg) => {
                ExecutionError::DataUnavailable(format!("undecodable response: {msg}"))
            }
            GatewayError::OutcomeUnknown(what) => ExecutionError::ConfirmationTimeout { signature: what },
        }
    }
}

impl From<DeriveError> for ExecutionError {
    fn from(e: DeriveError) -> Self {
        match e {
            DeriveError::DerivationExhausted { .. } => {
                ExecutionError::DerivationExhausted(e.to_string())
            }
            DeriveError::InvalidSeeds(_) => ExecutionError::ConfigurationInvalid(e.to_string()),
        }
    }
}

impl From<EncodeError> for ExecutionError {
    fn from(e: EncodeError) -> Self {
        ExecutionError::InvalidTransaction(e.to_string())
    }
}

impl From<BuildError> for ExecutionError {
    fn from(e: BuildError) -> Self {
        ExecutionError::InvalidTransaction(e.to_string())
    }
}

impl From<SelectionError> for ExecutionError {
    fn from(e: SelectionError) -> Self {
        ExecutionError::DataUnavailable(e.to_string())
    }
}

impl From<LayoutError> for ExecutionError {
    fn from(e: LayoutError) -> Self {
        ExecutionError::MalformedAccount {
            address: "<unknown>".to_string(),
            reason: e.to_string(),
        }
    }
}
