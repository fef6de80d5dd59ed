//! In-crate fakes for gateways, data sources and the event sink.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use alloy_sol_types::SolCall;
use async_trait::async_trait;
use solana_sdk::{
    account::Account,
    commitment_config::CommitmentConfig,
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};

use crate::error::ExecutionError;
use crate::evm::{abi, Address, EvmGateway, EvmTx, U256};
use crate::rpc_manager::{ChainGateway, Confirmation, GatewayError, RecentBlockhash};
use crate::sources::{KlineSource, VaultDetails, VaultVenue};
use crate::structured_logging::EventSink;
use crate::types::{ExecutionOutcome, Kline, Phase, PortfolioSnapshot};

/// Scripted Solana gateway. Unscripted submits succeed and unscripted confirmations land.
#[derive(Debug, Default)]
pub(crate) struct MockGateway {
    submit_results: Mutex<VecDeque<Result<(), GatewayError>>>,
    confirmations: Mutex<VecDeque<Confirmation>>,
    submitted: Mutex<Vec<VersionedTransaction>>,
    accounts: Mutex<HashMap<Pubkey, Account>>,
    program_accounts: Mutex<HashMap<Pubkey, Vec<(Pubkey, Account)>>>,
    balance: Mutex<u64>,
}

impl MockGateway {
    pub fn push_submit(&self, result: Result<(), GatewayError>) {
        self.submit_results.lock().unwrap().push_back(result);
    }

    pub fn push_confirmation(&self, confirmation: Confirmation) {
        self.confirmations.lock().unwrap().push_back(confirmation);
    }

    pub fn set_account(&self, address: Pubkey, owner: Pubkey, data: Vec<u8>) {
        self.accounts.lock().unwrap().insert(
            address,
            Account {
                lamports: 1_000_000,
                data,
                owner,
                executable: false,
                rent_epoch: 0,
            },
        );
    }

    pub fn add_program_account(&self, program: Pubkey, address: Pubkey, data: Vec<u8>) {
        self.program_accounts
            .lock()
            .unwrap()
            .entry(program)
            .or_default()
            .push((
                address,
                Account {
                    lamports: 1_000_000,
                    data,
                    owner: program,
                    executable: false,
                    rent_epoch: 0,
                },
            ));
    }

    pub fn set_balance(&self, lamports: u64) {
        *self.balance.lock().unwrap() = lamports;
    }

    pub fn submitted(&self) -> Vec<VersionedTransaction> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainGateway for MockGateway {
    async fn latest_blockhash(&self) -> Result<RecentBlockhash, GatewayError> {
        Ok(RecentBlockhash {
            hash: Hash::new_unique(),
            last_valid_block_height: 1_000,
        })
    }

    async fn submit(&self, tx: &VersionedTransaction) -> Result<Signature, GatewayError> {
        self.submitted.lock().unwrap().push(tx.clone());
        let scripted = self.submit_results.lock().unwrap().pop_front();
        match scripted {
            Some(Err(e)) => Err(e),
            _ => Ok(tx.signatures[0]),
        }
    }

    async fn confirm(
        &self,
        _signature: &Signature,
        _commitment: CommitmentConfig,
        _last_valid_block_height: u64,
        _timeout: Duration,
    ) -> Result<Confirmation, GatewayError> {
        Ok(self
            .confirmations
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Confirmation::Landed { slot: 1 }))
    }

    async fn get_account(&self, address: &Pubkey) -> Result<Account, GatewayError> {
        self.accounts
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("account {address}")))
    }

    async fn get_program_accounts(
        &self,
        program: &Pubkey,
        data_size: Option<u64>,
    ) -> Result<Vec<(Pubkey, Account)>, GatewayError> {
        Ok(self
            .program_accounts
            .lock()
            .unwrap()
            .get(program)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|(_, a)| data_size.map_or(true, |n| a.data.len() as u64 == n))
            .collect())
    }

    async fn get_balance(&self, _address: &Pubkey) -> Result<u64, GatewayError> {
        Ok(*self.balance.lock().unwrap())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SinkEvent {
    Progress(String, String),
    Phase(String, Phase),
    Outcome {
        strategy: String,
        success: bool,
        attempts: usize,
        needs_reconciliation: bool,
    },
    Snapshot(u64),
}

#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn phases(&self, strategy: &str) -> Vec<Phase> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Phase(s, p) if s == strategy => Some(p),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn progress(&self, strategy: &str, message: &str) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Progress(strategy.into(), message.into()));
    }

    fn phase(&self, strategy: &str, phase: Phase) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Phase(strategy.into(), phase));
    }

    fn outcome(&self, outcome: &ExecutionOutcome) {
        self.events.lock().unwrap().push(SinkEvent::Outcome {
            strategy: outcome.strategy.clone(),
            success: outcome.success,
            attempts: outcome.attempts,
            needs_reconciliation: outcome.needs_reconciliation,
        });
    }

    fn snapshot(&self, snapshot: &PortfolioSnapshot) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Snapshot(snapshot.sol_lamports));
    }
}

/// Fixed price history, or a scripted failure.
#[derive(Debug, Default)]
pub(crate) struct StaticKlines {
    pub closes: Vec<f64>,
    pub fail: bool,
}

impl StaticKlines {
    pub fn new(closes: Vec<f64>) -> Self {
        Self {
            closes,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            closes: vec![],
            fail: true,
        }
    }
}

#[async_trait]
impl KlineSource for StaticKlines {
    async fn klines(
        &self,
        _symbol: &str,
        _interval: &str,
        limit: usize,
    ) -> Result<Vec<Kline>, ExecutionError> {
        if self.fail {
            return Err(ExecutionError::TransientNetwork("kline source down".into()));
        }
        let start = self.closes.len().saturating_sub(limit);
        Ok(self.closes[start..]
            .iter()
            .enumerate()
            .map(|(i, close)| Kline {
                close: *close,
                timestamp: i as u64 * 60_000,
            })
            .collect())
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockVenue {
    pub vaults: HashMap<String, VaultDetails>,
    pub transfers: Mutex<Vec<(String, bool, f64)>>,
    /// Record transfers but answer as if the response was lost.
    pub lose_answers: bool,
}

impl MockVenue {
    pub fn with_vault(mut self, address: &str, apy: f64, tvl: f64) -> Self {
        self.vaults.insert(
            address.to_string(),
            VaultDetails {
                address: address.to_string(),
                name: format!("vault {address}"),
                apy,
                tvl,
            },
        );
        self
    }

    pub fn losing_answers(mut self) -> Self {
        self.lose_answers = true;
        self
    }

    fn answer(&self, reference: &str) -> Result<String, ExecutionError> {
        if self.lose_answers {
            return Err(ExecutionError::ConfirmationTimeout {
                signature: format!("vault transfer {reference}"),
            });
        }
        Ok(reference.to_string())
    }

    pub fn transfers(&self) -> Vec<(String, bool, f64)> {
        self.transfers.lock().unwrap().clone()
    }
}

#[async_trait]
impl VaultVenue for MockVenue {
    async fn vault_details(&self, vault: &str) -> Result<VaultDetails, ExecutionError> {
        self.vaults
            .get(vault)
            .cloned()
            .ok_or_else(|| ExecutionError::DataUnavailable(format!("vault {vault}")))
    }

    async fn deposit(&self, vault: &str, usd: f64) -> Result<String, ExecutionError> {
        self.transfers
            .lock()
            .unwrap()
            .push((vault.to_string(), true, usd));
        self.answer("deposit-ok")
    }

    async fn withdraw(&self, vault: &str, usd: f64) -> Result<String, ExecutionError> {
        self.transfers
            .lock()
            .unwrap()
            .push((vault.to_string(), false, usd));
        self.answer("withdraw-ok")
    }
}

/// How a scripted EVM send fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendFault {
    /// The request never reaches the node.
    Unreachable,
    /// The node accepts the transaction and the transport reports a failure anyway.
    LostAfterAccept,
    /// The request reaches the node; whether it was accepted is unknown.
    NoAnswer,
}

/// EVM gateway answering `getPool` with a fixed return blob, tracking ERC-20 allowances set
/// through `approve`, and recording every transaction the node accepted.
#[derive(Debug)]
pub(crate) struct MockEvm {
    pub sender: Address,
    pub call_result: Vec<u8>,
    pub sent: Mutex<Vec<EvmTx>>,
    allowances: Mutex<HashMap<Address, U256>>,
    receipts: Mutex<VecDeque<Confirmation>>,
    faults: Mutex<HashMap<Address, SendFault>>,
}

impl MockEvm {
    pub fn new(call_result: Vec<u8>) -> Self {
        Self {
            sender: Address::repeat_byte(0xaa),
            call_result,
            sent: Mutex::new(Vec::new()),
            allowances: Mutex::new(HashMap::new()),
            receipts: Mutex::new(VecDeque::new()),
            faults: Mutex::new(HashMap::new()),
        }
    }

    pub fn sent(&self) -> Vec<EvmTx> {
        self.sent.lock().unwrap().clone()
    }

    /// Sent transactions whose calldata is an ERC-20 `approve`.
    pub fn approvals(&self) -> usize {
        self.sent()
            .iter()
            .filter(|tx| tx.data.starts_with(&abi::approveCall::SELECTOR))
            .count()
    }

    pub fn sent_to(&self, to: Address) -> usize {
        self.sent().iter().filter(|tx| tx.to == to).count()
    }

    /// Receipts handed out in order; once drained, every transaction lands.
    pub fn push_receipt(&self, confirmation: Confirmation) {
        self.receipts.lock().unwrap().push_back(confirmation);
    }

    pub fn fail_sends_to(&self, to: Address, fault: SendFault) {
        self.faults.lock().unwrap().insert(to, fault);
    }
}

#[async_trait]
impl EvmGateway for MockEvm {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, GatewayError> {
        if data.starts_with(&abi::allowanceCall::SELECTOR) {
            let remaining = self
                .allowances
                .lock()
                .unwrap()
                .get(&to)
                .copied()
                .unwrap_or(U256::ZERO);
            return Ok(remaining.to_be_bytes::<32>().to_vec());
        }
        Ok(self.call_result.clone())
    }

    async fn pending_nonce(&self) -> Result<u64, GatewayError> {
        Ok(self.sent.lock().unwrap().len() as u64)
    }

    async fn send(&self, tx: EvmTx) -> Result<String, GatewayError> {
        let fault = self.faults.lock().unwrap().get(&tx.to).copied();
        match fault {
            Some(SendFault::Unreachable) => {
                return Err(GatewayError::Transport("connection refused".into()))
            }
            Some(SendFault::NoAnswer) => {
                return Err(GatewayError::OutcomeUnknown("eth_sendTransaction".into()))
            }
            Some(SendFault::LostAfterAccept) | None => {}
        }

        if let Ok(call) = abi::approveCall::abi_decode(&tx.data, true) {
            self.allowances.lock().unwrap().insert(tx.to, call.amount);
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(tx);
        if fault == Some(SendFault::LostAfterAccept) {
            return Err(GatewayError::Transport("connection reset".into()));
        }
        Ok(format!("0x{:064x}", sent.len()))
    }

    async fn wait_for_receipt(
        &self,
        _tx_hash: &str,
        _timeout: Duration,
    ) -> Result<Confirmation, GatewayError> {
        Ok(self
            .receipts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Confirmation::Landed { slot: 1 }))
    }
}
