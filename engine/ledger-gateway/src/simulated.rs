//! In-process ledger used for development runs and tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::amount::CreditAmount;
use crate::client::{LedgerClient, LedgerEvent, TransactionReceipt, TxHash};
use crate::error::{LedgerError, Result};
use crate::rpc::NOT_REGISTERED_CODE;

#[derive(Debug, Default)]
struct SimState {
    registered: HashSet<String>,
    balances: HashMap<String, CreditAmount>,
    receipts: HashMap<TxHash, TransactionReceipt>,
    block_height: u64,
}

impl SimState {
    /// Mine a block containing one transaction and return its hash
    fn mine(&mut self, events: Vec<LedgerEvent>) -> TxHash {
        self.block_height += 1;
        let tx_hash = format!("0x{:064x}", self.block_height);
        let receipt = TransactionReceipt {
            tx_hash: tx_hash.clone(),
            block_number: self.block_height,
            confirmations: 0,
            status: true,
            events,
        };
        self.receipts.insert(tx_hash.clone(), receipt);
        tx_hash
    }

    fn ensure_registered(&self, account: &str) -> Result<()> {
        if self.registered.contains(account) {
            Ok(())
        } else {
            Err(LedgerError::Rejected {
                code: NOT_REGISTERED_CODE,
                message: format!("account {account} is not registered"),
            })
        }
    }
}

/// Simulated credit ledger.
///
/// Each accepted transaction is mined into its own block. Confirmations can
/// be withheld to model a slow network, and transport failures can be
/// injected for the next N calls.
#[derive(Debug, Default)]
pub struct SimulatedLedger {
    state: Mutex<SimState>,
    confirmations_held: AtomicBool,
    failures_pending: AtomicU32,
    balance_failures_pending: AtomicU32,
    mutations_submitted: AtomicU64,
}

impl SimulatedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account and give it an opening balance
    pub fn seed_account(&self, account: &str, balance: CreditAmount) {
        let mut state = self.state.lock();
        state.registered.insert(account.to_string());
        state.balances.insert(account.to_string(), balance);
    }

    /// Add credits outside the compliance flow (e.g. a marketplace purchase)
    pub fn credit(&self, account: &str, amount: CreditAmount) {
        let mut state = self.state.lock();
        let balance = state.balances.entry(account.to_string()).or_default();
        *balance = balance.checked_add(amount).unwrap_or(*balance);
    }

    /// Balance without going through the async client interface
    pub fn balance(&self, account: &str) -> CreditAmount {
        self.state.lock().balances.get(account).copied().unwrap_or_default()
    }

    pub fn is_registered(&self, account: &str) -> bool {
        self.state.lock().registered.contains(account)
    }

    /// Stop confirming transactions until [`release_confirmations`](Self::release_confirmations)
    pub fn hold_confirmations(&self) {
        self.confirmations_held.store(true, Ordering::SeqCst);
    }

    pub fn release_confirmations(&self) {
        self.confirmations_held.store(false, Ordering::SeqCst);
    }

    /// Fail the next `count` calls with a transport error
    pub fn fail_next_calls(&self, count: u32) {
        self.failures_pending.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` balance reads with a transport error
    pub fn fail_next_balance_reads(&self, count: u32) {
        self.balance_failures_pending.store(count, Ordering::SeqCst);
    }

    /// Number of mint and deduct transactions accepted so far
    pub fn mutations_submitted(&self) -> u64 {
        self.mutations_submitted.load(Ordering::SeqCst)
    }

    fn injected_failure(&self) -> Result<()> {
        take_failure(&self.failures_pending)
    }
}

fn take_failure(pending: &AtomicU32) -> Result<()> {
    match pending.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)) {
        Ok(_) => Err(LedgerError::Transport("simulated connection reset".to_string())),
        Err(_) => Ok(()),
    }
}

#[async_trait::async_trait]
impl LedgerClient for SimulatedLedger {
    async fn register_entity(&self, account: &str) -> Result<TxHash> {
        self.injected_failure()?;
        let mut state = self.state.lock();
        if !state.registered.insert(account.to_string()) {
            tracing::debug!(account, "Simulated ledger: duplicate registration");
            return Err(LedgerError::AlreadyRegistered { account: account.to_string() });
        }
        state.balances.entry(account.to_string()).or_default();
        Ok(state.mine(vec![LedgerEvent::EntityRegistered { account: account.to_string() }]))
    }

    async fn mint(
        &self,
        account: &str,
        amount: CreditAmount,
        _emission_value: CreditAmount,
        _emission_cap: CreditAmount,
    ) -> Result<TxHash> {
        self.injected_failure()?;
        let mut state = self.state.lock();
        state.ensure_registered(account)?;

        let balance = state.balances.entry(account.to_string()).or_default();
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::InvalidAmount(format!("mint of {amount} overflows")))?;

        self.mutations_submitted.fetch_add(1, Ordering::SeqCst);
        Ok(state.mine(vec![LedgerEvent::CreditsMinted { account: account.to_string(), amount }]))
    }

    async fn deduct(
        &self,
        account: &str,
        amount: CreditAmount,
        _emission_value: CreditAmount,
        _emission_cap: CreditAmount,
    ) -> Result<TxHash> {
        self.injected_failure()?;
        let mut state = self.state.lock();
        state.ensure_registered(account)?;

        let balance = state.balances.entry(account.to_string()).or_default();
        let sufficient = match balance.checked_sub(amount) {
            Some(remaining) => {
                *balance = remaining;
                true
            }
            None => false,
        };

        self.mutations_submitted.fetch_add(1, Ordering::SeqCst);
        Ok(state.mine(vec![LedgerEvent::CreditsDeducted {
            account: account.to_string(),
            amount,
            success: sufficient,
            has_sufficient_balance: sufficient,
        }]))
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<TransactionReceipt>> {
        self.injected_failure()?;
        let held = self.confirmations_held.load(Ordering::SeqCst);
        let state = self.state.lock();
        Ok(state.receipts.get(tx_hash).map(|receipt| {
            let mut receipt = receipt.clone();
            receipt.confirmations =
                if held { 0 } else { state.block_height - receipt.block_number + 1 };
            receipt
        }))
    }

    async fn balance_of(&self, account: &str) -> Result<CreditAmount> {
        self.injected_failure()?;
        take_failure(&self.balance_failures_pending)?;
        Ok(self.balance(account))
    }
}
