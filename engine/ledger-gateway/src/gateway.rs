//! LedgerGateway: decimal-facing operations over a [`LedgerClient`]

use std::sync::Arc;
use std::time::Instant;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};

use crate::amount::CreditAmount;
use crate::client::{LedgerClient, TransactionReceipt};
use crate::config::GatewayConfig;
use crate::error::{LedgerError, Result};

/// Outcome of registering an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationOutcome {
    Registered { tx_ref: String },
    AlreadyRegistered,
}

/// Outcome of a confirmed mint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MintOutcome {
    pub tx_ref: String,
    pub block_ref: u64,
    /// `None` when the balance read after confirmation failed
    pub balance_after: Option<Decimal>,
}

/// Outcome of a confirmed deduction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeductOutcome {
    /// Credits were removed from the account
    Settled { tx_ref: String, block_ref: u64, balance_after: Option<Decimal> },
    /// The ledger executed the call but the balance could not cover it
    InsufficientBalance { tx_ref: String, block_ref: u64, balance_after: Option<Decimal> },
}

impl DeductOutcome {
    pub fn tx_ref(&self) -> &str {
        match self {
            DeductOutcome::Settled { tx_ref, .. } | DeductOutcome::InsufficientBalance { tx_ref, .. } => {
                tx_ref
            }
        }
    }

    pub fn balance_after(&self) -> Option<Decimal> {
        match self {
            DeductOutcome::Settled { balance_after, .. }
            | DeductOutcome::InsufficientBalance { balance_after, .. } => *balance_after,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, DeductOutcome::Settled { .. })
    }
}

/// Gateway to the external credit ledger.
///
/// Converts decimal credits to the ledger's fixed-point representation and
/// waits for each mutation to confirm. It never retries; a transient error is
/// returned to the caller and the next tick starts over from fresh reads.
pub struct LedgerGateway {
    client: Arc<dyn LedgerClient>,
    config: GatewayConfig,
}

impl LedgerGateway {
    /// Create a new gateway over a ledger client
    pub fn new(client: Arc<dyn LedgerClient>, config: GatewayConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Register an account; a repeat registration counts as success
    pub async fn register_entity(&self, account: &str) -> Result<RegistrationOutcome> {
        let started = Instant::now();
        let outcome = match self.client.register_entity(account).await {
            Ok(tx_ref) => {
                let receipt = self.wait_for_confirmation(&tx_ref).await?;
                ensure_executed(&receipt)?;
                tracing::info!(account, tx_ref = %tx_ref, "Registered account on ledger");
                RegistrationOutcome::Registered { tx_ref }
            }
            Err(LedgerError::AlreadyRegistered { .. }) => {
                tracing::debug!(account, "Account already registered on ledger");
                RegistrationOutcome::AlreadyRegistered
            }
            Err(e) => return Err(e),
        };
        record_latency("register", started);
        Ok(outcome)
    }

    /// Mint `amount` credits and wait for confirmation
    pub async fn mint(
        &self,
        account: &str,
        amount: Decimal,
        emission_value: Decimal,
        emission_cap: Decimal,
    ) -> Result<MintOutcome> {
        let started = Instant::now();
        let tx_ref = self
            .client
            .mint(
                account,
                CreditAmount::from_decimal(amount)?,
                CreditAmount::from_decimal(emission_value)?,
                CreditAmount::from_decimal(emission_cap)?,
            )
            .await?;

        let receipt = self.wait_for_confirmation(&tx_ref).await?;
        ensure_executed(&receipt)?;
        let balance_after = self.balance_after_confirmation(account, &tx_ref).await;
        record_latency("mint", started);

        tracing::debug!(account, tx_ref = %tx_ref, %amount, ?balance_after, "Mint confirmed");
        Ok(MintOutcome { tx_ref, block_ref: receipt.block_number, balance_after })
    }

    /// Deduct `amount` credits and wait for confirmation.
    ///
    /// An uncovered deduction comes back as
    /// [`DeductOutcome::InsufficientBalance`], not as an error.
    pub async fn deduct(
        &self,
        account: &str,
        amount: Decimal,
        emission_value: Decimal,
        emission_cap: Decimal,
    ) -> Result<DeductOutcome> {
        let started = Instant::now();
        let tx_ref = self
            .client
            .deduct(
                account,
                CreditAmount::from_decimal(amount)?,
                CreditAmount::from_decimal(emission_value)?,
                CreditAmount::from_decimal(emission_cap)?,
            )
            .await?;

        let receipt = self.wait_for_confirmation(&tx_ref).await?;
        ensure_executed(&receipt)?;
        let (success, has_sufficient_balance) = receipt.deduction_result().ok_or_else(|| {
            LedgerError::invalid_response(format!("receipt {tx_ref} has no deduction event"))
        })?;
        let balance_after = self.balance_after_confirmation(account, &tx_ref).await;
        record_latency("deduct", started);

        let block_ref = receipt.block_number;
        if success && has_sufficient_balance {
            tracing::debug!(account, tx_ref = %tx_ref, %amount, ?balance_after, "Deduction confirmed");
            Ok(DeductOutcome::Settled { tx_ref, block_ref, balance_after })
        } else {
            tracing::info!(account, tx_ref = %tx_ref, %amount, ?balance_after, "Deduction not covered by balance");
            Ok(DeductOutcome::InsufficientBalance { tx_ref, block_ref, balance_after })
        }
    }

    /// Current ledger balance in credits
    pub async fn balance_of(&self, account: &str) -> Result<Decimal> {
        self.client.balance_of(account).await?.to_decimal()
    }

    /// Balance once a mutation has confirmed. The mutation is applied either
    /// way, so a failed read is logged and reported as unknown.
    async fn balance_after_confirmation(&self, account: &str, tx_ref: &str) -> Option<Decimal> {
        match self.balance_of(account).await {
            Ok(balance) => Some(balance),
            Err(e) => {
                tracing::warn!(account, tx_ref, error = %e, "Balance read after confirmation failed");
                metrics::counter!("ledger_balance_read_failures_total", 1);
                None
            }
        }
    }

    /// Poll for the receipt until it has enough confirmations or the timeout hits
    async fn wait_for_confirmation(&self, tx_ref: &str) -> Result<TransactionReceipt> {
        match timeout(self.config.confirmation_timeout(), self.poll_receipt(tx_ref)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(tx_ref, "Ledger confirmation timed out");
                metrics::counter!("ledger_confirmation_timeouts_total", 1);
                Err(LedgerError::ConfirmationTimeout {
                    tx_ref: tx_ref.to_string(),
                    waited: self.config.confirmation_timeout(),
                })
            }
        }
    }

    async fn poll_receipt(&self, tx_ref: &str) -> Result<TransactionReceipt> {
        let required = self.config.required_confirmations.max(1);
        let poll = self.config.confirmation_poll();

        loop {
            if let Some(receipt) = self.client.transaction_receipt(tx_ref).await? {
                if receipt.confirmations >= required {
                    return Ok(receipt);
                }
            }
            sleep(poll).await;
        }
    }
}

fn ensure_executed(receipt: &TransactionReceipt) -> Result<()> {
    if receipt.status {
        Ok(())
    } else {
        Err(LedgerError::Reverted { tx_ref: receipt.tx_hash.clone() })
    }
}

fn record_latency(op: &'static str, started: Instant) {
    metrics::histogram!("ledger_call_duration_seconds", started.elapsed().as_secs_f64(), "op" => op);
}
