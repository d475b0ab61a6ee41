//! # Ledger Gateway
//!
//! Everything the compliance engine knows about the external credit ledger.
//!
//! - [`LedgerClient`]: wire-level seam, amounts in 18-decimal base units
//! - [`JsonRpcLedgerClient`]: JSON-RPC 2.0 over HTTP
//! - [`SimulatedLedger`]: in-process ledger for development and tests
//! - [`LedgerGateway`]: decimal API with confirmation waits and typed outcomes

pub mod amount;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod rpc;
pub mod simulated;

pub use amount::{CreditAmount, LEDGER_DECIMALS};
pub use client::{LedgerClient, LedgerEvent, TransactionReceipt, TxHash};
pub use config::{GatewayConfig, RpcConfig};
pub use error::{LedgerError, Result};
pub use gateway::{DeductOutcome, LedgerGateway, MintOutcome, RegistrationOutcome};
pub use rpc::JsonRpcLedgerClient;
pub use simulated::SimulatedLedger;
