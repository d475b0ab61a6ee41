//! JSON-RPC 2.0 ledger client over HTTP

use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::amount::CreditAmount;
use crate::client::{LedgerClient, TransactionReceipt, TxHash};
use crate::config::RpcConfig;
use crate::error::{LedgerError, Result};

/// Error code the credit contract uses for a repeated registration
pub const ALREADY_REGISTERED_CODE: i64 = -32010;
/// Error code for mutations against an unregistered account
pub const NOT_REGISTERED_CODE: i64 = -32011;
/// Error code for a mutation the contract reverted at submission
pub const EXECUTION_REVERTED_CODE: i64 = 3;
/// Standard JSON-RPC invalid params
pub const INVALID_PARAMS_CODE: i64 = -32602;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Ledger client talking JSON-RPC to the credit contract's node
#[derive(Debug)]
pub struct JsonRpcLedgerClient {
    http: reqwest::Client,
    endpoint: String,
    next_id: AtomicU64,
}

impl JsonRpcLedgerClient {
    /// Create a new client for the configured endpoint
    pub fn new(config: &RpcConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(LedgerError::transport)?;

        Ok(Self { http, endpoint: config.endpoint.clone(), next_id: AtomicU64::new(1) })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        tracing::trace!(method, id = request.id, "Ledger RPC request");

        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(LedgerError::transport)?
            .error_for_status()
            .map_err(LedgerError::transport)?;

        let body: RpcResponse = response.json().await.map_err(LedgerError::transport)?;
        decode_response(method, body)
    }
}

fn decode_response<R: DeserializeOwned>(method: &str, body: RpcResponse) -> Result<R> {
    if let Some(error) = body.error {
        return Err(classify_rpc_error(error.code, error.message));
    }

    let result = body.result.unwrap_or(Value::Null);
    serde_json::from_value(result)
        .map_err(|e| LedgerError::invalid_response(format!("{method}: {e}")))
}

/// Map a JSON-RPC error object onto the gateway's error taxonomy
pub fn classify_rpc_error(code: i64, message: String) -> LedgerError {
    match code {
        ALREADY_REGISTERED_CODE => LedgerError::AlreadyRegistered { account: message },
        NOT_REGISTERED_CODE | EXECUTION_REVERTED_CODE | INVALID_PARAMS_CODE => {
            LedgerError::Rejected { code, message }
        }
        _ if message.to_ascii_lowercase().contains("already registered") => {
            LedgerError::AlreadyRegistered { account: message }
        }
        _ => LedgerError::Rpc { code, message },
    }
}

fn mutation_params(
    account: &str,
    amount: CreditAmount,
    emission_value: CreditAmount,
    emission_cap: CreditAmount,
) -> Value {
    json!({
        "account": account,
        "amount": amount,
        "emissionValue": emission_value,
        "emissionCap": emission_cap,
    })
}

#[async_trait::async_trait]
impl LedgerClient for JsonRpcLedgerClient {
    async fn register_entity(&self, account: &str) -> Result<TxHash> {
        self.call("ledger_registerEntity", json!([account])).await
    }

    async fn mint(
        &self,
        account: &str,
        amount: CreditAmount,
        emission_value: CreditAmount,
        emission_cap: CreditAmount,
    ) -> Result<TxHash> {
        self.call("ledger_mint", mutation_params(account, amount, emission_value, emission_cap))
            .await
    }

    async fn deduct(
        &self,
        account: &str,
        amount: CreditAmount,
        emission_value: CreditAmount,
        emission_cap: CreditAmount,
    ) -> Result<TxHash> {
        self.call("ledger_deduct", mutation_params(account, amount, emission_value, emission_cap))
            .await
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<TransactionReceipt>> {
        self.call("ledger_getTransactionReceipt", json!([tx_hash])).await
    }

    async fn balance_of(&self, account: &str) -> Result<CreditAmount> {
        self.call("ledger_balanceOf", json!([account])).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: &str) -> RpcResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_error_classification() {
        assert!(matches!(
            classify_rpc_error(ALREADY_REGISTERED_CODE, "0xabc".into()),
            LedgerError::AlreadyRegistered { .. }
        ));
        assert!(matches!(
            classify_rpc_error(-32000, "Entity already registered".into()),
            LedgerError::AlreadyRegistered { .. }
        ));
        assert!(matches!(
            classify_rpc_error(NOT_REGISTERED_CODE, "unknown account".into()),
            LedgerError::Rejected { .. }
        ));

        let internal = classify_rpc_error(-32603, "node overloaded".into());
        assert!(internal.is_transient());
    }

    #[test]
    fn test_null_result_decodes_as_pending_receipt() {
        let body = response(r#"{"jsonrpc":"2.0","id":1,"result":null}"#);
        let receipt: Option<TransactionReceipt> =
            decode_response("ledger_getTransactionReceipt", body).unwrap();
        assert!(receipt.is_none());
    }

    #[test]
    fn test_null_result_is_invalid_for_balance() {
        let body = response(r#"{"jsonrpc":"2.0","id":1,"result":null}"#);
        let err = decode_response::<CreditAmount>("ledger_balanceOf", body).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidResponse(_)));
    }

    #[test]
    fn test_balance_decodes_from_string() {
        let body = response(r#"{"jsonrpc":"2.0","id":4,"result":"1500000000000000000"}"#);
        let balance: CreditAmount = decode_response("ledger_balanceOf", body).unwrap();
        assert_eq!(balance.base_units(), 1_500_000_000_000_000_000);
    }

    #[test]
    fn test_mutation_params_shape() {
        let params = mutation_params(
            "0xabc",
            CreditAmount::from_credits(20),
            CreditAmount::from_credits(120),
            CreditAmount::from_credits(100),
        );
        assert_eq!(params["account"], "0xabc");
        assert_eq!(params["amount"], "20000000000000000000");
        assert_eq!(params["emissionCap"], "100000000000000000000");
    }

    #[test]
    fn test_client_construction() {
        let client = JsonRpcLedgerClient::new(&RpcConfig::default()).unwrap();
        assert_eq!(client.endpoint(), "http://127.0.0.1:8545");
    }
}
