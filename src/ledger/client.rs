// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! XRP Ledger JSON-RPC client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::parse::{
    parse_account_info, parse_commitment, parse_list, parse_submit, parse_transaction,
};
use super::types::*;

/// Error codes the server uses for "this thing does not exist".
const NOT_FOUND_ERRORS: &[&str] = &["txnNotFound", "actNotFound", "entryNotFound"];

/// Ledger operations consumed by the escrow engine.
///
/// Not-found is reported through `Option` / empty lists rather than as an
/// error so callers can drive fallback strategies from it.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Fetch account state (sequence, balance).
    async fn account_info(&self, address: &str) -> Result<AccountInfo, LedgerError>;

    /// Index of the current open ledger.
    async fn current_ledger_index(&self) -> Result<u32, LedgerError>;

    /// Submit a signed transaction blob (hex).
    async fn submit_signed(&self, blob_hex: &str) -> Result<SubmitResult, LedgerError>;

    /// Look up a transaction by hash.
    async fn transaction(&self, tx_hash: &str) -> Result<Option<LedgerTransaction>, LedgerError>;

    /// List the open escrow objects owned by an account.
    async fn open_commitments(&self, address: &str) -> Result<Vec<CommitmentObject>, LedgerError>;

    /// List an account's recent transactions, newest first.
    async fn account_history(
        &self,
        address: &str,
        window: HistoryWindow,
    ) -> Result<Vec<LedgerTransaction>, LedgerError>;

    /// Convenience accessor for the next usable account sequence.
    async fn account_sequence(&self, address: &str) -> Result<u32, LedgerError> {
        Ok(self.account_info(address).await?.sequence)
    }
}

/// XRPL JSON-RPC client over HTTPS.
///
/// Every call is a single request/response exchange; the connection is handed
/// back to the pool (or dropped) when the call returns, times out or fails.
pub struct XrplClient {
    network: NetworkConfig,
    rpc_url: url::Url,
    timeout: Duration,
    http: Client,
}

impl XrplClient {
    /// Create a client for the given network, optionally overriding its RPC URL.
    pub fn new(
        network: NetworkConfig,
        rpc_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, LedgerError> {
        let raw = rpc_url.unwrap_or(network.rpc_url);
        let rpc_url: url::Url = raw
            .parse()
            .map_err(|e: url::ParseError| LedgerError::InvalidRpcUrl(e.to_string()))?;

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            network,
            rpc_url,
            timeout,
            http,
        })
    }

    /// Create a client for the XRPL testnet.
    pub fn testnet(timeout: Duration) -> Result<Self, LedgerError> {
        Self::new(XRPL_TESTNET, None, timeout)
    }

    /// Get the network configuration.
    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    /// Perform one JSON-RPC call and return its `result` object.
    async fn call(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        let body = json!({ "method": method, "params": [params] });
        tracing::debug!(method, "Ledger RPC call");

        let exchange = async {
            let response = self
                .http
                .post(self.rpc_url.clone())
                .json(&body)
                .send()
                .await
                .map_err(|e| LedgerError::Transport(e.to_string()))?;

            if !response.status().is_success() {
                return Err(LedgerError::Transport(format!(
                    "{method} returned HTTP {}",
                    response.status()
                )));
            }

            response
                .json::<Value>()
                .await
                .map_err(|e| LedgerError::MalformedResponse(e.to_string()))
        };

        let payload = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| LedgerError::Timeout(self.timeout))??;

        let result = payload
            .get("result")
            .cloned()
            .ok_or_else(|| LedgerError::MalformedResponse(format!("{method}: missing result")))?;

        if result.get("status").and_then(Value::as_str) == Some("error") {
            let code = result
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            let message = result
                .get("error_message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Err(LedgerError::Rpc { code, message });
        }

        Ok(result)
    }
}

#[async_trait]
impl LedgerRpc for XrplClient {
    async fn account_info(&self, address: &str) -> Result<AccountInfo, LedgerError> {
        let result = self
            .call(
                "account_info",
                json!({ "account": address, "ledger_index": "current" }),
            )
            .await
            .map_err(|e| match e {
                e if e.is_not_found() => LedgerError::AccountNotFound(address.to_string()),
                other => other,
            })?;
        parse_account_info(&result)
    }

    async fn current_ledger_index(&self) -> Result<u32, LedgerError> {
        let result = self.call("ledger_current", json!({})).await?;
        result
            .get("ledger_current_index")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| LedgerError::MalformedResponse("missing ledger_current_index".into()))
    }

    async fn submit_signed(&self, blob_hex: &str) -> Result<SubmitResult, LedgerError> {
        let result = self.call("submit", json!({ "tx_blob": blob_hex })).await?;
        parse_submit(&result)
    }

    async fn transaction(&self, tx_hash: &str) -> Result<Option<LedgerTransaction>, LedgerError> {
        match self
            .call("tx", json!({ "transaction": tx_hash, "binary": false }))
            .await
        {
            Ok(result) => parse_transaction(&result).map(Some),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn open_commitments(&self, address: &str) -> Result<Vec<CommitmentObject>, LedgerError> {
        let result = match self
            .call(
                "account_objects",
                json!({
                    "account": address,
                    "type": "escrow",
                    "ledger_index": "validated",
                    "limit": 400
                }),
            )
            .await
        {
            Ok(result) => result,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        Ok(parse_list(
            result.get("account_objects"),
            parse_commitment,
            "escrow object",
        ))
    }

    async fn account_history(
        &self,
        address: &str,
        window: HistoryWindow,
    ) -> Result<Vec<LedgerTransaction>, LedgerError> {
        let min = window.ledger_index_min.map(i64::from).unwrap_or(-1);
        let result = match self
            .call(
                "account_tx",
                json!({
                    "account": address,
                    "ledger_index_min": min,
                    "ledger_index_max": -1,
                    "limit": window.limit,
                    "forward": false
                }),
            )
            .await
        {
            Ok(result) => result,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        Ok(parse_list(
            result.get("transactions"),
            parse_transaction,
            "account transaction",
        ))
    }
}

/// Errors that can occur during ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(String),

    #[error("Ledger transport error: {0}")]
    Transport(String),

    #[error("Ledger call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Ledger RPC error {code}: {message}")]
    Rpc { code: String, message: String },

    #[error("Account not found on ledger: {0}")]
    AccountNotFound(String),

    #[error("Malformed ledger response: {0}")]
    MalformedResponse(String),
}

impl LedgerError {
    /// Whether the server reported the requested entity as absent.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Rpc { code, .. } => NOT_FOUND_ERRORS.contains(&code.as_str()),
            Self::AccountNotFound(_) => true,
            _ => false,
        }
    }

    /// Network-level failures the caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}
