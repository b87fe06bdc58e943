//! Base-chain (EVM) payment adapter
//!
//! Read-only JSON-RPC. No keys are held and nothing is signed: the client
//! sends the exact wei amount to the receiver address and submits the tx
//! hash, which `check` verifies against the chain.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::{CheckOutcome, PaymentAdapter, RailError, RailInitiation, RailInstructions};
use crate::config::CryptoConfig;
use crate::purchase::types::{Rail, Transaction};

/// JSON-RPC request structure
#[derive(Serialize)]
struct JsonRpcRequest<T> {
    jsonrpc: &'static str,
    method: &'static str,
    params: T,
    id: u64,
}

/// JSON-RPC response structure
#[derive(Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct EthTransaction {
    from: String,
    to: Option<String>,
    value: String,
    block_number: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct EthReceipt {
    status: Option<String>,
    block_number: String,
}

/// `0x` + 40 hex chars, lowercased
pub fn normalize_address(address: &str) -> Option<String> {
    let body = address.trim().strip_prefix("0x")?;
    if body.len() != 40 || hex::decode(body).is_err() {
        return None;
    }
    Some(format!("0x{}", body.to_ascii_lowercase()))
}

/// `0x` + 64 hex chars, lowercased
pub fn normalize_tx_hash(hash: &str) -> Option<String> {
    let body = hash.trim().strip_prefix("0x")?;
    if body.len() != 64 || hex::decode(body).is_err() {
        return None;
    }
    Some(format!("0x{}", body.to_ascii_lowercase()))
}

fn parse_hex_u64(value: &str) -> Result<u64, RailError> {
    u64::from_str_radix(value.trim_start_matches("0x"), 16)
        .map_err(|e| RailError::Protocol(format!("bad hex quantity '{}': {}", value, e)))
}

fn parse_hex_u128(value: &str) -> Result<u128, RailError> {
    u128::from_str_radix(value.trim_start_matches("0x"), 16)
        .map_err(|e| RailError::Protocol(format!("bad hex quantity '{}': {}", value, e)))
}

pub struct BaseChainAdapter {
    client: Client,
    rpc_url: String,
    chain_id: u64,
    receiver: String,
    required_confirmations: u64,
}

impl BaseChainAdapter {
    pub fn new(config: &CryptoConfig) -> Result<Self, RailError> {
        let receiver = normalize_address(&config.receiver_address).ok_or_else(|| {
            RailError::NotConfigured(format!(
                "invalid receiver address: {}",
                config.receiver_address
            ))
        })?;

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| RailError::NotConfigured(format!("rpc http client: {}", e)))?;

        info!(
            chain_id = config.chain_id,
            receiver = %receiver,
            required_confirmations = config.required_confirmations,
            "Base-chain adapter ready"
        );

        Ok(Self {
            client,
            rpc_url: config.rpc_url.clone(),
            chain_id: config.chain_id,
            receiver,
            required_confirmations: config.required_confirmations.max(1),
        })
    }

    /// Make a JSON-RPC call; `Ok(None)` for a null result
    async fn rpc_call<T, R>(&self, method: &'static str, params: T) -> Result<Option<R>, RailError>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        };

        let response = self.client.post(&self.rpc_url).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(RailError::Network(format!(
                "{}: rpc returned {}",
                method,
                response.status()
            )));
        }

        let rpc_response: JsonRpcResponse<R> = response
            .json()
            .await
            .map_err(|e| RailError::Protocol(format!("{}: {}", method, e)))?;

        if let Some(error) = rpc_response.error {
            return Err(RailError::Protocol(format!(
                "{}: RPC error {}: {}",
                method, error.code, error.message
            )));
        }
        Ok(rpc_response.result)
    }

    async fn block_number(&self) -> Result<u64, RailError> {
        let head: String = self
            .rpc_call("eth_blockNumber", Vec::<String>::new())
            .await?
            .ok_or_else(|| RailError::Protocol("eth_blockNumber: null result".into()))?;
        parse_hex_u64(&head)
    }
}

#[async_trait]
impl PaymentAdapter for BaseChainAdapter {
    fn rail(&self) -> Rail {
        Rail::Crypto
    }

    async fn initiate(&self, tx: &Transaction) -> Result<RailInitiation, RailError> {
        Ok(RailInitiation {
            rail_reference: format!("{}:{}", self.receiver, tx.amount),
            instructions: RailInstructions::Crypto {
                chain_id: self.chain_id,
                to_address: self.receiver.clone(),
                amount_wei: tx.amount.to_string(),
                expires_at: tx.expires_at,
            },
        })
    }

    async fn check(&self, tx: &Transaction) -> Result<CheckOutcome, RailError> {
        let Some(hash) = tx.chain_tx_hash.as_deref() else {
            // Client has not submitted a tx hash yet
            return Ok(CheckOutcome::Unconfirmed);
        };

        let Some(chain_tx) = self
            .rpc_call::<_, EthTransaction>("eth_getTransactionByHash", [hash])
            .await?
        else {
            debug!(transaction_id = %tx.transaction_id, hash, "tx not yet visible");
            return Ok(CheckOutcome::Unconfirmed);
        };

        // Sender and recipient are known before the tx is mined
        let to = chain_tx.to.as_deref().and_then(normalize_address);
        if to.as_deref() != Some(self.receiver.as_str()) {
            return Ok(CheckOutcome::Rejected(format!(
                "recipient {} is not the receiver address",
                chain_tx.to.as_deref().unwrap_or("<contract creation>")
            )));
        }

        let Some(expected) = tx.payer_address.as_deref().and_then(normalize_address) else {
            return Ok(CheckOutcome::Rejected("no expected payer address on record".into()));
        };
        if normalize_address(&chain_tx.from).as_deref() != Some(expected.as_str()) {
            return Ok(CheckOutcome::Rejected(format!(
                "sender {} is not the expected payer",
                chain_tx.from
            )));
        }

        if chain_tx.block_number.is_none() {
            return Ok(CheckOutcome::Unconfirmed);
        }

        let Some(receipt) = self
            .rpc_call::<_, EthReceipt>("eth_getTransactionReceipt", [hash])
            .await?
        else {
            return Ok(CheckOutcome::Unconfirmed);
        };
        if receipt.status.as_deref() != Some("0x1") {
            return Ok(CheckOutcome::Rejected("transaction reverted".into()));
        }

        let block = parse_hex_u64(&receipt.block_number)?;
        let head = self.block_number().await?;
        let confirmations = if head >= block { head - block + 1 } else { 0 };
        if confirmations < self.required_confirmations {
            debug!(
                transaction_id = %tx.transaction_id,
                confirmations,
                required = self.required_confirmations,
                "waiting for confirmations"
            );
            return Ok(CheckOutcome::Unconfirmed);
        }

        // Value comes from the chain record, never from the client
        let value = parse_hex_u128(&chain_tx.value)?;
        if value != tx.amount {
            return Ok(CheckOutcome::Rejected(format!(
                "transferred {} wei, expected {}",
                value, tx.amount
            )));
        }

        Ok(CheckOutcome::Confirmed {
            settled_amount: value,
        })
    }
}
