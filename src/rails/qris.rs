//! QRIS gateway adapter
//!
//! HTTP JSON API, server-key bearer auth:
//! - `POST {base}/v1/qris/charges` creates a dynamic QR for an exact IDR amount
//! - `GET  {base}/v1/qris/charges/{gateway_txn_id}` reports its status

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{CheckOutcome, PaymentAdapter, RailError, RailInitiation, RailInstructions};
use crate::config::QrisConfig;
use crate::purchase::types::{Rail, Transaction};

#[derive(Serialize)]
struct ChargeRequest<'a> {
    reference_id: String,
    amount: u64,
    currency: &'a str,
}

#[derive(Deserialize, Debug)]
struct ChargeResponse {
    gateway_txn_id: String,
    qr_string: String,
    #[serde(default)]
    qr_url: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ChargeStatus {
    status: String,
    #[serde(default)]
    paid_amount: Option<u64>,
    #[serde(default)]
    amount: Option<u64>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct GatewayError {
    #[serde(default)]
    message: Option<String>,
}

pub struct QrisAdapter {
    client: Client,
    base_url: String,
    server_key: String,
}

impl QrisAdapter {
    pub fn new(config: &QrisConfig) -> Result<Self, RailError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| RailError::NotConfigured(format!("qris http client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            server_key: config.server_key.clone(),
        })
    }

    async fn rejection_message(response: reqwest::Response) -> String {
        let status = response.status();
        match response.json::<GatewayError>().await {
            Ok(GatewayError {
                message: Some(message),
            }) => message,
            _ => format!("gateway returned {}", status),
        }
    }

    fn outcome(tx: &Transaction, status: ChargeStatus) -> CheckOutcome {
        match status.status.to_ascii_uppercase().as_str() {
            "PAID" | "SETTLEMENT" => {
                let Some(settled) = status.paid_amount.or(status.amount) else {
                    return CheckOutcome::Rejected("gateway reported payment without amount".into());
                };
                let settled = u128::from(settled);
                if settled != tx.amount {
                    // amount mismatch is final for this transaction
                    return CheckOutcome::Rejected(format!(
                        "gateway settled {} IDR, expected {}",
                        settled, tx.amount
                    ));
                }
                CheckOutcome::Confirmed {
                    settled_amount: settled,
                }
            }
            "EXPIRED" | "FAILED" | "CANCELLED" | "DENY" => CheckOutcome::Rejected(
                status
                    .reason
                    .unwrap_or_else(|| format!("gateway status {}", status.status)),
            ),
            _ => CheckOutcome::Unconfirmed,
        }
    }
}

#[async_trait]
impl PaymentAdapter for QrisAdapter {
    fn rail(&self) -> Rail {
        Rail::Qris
    }

    async fn initiate(&self, tx: &Transaction) -> Result<RailInitiation, RailError> {
        let amount = u64::try_from(tx.amount)
            .map_err(|_| RailError::Rejected(format!("amount {} out of range", tx.amount)))?;

        let response = self
            .client
            .post(format!("{}/v1/qris/charges", self.base_url))
            .bearer_auth(&self.server_key)
            .json(&ChargeRequest {
                reference_id: tx.transaction_id.to_string(),
                amount,
                currency: "IDR",
            })
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() {
            return Err(RailError::Rejected(Self::rejection_message(response).await));
        }
        if !status.is_success() {
            return Err(RailError::Network(format!("gateway returned {}", status)));
        }

        let charge: ChargeResponse = response
            .json()
            .await
            .map_err(|e| RailError::Protocol(format!("charge response: {}", e)))?;

        debug!(
            transaction_id = %tx.transaction_id,
            gateway_txn_id = %charge.gateway_txn_id,
            "QRIS charge created"
        );

        Ok(RailInitiation {
            rail_reference: charge.gateway_txn_id.clone(),
            instructions: RailInstructions::Qris {
                qr_string: charge.qr_string,
                qr_url: charge.qr_url,
                gateway_txn_id: charge.gateway_txn_id,
                expires_at: tx.expires_at,
            },
        })
    }

    async fn check(&self, tx: &Transaction) -> Result<CheckOutcome, RailError> {
        let gateway_txn_id = tx
            .rail_reference
            .as_deref()
            .ok_or_else(|| RailError::Protocol("transaction has no gateway reference".into()))?;

        let response = self
            .client
            .get(format!("{}/v1/qris/charges/{}", self.base_url, gateway_txn_id))
            .bearer_auth(&self.server_key)
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => {}
            s if s == StatusCode::NOT_FOUND => {
                warn!(transaction_id = %tx.transaction_id, gateway_txn_id, "QRIS charge not found");
                return Err(RailError::Protocol("charge not found".into()));
            }
            s => return Err(RailError::Network(format!("gateway returned {}", s))),
        }

        let status: ChargeStatus = response
            .json()
            .await
            .map_err(|e| RailError::Protocol(format!("status response: {}", e)))?;

        Ok(Self::outcome(tx, status))
    }
}
