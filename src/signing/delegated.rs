// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Delegated signing through an external gateway.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use utoipa::ToSchema;

use super::{SignOutcome, SignerError, TransactionSigner};
use crate::ledger::TxTemplate;

/// Handle returned when a signing request was handed to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GatewayHandle {
    /// Gateway-side request id.
    pub request_id: String,
    /// Deep link the end user opens to sign.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_url: Option<String>,
    /// QR code image for the same request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// State of a signing request as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayState {
    Pending,
    /// Signed by the user; the platform must submit the blob.
    Signed {
        blob_hex: String,
        tx_hash: Option<String>,
    },
    /// Signed and submitted by the gateway itself.
    Submitted { tx_hash: String },
    Declined,
    Expired,
}

#[async_trait]
pub trait SigningGateway: Send + Sync {
    /// Open a signing request for an unsigned transaction.
    async fn create_request(&self, tx_json: Value) -> Result<GatewayHandle, GatewayError>;

    /// Current state of a signing request.
    async fn request_state(&self, request_id: &str) -> Result<GatewayState, GatewayError>;
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Signing gateway configuration missing: {0}")]
    MissingConfig(String),

    #[error("Signing gateway request failed: {0}")]
    Request(String),

    #[error("Signing gateway timed out after {0:?}")]
    Timeout(Duration),

    #[error("Signing gateway response was invalid: {0}")]
    InvalidResponse(String),

    #[error("Signing request not found: {0}")]
    NotFound(String),
}

pub struct DelegatedSigner {
    gateway: Arc<dyn SigningGateway>,
}

impl DelegatedSigner {
    pub fn new(gateway: Arc<dyn SigningGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl TransactionSigner for DelegatedSigner {
    async fn sign(&self, template: TxTemplate) -> Result<SignOutcome, SignerError> {
        // Sequence, fee and expiry are left for the gateway/wallet to fill.
        let handle = self.gateway.create_request(template.to_json()).await?;
        info!(
            account = %template.account,
            kind = template.kind.as_str(),
            request_id = %handle.request_id,
            "Delegated signing request opened"
        );
        Ok(SignOutcome::Pending(handle))
    }
}
