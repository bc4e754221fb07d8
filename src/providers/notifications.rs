// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Party notifications.
//!
//! Delivery (push, e-mail, in-app) belongs to the platform. The engine only
//! emits events; a failed notification never fails an escrow operation.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowEvent {
    Created,
    /// A delegated signature is awaited from the party.
    SigningRequested,
    Completed,
    Cancelled,
    /// The off-chain record was corrected to match the ledger.
    StatusCorrected,
}

impl EscrowEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "escrow_created",
            Self::SigningRequested => "escrow_signing_requested",
            Self::Completed => "escrow_completed",
            Self::Cancelled => "escrow_cancelled",
            Self::StatusCorrected => "escrow_status_corrected",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Notification delivery failed: {0}")]
pub struct NotificationError(pub String);

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(
        &self,
        user_id: &str,
        event: EscrowEvent,
        payload: Value,
    ) -> Result<(), NotificationError>;
}

/// Emits every notification as a structured log event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationSink for TracingNotifier {
    async fn notify(
        &self,
        user_id: &str,
        event: EscrowEvent,
        payload: Value,
    ) -> Result<(), NotificationError> {
        info!(
            user_id,
            event = event.as_str(),
            payload = %payload,
            "Escrow notification"
        );
        Ok(())
    }
}
