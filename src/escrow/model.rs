// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Escrow records and their satellites (milestones, transaction log,
//! signing requests).

use std::fmt;

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Escrow lifecycle state.
///
/// `Pending -> Active -> {Completed | Cancelled}`; `Disputed` is a side-state
/// of `Active` entered by the dispute subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Pending,
    Active,
    Disputed,
    Completed,
    Cancelled,
}

impl EscrowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Disputed => "disputed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the escrowed funds become releasable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseType {
    /// Released on request of the initiator.
    #[serde(alias = "immediate")]
    Custom,
    /// Releasable from `release_at`.
    TimeBased,
    /// Tracked in milestones, released as a whole.
    MilestoneBased,
}

/// Who holds the initiator's signing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SigningMode {
    /// Platform-custodied seed, signed in process.
    #[default]
    Direct,
    /// End-user wallet, signed through the signing gateway.
    Delegated,
}

/// Human-readable escrow reference, `ESC-<year>-<sequence>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DisplayId {
    pub year: i32,
    pub sequence: u32,
}

impl DisplayId {
    /// Placeholder until the store allocates the sequence.
    pub fn unallocated(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            sequence: 0,
        }
    }
}

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ESC-{}-{:06}", self.year, self.sequence)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Escrow {
    pub id: Uuid,
    pub display_id: DisplayId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub initiator_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty_address: Option<String>,
    pub signing_mode: SigningMode,

    /// Ledger-native amount in drops.
    pub amount_drops: u64,
    /// Fiat reference amount.
    #[schema(value_type = String)]
    pub amount_fiat: Decimal,
    pub fiat_currency: String,
    /// Fiat price of one XRP at creation.
    #[schema(value_type = String)]
    pub exchange_rate: Decimal,

    pub release_type: ReleaseType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_at: Option<DateTime<Utc>>,
    /// Ripple-epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_after: Option<u32>,
    /// Ripple-epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_after: Option<u32>,

    pub status: EscrowStatus,
    /// Completion percentage (0-100).
    pub progress: u8,

    /// Hash of the creating `EscrowCreate`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_tx_hash: Option<String>,
    /// Account sequence of the creating transaction, once resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_sequence: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Escrow {
    /// Whether `user_id` is one of the two parties.
    pub fn is_party(&self, user_id: &str) -> bool {
        self.initiator_id == user_id || self.counterparty_id.as_deref() == Some(user_id)
    }

    /// `(user_id, address)` of every party.
    pub fn parties(&self) -> Vec<(&str, Option<&str>)> {
        let mut parties = vec![(
            self.initiator_id.as_str(),
            self.initiator_address.as_deref(),
        )];
        if let Some(counterparty) = &self.counterparty_id {
            parties.push((counterparty.as_str(), self.counterparty_address.as_deref()));
        }
        parties
    }
}

/// Field changes applied together with a conditional status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowUpdate {
    pub status: EscrowStatus,
    pub create_tx_hash: Option<String>,
    pub ledger_sequence: Option<u32>,
    pub progress: Option<u8>,
    pub cancel_reason: Option<String>,
    pub at: DateTime<Utc>,
}

impl EscrowUpdate {
    pub fn to(status: EscrowStatus) -> Self {
        Self {
            status,
            create_tx_hash: None,
            ledger_sequence: None,
            progress: None,
            cancel_reason: None,
            at: Utc::now(),
        }
    }

    pub fn tx_hash(mut self, hash: impl Into<String>) -> Self {
        self.create_tx_hash = Some(hash.into());
        self
    }

    pub fn sequence(mut self, sequence: u32) -> Self {
        self.ledger_sequence = Some(sequence);
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn reason(mut self, reason: Option<String>) -> Self {
        self.cancel_reason = reason;
        self
    }

    /// Apply to a record; timestamps follow the target status.
    pub fn apply(&self, escrow: &mut Escrow) {
        escrow.status = self.status;
        escrow.updated_at = self.at;
        if let Some(hash) = &self.create_tx_hash {
            escrow.create_tx_hash = Some(hash.clone());
        }
        if let Some(sequence) = self.ledger_sequence {
            escrow.ledger_sequence = Some(sequence);
        }
        if let Some(progress) = self.progress {
            escrow.progress = progress;
        }
        if self.cancel_reason.is_some() {
            escrow.cancel_reason = self.cancel_reason.clone();
        }
        match self.status {
            EscrowStatus::Completed if escrow.completed_at.is_none() => {
                escrow.completed_at = Some(self.at)
            }
            EscrowStatus::Cancelled if escrow.cancelled_at.is_none() => {
                escrow.cancelled_at = Some(self.at)
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Milestone {
    pub id: Uuid,
    pub escrow_id: Uuid,
    pub order_index: u32,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[schema(value_type = String)]
    pub amount_fiat: Decimal,
    pub amount_drops: u64,
    pub status: MilestoneStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Ledger operation an audit record or signing request refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Release,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    /// Waiting on a delegated signature.
    Pending,
    Confirmed,
    Failed,
    Cancelled,
    /// Off-chain record corrected to match the ledger.
    Reconciled,
}

/// One entry of an escrow's transaction log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AuditTransaction {
    pub id: Uuid,
    pub escrow_id: Uuid,
    pub operation: OperationKind,
    pub status: AuditStatus,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditTransaction {
    pub fn new(escrow_id: Uuid, operation: OperationKind, status: AuditStatus, actor: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            escrow_id,
            operation,
            status,
            actor: actor.to_string(),
            tx_hash: None,
            result_code: None,
            message: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_tx_hash(mut self, tx_hash: Option<&str>) -> Self {
        self.tx_hash = tx_hash.map(str::to_string);
        self
    }

    pub fn with_result(mut self, code: &str) -> Self {
        self.result_code = Some(code.to_string());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SigningRequestStatus {
    Open,
    Submitted,
    Declined,
    Expired,
    /// Withdrawn because the escrow was cancelled.
    Cancelled,
    /// Signed, but the ledger refused the transaction.
    Rejected,
}

impl SigningRequestStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Open)
    }
}

/// Correlation between an escrow operation and a gateway signing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PendingSigningRequest {
    pub request_id: String,
    pub escrow_id: Uuid,
    pub operation: OperationKind,
    pub status: SigningRequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_code: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PendingSigningRequest {
    pub fn resolve(&mut self, status: SigningRequestStatus) {
        self.status = status;
        self.resolved_at = Some(Utc::now());
    }
}
