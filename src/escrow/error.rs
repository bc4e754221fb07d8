// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Escrow engine error taxonomy.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::model::EscrowStatus;
use super::resolver::{NotFoundReason, TerminalKind};
use crate::ledger::{describe_result, LedgerError};
use crate::providers::{DirectoryError, RateError};
use crate::signing::{GatewayError, SignerError};
use crate::storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EscrowError {
    #[error("Invalid escrow terms: {0}")]
    Validation(String),

    #[error("Party resolution failed: {0}")]
    PartyResolution(String),

    #[error("Escrow {0} not found")]
    NotFound(Uuid),

    #[error("{0}")]
    Forbidden(String),

    #[error("Cannot {operation} an escrow that is {status}")]
    InvalidState {
        status: EscrowStatus,
        operation: &'static str,
    },

    #[error("Escrow is disputed; an explicit dispute override is required")]
    Disputed,

    #[error("Escrow is not releasable before {0}")]
    NotYetReleasable(DateTime<Utc>),

    #[error("Escrow commitment expired at {0}; it can only be cancelled")]
    CommitmentExpired(DateTime<Utc>),

    #[error("Exchange rate unavailable: {0}")]
    RateUnavailable(String),

    #[error("Signing key does not belong to {expected} (derives {derived})")]
    SignerMismatch { expected: String, derived: String },

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("{message}")]
    LedgerRejected { code: String, message: String },

    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("{}", not_found_message(.0))]
    CommitmentNotFound(NotFoundReason),

    #[error("{}", terminal_message(.kind, .tx_hash))]
    CommitmentAlreadyTerminal {
        kind: TerminalKind,
        tx_hash: Option<String>,
    },

    #[error("Releasing a conditional escrow requires a fulfillment, which is not supported")]
    UnsupportedConditionalRelease,

    #[error("The signing request was declined")]
    GatewayDeclined,

    #[error("The signing request expired")]
    GatewayExpired,

    #[error("Signing gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("A signing request is already open for this escrow ({request_id})")]
    SigningInProgress { request_id: String },

    #[error("No signing request exists for this escrow")]
    NoPendingSigningRequest,

    #[error("Escrow changed concurrently: {0}")]
    Conflict(String),

    #[error("Escrow record store failed: {0}")]
    Store(String),
}

fn not_found_message(reason: &NotFoundReason) -> &'static str {
    match reason {
        NotFoundReason::NoTransactionHash => {
            "Escrow has no ledger transaction yet and cannot be settled"
        }
        NotFoundReason::NoMatchingObjectOrHistory => {
            "Escrow commitment was not found on the ledger; it was probably resolved outside this platform"
        }
    }
}

fn terminal_message(kind: &TerminalKind, tx_hash: &Option<String>) -> String {
    let what = match kind {
        TerminalKind::Finished => "already released",
        TerminalKind::Cancelled => "already cancelled",
    };
    match tx_hash {
        Some(hash) => format!("Escrow was {what} on the ledger (transaction {hash})"),
        None => format!("Escrow was {what} on the ledger"),
    }
}

impl EscrowError {
    pub fn rejected(code: &str) -> Self {
        Self::LedgerRejected {
            code: code.to_string(),
            message: describe_result(code),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::PartyResolution(_) => "PARTY_RESOLUTION_ERROR",
            Self::NotFound(_) => "ESCROW_NOT_FOUND",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::Disputed => "ESCROW_DISPUTED",
            Self::NotYetReleasable(_) => "NOT_YET_RELEASABLE",
            Self::CommitmentExpired(_) => "COMMITMENT_EXPIRED",
            Self::RateUnavailable(_) => "RATE_UNAVAILABLE",
            Self::SignerMismatch { .. } => "SIGNER_MISMATCH",
            Self::Signing(_) => "SIGNING_ERROR",
            Self::LedgerRejected { .. } => "LEDGER_REJECTED",
            Self::LedgerUnavailable(_) => "LEDGER_UNAVAILABLE",
            Self::CommitmentNotFound(_) => "COMMITMENT_NOT_FOUND",
            Self::CommitmentAlreadyTerminal { .. } => "COMMITMENT_ALREADY_TERMINAL",
            Self::UnsupportedConditionalRelease => "UNSUPPORTED_CONDITIONAL_RELEASE",
            Self::GatewayDeclined => "GATEWAY_DECLINED",
            Self::GatewayExpired => "GATEWAY_EXPIRED",
            Self::GatewayUnavailable(_) => "GATEWAY_UNAVAILABLE",
            Self::SigningInProgress { .. } => "SIGNING_IN_PROGRESS",
            Self::NoPendingSigningRequest => "NO_PENDING_SIGNING_REQUEST",
            Self::Conflict(_) => "CONFLICT",
            Self::Store(_) => "STORE_ERROR",
        }
    }
}

impl From<StoreError> for EscrowError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict { .. } => Self::Conflict(e.to_string()),
            other => Self::Store(other.to_string()),
        }
    }
}

impl From<LedgerError> for EscrowError {
    fn from(e: LedgerError) -> Self {
        Self::LedgerUnavailable(e.to_string())
    }
}

impl From<RateError> for EscrowError {
    fn from(e: RateError) -> Self {
        Self::RateUnavailable(e.to_string())
    }
}

impl From<DirectoryError> for EscrowError {
    fn from(e: DirectoryError) -> Self {
        Self::PartyResolution(e.to_string())
    }
}

impl From<GatewayError> for EscrowError {
    fn from(e: GatewayError) -> Self {
        Self::GatewayUnavailable(e.to_string())
    }
}

impl From<SignerError> for EscrowError {
    fn from(e: SignerError) -> Self {
        match e {
            SignerError::SignerMismatch { expected, derived } => {
                Self::SignerMismatch { expected, derived }
            }
            SignerError::Ledger(e) => e.into(),
            SignerError::Gateway(e) => e.into(),
            other => Self::Signing(other.to_string()),
        }
    }
}
