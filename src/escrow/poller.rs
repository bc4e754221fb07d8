// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Delegated signing request polling.
//!
//! A poll asks the gateway for the state of the escrow's latest signing
//! request and drives the escrow forward. Once a request reached a terminal
//! state it is never sent to the gateway again: later polls replay the
//! stored outcome.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::envelope::Envelope;
use super::error::EscrowError;
use super::model::{
    AuditStatus, AuditTransaction, Escrow, EscrowStatus, EscrowUpdate, OperationKind,
    PendingSigningRequest, SigningRequestStatus,
};
use super::service::{authorize_party, EscrowService, EscrowView};
use crate::providers::EscrowEvent;
use crate::signing::{GatewayError, GatewayState};

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PollOutcome {
    StillPending {
        #[serde(skip_serializing_if = "Option::is_none")]
        next_url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        expires_at: Option<DateTime<Utc>>,
    },
    SignedAndSubmitted {
        tx_hash: String,
        status: EscrowStatus,
    },
    Declined {
        operation: OperationKind,
    },
    Expired {
        operation: OperationKind,
    },
    /// Withdrawn because the escrow was cancelled meanwhile.
    Cancelled {
        operation: OperationKind,
    },
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PollReport {
    pub escrow_id: Uuid,
    pub request_id: String,
    #[serde(flatten)]
    pub outcome: PollOutcome,
    pub escrow: EscrowView,
}

impl EscrowService {
    pub async fn poll_signing(&self, caller: &str, escrow_id: Uuid) -> Envelope<PollReport> {
        match self.poll(caller, escrow_id).await {
            Ok(report) => match &report.outcome {
                PollOutcome::Declined { .. } => {
                    Envelope::fail_with(&EscrowError::GatewayDeclined, report)
                }
                PollOutcome::Expired { .. } => {
                    Envelope::fail_with(&EscrowError::GatewayExpired, report)
                }
                PollOutcome::Cancelled { .. } => {
                    let error = EscrowError::InvalidState {
                        status: EscrowStatus::Cancelled,
                        operation: "sign",
                    };
                    Envelope::fail_with(&error, report)
                }
                PollOutcome::StillPending { .. } => Envelope::ok("Awaiting signature", report),
                PollOutcome::SignedAndSubmitted { .. } => {
                    Envelope::ok("Signed transaction accepted by the ledger", report)
                }
            },
            Err(e) => Envelope::fail(&e),
        }
    }

    pub async fn poll(&self, caller: &str, escrow_id: Uuid) -> Result<PollReport, EscrowError> {
        let _guard = self.locks.acquire(escrow_id).await;

        let escrow = self.load(escrow_id)?;
        authorize_party(&escrow, caller)?;
        let request = self
            .store
            .latest_signing_request(escrow_id)?
            .ok_or(EscrowError::NoPendingSigningRequest)?;

        if request.status.is_terminal() {
            return self.replay(escrow, request, caller).await;
        }

        let gateway = self.gateway.clone().ok_or_else(|| {
            EscrowError::GatewayUnavailable("delegated signing is not configured".to_string())
        })?;
        let state = match gateway.request_state(&request.request_id).await {
            Ok(state) => state,
            Err(GatewayError::NotFound(_)) => GatewayState::Expired,
            Err(e) => return Err(e.into()),
        };
        info!(
            escrow_id = %escrow_id,
            request_id = %request.request_id,
            state = ?state,
            "Polled signing request"
        );

        match state {
            GatewayState::Pending => {
                let outcome = PollOutcome::StillPending {
                    next_url: request.next_url.clone(),
                    expires_at: request.expires_at,
                };
                Ok(self.report(escrow, &request, outcome))
            }
            GatewayState::Signed { blob_hex, .. } => {
                match self.submit(&blob_hex).await {
                    Ok(result) => {
                        self.accept_submitted(escrow, request, &result.tx_hash, caller)
                            .await
                    }
                    Err(e @ EscrowError::LedgerRejected { .. }) => {
                        Err(self.reject_request(escrow, request, e, caller).await)
                    }
                    // Transport failures leave the request open for the next poll.
                    Err(e) => Err(e),
                }
            }
            GatewayState::Submitted { tx_hash } => {
                self.accept_submitted(escrow, request, &tx_hash, caller)
                    .await
            }
            GatewayState::Declined => {
                self.close_request(escrow, request, SigningRequestStatus::Declined, caller)
                    .await
            }
            GatewayState::Expired => {
                self.close_request(escrow, request, SigningRequestStatus::Expired, caller)
                    .await
            }
        }
    }

    /// Answer a poll of a resolved request from stored state alone.
    async fn replay(
        &self,
        escrow: Escrow,
        request: PendingSigningRequest,
        actor: &str,
    ) -> Result<PollReport, EscrowError> {
        let operation = request.operation;
        match request.status {
            SigningRequestStatus::Submitted => {
                let tx_hash = request.tx_hash.clone().unwrap_or_default();
                let escrow = self
                    .finalize_request(escrow, operation, &tx_hash, actor)
                    .await?;
                let outcome = PollOutcome::SignedAndSubmitted {
                    tx_hash,
                    status: escrow.status,
                };
                Ok(self.report(escrow, &request, outcome))
            }
            SigningRequestStatus::Rejected => Err(EscrowError::rejected(
                request.result_code.as_deref().unwrap_or("tefFAILURE"),
            )),
            SigningRequestStatus::Declined => {
                Ok(self.report(escrow, &request, PollOutcome::Declined { operation }))
            }
            SigningRequestStatus::Expired => {
                Ok(self.report(escrow, &request, PollOutcome::Expired { operation }))
            }
            SigningRequestStatus::Cancelled | SigningRequestStatus::Open => {
                Ok(self.report(escrow, &request, PollOutcome::Cancelled { operation }))
            }
        }
    }

    /// The signed transaction is on the ledger: record it, then finalize.
    async fn accept_submitted(
        &self,
        escrow: Escrow,
        mut request: PendingSigningRequest,
        tx_hash: &str,
        actor: &str,
    ) -> Result<PollReport, EscrowError> {
        request.resolve(SigningRequestStatus::Submitted);
        request.tx_hash = Some(tx_hash.to_string());
        self.persist("mark signing request submitted", || {
            self.store.put_signing_request(&request)
        })
        .await?;

        let escrow = self
            .finalize_request(escrow, request.operation, tx_hash, actor)
            .await?;
        let outcome = PollOutcome::SignedAndSubmitted {
            tx_hash: tx_hash.to_string(),
            status: escrow.status,
        };
        Ok(self.report(escrow, &request, outcome))
    }

    /// Apply the escrow transition of a submitted request. Idempotent.
    async fn finalize_request(
        &self,
        escrow: Escrow,
        operation: OperationKind,
        tx_hash: &str,
        actor: &str,
    ) -> Result<Escrow, EscrowError> {
        match (operation, escrow.status) {
            (OperationKind::Create, EscrowStatus::Pending) => {
                self.finalize_create(escrow, tx_hash, actor).await
            }
            (OperationKind::Release, status) if !status.is_terminal() => Ok(self
                .finalize_release(escrow, tx_hash, actor)
                .await?
                .escrow),
            _ => Ok(escrow),
        }
    }

    /// Record a ledger rejection of a user-signed transaction.
    async fn reject_request(
        &self,
        escrow: Escrow,
        mut request: PendingSigningRequest,
        error: EscrowError,
        actor: &str,
    ) -> EscrowError {
        let code = match &error {
            EscrowError::LedgerRejected { code, .. } => code.clone(),
            _ => String::new(),
        };
        request.resolve(SigningRequestStatus::Rejected);
        request.result_code = Some(code.clone());
        if let Err(e) = self
            .persist("mark signing request rejected", || {
                self.store.put_signing_request(&request)
            })
            .await
        {
            warn!(escrow_id = %escrow.id, error = %e, "Failed to record rejected signing request");
        }

        if request.operation == OperationKind::Release && code == "tecNO_TARGET" {
            if let Some(sequence) = escrow.ledger_sequence {
                return self.recover_stale_sequence(escrow, sequence, actor).await;
            }
        }
        self.record_failure(&escrow, request.operation, actor, &error)
            .await;
        error
    }

    /// The user declined or the request expired.
    async fn close_request(
        &self,
        escrow: Escrow,
        mut request: PendingSigningRequest,
        status: SigningRequestStatus,
        actor: &str,
    ) -> Result<PollReport, EscrowError> {
        request.resolve(status);
        self.persist("close signing request", || {
            self.store.put_signing_request(&request)
        })
        .await?;

        let operation = request.operation;
        let what = match status {
            SigningRequestStatus::Declined => "declined",
            _ => "expired",
        };
        let escrow = if operation == OperationKind::Create && escrow.status == EscrowStatus::Pending
        {
            let update = EscrowUpdate::to(EscrowStatus::Cancelled)
                .reason(Some(format!("signing request {what}")));
            let cancelled = self
                .persist("cancel unsigned escrow", || {
                    self.store
                        .update_escrow_status(escrow.id, &[EscrowStatus::Pending], &update)
                })
                .await?;
            self.record_audit(
                AuditTransaction::new(cancelled.id, operation, AuditStatus::Cancelled, actor)
                    .with_message(format!("signing request {what}")),
            )
            .await;
            self.notify_parties(&cancelled, EscrowEvent::Cancelled).await;
            cancelled
        } else {
            self.record_audit(
                AuditTransaction::new(escrow.id, operation, AuditStatus::Failed, actor)
                    .with_message(format!("signing request {what}")),
            )
            .await;
            escrow
        };
        info!(escrow_id = %escrow.id, request_id = %request.request_id, what, "Signing request closed");

        let outcome = match status {
            SigningRequestStatus::Declined => PollOutcome::Declined { operation },
            _ => PollOutcome::Expired { operation },
        };
        Ok(self.report(escrow, &request, outcome))
    }

    fn report(
        &self,
        escrow: Escrow,
        request: &PendingSigningRequest,
        outcome: PollOutcome,
    ) -> PollReport {
        PollReport {
            escrow_id: escrow.id,
            request_id: request.request_id.clone(),
            outcome,
            escrow: self.view(escrow),
        }
    }
}
