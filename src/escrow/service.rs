// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Escrow Lifecycle Service
//!
//! Orchestrates create, release, cancel and reconcile. Every operation is a
//! sequence of named steps that short-circuit on the first error:
//!
//! ```text
//! create:    validate -> resolve parties -> quote -> sign -> submit -> persist -> side effects
//! release:   lock -> load -> authorise -> resolve commitment -> sign finish -> submit -> persist
//! cancel:    lock -> load -> authorise -> ledger cancel (best effort) -> persist
//! reconcile: lock -> load -> resolve commitment -> correct record if it diverged
//! ```
//!
//! Status writes are conditional on the status read at the start of the
//! operation. Once the ledger accepted a transaction only the record write
//! is retried, never the submission. Audit, milestone, notification and
//! balance steps are best effort and isolated per party.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::envelope::Envelope;
use super::error::EscrowError;
use super::locks::EscrowLocks;
use super::model::{
    AuditStatus, AuditTransaction, DisplayId, Escrow, EscrowStatus, EscrowUpdate, Milestone,
    OperationKind, PendingSigningRequest, ReleaseType, SigningMode, SigningRequestStatus,
};
use super::resolver::{
    CommitmentQuery, CommitmentResolver, LedgerCommitmentRef, NotFoundReason, Resolution,
    TerminalKind,
};
use super::terms::{self, CreateEscrowRequest, TermsPolicy};
use crate::ledger::{
    from_ripple_time, submit_and_confirm, to_ripple_time, ConfirmPolicy, HistoryWindow, LedgerRpc,
    SubmitResult, TxTemplate,
};
use crate::providers::{
    BalanceRefresher, CurrencyPair, EscrowEvent, ExchangeRateProvider, NotificationSink,
    PartyDirectory,
};
use crate::signing::{
    DelegatedSigner, GatewayHandle, SignOutcome, SigningGateway, TransactionSigner,
};
use crate::storage::{EscrowStore, StoreResult};

const PERSIST_ATTEMPTS: u32 = 3;
const PERSIST_BACKOFF: Duration = Duration::from_millis(50);

/// Tunables of the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub terms: TermsPolicy,
    pub confirm: ConfirmPolicy,
    /// Upper bound for each notification or balance refresh.
    pub side_effect_timeout: Duration,
    /// Account history scanned when looking for a finish or cancel.
    pub history: HistoryWindow,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            terms: TermsPolicy::default(),
            confirm: ConfirmPolicy::default(),
            side_effect_timeout: Duration::from_secs(8),
            history: HistoryWindow::default(),
        }
    }
}

/// Collaborators the engine is assembled from.
pub struct EngineDeps {
    pub store: Arc<dyn EscrowStore>,
    pub ledger: Arc<dyn LedgerRpc>,
    /// Signs with platform-custodied seeds.
    pub direct_signer: Arc<dyn TransactionSigner>,
    /// Delegated signing is disabled without a gateway.
    pub gateway: Option<Arc<dyn SigningGateway>>,
    pub directory: Arc<dyn PartyDirectory>,
    pub rates: Arc<dyn ExchangeRateProvider>,
    pub notifier: Arc<dyn NotificationSink>,
    pub balances: Arc<dyn BalanceRefresher>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ReleaseRequest {
    /// Required to release a disputed escrow.
    #[serde(default)]
    pub override_dispute: bool,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
    /// Required to cancel a disputed escrow.
    #[serde(default)]
    pub override_dispute: bool,
}

/// An escrow with its milestones, transaction log and latest signing request.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EscrowView {
    /// `ESC-<year>-<sequence>`.
    pub reference: String,
    pub escrow: Escrow,
    pub milestones: Vec<Milestone>,
    pub transactions: Vec<AuditTransaction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing: Option<PendingSigningRequest>,
}

/// Ledger ground truth as seen by reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LedgerState {
    Open,
    Finished,
    Cancelled,
    NotFound,
    /// No creating transaction recorded yet.
    Unlinked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ReconcileReport {
    pub escrow_id: Uuid,
    pub status: EscrowStatus,
    pub ledger_state: LedgerState,
    /// Whether this call corrected the record.
    pub corrected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_sequence: Option<u32>,
    /// Finishing or cancelling transaction, when the ledger shows one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_found_reason: Option<NotFoundReason>,
}

/// Outcome of the best-effort ledger side of a cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LedgerCancel {
    Submitted(String),
    AlreadyCancelled(String),
    Skipped(&'static str),
    Failed(String),
}

impl LedgerCancel {
    fn tx_hash(&self) -> Option<&str> {
        match self {
            Self::Submitted(hash) | Self::AlreadyCancelled(hash) => Some(hash),
            _ => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Submitted(_) => "cancelled on the ledger".to_string(),
            Self::AlreadyCancelled(_) => "ledger commitment was already cancelled".to_string(),
            Self::Skipped(reason) => (*reason).to_string(),
            Self::Failed(reason) => format!("ledger cancel failed: {reason}"),
        }
    }
}

struct ResolvedParties {
    initiator_address: String,
    counterparty_address: String,
    signing_mode: SigningMode,
}

pub struct EscrowService {
    pub(super) store: Arc<dyn EscrowStore>,
    ledger: Arc<dyn LedgerRpc>,
    direct: Arc<dyn TransactionSigner>,
    delegated: Option<Arc<dyn TransactionSigner>>,
    pub(super) gateway: Option<Arc<dyn SigningGateway>>,
    resolver: CommitmentResolver,
    directory: Arc<dyn PartyDirectory>,
    rates: Arc<dyn ExchangeRateProvider>,
    notifier: Arc<dyn NotificationSink>,
    balances: Arc<dyn BalanceRefresher>,
    pub(super) locks: EscrowLocks,
    settings: EngineSettings,
}

impl EscrowService {
    pub fn new(deps: EngineDeps, settings: EngineSettings) -> Self {
        let delegated = deps.gateway.clone().map(|gateway| {
            Arc::new(DelegatedSigner::new(gateway)) as Arc<dyn TransactionSigner>
        });
        Self {
            resolver: CommitmentResolver::new(deps.ledger.clone()).with_window(settings.history),
            store: deps.store,
            ledger: deps.ledger,
            direct: deps.direct_signer,
            delegated,
            gateway: deps.gateway,
            directory: deps.directory,
            rates: deps.rates,
            notifier: deps.notifier,
            balances: deps.balances,
            locks: EscrowLocks::default(),
            settings,
        }
    }

    pub fn delegated_signing_enabled(&self) -> bool {
        self.delegated.is_some()
    }

    // =========================================================================
    // Produced interface
    // =========================================================================

    pub async fn create_escrow(
        &self,
        caller: &str,
        request: CreateEscrowRequest,
    ) -> Envelope<EscrowView> {
        match self.create(caller, request).await {
            Ok(view) if view.escrow.status == EscrowStatus::Pending => {
                Envelope::ok("Escrow awaiting signature", view)
            }
            Ok(view) => Envelope::ok("Escrow created", view),
            Err(e) => Envelope::fail(&e),
        }
    }

    pub async fn get_escrow(&self, caller: &str, id: Uuid) -> Envelope<EscrowView> {
        Envelope::from_result(self.get(caller, id).await, "Escrow found")
    }

    pub async fn release_escrow(
        &self,
        caller: &str,
        id: Uuid,
        request: ReleaseRequest,
    ) -> Envelope<EscrowView> {
        match self.release(caller, id, request).await {
            Ok(view) if view.escrow.status == EscrowStatus::Completed => {
                Envelope::ok("Escrow released", view)
            }
            Ok(view) => Envelope::ok("Release awaiting signature", view),
            Err(e) => Envelope::fail(&e),
        }
    }

    pub async fn cancel_escrow(
        &self,
        caller: &str,
        id: Uuid,
        request: CancelRequest,
    ) -> Envelope<EscrowView> {
        Envelope::from_result(self.cancel(caller, id, request).await, "Escrow cancelled")
    }

    pub async fn reconcile_status(&self, caller: &str, id: Uuid) -> Envelope<ReconcileReport> {
        match self.reconcile(caller, id).await {
            Ok(report) if report.corrected => {
                Envelope::ok("Escrow status corrected to match the ledger", report)
            }
            Ok(report) => Envelope::ok("Escrow status matches the ledger", report),
            Err(e) => Envelope::fail(&e),
        }
    }

    // =========================================================================
    // Operations
    // =========================================================================

    pub async fn get(&self, caller: &str, id: Uuid) -> Result<EscrowView, EscrowError> {
        let escrow = self.load(id)?;
        authorize_party(&escrow, caller)?;
        Ok(self.view(escrow))
    }

    pub async fn create(
        &self,
        caller: &str,
        request: CreateEscrowRequest,
    ) -> Result<EscrowView, EscrowError> {
        let now = Utc::now();
        info!(
            caller,
            counterparty = %request.counterparty_id,
            release_type = ?request.release_type,
            "Creating escrow"
        );

        terms::validate_request(&request, now)?;
        let parties = self.resolve_parties(caller, &request.counterparty_id).await?;

        let fiat_currency = request
            .fiat_currency
            .as_deref()
            .map(str::to_ascii_uppercase)
            .unwrap_or_else(|| self.settings.terms.fiat_currency.clone());
        let rate = self
            .rates
            .get_rate(&CurrencyPair::xrp(&fiat_currency))
            .await?;
        let quote = terms::quote(request.amount_fiat, request.amount_xrp, rate)?;
        let bounds = terms::time_bounds(
            request.release_type,
            request.release_at,
            now,
            &self.settings.terms,
        )?;
        let condition = request
            .condition
            .as_deref()
            .map(terms::normalize_condition)
            .transpose()?;

        let escrow_id = Uuid::new_v4();
        let milestones = terms::plan_milestones(escrow_id, &request.milestones, &quote)?;

        let mut template = TxTemplate::escrow_create(
            &parties.initiator_address,
            &parties.counterparty_address,
            quote.amount_drops,
            Some(bounds.finish_after),
            Some(bounds.cancel_after),
        );
        template.condition = condition.clone();

        let escrow = Escrow {
            id: escrow_id,
            display_id: DisplayId::unallocated(now),
            title: request.title.trim().to_string(),
            description: request.description,
            initiator_id: caller.to_string(),
            initiator_address: Some(parties.initiator_address),
            counterparty_id: Some(request.counterparty_id),
            counterparty_address: Some(parties.counterparty_address),
            signing_mode: parties.signing_mode,
            amount_drops: quote.amount_drops,
            amount_fiat: quote.amount_fiat,
            fiat_currency,
            exchange_rate: quote.rate,
            release_type: request.release_type,
            release_at: request
                .release_at
                .filter(|_| request.release_type == ReleaseType::TimeBased),
            finish_after: Some(bounds.finish_after),
            cancel_after: Some(bounds.cancel_after),
            status: EscrowStatus::Pending,
            progress: 0,
            create_tx_hash: None,
            ledger_sequence: None,
            condition,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            cancelled_at: None,
        };

        match self.signer_for(escrow.signing_mode)?.sign(template).await? {
            SignOutcome::Signed(signed) => {
                let result = self.submit(&signed.blob_hex).await?;
                self.record_created(escrow, milestones, &result, caller).await
            }
            SignOutcome::Pending(handle) => {
                let escrow = self
                    .persist("insert escrow", || self.store.insert_escrow(escrow.clone()))
                    .await?;
                self.record_milestones(&milestones).await;
                self.open_signing_request(escrow, OperationKind::Create, handle, caller)
                    .await
            }
        }
    }

    pub async fn release(
        &self,
        caller: &str,
        id: Uuid,
        request: ReleaseRequest,
    ) -> Result<EscrowView, EscrowError> {
        let _guard = self.locks.acquire(id).await;
        info!(escrow_id = %id, caller, "Releasing escrow");

        let escrow = self.load(id)?;
        if escrow.initiator_id != caller {
            return Err(EscrowError::Forbidden(
                "Only the initiator may release an escrow".to_string(),
            ));
        }
        check_settleable(&escrow, "release", request.override_dispute)?;
        self.ensure_no_open_request(&escrow)?;
        if escrow.create_tx_hash.is_none() {
            return Err(EscrowError::CommitmentNotFound(
                NotFoundReason::NoTransactionHash,
            ));
        }

        let commitment = match self.resolve(&escrow).await? {
            Resolution::Open(commitment) => commitment,
            Resolution::AlreadyTerminal { kind, tx_hash, .. } => {
                self.correct_to_ledger(escrow, kind, &tx_hash, caller).await?;
                return Err(EscrowError::CommitmentAlreadyTerminal {
                    kind,
                    tx_hash: Some(tx_hash),
                });
            }
            Resolution::NotFound(reason) => return Err(EscrowError::CommitmentNotFound(reason)),
        };
        let escrow = self.cache_sequence(escrow, commitment.sequence).await;
        check_releasable(&commitment)?;

        let template = TxTemplate::escrow_finish(
            &commitment.owner,
            &commitment.owner,
            commitment.sequence,
        );
        match self.signer_for(escrow.signing_mode)?.sign(template).await? {
            SignOutcome::Signed(signed) => match self.submit(&signed.blob_hex).await {
                Ok(result) => self.finalize_release(escrow, &result.tx_hash, caller).await,
                Err(EscrowError::LedgerRejected { code, .. }) if code == "tecNO_TARGET" => Err(
                    self.recover_stale_sequence(escrow, commitment.sequence, caller)
                        .await,
                ),
                Err(e) => {
                    self.record_failure(&escrow, OperationKind::Release, caller, &e)
                        .await;
                    Err(e)
                }
            },
            SignOutcome::Pending(handle) => {
                self.open_signing_request(escrow, OperationKind::Release, handle, caller)
                    .await
            }
        }
    }

    pub async fn cancel(
        &self,
        caller: &str,
        id: Uuid,
        request: CancelRequest,
    ) -> Result<EscrowView, EscrowError> {
        let _guard = self.locks.acquire(id).await;
        info!(escrow_id = %id, caller, "Cancelling escrow");

        let escrow = self.load(id)?;
        authorize_party(&escrow, caller)?;
        let from = check_settleable(&escrow, "cancel", request.override_dispute)?;

        let ledger = self.cancel_on_ledger(&escrow, caller).await?;
        info!(escrow_id = %id, outcome = ?ledger, "Ledger side of cancellation finished");

        let reason = request
            .reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| format!("cancelled by {caller}"));
        let update = EscrowUpdate::to(EscrowStatus::Cancelled).reason(Some(reason));
        let cancelled = self
            .persist("cancel escrow", || {
                self.store.update_escrow_status(id, &[from], &update)
            })
            .await?;

        self.withdraw_signing_request(id).await;
        self.record_audit(
            AuditTransaction::new(id, OperationKind::Cancel, AuditStatus::Cancelled, caller)
                .with_tx_hash(ledger.tx_hash())
                .with_message(ledger.describe()),
        )
        .await;
        self.notify_parties(&cancelled, EscrowEvent::Cancelled).await;
        Ok(self.view(cancelled))
    }

    pub async fn reconcile(&self, caller: &str, id: Uuid) -> Result<ReconcileReport, EscrowError> {
        let _guard = self.locks.acquire(id).await;
        info!(escrow_id = %id, caller, "Reconciling escrow");

        let escrow = self.load(id)?;
        authorize_party(&escrow, caller)?;
        if escrow.create_tx_hash.is_none() {
            return Ok(report(&escrow, LedgerState::Unlinked, false));
        }

        match self.resolve(&escrow).await? {
            Resolution::Open(commitment) => {
                let escrow = self.cache_sequence(escrow, commitment.sequence).await;
                Ok(report(&escrow, LedgerState::Open, false))
            }
            Resolution::AlreadyTerminal { kind, tx_hash, .. } => {
                let (escrow, corrected) =
                    self.correct_to_ledger(escrow, kind, &tx_hash, caller).await?;
                let state = match kind {
                    TerminalKind::Finished => LedgerState::Finished,
                    TerminalKind::Cancelled => LedgerState::Cancelled,
                };
                Ok(ReconcileReport {
                    ledger_tx_hash: Some(tx_hash),
                    ..report(&escrow, state, corrected)
                })
            }
            Resolution::NotFound(reason) => Ok(ReconcileReport {
                not_found_reason: Some(reason),
                ..report(&escrow, LedgerState::NotFound, false)
            }),
        }
    }

    // =========================================================================
    // Steps
    // =========================================================================

    pub(super) fn load(&self, id: Uuid) -> Result<Escrow, EscrowError> {
        self.store.get_escrow(id)?.ok_or(EscrowError::NotFound(id))
    }

    pub(super) fn view(&self, escrow: Escrow) -> EscrowView {
        let milestones = self.store.list_milestones(escrow.id).unwrap_or_else(|e| {
            warn!(escrow_id = %escrow.id, error = %e, "Failed to load milestones");
            Vec::new()
        });
        let transactions = self
            .store
            .list_audit_transactions(escrow.id)
            .unwrap_or_else(|e| {
                warn!(escrow_id = %escrow.id, error = %e, "Failed to load transaction log");
                Vec::new()
            });
        let signing = self
            .store
            .latest_signing_request(escrow.id)
            .unwrap_or_else(|e| {
                warn!(escrow_id = %escrow.id, error = %e, "Failed to load signing request");
                None
            });

        EscrowView {
            reference: escrow.display_id.to_string(),
            escrow,
            milestones,
            transactions,
            signing,
        }
    }

    async fn resolve_parties(
        &self,
        caller: &str,
        counterparty_id: &str,
    ) -> Result<ResolvedParties, EscrowError> {
        if caller == counterparty_id {
            return Err(EscrowError::PartyResolution(
                "An escrow cannot be created with yourself".to_string(),
            ));
        }

        let initiator = self.directory.resolve_party(caller).await?.ok_or_else(|| {
            EscrowError::PartyResolution(format!("Unknown initiator {caller}"))
        })?;
        let initiator_address = initiator.address.ok_or_else(|| {
            EscrowError::PartyResolution("Initiator has no ledger address".to_string())
        })?;

        let counterparty_address = self
            .directory
            .resolve_ledger_address(counterparty_id)
            .await?
            .ok_or_else(|| {
                EscrowError::PartyResolution(format!(
                    "Counterparty {counterparty_id} has no known ledger address"
                ))
            })?;

        if initiator_address == counterparty_address {
            return Err(EscrowError::PartyResolution(
                "Counterparty ledger address equals the initiator's".to_string(),
            ));
        }

        Ok(ResolvedParties {
            initiator_address,
            counterparty_address,
            signing_mode: initiator.signing_mode,
        })
    }

    fn signer_for(&self, mode: SigningMode) -> Result<&dyn TransactionSigner, EscrowError> {
        match mode {
            SigningMode::Direct => Ok(self.direct.as_ref()),
            SigningMode::Delegated => self.delegated.as_deref().ok_or_else(|| {
                EscrowError::GatewayUnavailable("delegated signing is not configured".to_string())
            }),
        }
    }

    /// Submit and require an accepted result.
    pub(super) async fn submit(&self, blob_hex: &str) -> Result<SubmitResult, EscrowError> {
        let result =
            submit_and_confirm(self.ledger.as_ref(), blob_hex, self.settings.confirm).await?;
        if result.is_accepted() {
            return Ok(result);
        }
        warn!(
            tx_hash = %result.tx_hash,
            result = %result.result_code,
            "Ledger rejected transaction"
        );
        Err(EscrowError::rejected(&result.result_code))
    }

    async fn resolve(&self, escrow: &Escrow) -> Result<Resolution, EscrowError> {
        let owner = escrow.initiator_address.as_deref().ok_or_else(|| {
            EscrowError::PartyResolution("Escrow has no initiator ledger address".to_string())
        })?;
        let resolution = self
            .resolver
            .resolve(CommitmentQuery {
                tx_hash: escrow.create_tx_hash.as_deref(),
                owner,
                destination: escrow.counterparty_address.as_deref(),
                amount_drops: escrow.amount_drops,
                known_sequence: escrow.ledger_sequence,
            })
            .await
            .inspect_err(|e| warn!(escrow_id = %escrow.id, error = %e, "Commitment resolution failed"))?;
        Ok(resolution)
    }

    /// Store the transaction-level sequence after its first resolution.
    async fn cache_sequence(&self, escrow: Escrow, sequence: u32) -> Escrow {
        if escrow.ledger_sequence.is_some() || escrow.status.is_terminal() {
            return escrow;
        }
        let update = EscrowUpdate::to(escrow.status).sequence(sequence);
        match self.store.update_escrow_status(escrow.id, &[escrow.status], &update) {
            Ok(updated) => updated,
            Err(e) => {
                warn!(escrow_id = %escrow.id, error = %e, "Failed to cache ledger sequence");
                escrow
            }
        }
    }

    fn ensure_no_open_request(&self, escrow: &Escrow) -> Result<(), EscrowError> {
        match self.store.latest_signing_request(escrow.id)? {
            Some(request) if request.status == SigningRequestStatus::Open => {
                Err(EscrowError::SigningInProgress {
                    request_id: request.request_id,
                })
            }
            _ => Ok(()),
        }
    }

    pub(super) async fn open_signing_request(
        &self,
        escrow: Escrow,
        operation: OperationKind,
        handle: GatewayHandle,
        actor: &str,
    ) -> Result<EscrowView, EscrowError> {
        let request = PendingSigningRequest {
            request_id: handle.request_id.clone(),
            escrow_id: escrow.id,
            operation,
            status: SigningRequestStatus::Open,
            next_url: handle.next_url.clone(),
            qr_url: handle.qr_url.clone(),
            expires_at: handle.expires_at,
            tx_hash: None,
            result_code: None,
            created_at: Utc::now(),
            resolved_at: None,
        };
        self.persist("store signing request", || {
            self.store.put_signing_request(&request)
        })
        .await?;

        self.record_audit(
            AuditTransaction::new(escrow.id, operation, AuditStatus::Pending, actor)
                .with_message(format!("awaiting signature ({})", handle.request_id)),
        )
        .await;
        self.notify_user(
            &escrow.initiator_id,
            EscrowEvent::SigningRequested,
            json!({
                "escrow_id": escrow.id,
                "reference": escrow.display_id.to_string(),
                "operation": operation,
                "next_url": handle.next_url,
                "qr_url": handle.qr_url,
            }),
        )
        .await;
        Ok(self.view(escrow))
    }

    /// Persist a directly signed escrow the ledger accepted.
    async fn record_created(
        &self,
        mut escrow: Escrow,
        milestones: Vec<Milestone>,
        result: &SubmitResult,
        actor: &str,
    ) -> Result<EscrowView, EscrowError> {
        escrow.status = EscrowStatus::Active;
        escrow.create_tx_hash = Some(result.tx_hash.clone());

        let escrow = self
            .persist("insert escrow", || self.store.insert_escrow(escrow.clone()))
            .await
            .inspect_err(|e| {
                error!(
                    escrow_id = %escrow.id,
                    tx_hash = %result.tx_hash,
                    error = %e,
                    "Ledger accepted escrow but its record could not be stored"
                )
            })?;
        info!(
            escrow_id = %escrow.id,
            reference = %escrow.display_id,
            tx_hash = %result.tx_hash,
            "Escrow created"
        );

        self.record_milestones(&milestones).await;
        self.record_audit(
            AuditTransaction::new(escrow.id, OperationKind::Create, AuditStatus::Confirmed, actor)
                .with_tx_hash(Some(&result.tx_hash))
                .with_result(&result.result_code),
        )
        .await;
        self.notify_parties(&escrow, EscrowEvent::Created).await;
        Ok(self.view(escrow))
    }

    /// Activate a delegated escrow whose create transaction is on the ledger.
    pub(super) async fn finalize_create(
        &self,
        escrow: Escrow,
        tx_hash: &str,
        actor: &str,
    ) -> Result<Escrow, EscrowError> {
        let update = EscrowUpdate::to(EscrowStatus::Active).tx_hash(tx_hash);
        let active = self
            .persist("activate escrow", || {
                self.store
                    .update_escrow_status(escrow.id, &[EscrowStatus::Pending], &update)
            })
            .await
            .inspect_err(|e| {
                error!(escrow_id = %escrow.id, tx_hash, error = %e, "Escrow activation not stored")
            })?;
        info!(escrow_id = %active.id, tx_hash, "Delegated escrow activated");

        self.record_audit(
            AuditTransaction::new(active.id, OperationKind::Create, AuditStatus::Confirmed, actor)
                .with_tx_hash(Some(tx_hash)),
        )
        .await;
        self.notify_parties(&active, EscrowEvent::Created).await;
        Ok(active)
    }

    /// Complete an escrow whose finish transaction the ledger accepted.
    pub(super) async fn finalize_release(
        &self,
        escrow: Escrow,
        tx_hash: &str,
        actor: &str,
    ) -> Result<EscrowView, EscrowError> {
        let from = escrow.status;
        let update = EscrowUpdate::to(EscrowStatus::Completed).progress(100);
        let completed = self
            .persist("complete escrow", || {
                self.store.update_escrow_status(escrow.id, &[from], &update)
            })
            .await
            .inspect_err(|e| {
                error!(
                    escrow_id = %escrow.id,
                    tx_hash,
                    error = %e,
                    "Ledger released escrow but its record could not be updated"
                )
            })?;
        info!(escrow_id = %completed.id, tx_hash, "Escrow released");

        self.complete_milestones(&completed).await;
        self.record_audit(
            AuditTransaction::new(
                completed.id,
                OperationKind::Release,
                AuditStatus::Confirmed,
                actor,
            )
            .with_tx_hash(Some(tx_hash)),
        )
        .await;
        self.refresh_party_balances(&completed).await;
        self.notify_parties(&completed, EscrowEvent::Completed).await;
        Ok(self.view(completed))
    }

    /// Move a non-terminal record to the terminal state the ledger shows.
    ///
    /// Returns the record and whether it was changed.
    async fn correct_to_ledger(
        &self,
        escrow: Escrow,
        kind: TerminalKind,
        tx_hash: &str,
        actor: &str,
    ) -> Result<(Escrow, bool), EscrowError> {
        if escrow.status.is_terminal() {
            let agrees = (kind == TerminalKind::Finished) == (escrow.status == EscrowStatus::Completed);
            if !agrees {
                warn!(
                    escrow_id = %escrow.id,
                    status = %escrow.status,
                    ledger = ?kind,
                    tx_hash,
                    "Ledger outcome differs from terminal record, leaving record unchanged"
                );
            }
            return Ok((escrow, false));
        }

        let from = escrow.status;
        let (update, operation) = match kind {
            TerminalKind::Finished => (
                EscrowUpdate::to(EscrowStatus::Completed).progress(100),
                OperationKind::Release,
            ),
            TerminalKind::Cancelled => (
                EscrowUpdate::to(EscrowStatus::Cancelled)
                    .reason(Some("cancelled on the ledger".to_string())),
                OperationKind::Cancel,
            ),
        };
        let corrected = self
            .persist("correct escrow status", || {
                self.store.update_escrow_status(escrow.id, &[from], &update)
            })
            .await?;
        warn!(
            escrow_id = %corrected.id,
            from = %from,
            to = %corrected.status,
            tx_hash,
            "Corrected escrow status to match the ledger"
        );

        if kind == TerminalKind::Finished {
            self.complete_milestones(&corrected).await;
        }
        self.record_audit(
            AuditTransaction::new(corrected.id, operation, AuditStatus::Reconciled, actor)
                .with_tx_hash(Some(tx_hash))
                .with_message(format!("record corrected from {from} to {}", corrected.status)),
        )
        .await;
        self.notify_parties(&corrected, EscrowEvent::StatusCorrected)
            .await;
        Ok((corrected, true))
    }

    /// A finish hit `tecNO_TARGET`: the commitment vanished since resolution.
    pub(super) async fn recover_stale_sequence(
        &self,
        escrow: Escrow,
        sequence: u32,
        actor: &str,
    ) -> EscrowError {
        let rejected = EscrowError::rejected("tecNO_TARGET");
        let Some(owner) = escrow.initiator_address.clone() else {
            return rejected;
        };

        match self.resolver.find_terminal(&owner, sequence).await {
            Ok(Some(Resolution::AlreadyTerminal { kind, tx_hash, .. })) => {
                if let Err(e) = self.correct_to_ledger(escrow, kind, &tx_hash, actor).await {
                    return e;
                }
                EscrowError::CommitmentAlreadyTerminal {
                    kind,
                    tx_hash: Some(tx_hash),
                }
            }
            Ok(_) => {
                self.record_failure(&escrow, OperationKind::Release, actor, &rejected)
                    .await;
                rejected
            }
            Err(e) => {
                warn!(escrow_id = %escrow.id, error = %e, "History lookup after tecNO_TARGET failed");
                rejected
            }
        }
    }

    /// Best-effort ledger cancel of the live commitment.
    ///
    /// Only errors when the ledger shows the escrow already released.
    async fn cancel_on_ledger(
        &self,
        escrow: &Escrow,
        actor: &str,
    ) -> Result<LedgerCancel, EscrowError> {
        if escrow.create_tx_hash.is_none() {
            return Ok(LedgerCancel::Skipped("no ledger commitment was created"));
        }

        let commitment = match self.resolve(escrow).await {
            Ok(Resolution::Open(commitment)) => commitment,
            Ok(Resolution::AlreadyTerminal {
                kind: TerminalKind::Finished,
                tx_hash,
                ..
            }) => {
                self.correct_to_ledger(escrow.clone(), TerminalKind::Finished, &tx_hash, actor)
                    .await?;
                return Err(EscrowError::CommitmentAlreadyTerminal {
                    kind: TerminalKind::Finished,
                    tx_hash: Some(tx_hash),
                });
            }
            Ok(Resolution::AlreadyTerminal { tx_hash, .. }) => {
                return Ok(LedgerCancel::AlreadyCancelled(tx_hash))
            }
            Ok(Resolution::NotFound(_)) => {
                return Ok(LedgerCancel::Skipped("no open commitment on the ledger"))
            }
            Err(e) => return Ok(LedgerCancel::Failed(e.to_string())),
        };
        self.cache_sequence(escrow.clone(), commitment.sequence)
            .await;

        let now = to_ripple_time(Utc::now()).unwrap_or(u32::MAX);
        match commitment.cancel_after {
            None => {
                return Ok(LedgerCancel::Skipped(
                    "commitment has no expiry and cannot be cancelled on the ledger",
                ))
            }
            Some(cancel_after) if now <= cancel_after => {
                return Ok(LedgerCancel::Skipped(
                    "commitment not yet expired, left to expire on the ledger",
                ))
            }
            Some(_) => {}
        }
        if escrow.signing_mode == SigningMode::Delegated {
            return Ok(LedgerCancel::Skipped(
                "delegated commitments are left to expire on the ledger",
            ));
        }

        let template = TxTemplate::escrow_cancel(
            &commitment.owner,
            &commitment.owner,
            commitment.sequence,
        );
        let signed = match self.direct.sign(template).await {
            Ok(SignOutcome::Signed(signed)) => signed,
            Ok(SignOutcome::Pending(_)) => {
                return Ok(LedgerCancel::Skipped("cancel requires a delegated signature"))
            }
            Err(e) => return Ok(LedgerCancel::Failed(e.to_string())),
        };
        match self.submit(&signed.blob_hex).await {
            Ok(result) => Ok(LedgerCancel::Submitted(result.tx_hash)),
            Err(e) => Ok(LedgerCancel::Failed(e.to_string())),
        }
    }

    /// Mark an open signing request of the escrow as withdrawn.
    async fn withdraw_signing_request(&self, escrow_id: Uuid) {
        let request = match self.store.latest_signing_request(escrow_id) {
            Ok(Some(request)) if request.status == SigningRequestStatus::Open => request,
            Ok(_) => return,
            Err(e) => {
                warn!(escrow_id = %escrow_id, error = %e, "Failed to load signing request");
                return;
            }
        };

        let mut request = request;
        request.resolve(SigningRequestStatus::Cancelled);
        if let Err(e) = self
            .persist("withdraw signing request", || {
                self.store.put_signing_request(&request)
            })
            .await
        {
            warn!(escrow_id = %escrow_id, error = %e, "Failed to withdraw signing request");
        }
    }

    // =========================================================================
    // Persistence and side effects
    // =========================================================================

    /// Retry a record-store write on transient failures.
    pub(super) async fn persist<T>(
        &self,
        what: &'static str,
        mut write: impl FnMut() -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut attempt = 1;
        loop {
            match write() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < PERSIST_ATTEMPTS => {
                    warn!(what, attempt, error = %e, "Record store write failed, retrying");
                    tokio::time::sleep(PERSIST_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub(super) async fn record_audit(&self, record: AuditTransaction) {
        if let Err(e) = self
            .persist("append audit record", || {
                self.store.append_audit_transaction(&record)
            })
            .await
        {
            warn!(
                escrow_id = %record.escrow_id,
                operation = ?record.operation,
                error = %e,
                "Failed to append audit record"
            );
        }
    }

    pub(super) async fn record_failure(
        &self,
        escrow: &Escrow,
        operation: OperationKind,
        actor: &str,
        error: &EscrowError,
    ) {
        let mut record = AuditTransaction::new(escrow.id, operation, AuditStatus::Failed, actor)
            .with_message(error.to_string());
        if let EscrowError::LedgerRejected { code, .. } = error {
            record = record.with_result(code);
        }
        self.record_audit(record).await;
    }

    async fn record_milestones(&self, milestones: &[Milestone]) {
        if milestones.is_empty() {
            return;
        }
        if let Err(e) = self
            .persist("insert milestones", || self.store.insert_milestones(milestones))
            .await
        {
            warn!(
                escrow_id = %milestones[0].escrow_id,
                error = %e,
                "Failed to store milestones"
            );
        }
    }

    async fn complete_milestones(&self, escrow: &Escrow) {
        let at = escrow.completed_at.unwrap_or(escrow.updated_at);
        if let Err(e) = self
            .persist("complete milestones", || {
                self.store.complete_milestones(escrow.id, at)
            })
            .await
        {
            warn!(escrow_id = %escrow.id, error = %e, "Failed to complete milestones");
        }
    }

    pub(super) async fn notify_parties(&self, escrow: &Escrow, event: EscrowEvent) {
        let payload = json!({
            "escrow_id": escrow.id,
            "reference": escrow.display_id.to_string(),
            "status": escrow.status,
            "amount_drops": escrow.amount_drops,
            "amount_fiat": escrow.amount_fiat.to_string(),
            "fiat_currency": escrow.fiat_currency,
            "tx_hash": escrow.create_tx_hash,
        });
        for (user_id, _) in escrow.parties() {
            self.notify_user(user_id, event, payload.clone()).await;
        }
    }

    async fn notify_user(&self, user_id: &str, event: EscrowEvent, payload: serde_json::Value) {
        let timeout = self.settings.side_effect_timeout;
        match tokio::time::timeout(timeout, self.notifier.notify(user_id, event, payload)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(user_id, event = event.as_str(), error = %e, "Notification failed"),
            Err(_) => warn!(user_id, event = event.as_str(), "Notification timed out"),
        }
    }

    async fn refresh_party_balances(&self, escrow: &Escrow) {
        let timeout = self.settings.side_effect_timeout;
        for (user_id, address) in escrow.parties() {
            let Some(address) = address else {
                continue;
            };
            match tokio::time::timeout(timeout, self.balances.refresh_balances(address)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(user_id, address, error = %e, "Balance refresh failed"),
                Err(_) => warn!(user_id, address, "Balance refresh timed out"),
            }
        }
    }
}

pub(super) fn authorize_party(escrow: &Escrow, caller: &str) -> Result<(), EscrowError> {
    if escrow.is_party(caller) {
        Ok(())
    } else {
        Err(EscrowError::Forbidden(
            "Caller is not a party to this escrow".to_string(),
        ))
    }
}

/// Status gate shared by release and cancel; returns the status to transition from.
fn check_settleable(
    escrow: &Escrow,
    operation: &'static str,
    override_dispute: bool,
) -> Result<EscrowStatus, EscrowError> {
    match escrow.status {
        status @ (EscrowStatus::Completed | EscrowStatus::Cancelled) => {
            Err(EscrowError::InvalidState { status, operation })
        }
        EscrowStatus::Disputed if !override_dispute => Err(EscrowError::Disputed),
        status => Ok(status),
    }
}

/// Time-bound and condition checks against the live commitment.
fn check_releasable(commitment: &LedgerCommitmentRef) -> Result<(), EscrowError> {
    if commitment.condition.is_some() {
        return Err(EscrowError::UnsupportedConditionalRelease);
    }
    let now = to_ripple_time(Utc::now()).unwrap_or(u32::MAX);
    if let Some(finish_after) = commitment.finish_after {
        if now <= finish_after {
            return Err(EscrowError::NotYetReleasable(from_ripple_time(finish_after)));
        }
    }
    if let Some(cancel_after) = commitment.cancel_after {
        if now >= cancel_after {
            return Err(EscrowError::CommitmentExpired(from_ripple_time(cancel_after)));
        }
    }
    Ok(())
}

fn report(escrow: &Escrow, ledger_state: LedgerState, corrected: bool) -> ReconcileReport {
    ReconcileReport {
        escrow_id: escrow.id,
        status: escrow.status,
        ledger_state,
        corrected,
        ledger_sequence: escrow.ledger_sequence,
        ledger_tx_hash: None,
        not_found_reason: None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::escrow::model::AuditStatus;
    use crate::escrow::terms::MilestoneInput;
    use crate::escrow::testing::{
        sample_escrow, Harness, UnavailableRates, ALICE, ALICE_ADDRESS, BOB, BOB_ADDRESS, CAROL,
        DAVE, ERIN,
    };
    use crate::ledger::LedgerTransaction;

    async fn active_escrow(harness: &Harness) -> Uuid {
        let envelope = harness
            .service
            .create_escrow(ALICE, harness.create_request(BOB))
            .await;
        assert!(envelope.success, "{:?}", envelope.error);
        envelope.data.unwrap().escrow.id
    }

    fn status_of(harness: &Harness, id: Uuid) -> EscrowStatus {
        harness.db.get_escrow(id).unwrap().unwrap().status
    }

    #[tokio::test]
    async fn direct_create_quotes_submits_and_activates() {
        let harness = Harness::new();
        let envelope = harness
            .service
            .create_escrow(ALICE, harness.create_request(BOB))
            .await;

        assert!(envelope.success, "{:?}", envelope.error);
        let view = envelope.data.unwrap();
        assert_eq!(view.escrow.status, EscrowStatus::Active);
        assert_eq!(view.escrow.amount_drops, 50_000_000);
        assert_eq!(view.escrow.exchange_rate, dec!(2));
        assert!(view.escrow.create_tx_hash.is_some());
        assert!(view.reference.starts_with("ESC-"));
        assert!(view.reference.ends_with("-000001"));
        assert_eq!(harness.ledger.submissions().len(), 1);

        assert_eq!(view.transactions.len(), 1);
        assert_eq!(view.transactions[0].status, AuditStatus::Confirmed);
        assert_eq!(harness.notifier.events_for(ALICE), vec!["escrow_created"]);
        assert_eq!(harness.notifier.events_for(BOB), vec!["escrow_created"]);
    }

    #[tokio::test]
    async fn milestones_split_the_amount_exactly() {
        let harness = Harness::new();
        let mut request = harness.create_request(BOB);
        request.release_type = ReleaseType::MilestoneBased;
        request.milestones = vec![
            MilestoneInput {
                title: "Draft".into(),
                description: None,
                amount_fiat: dec!(40),
            },
            MilestoneInput {
                title: "Final".into(),
                description: None,
                amount_fiat: dec!(60),
            },
        ];

        let view = harness.service.create(ALICE, request).await.unwrap();
        let drops: u64 = view.milestones.iter().map(|m| m.amount_drops).sum();
        assert_eq!(view.milestones.len(), 2);
        assert_eq!(drops, view.escrow.amount_drops);
    }

    #[tokio::test]
    async fn rejected_create_persists_nothing() {
        let harness = Harness::new();
        harness.ledger.set_submit_code("tecUNFUNDED");

        let envelope = harness
            .service
            .create_escrow(ALICE, harness.create_request(BOB))
            .await;
        assert_eq!(envelope.error_code(), Some("LEDGER_REJECTED"));
        assert_eq!(
            envelope.message,
            "insufficient funds for commitment and fee"
        );
        assert_eq!(harness.db.escrow_count().unwrap(), 0);
        assert!(harness.notifier.events_for(ALICE).is_empty());
    }

    #[tokio::test]
    async fn unavailable_rate_blocks_creation() {
        let harness = Harness::with_rates(Arc::new(UnavailableRates));
        let envelope = harness
            .service
            .create_escrow(ALICE, harness.create_request(BOB))
            .await;
        assert_eq!(envelope.error_code(), Some("RATE_UNAVAILABLE"));
        assert!(harness.ledger.submissions().is_empty());
    }

    #[tokio::test]
    async fn mismatched_custody_seed_never_reaches_the_ledger() {
        let harness = Harness::new();
        let envelope = harness
            .service
            .create_escrow(ERIN, harness.create_request(BOB))
            .await;
        assert_eq!(envelope.error_code(), Some("SIGNER_MISMATCH"));
        assert!(harness.ledger.submissions().is_empty());
        assert_eq!(harness.ledger.calls(), 0);
        assert_eq!(harness.db.escrow_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn oversized_amounts_fail_validation() {
        let harness = Harness::new();
        let mut request = harness.create_request(BOB);
        request.amount_fiat = Some(dec!(1_000_000_000_000_000_000_000_000));
        let envelope = harness.service.create_escrow(ALICE, request).await;
        assert_eq!(envelope.error_code(), Some("VALIDATION_ERROR"));

        let mut request = harness.create_request(BOB);
        request.release_type = ReleaseType::MilestoneBased;
        request.milestones = vec![
            MilestoneInput {
                title: "Design".into(),
                description: None,
                amount_fiat: Decimal::MAX,
            },
            MilestoneInput {
                title: "Build".into(),
                description: None,
                amount_fiat: Decimal::MAX,
            },
        ];
        let envelope = harness.service.create_escrow(ALICE, request).await;
        assert_eq!(envelope.error_code(), Some("VALIDATION_ERROR"));

        assert!(harness.ledger.submissions().is_empty());
        assert_eq!(harness.db.escrow_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn parties_must_resolve_to_distinct_accounts() {
        let harness = Harness::new();
        for counterparty in [ALICE, DAVE, "zed"] {
            let envelope = harness
                .service
                .create_escrow(ALICE, harness.create_request(counterparty))
                .await;
            assert_eq!(
                envelope.error_code(),
                Some("PARTY_RESOLUTION_ERROR"),
                "{counterparty}"
            );
        }
        let envelope = harness
            .service
            .create_escrow(DAVE, harness.create_request(BOB))
            .await;
        assert_eq!(envelope.error_code(), Some("PARTY_RESOLUTION_ERROR"));
        assert!(harness.ledger.submissions().is_empty());
    }

    #[tokio::test]
    async fn release_finishes_the_commitment() {
        let harness = Harness::new();
        let id = active_escrow(&harness).await;
        harness.publish_commitment(id, 10);

        let envelope = harness
            .service
            .release_escrow(ALICE, id, ReleaseRequest::default())
            .await;
        assert!(envelope.success, "{:?}", envelope.error);
        let view = envelope.data.unwrap();
        assert_eq!(view.escrow.status, EscrowStatus::Completed);
        assert_eq!(view.escrow.progress, 100);
        assert_eq!(view.escrow.ledger_sequence, Some(10));
        assert!(view.escrow.completed_at.is_some());
        assert_eq!(harness.ledger.submissions().len(), 2);

        let refreshed = harness.balances.refreshed();
        assert!(refreshed.contains(&ALICE_ADDRESS.to_string()));
        assert!(refreshed.contains(&BOB_ADDRESS.to_string()));
        assert_eq!(
            harness.notifier.events_for(BOB),
            vec!["escrow_created", "escrow_completed"]
        );
    }

    #[tokio::test]
    async fn conditional_commitments_are_not_released() {
        let harness = Harness::new();
        let mut request = harness.create_request(BOB);
        request.condition = Some(
            "A0258020E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855810100"
                .into(),
        );
        let envelope = harness.service.create_escrow(ALICE, request).await;
        assert!(envelope.success, "{:?}", envelope.error);
        let id = envelope.data.unwrap().escrow.id;
        harness.publish_commitment(id, 10);

        let envelope = harness
            .service
            .release_escrow(ALICE, id, ReleaseRequest::default())
            .await;
        assert_eq!(envelope.error_code(), Some("UNSUPPORTED_CONDITIONAL_RELEASE"));
        assert_eq!(harness.ledger.submissions().len(), 1);
        assert_eq!(status_of(&harness, id), EscrowStatus::Active);
    }

    #[tokio::test]
    async fn release_of_ledger_finished_escrow_corrects_the_record() {
        let harness = Harness::new();
        let id = active_escrow(&harness).await;
        harness.publish_commitment(id, 10);
        harness.record_finish(id, 10, "FINISHEDELSEWHERE");

        let envelope = harness
            .service
            .release_escrow(ALICE, id, ReleaseRequest::default())
            .await;
        assert_eq!(envelope.error_code(), Some("COMMITMENT_ALREADY_TERMINAL"));
        assert!(envelope.message.contains("FINISHEDELSEWHERE"));
        assert_eq!(status_of(&harness, id), EscrowStatus::Completed);
        assert_eq!(harness.ledger.submissions().len(), 1);

        let log = harness.db.list_audit_transactions(id).unwrap();
        assert!(log.iter().any(|t| t.status == AuditStatus::Reconciled));
    }

    #[tokio::test]
    async fn stale_sequence_is_recovered_from_history() {
        let harness = Harness::new();
        let id = active_escrow(&harness).await;
        harness.publish_commitment(id, 10);
        harness.ledger.push_history(
            ALICE_ADDRESS,
            LedgerTransaction {
                hash: "RACEDCANCEL".into(),
                account: BOB_ADDRESS.into(),
                transaction_type: "EscrowCancel".into(),
                owner: Some(ALICE_ADDRESS.into()),
                offer_sequence: Some(10),
                result_code: Some("tesSUCCESS".into()),
                validated: true,
                ..Default::default()
            },
        );
        harness.ledger.set_submit_code("tecNO_TARGET");

        let envelope = harness
            .service
            .release_escrow(ALICE, id, ReleaseRequest::default())
            .await;
        assert_eq!(envelope.error_code(), Some("COMMITMENT_ALREADY_TERMINAL"));
        assert_eq!(status_of(&harness, id), EscrowStatus::Cancelled);
    }

    #[tokio::test]
    async fn terminal_escrows_are_immutable() {
        let harness = Harness::new();
        let id = active_escrow(&harness).await;
        harness.publish_commitment(id, 10);
        harness
            .service
            .release(ALICE, id, ReleaseRequest::default())
            .await
            .unwrap();
        let submitted = harness.ledger.submissions().len();

        let again = harness
            .service
            .release_escrow(ALICE, id, ReleaseRequest::default())
            .await;
        assert_eq!(again.error_code(), Some("INVALID_STATE"));
        let cancel = harness
            .service
            .cancel_escrow(BOB, id, CancelRequest::default())
            .await;
        assert_eq!(cancel.error_code(), Some("INVALID_STATE"));

        assert_eq!(harness.ledger.submissions().len(), submitted);
        assert_eq!(status_of(&harness, id), EscrowStatus::Completed);
    }

    #[tokio::test]
    async fn concurrent_releases_submit_once() {
        let harness = Harness::new();
        let id = active_escrow(&harness).await;
        harness.publish_commitment(id, 10);

        let (a, b) = tokio::join!(
            harness
                .service
                .release_escrow(ALICE, id, ReleaseRequest::default()),
            harness
                .service
                .release_escrow(ALICE, id, ReleaseRequest::default()),
        );
        assert_ne!(a.success, b.success);
        assert_eq!(harness.ledger.submissions().len(), 2);
    }

    #[tokio::test]
    async fn only_parties_may_act() {
        let harness = Harness::new();
        let id = active_escrow(&harness).await;
        harness.publish_commitment(id, 10);

        let release = harness
            .service
            .release_escrow(BOB, id, ReleaseRequest::default())
            .await;
        assert_eq!(release.error_code(), Some("FORBIDDEN"));
        let read = harness.service.get_escrow(CAROL, id).await;
        assert_eq!(read.error_code(), Some("FORBIDDEN"));
        let missing = harness.service.get_escrow(ALICE, Uuid::new_v4()).await;
        assert_eq!(missing.error_code(), Some("ESCROW_NOT_FOUND"));
    }

    #[tokio::test]
    async fn disputes_require_an_override() {
        let harness = Harness::new();
        let id = active_escrow(&harness).await;
        harness.publish_commitment(id, 10);
        harness
            .db
            .update_escrow_status(
                id,
                &[EscrowStatus::Active],
                &EscrowUpdate::to(EscrowStatus::Disputed),
            )
            .unwrap();

        let blocked = harness
            .service
            .release_escrow(ALICE, id, ReleaseRequest::default())
            .await;
        assert_eq!(blocked.error_code(), Some("ESCROW_DISPUTED"));

        let released = harness
            .service
            .release_escrow(
                ALICE,
                id,
                ReleaseRequest {
                    override_dispute: true,
                },
            )
            .await;
        assert!(released.success, "{:?}", released.error);
    }

    #[tokio::test]
    async fn release_needs_a_linked_commitment() {
        let harness = Harness::new();
        let unlinked = harness
            .db
            .insert_escrow(sample_escrow(EscrowStatus::Active))
            .unwrap();
        let envelope = harness
            .service
            .release_escrow(ALICE, unlinked.id, ReleaseRequest::default())
            .await;
        assert_eq!(envelope.error_code(), Some("COMMITMENT_NOT_FOUND"));

        let id = active_escrow(&harness).await;
        let envelope = harness
            .service
            .release_escrow(ALICE, id, ReleaseRequest::default())
            .await;
        assert_eq!(envelope.error_code(), Some("COMMITMENT_NOT_FOUND"));
        assert_eq!(status_of(&harness, id), EscrowStatus::Active);
    }

    #[tokio::test]
    async fn unreachable_ledger_leaves_the_record_alone() {
        let harness = Harness::new();
        let id = active_escrow(&harness).await;
        harness.publish_commitment(id, 10);
        harness.ledger.set_unreachable(true);

        let envelope = harness
            .service
            .release_escrow(ALICE, id, ReleaseRequest::default())
            .await;
        assert_eq!(envelope.error_code(), Some("LEDGER_UNAVAILABLE"));
        assert_eq!(status_of(&harness, id), EscrowStatus::Active);
    }

    #[tokio::test]
    async fn cancel_before_expiry_leaves_commitment_to_expire() {
        let harness = Harness::new();
        let id = active_escrow(&harness).await;
        harness.publish_commitment(id, 10);

        let envelope = harness
            .service
            .cancel_escrow(
                BOB,
                id,
                CancelRequest {
                    reason: Some("scope changed".into()),
                    override_dispute: false,
                },
            )
            .await;
        assert!(envelope.success, "{:?}", envelope.error);
        let escrow = envelope.data.unwrap().escrow;
        assert_eq!(escrow.status, EscrowStatus::Cancelled);
        assert_eq!(escrow.cancel_reason.as_deref(), Some("scope changed"));
        assert!(escrow.cancelled_at.is_some());
        assert_eq!(harness.ledger.submissions().len(), 1);
        assert_eq!(
            harness.notifier.events_for(ALICE),
            vec!["escrow_created", "escrow_cancelled"]
        );
    }

    fn cancel_audit(view: &EscrowView) -> &AuditTransaction {
        view.transactions
            .iter()
            .find(|tx| tx.operation == OperationKind::Cancel)
            .expect("cancel audit entry")
    }

    #[tokio::test]
    async fn cancel_after_expiry_submits_against_resolved_sequence() {
        let harness = Harness::new();
        let id = active_escrow(&harness).await;
        let now = Utc::now();
        harness.publish_commitment_between(
            id,
            10,
            now - chrono::Duration::days(2),
            now - chrono::Duration::minutes(1),
        );

        let envelope = harness
            .service
            .cancel_escrow(ALICE, id, CancelRequest::default())
            .await;
        assert!(envelope.success, "{:?}", envelope.error);
        let view = envelope.data.unwrap();
        assert_eq!(view.escrow.status, EscrowStatus::Cancelled);
        assert_eq!(view.escrow.ledger_sequence, Some(10));

        let submissions = harness.ledger.submissions();
        assert_eq!(submissions.len(), 2);
        let cancel_blob = &submissions[1];
        assert!(cancel_blob.starts_with("120004"), "EscrowCancel type: {cancel_blob}");
        assert!(cancel_blob.contains("20190000000A"), "OfferSequence 10: {cancel_blob}");

        let audit = cancel_audit(&view);
        assert!(audit.tx_hash.is_some());
        assert_eq!(audit.message.as_deref(), Some("cancelled on the ledger"));
    }

    #[tokio::test]
    async fn failed_ledger_cancel_still_cancels_the_record() {
        let harness = Harness::new();
        let id = active_escrow(&harness).await;
        let now = Utc::now();
        harness.publish_commitment_between(
            id,
            10,
            now - chrono::Duration::days(2),
            now - chrono::Duration::minutes(1),
        );
        harness.ledger.set_submit_code("tecNO_PERMISSION");

        let envelope = harness
            .service
            .cancel_escrow(BOB, id, CancelRequest::default())
            .await;
        assert!(envelope.success, "{:?}", envelope.error);
        let view = envelope.data.unwrap();
        assert_eq!(view.escrow.status, EscrowStatus::Cancelled);
        assert_eq!(harness.ledger.submissions().len(), 2);

        let audit = cancel_audit(&view);
        assert!(audit.tx_hash.is_none());
        assert!(audit
            .message
            .as_deref()
            .is_some_and(|m| m.starts_with("ledger cancel failed")));
    }

    #[tokio::test]
    async fn cancel_of_ledger_finished_escrow_is_refused() {
        let harness = Harness::new();
        let id = active_escrow(&harness).await;
        harness.publish_commitment(id, 10);
        harness.record_finish(id, 10, "FINISHHASH");

        let envelope = harness
            .service
            .cancel_escrow(ALICE, id, CancelRequest::default())
            .await;
        assert_eq!(envelope.error_code(), Some("COMMITMENT_ALREADY_TERMINAL"));
        assert_eq!(status_of(&harness, id), EscrowStatus::Completed);
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let harness = Harness::new();
        let id = active_escrow(&harness).await;
        harness.publish_commitment(id, 10);

        let open = harness.service.reconcile(ALICE, id).await.unwrap();
        assert_eq!(open.ledger_state, LedgerState::Open);
        assert_eq!(open.ledger_sequence, Some(10));
        assert!(!open.corrected);

        harness.record_finish(id, 10, "FINISHHASH");
        let first = harness.service.reconcile(BOB, id).await.unwrap();
        assert!(first.corrected);
        assert_eq!(first.status, EscrowStatus::Completed);
        assert_eq!(first.ledger_tx_hash.as_deref(), Some("FINISHHASH"));

        let second = harness.service.reconcile(BOB, id).await.unwrap();
        assert!(!second.corrected);
        assert_eq!(second.status, EscrowStatus::Completed);
        assert_eq!(second.ledger_state, LedgerState::Finished);

        let reconciled = harness
            .db
            .list_audit_transactions(id)
            .unwrap()
            .into_iter()
            .filter(|t| t.status == AuditStatus::Reconciled)
            .count();
        assert_eq!(reconciled, 1);
    }

    #[tokio::test]
    async fn reconcile_reports_missing_commitments() {
        let harness = Harness::new();
        let id = active_escrow(&harness).await;

        let envelope = harness.service.reconcile_status(ALICE, id).await;
        assert!(envelope.success);
        let report = envelope.data.unwrap();
        assert_eq!(report.ledger_state, LedgerState::NotFound);
        assert_eq!(
            report.not_found_reason,
            Some(NotFoundReason::NoMatchingObjectOrHistory)
        );
        assert_eq!(report.status, EscrowStatus::Active);
    }

    #[tokio::test]
    async fn side_effect_failures_do_not_fail_operations() {
        let harness = Harness::new();
        harness.notifier.failing.store(true, Ordering::SeqCst);
        harness.balances.failing.store(true, Ordering::SeqCst);

        let id = active_escrow(&harness).await;
        harness.publish_commitment(id, 10);
        let envelope = harness
            .service
            .release_escrow(ALICE, id, ReleaseRequest::default())
            .await;
        assert!(envelope.success, "{:?}", envelope.error);
        assert_eq!(status_of(&harness, id), EscrowStatus::Completed);
    }

    #[test]
    fn release_window_is_enforced() {
        let now = to_ripple_time(Utc::now()).unwrap();
        let commitment = LedgerCommitmentRef {
            sequence: 1,
            owner: ALICE_ADDRESS.into(),
            destination: BOB_ADDRESS.into(),
            amount_drops: 1,
            finish_after: Some(now - 60),
            cancel_after: Some(now + 3_600),
            condition: None,
        };
        assert!(check_releasable(&commitment).is_ok());

        let early = LedgerCommitmentRef {
            finish_after: Some(now + 3_600),
            ..commitment.clone()
        };
        assert_eq!(check_releasable(&early).unwrap_err().code(), "NOT_YET_RELEASABLE");

        let expired = LedgerCommitmentRef {
            cancel_after: Some(now - 1),
            ..commitment.clone()
        };
        assert_eq!(check_releasable(&expired).unwrap_err().code(), "COMMITMENT_EXPIRED");

        let conditional = LedgerCommitmentRef {
            condition: Some("A025".into()),
            ..commitment
        };
        assert_eq!(
            check_releasable(&conditional).unwrap_err().code(),
            "UNSUPPORTED_CONDITIONAL_RELEASE"
        );
    }
}
