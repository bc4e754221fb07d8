// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Off-chain Record Store
//!
//! The escrow record is the single mutable shared resource of the engine.
//! Every status transition is a conditional write: it only applies when the
//! stored status is one of the statuses the caller checked at the start of
//! its operation, so two operations can never both perform the same
//! transition.
//!
//! [`EscrowDatabase`] implements [`EscrowStore`] on an embedded redb file.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::escrow::model::{
    AuditTransaction, Escrow, EscrowStatus, EscrowUpdate, Milestone, PendingSigningRequest,
};

pub mod database;

pub use database::EscrowDatabase;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Duplicate(String),

    #[error("status changed concurrently: expected one of {expected:?}, found {actual}")]
    Conflict {
        expected: Vec<EscrowStatus>,
        actual: EscrowStatus,
    },
}

impl StoreError {
    /// Whether retrying the same write may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            Self::NotFound(_) | Self::Duplicate(_) | Self::Conflict { .. } | Self::Serde(_)
        )
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Record store consumed by the escrow engine.
pub trait EscrowStore: Send + Sync {
    fn get_escrow(&self, id: Uuid) -> StoreResult<Option<Escrow>>;

    /// Persist a new escrow, allocating its display sequence.
    fn insert_escrow(&self, escrow: Escrow) -> StoreResult<Escrow>;

    /// Apply `update` only if the stored status is one of `expected`.
    fn update_escrow_status(
        &self,
        id: Uuid,
        expected: &[EscrowStatus],
        update: &EscrowUpdate,
    ) -> StoreResult<Escrow>;

    fn insert_milestones(&self, milestones: &[Milestone]) -> StoreResult<()>;

    /// Mark every pending milestone completed; returns how many changed.
    fn complete_milestones(&self, escrow_id: Uuid, at: DateTime<Utc>) -> StoreResult<usize>;

    fn list_milestones(&self, escrow_id: Uuid) -> StoreResult<Vec<Milestone>>;

    fn append_audit_transaction(&self, record: &AuditTransaction) -> StoreResult<()>;

    fn list_audit_transactions(&self, escrow_id: Uuid) -> StoreResult<Vec<AuditTransaction>>;

    /// Insert or replace a signing request.
    fn put_signing_request(&self, request: &PendingSigningRequest) -> StoreResult<()>;

    /// Most recently created signing request of an escrow.
    fn latest_signing_request(&self, escrow_id: Uuid) -> StoreResult<Option<PendingSigningRequest>>;
}
