// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded escrow record store backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `escrows`: escrow_id → serialized Escrow
//! - `milestones`: `escrow_id|order_index` → serialized Milestone
//! - `transaction_log`: `escrow_id|created_at|entry_id` → serialized AuditTransaction
//! - `signing_requests`: `escrow_id|created_at|request_id` → serialized PendingSigningRequest
//! - `display_counters`: year → last allocated display sequence

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::{EscrowStore, StoreError, StoreResult};
use crate::escrow::model::{
    AuditTransaction, DisplayId, Escrow, EscrowStatus, EscrowUpdate, Milestone, MilestoneStatus,
    PendingSigningRequest,
};

// =============================================================================
// Table Definitions
// =============================================================================

const ESCROWS: TableDefinition<&str, &[u8]> = TableDefinition::new("escrows");

/// Key format: `escrow_id|order_index (zero-padded)`.
const MILESTONES: TableDefinition<&str, &[u8]> = TableDefinition::new("milestones");

/// Key format: `escrow_id|created_at_micros (zero-padded)|entry_id` for
/// chronological range scans.
const TRANSACTION_LOG: TableDefinition<&str, &[u8]> = TableDefinition::new("transaction_log");

/// Key format: `escrow_id|created_at_micros (zero-padded)|request_id`.
const SIGNING_REQUESTS: TableDefinition<&str, &[u8]> = TableDefinition::new("signing_requests");

const DISPLAY_COUNTERS: TableDefinition<i32, u32> = TableDefinition::new("display_counters");

// =============================================================================
// Key Helpers
// =============================================================================

fn child_key(escrow_id: Uuid, ordinal: &str, suffix: &str) -> String {
    format!("{escrow_id}|{ordinal}|{suffix}")
}

fn time_ordinal(at: DateTime<Utc>) -> String {
    format!("{:020}", at.timestamp_micros().max(0))
}

/// Bounds covering every child key of an escrow (`'}'` sorts right after `'|'`).
fn child_range(escrow_id: Uuid) -> (String, String) {
    (format!("{escrow_id}|"), format!("{escrow_id}}}"))
}

// =============================================================================
// EscrowDatabase
// =============================================================================

/// Embedded ACID escrow database.
pub struct EscrowDatabase {
    db: Database,
}

impl EscrowDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ESCROWS)?;
            let _ = write_txn.open_table(MILESTONES)?;
            let _ = write_txn.open_table(TRANSACTION_LOG)?;
            let _ = write_txn.open_table(SIGNING_REQUESTS)?;
            let _ = write_txn.open_table(DISPLAY_COUNTERS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Whether a read transaction can be opened (readiness probe).
    pub fn is_healthy(&self) -> bool {
        self.db
            .begin_read()
            .map(|txn| txn.open_table(ESCROWS).is_ok())
            .unwrap_or(false)
    }

    /// Number of stored escrow records.
    pub fn escrow_count(&self) -> StoreResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ESCROWS)?;
        Ok(table.len()?)
    }

    fn list_children<T: DeserializeOwned>(
        &self,
        table: TableDefinition<'static, &'static str, &'static [u8]>,
        escrow_id: Uuid,
    ) -> StoreResult<Vec<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table)?;
        let (start, end) = child_range(escrow_id);

        let mut items = Vec::new();
        for entry in table.range(start.as_str()..end.as_str())? {
            let (_, value) = entry?;
            items.push(serde_json::from_slice(value.value())?);
        }
        Ok(items)
    }
}

impl EscrowStore for EscrowDatabase {
    fn get_escrow(&self, id: Uuid) -> StoreResult<Option<Escrow>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ESCROWS)?;
        match table.get(id.to_string().as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn insert_escrow(&self, mut escrow: Escrow) -> StoreResult<Escrow> {
        let key = escrow.id.to_string();

        let write_txn = self.db.begin_write()?;
        {
            let mut escrows = write_txn.open_table(ESCROWS)?;
            if escrows.get(key.as_str())?.is_some() {
                return Err(StoreError::Duplicate(key));
            }

            let mut counters = write_txn.open_table(DISPLAY_COUNTERS)?;
            let year = escrow.display_id.year;
            let last = counters.get(year)?.map(|v| v.value()).unwrap_or(0);
            let sequence = last + 1;
            counters.insert(year, sequence)?;
            escrow.display_id = DisplayId { year, sequence };

            let json = serde_json::to_vec(&escrow)?;
            escrows.insert(key.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(escrow)
    }

    fn update_escrow_status(
        &self,
        id: Uuid,
        expected: &[EscrowStatus],
        update: &EscrowUpdate,
    ) -> StoreResult<Escrow> {
        let key = id.to_string();

        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(ESCROWS)?;
            let mut current: Escrow = match table.get(key.as_str())? {
                Some(value) => serde_json::from_slice(value.value())?,
                None => return Err(StoreError::NotFound(key)),
            };

            if !expected.contains(&current.status) {
                return Err(StoreError::Conflict {
                    expected: expected.to_vec(),
                    actual: current.status,
                });
            }

            update.apply(&mut current);
            let json = serde_json::to_vec(&current)?;
            table.insert(key.as_str(), json.as_slice())?;
            current
        };
        write_txn.commit()?;
        Ok(updated)
    }

    fn insert_milestones(&self, milestones: &[Milestone]) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(MILESTONES)?;
            for milestone in milestones {
                let key = child_key(
                    milestone.escrow_id,
                    &format!("{:010}", milestone.order_index),
                    &milestone.id.to_string(),
                );
                let json = serde_json::to_vec(milestone)?;
                table.insert(key.as_str(), json.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn complete_milestones(&self, escrow_id: Uuid, at: DateTime<Utc>) -> StoreResult<usize> {
        let (start, end) = child_range(escrow_id);

        let write_txn = self.db.begin_write()?;
        let completed = {
            let mut table = write_txn.open_table(MILESTONES)?;
            let mut pending = Vec::new();
            for entry in table.range(start.as_str()..end.as_str())? {
                let (key, value) = entry?;
                let milestone: Milestone = serde_json::from_slice(value.value())?;
                if milestone.status == MilestoneStatus::Pending {
                    pending.push((key.value().to_string(), milestone));
                }
            }

            for (key, mut milestone) in pending.iter().cloned() {
                milestone.status = MilestoneStatus::Completed;
                milestone.completed_at = Some(at);
                let json = serde_json::to_vec(&milestone)?;
                table.insert(key.as_str(), json.as_slice())?;
            }
            pending.len()
        };
        write_txn.commit()?;
        Ok(completed)
    }

    fn list_milestones(&self, escrow_id: Uuid) -> StoreResult<Vec<Milestone>> {
        self.list_children(MILESTONES, escrow_id)
    }

    fn append_audit_transaction(&self, record: &AuditTransaction) -> StoreResult<()> {
        let key = child_key(
            record.escrow_id,
            &time_ordinal(record.created_at),
            &record.id.to_string(),
        );
        let json = serde_json::to_vec(record)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(TRANSACTION_LOG)?;
            table.insert(key.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn list_audit_transactions(&self, escrow_id: Uuid) -> StoreResult<Vec<AuditTransaction>> {
        self.list_children(TRANSACTION_LOG, escrow_id)
    }

    fn put_signing_request(&self, request: &PendingSigningRequest) -> StoreResult<()> {
        let key = child_key(
            request.escrow_id,
            &time_ordinal(request.created_at),
            &request.request_id,
        );
        let json = serde_json::to_vec(request)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SIGNING_REQUESTS)?;
            table.insert(key.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn latest_signing_request(&self, escrow_id: Uuid) -> StoreResult<Option<PendingSigningRequest>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SIGNING_REQUESTS)?;
        let (start, end) = child_range(escrow_id);

        let mut range = table.range(start.as_str()..end.as_str())?;
        match range.next_back() {
            Some(entry) => {
                let (_, value) = entry?;
                Ok(Some(serde_json::from_slice(value.value())?))
            }
            None => Ok(None),
        }
    }
}
