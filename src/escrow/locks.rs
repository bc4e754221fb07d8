// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-escrow mutual exclusion around read-resolve-submit-persist.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Default)]
pub struct EscrowLocks {
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

/// Held for the duration of one operation on one escrow.
pub struct EscrowGuard {
    id: Uuid,
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
    _guard: OwnedMutexGuard<()>,
}

impl EscrowLocks {
    pub async fn acquire(&self, id: Uuid) -> EscrowGuard {
        let lock = self.locks.entry(id).or_default().clone();
        EscrowGuard {
            id,
            locks: self.locks.clone(),
            _guard: lock.lock_owned().await,
        }
    }

    /// Number of escrows with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for EscrowGuard {
    fn drop(&mut self) {
        // One reference in the map, one in this guard: nobody is waiting.
        self.locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) <= 2);
    }
}
