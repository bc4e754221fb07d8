// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::escrow::EscrowService;
use crate::storage::EscrowDatabase;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<EscrowService>,
    /// Record store, also probed by the readiness check.
    pub db: Arc<EscrowDatabase>,
}

impl AppState {
    pub fn new(service: EscrowService, db: Arc<EscrowDatabase>) -> Self {
        Self {
            service: Arc::new(service),
            db,
        }
    }
}
