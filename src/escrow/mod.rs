// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Escrow Engine
//!
//! Lifecycle of fiat-denominated escrows backed by native XRP ledger
//! commitments.
//!
//! ```text
//!   create (direct) ───────────────────────► Active ──── release ────► Completed
//!   create (delegated) ──► Pending ─ signed ─►  │
//!                            │                  └──── cancel ─────► Cancelled
//!                            └── declined / expired ─────────────► Cancelled
//! ```
//!
//! `Disputed` escrows are released or cancelled only with an explicit
//! override. `Completed` and `Cancelled` are terminal. The ledger is the source of
//! truth; the record is corrected towards it, never the other way round.

pub mod envelope;
pub mod error;
pub mod locks;
pub mod model;
pub mod poller;
pub mod resolver;
pub mod service;
pub mod terms;

#[cfg(test)]
pub mod testing;

pub use envelope::{Envelope, ErrorBody};
pub use error::EscrowError;
pub use model::{Escrow, EscrowStatus, Milestone, PendingSigningRequest, ReleaseType, SigningMode};
pub use poller::{PollOutcome, PollReport};
pub use resolver::{CommitmentResolver, Resolution};
pub use service::{
    CancelRequest, EngineDeps, EngineSettings, EscrowService, EscrowView, LedgerState,
    ReconcileReport, ReleaseRequest,
};
pub use terms::{CreateEscrowRequest, MilestoneInput, TermsPolicy};
