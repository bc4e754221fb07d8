// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relational Escrow - Ledger-anchored Escrow Lifecycle Service
//!
//! Creates, releases and cancels escrow commitments on the XRP Ledger and
//! keeps the off-chain escrow records consistent with the ledger.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `escrow` - Lifecycle engine, commitment resolver and signing poller
//! - `ledger` - XRPL JSON-RPC client, binary codec and key handling
//! - `providers` - Party directory, exchange rates, signing gateway, notifications
//! - `signing` - Direct and delegated transaction signers
//! - `storage` - Embedded escrow record store (redb)

pub mod api;
pub mod config;
pub mod error;
pub mod escrow;
pub mod ledger;
pub mod providers;
pub mod signing;
pub mod state;
pub mod storage;
