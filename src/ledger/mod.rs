// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! XRP Ledger integration.
//!
//! - `client` - JSON-RPC facade (`LedgerRpc`) and its HTTPS implementation
//! - `parse` - typed extraction from inconsistent RPC response shapes
//! - `codec` / `transactions` - canonical binary encoding and local signing
//! - `keys` - family seeds, key derivation and addresses
//! - `submit` - submit-and-confirm

pub mod client;
pub mod codec;
pub mod keys;
pub mod parse;
pub mod submit;
pub mod transactions;
pub mod types;

#[cfg(test)]
pub mod testing;

pub use client::{LedgerError, LedgerRpc, XrplClient};
pub use submit::{submit_and_confirm, ConfirmPolicy};
pub use transactions::{
    drops_to_xrp, sign_template, xrp_to_drops, SignedTransaction, TxTemplate,
    TF_FULLY_CANONICAL_SIG,
};
pub use types::*;
