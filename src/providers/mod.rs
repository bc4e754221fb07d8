// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! External collaborators of the escrow engine.
//!
//! - `directory` - party to ledger-account resolution and custodied seeds
//! - `rates` - fiat exchange rates
//! - `notifications` - party notifications
//! - `balances` - post-release balance refresh
//! - `xumm` - Xaman signing gateway

pub mod balances;
pub mod cache;
pub mod directory;
pub mod notifications;
pub mod rates;
pub mod xumm;

pub use balances::{BalanceRefresher, Balances, LedgerBalanceRefresher};
pub use directory::{DirectoryError, FileDirectory, PartyAccount, PartyDirectory};
pub use notifications::{EscrowEvent, NotificationError, NotificationSink, TracingNotifier};
pub use rates::{CoinGeckoRates, CurrencyPair, ExchangeRateProvider, FixedRate, RateError};
pub use xumm::XummGateway;
