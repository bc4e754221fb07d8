// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Submit-and-confirm.
//!
//! `submit` only reports a provisional engine result. After a provisional
//! acceptance the transaction is looked up for a bounded number of attempts;
//! a validated result replaces the provisional one.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::client::{LedgerError, LedgerRpc};
use super::types::SubmitResult;

/// How long to wait for a validated result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for ConfirmPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            interval: Duration::from_secs(2),
        }
    }
}

impl ConfirmPolicy {
    /// Trust the provisional result without polling.
    pub const fn provisional_only() -> Self {
        Self {
            attempts: 0,
            interval: Duration::ZERO,
        }
    }
}

/// Submit a signed blob and wait (bounded) for its validated result.
///
/// A rejected provisional result is returned as-is; the caller decides how to
/// surface it. The blob is never resubmitted.
pub async fn submit_and_confirm(
    ledger: &dyn LedgerRpc,
    blob_hex: &str,
    policy: ConfirmPolicy,
) -> Result<SubmitResult, LedgerError> {
    let provisional = ledger.submit_signed(blob_hex).await?;
    info!(
        tx_hash = %provisional.tx_hash,
        result = %provisional.result_code,
        "Submitted transaction"
    );

    if !provisional.is_accepted() {
        return Ok(provisional);
    }
    confirm(ledger, provisional, policy).await
}

/// Poll for the validated outcome of an already-submitted transaction.
pub async fn confirm(
    ledger: &dyn LedgerRpc,
    provisional: SubmitResult,
    policy: ConfirmPolicy,
) -> Result<SubmitResult, LedgerError> {
    for attempt in 1..=policy.attempts {
        tokio::time::sleep(policy.interval).await;

        match ledger.transaction(&provisional.tx_hash).await {
            Ok(Some(tx)) if tx.validated => {
                let Some(code) = tx.result_code else {
                    continue;
                };
                debug!(tx_hash = %tx.hash, result = %code, attempt, "Transaction validated");
                return Ok(SubmitResult {
                    result_message: provisional.result_message.clone(),
                    result_code: code,
                    tx_hash: provisional.tx_hash,
                });
            }
            Ok(_) => continue,
            Err(e) if e.is_retryable() => {
                warn!(error = %e, attempt, "Transaction lookup failed, retrying");
            }
            Err(e) => return Err(e),
        }
    }

    if policy.attempts > 0 {
        warn!(
            tx_hash = %provisional.tx_hash,
            result = %provisional.result_code,
            "No validated result within the confirmation window, keeping provisional result"
        );
    }
    Ok(provisional)
}
