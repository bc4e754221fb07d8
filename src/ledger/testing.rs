// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory ledger used by unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::client::{LedgerError, LedgerRpc};
use super::codec::transaction_id;
use super::types::*;

struct FakeState {
    accounts: HashMap<String, AccountInfo>,
    current_ledger: u32,
    submit_code: String,
    submit_hash: Option<String>,
    submitted: Vec<String>,
    transactions: HashMap<String, LedgerTransaction>,
    commitments: HashMap<String, Vec<CommitmentObject>>,
    history: HashMap<String, Vec<LedgerTransaction>>,
    lookups: usize,
    calls: usize,
    unreachable: bool,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            accounts: HashMap::new(),
            current_ledger: 1_000,
            submit_code: "tesSUCCESS".into(),
            submit_hash: None,
            submitted: Vec::new(),
            transactions: HashMap::new(),
            commitments: HashMap::new(),
            history: HashMap::new(),
            lookups: 0,
            calls: 0,
            unreachable: false,
        }
    }
}

/// Scriptable [`LedgerRpc`] that records every call.
#[derive(Default)]
pub struct FakeLedger {
    state: Mutex<FakeState>,
}

impl FakeLedger {
    fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn fund(&self, address: &str, sequence: u32, balance_drops: u64) {
        self.with(|s| {
            s.accounts.insert(
                address.to_string(),
                AccountInfo {
                    address: address.to_string(),
                    sequence,
                    balance_drops,
                    owner_count: 0,
                },
            );
        });
    }

    /// Fix the engine result (and optionally the hash) of later submissions.
    pub fn set_submit_result(&self, code: &str, hash: &str) {
        self.with(|s| {
            s.submit_code = code.to_string();
            s.submit_hash = Some(hash.to_string());
        });
    }

    /// Fix the engine result; the hash is derived from the submitted blob.
    pub fn set_submit_code(&self, code: &str) {
        self.with(|s| {
            s.submit_code = code.to_string();
            s.submit_hash = None;
        });
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.with(|s| s.unreachable = unreachable);
    }

    pub fn put_transaction(&self, tx: LedgerTransaction) {
        self.with(|s| {
            s.transactions.insert(tx.hash.clone(), tx);
        });
    }

    pub fn put_commitment(&self, owner: &str, object: CommitmentObject) {
        self.with(|s| s.commitments.entry(owner.to_string()).or_default().push(object));
    }

    pub fn clear_commitments(&self, owner: &str) {
        self.with(|s| {
            s.commitments.remove(owner);
        });
    }

    pub fn push_history(&self, address: &str, tx: LedgerTransaction) {
        self.with(|s| s.history.entry(address.to_string()).or_default().insert(0, tx));
    }

    pub fn submissions(&self) -> Vec<String> {
        self.with(|s| s.submitted.clone())
    }

    pub fn lookups(&self) -> usize {
        self.with(|s| s.lookups)
    }

    /// Total number of RPCs served.
    pub fn calls(&self) -> usize {
        self.with(|s| s.calls)
    }

    fn enter(&self) -> Result<(), LedgerError> {
        self.with(|s| {
            s.calls += 1;
            if s.unreachable {
                Err(LedgerError::Transport("connection refused".into()))
            } else {
                Ok(())
            }
        })
    }
}

#[async_trait]
impl LedgerRpc for FakeLedger {
    async fn account_info(&self, address: &str) -> Result<AccountInfo, LedgerError> {
        self.enter()?;
        self.with(|s| s.accounts.get(address).cloned())
            .ok_or_else(|| LedgerError::AccountNotFound(address.to_string()))
    }

    async fn current_ledger_index(&self) -> Result<u32, LedgerError> {
        self.enter()?;
        Ok(self.with(|s| s.current_ledger))
    }

    async fn submit_signed(&self, blob_hex: &str) -> Result<SubmitResult, LedgerError> {
        self.enter()?;
        Ok(self.with(|s| {
            s.submitted.push(blob_hex.to_string());
            let tx_hash = s.submit_hash.clone().unwrap_or_else(|| {
                hex::decode(blob_hex)
                    .map(|blob| transaction_id(&blob))
                    .unwrap_or_else(|_| format!("FAKE{}", s.submitted.len()))
            });
            SubmitResult {
                result_code: s.submit_code.clone(),
                result_message: String::new(),
                tx_hash,
            }
        }))
    }

    async fn transaction(&self, tx_hash: &str) -> Result<Option<LedgerTransaction>, LedgerError> {
        self.enter()?;
        Ok(self.with(|s| {
            s.lookups += 1;
            s.transactions.get(tx_hash).cloned()
        }))
    }

    async fn open_commitments(&self, address: &str) -> Result<Vec<CommitmentObject>, LedgerError> {
        self.enter()?;
        Ok(self.with(|s| s.commitments.get(address).cloned().unwrap_or_default()))
    }

    async fn account_history(
        &self,
        address: &str,
        window: HistoryWindow,
    ) -> Result<Vec<LedgerTransaction>, LedgerError> {
        self.enter()?;
        Ok(self.with(|s| {
            s.history
                .get(address)
                .map(|txs| txs.iter().take(window.limit as usize).cloned().collect())
                .unwrap_or_default()
        }))
    }
}
