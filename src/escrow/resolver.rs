// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Commitment Resolver
//!
//! Finds the live ledger commitment behind an escrow record. Open escrow
//! objects do not carry the transaction-level sequence needed to finish or
//! cancel them, and a commitment missing from the open list may have been
//! finished, cancelled or never created. Resolution therefore cascades:
//!
//! 1. Look up the creating transaction and take its account sequence.
//! 2. Match the owner's open escrow objects by destination and amount,
//!    preferring an object whose sequence or previous transaction id ties it
//!    to the creating transaction.
//! 3. With a known sequence and no open match, scan the owner's history for
//!    a successful finish or cancel of that sequence.
//! 4. Otherwise report `NotFound` with the reason.
//!
//! Results are never cached; every release or cancel resolves again.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;
use utoipa::ToSchema;

use crate::ledger::{
    CommitmentObject, EscrowTxKind, HistoryWindow, LedgerError, LedgerRpc, LedgerTransaction,
};

/// Amount slack when matching open objects, in drops.
pub const AMOUNT_TOLERANCE_DROPS: u64 = 1_000;

/// Ledger view of one open commitment at resolution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerCommitmentRef {
    /// Transaction-level sequence referenced by `OfferSequence`.
    pub sequence: u32,
    pub owner: String,
    pub destination: String,
    pub amount_drops: u64,
    pub finish_after: Option<u32>,
    pub cancel_after: Option<u32>,
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TerminalKind {
    Finished,
    Cancelled,
}

impl TerminalKind {
    fn of(kind: EscrowTxKind) -> Option<Self> {
        match kind {
            EscrowTxKind::EscrowFinish => Some(Self::Finished),
            EscrowTxKind::EscrowCancel => Some(Self::Cancelled),
            EscrowTxKind::EscrowCreate => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotFoundReason {
    /// The record carries no creating transaction hash.
    NoTransactionHash,
    /// The transaction is known but neither an open object nor history matches.
    NoMatchingObjectOrHistory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Open(LedgerCommitmentRef),
    AlreadyTerminal {
        kind: TerminalKind,
        /// Hash of the finishing or cancelling transaction.
        tx_hash: String,
        sequence: u32,
    },
    NotFound(NotFoundReason),
}

/// What the caller knows about the commitment.
#[derive(Debug, Clone, Copy)]
pub struct CommitmentQuery<'a> {
    pub tx_hash: Option<&'a str>,
    pub owner: &'a str,
    pub destination: Option<&'a str>,
    pub amount_drops: u64,
    /// Sequence cached on the record by an earlier resolution.
    pub known_sequence: Option<u32>,
}

pub struct CommitmentResolver {
    ledger: Arc<dyn LedgerRpc>,
    window: HistoryWindow,
}

impl CommitmentResolver {
    pub fn new(ledger: Arc<dyn LedgerRpc>) -> Self {
        Self {
            ledger,
            window: HistoryWindow::default(),
        }
    }

    pub fn with_window(mut self, window: HistoryWindow) -> Self {
        self.window = window;
        self
    }

    pub async fn resolve(&self, query: CommitmentQuery<'_>) -> Result<Resolution, LedgerError> {
        let sequence = match query.tx_hash {
            Some(hash) => self.creation_sequence(hash, query.owner).await?,
            None => None,
        }
        .or(query.known_sequence);
        debug!(owner = query.owner, ?sequence, "Resolver stage 1 finished");

        let objects = self.ledger.open_commitments(query.owner).await?;
        if let Some(found) = match_open(&objects, &query, sequence) {
            debug!(owner = query.owner, sequence = found.sequence, "Matched open commitment");
            return Ok(Resolution::Open(found));
        }

        if let Some(sequence) = sequence {
            if let Some(terminal) = self.find_terminal(query.owner, sequence).await? {
                return Ok(terminal);
            }
        }

        let reason = if query.tx_hash.is_some() {
            NotFoundReason::NoMatchingObjectOrHistory
        } else {
            NotFoundReason::NoTransactionHash
        };
        debug!(owner = query.owner, ?reason, "Commitment not found");
        Ok(Resolution::NotFound(reason))
    }

    /// Stage 3 on its own: look for a finish or cancel of `sequence`.
    pub async fn find_terminal(
        &self,
        owner: &str,
        sequence: u32,
    ) -> Result<Option<Resolution>, LedgerError> {
        let history = self.ledger.account_history(owner, self.window).await?;
        let found = history
            .iter()
            .find_map(|tx| terminal_of(tx, owner, sequence))
            .map(|(kind, tx_hash)| Resolution::AlreadyTerminal {
                kind,
                tx_hash,
                sequence,
            });
        if let Some(Resolution::AlreadyTerminal { kind, tx_hash, .. }) = &found {
            debug!(owner, sequence, ?kind, tx_hash = %tx_hash, "Commitment already terminal");
        }
        Ok(found)
    }

    async fn creation_sequence(&self, hash: &str, owner: &str) -> Result<Option<u32>, LedgerError> {
        let tx = match self.ledger.transaction(hash).await {
            Ok(tx) => tx,
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        Ok(tx
            .filter(|tx| tx.kind() == Some(EscrowTxKind::EscrowCreate) && tx.account == owner)
            .and_then(|tx| tx.commitment_sequence()))
    }
}

fn within_tolerance(a: u64, b: u64) -> bool {
    a.abs_diff(b) <= AMOUNT_TOLERANCE_DROPS
}

fn match_open(
    objects: &[CommitmentObject],
    query: &CommitmentQuery<'_>,
    sequence: Option<u32>,
) -> Option<LedgerCommitmentRef> {
    let candidates: Vec<&CommitmentObject> = objects
        .iter()
        .filter(|o| query.destination.is_none_or(|d| o.destination == d))
        .filter(|o| within_tolerance(o.amount_drops, query.amount_drops))
        .collect();

    let by_hash = |o: &&&CommitmentObject| match (query.tx_hash, &o.previous_txn_id) {
        (Some(hash), Some(previous)) => previous.eq_ignore_ascii_case(hash),
        _ => false,
    };

    // An object created by a different transaction is never ours.
    let not_foreign = |o: &&&CommitmentObject| match (query.tx_hash, &o.previous_txn_id) {
        (Some(hash), Some(previous)) => previous.eq_ignore_ascii_case(hash),
        _ => true,
    };

    let (object, sequence) = match sequence {
        Some(seq) => {
            let object = candidates
                .iter()
                .find(|o| o.sequence == Some(seq))
                .or_else(|| candidates.iter().find(by_hash))
                .or_else(|| {
                    // Without object-level sequences, a lone candidate is the match.
                    match candidates.as_slice() {
                        [only] if only.sequence.is_none() => Some(only).filter(not_foreign),
                        _ => None,
                    }
                })?;
            (*object, seq)
        }
        None => {
            let object = candidates
                .iter()
                .find(by_hash)
                .filter(|o| o.sequence.is_some())
                .or_else(|| match candidates.as_slice() {
                    [only] => Some(only).filter(not_foreign),
                    _ => None,
                })?;
            (*object, object.sequence?)
        }
    };

    Some(LedgerCommitmentRef {
        sequence,
        owner: object.account.clone(),
        destination: object.destination.clone(),
        amount_drops: object.amount_drops,
        finish_after: object.finish_after,
        cancel_after: object.cancel_after,
        condition: object.condition.clone(),
    })
}

fn terminal_of(tx: &LedgerTransaction, owner: &str, sequence: u32) -> Option<(TerminalKind, String)> {
    let kind = TerminalKind::of(tx.kind()?)?;
    let targets_owner = tx.owner.as_deref().unwrap_or(&tx.account) == owner;
    (targets_owner && tx.offer_sequence == Some(sequence) && tx.succeeded())
        .then(|| (kind, tx.hash.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testing::FakeLedger;

    const OWNER: &str = "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh";
    const DEST: &str = "rrrrrrrrrrrrrrrrrrrrrhoLvTp";
    const CREATE_HASH: &str = "C0FFEE";

    fn create_tx(sequence: u32) -> LedgerTransaction {
        LedgerTransaction {
            hash: CREATE_HASH.into(),
            account: OWNER.into(),
            transaction_type: "EscrowCreate".into(),
            sequence: Some(sequence),
            destination: Some(DEST.into()),
            amount_drops: Some(50_000_000),
            result_code: Some("tesSUCCESS".into()),
            validated: true,
            ..Default::default()
        }
    }

    fn object(amount_drops: u64, sequence: Option<u32>, previous: Option<&str>) -> CommitmentObject {
        CommitmentObject {
            index: format!("OBJ{amount_drops}"),
            account: OWNER.into(),
            destination: DEST.into(),
            amount_drops,
            finish_after: Some(10),
            cancel_after: Some(20),
            condition: None,
            destination_tag: None,
            previous_txn_id: previous.map(str::to_string),
            sequence,
        }
    }

    fn query(hash: Option<&str>) -> CommitmentQuery<'_> {
        CommitmentQuery {
            tx_hash: hash,
            owner: OWNER,
            destination: Some(DEST),
            amount_drops: 50_000_000,
            known_sequence: None,
        }
    }

    #[tokio::test]
    async fn transaction_sequence_is_used_for_open_match() {
        let ledger = Arc::new(FakeLedger::default());
        ledger.put_transaction(create_tx(17));
        ledger.put_commitment(OWNER, object(50_000_500, None, None));
        let resolver = CommitmentResolver::new(ledger);

        let Resolution::Open(found) = resolver.resolve(query(Some(CREATE_HASH))).await.unwrap()
        else {
            panic!("expected an open commitment");
        };
        assert_eq!(found.sequence, 17);
        assert_eq!(found.cancel_after, Some(20));
    }

    #[tokio::test]
    async fn previous_txn_id_disambiguates_equal_amounts() {
        let ledger = Arc::new(FakeLedger::default());
        ledger.put_transaction(create_tx(17));
        ledger.put_commitment(OWNER, object(50_000_000, None, Some("OTHER")));
        let mut mine = object(50_000_000, None, Some(CREATE_HASH));
        mine.finish_after = Some(99);
        ledger.put_commitment(OWNER, mine);
        let resolver = CommitmentResolver::new(ledger);

        let Resolution::Open(found) = resolver.resolve(query(Some(CREATE_HASH))).await.unwrap()
        else {
            panic!("expected an open commitment");
        };
        assert_eq!(found.finish_after, Some(99));
    }

    #[tokio::test]
    async fn amounts_outside_tolerance_do_not_match() {
        let ledger = Arc::new(FakeLedger::default());
        ledger.put_transaction(create_tx(17));
        ledger.put_commitment(OWNER, object(50_002_000, None, None));
        let resolver = CommitmentResolver::new(ledger);

        assert_eq!(
            resolver.resolve(query(Some(CREATE_HASH))).await.unwrap(),
            Resolution::NotFound(NotFoundReason::NoMatchingObjectOrHistory)
        );
    }

    #[tokio::test]
    async fn history_proves_commitment_finished() {
        let ledger = Arc::new(FakeLedger::default());
        ledger.put_transaction(create_tx(17));
        ledger.push_history(
            OWNER,
            LedgerTransaction {
                hash: "F1N15H".into(),
                account: DEST.into(),
                transaction_type: "EscrowFinish".into(),
                owner: Some(OWNER.into()),
                offer_sequence: Some(17),
                result_code: Some("tesSUCCESS".into()),
                validated: true,
                ..Default::default()
            },
        );
        let resolver = CommitmentResolver::new(ledger);

        assert_eq!(
            resolver.resolve(query(Some(CREATE_HASH))).await.unwrap(),
            Resolution::AlreadyTerminal {
                kind: TerminalKind::Finished,
                tx_hash: "F1N15H".into(),
                sequence: 17,
            }
        );
    }

    fn finish_of(sequence: u32) -> LedgerTransaction {
        LedgerTransaction {
            hash: "F1N15H".into(),
            account: DEST.into(),
            transaction_type: "EscrowFinish".into(),
            owner: Some(OWNER.into()),
            offer_sequence: Some(sequence),
            result_code: Some("tesSUCCESS".into()),
            validated: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn lone_object_of_another_create_is_not_ours() {
        let ledger = Arc::new(FakeLedger::default());
        ledger.put_transaction(create_tx(17));
        ledger.put_commitment(OWNER, object(50_000_000, None, Some("OTHERCREATE")));
        ledger.push_history(OWNER, finish_of(17));
        let resolver = CommitmentResolver::new(ledger);

        assert_eq!(
            resolver.resolve(query(Some(CREATE_HASH))).await.unwrap(),
            Resolution::AlreadyTerminal {
                kind: TerminalKind::Finished,
                tx_hash: "F1N15H".into(),
                sequence: 17,
            }
        );
    }

    #[tokio::test]
    async fn unknown_sequence_rejects_foreign_lone_object() {
        let ledger = Arc::new(FakeLedger::default());
        ledger.put_commitment(OWNER, object(50_000_000, Some(23), Some("OTHERCREATE")));
        let resolver = CommitmentResolver::new(ledger.clone());

        assert_eq!(
            resolver.resolve(query(Some(CREATE_HASH))).await.unwrap(),
            Resolution::NotFound(NotFoundReason::NoMatchingObjectOrHistory)
        );

        ledger.put_commitment(OWNER, object(49_999_500, Some(23), None));
        let resolver = CommitmentResolver::new(ledger);
        let resolution = resolver.resolve(query(Some(CREATE_HASH))).await.unwrap();
        assert_eq!(
            resolution,
            Resolution::NotFound(NotFoundReason::NoMatchingObjectOrHistory),
            "two candidates are ambiguous"
        );
    }

    #[tokio::test]
    async fn history_window_bounds_the_scan() {
        let ledger = Arc::new(FakeLedger::default());
        ledger.put_transaction(create_tx(17));
        ledger.push_history(OWNER, finish_of(17));
        ledger.push_history(OWNER, create_tx(17));

        let narrow = CommitmentResolver::new(ledger.clone()).with_window(HistoryWindow {
            limit: 1,
            ledger_index_min: None,
        });
        assert_eq!(narrow.find_terminal(OWNER, 17).await.unwrap(), None);

        let wide = CommitmentResolver::new(ledger);
        assert!(matches!(
            wide.find_terminal(OWNER, 17).await.unwrap(),
            Some(Resolution::AlreadyTerminal { sequence: 17, .. })
        ));
    }

    #[tokio::test]
    async fn failed_cancel_in_history_is_ignored() {
        let ledger = Arc::new(FakeLedger::default());
        ledger.put_transaction(create_tx(17));
        ledger.push_history(
            OWNER,
            LedgerTransaction {
                hash: "CANC".into(),
                account: OWNER.into(),
                transaction_type: "EscrowCancel".into(),
                owner: Some(OWNER.into()),
                offer_sequence: Some(17),
                result_code: Some("tecNO_PERMISSION".into()),
                validated: true,
                ..Default::default()
            },
        );
        let resolver = CommitmentResolver::new(ledger);

        assert_eq!(
            resolver.resolve(query(Some(CREATE_HASH))).await.unwrap(),
            Resolution::NotFound(NotFoundReason::NoMatchingObjectOrHistory)
        );
    }

    #[tokio::test]
    async fn missing_hash_is_reported_distinctly() {
        let ledger = Arc::new(FakeLedger::default());
        let resolver = CommitmentResolver::new(ledger.clone());

        assert_eq!(
            resolver.resolve(query(None)).await.unwrap(),
            Resolution::NotFound(NotFoundReason::NoTransactionHash)
        );
        assert_eq!(ledger.lookups(), 0);
    }

    #[tokio::test]
    async fn transport_errors_propagate() {
        let ledger = Arc::new(FakeLedger::default());
        ledger.set_unreachable(true);
        let resolver = CommitmentResolver::new(ledger);

        let err = resolver.resolve(query(Some(CREATE_HASH))).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
