// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fixtures shared by the escrow and storage unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use tempfile::TempDir;
use uuid::Uuid;

use super::model::{
    DisplayId, Escrow, EscrowStatus, Milestone, MilestoneStatus, ReleaseType, SigningMode,
};
use super::service::{EngineDeps, EngineSettings, EscrowService};
use super::terms::{CreateEscrowRequest, TermsPolicy};
use crate::ledger::testing::FakeLedger;
use crate::ledger::{
    to_ripple_time, CommitmentObject, ConfirmPolicy, HistoryWindow, LedgerError, LedgerTransaction,
};
use crate::providers::{
    BalanceRefresher, Balances, CurrencyPair, EscrowEvent, ExchangeRateProvider, FileDirectory,
    FixedRate, NotificationError, NotificationSink, RateError,
};
use crate::signing::delegated::testing::FakeGateway;
use crate::state::AppState;
use crate::signing::{DirectSigner, FeePolicy, SigningGateway};
use crate::storage::{EscrowDatabase, EscrowStore};

/// Direct signer holding the genesis account.
pub const ALICE: &str = "alice";
pub const ALICE_ADDRESS: &str = "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh";
const ALICE_SEED: &str = "snoPBrXtMeMyMHUVTgbuqAfg1SUTb";

pub const BOB: &str = "bob";
pub const BOB_ADDRESS: &str = "rrrrrrrrrrrrrrrrrrrrrhoLvTp";

/// Delegated signer.
pub const CAROL: &str = "carol";
pub const CAROL_ADDRESS: &str = "rrrrrrrrrrrrrrrrrrrrBZbvji";

/// Known user without a ledger account.
pub const DAVE: &str = "dave";

/// Direct signer whose custodied seed belongs to another account.
pub const ERIN: &str = "erin";
pub const ERIN_ADDRESS: &str = "rrrrrrrrrrrrrrrrrNAMEtxvNvQ";

pub fn sample_escrow(status: EscrowStatus) -> Escrow {
    let now = Utc::now();
    Escrow {
        id: Uuid::new_v4(),
        display_id: DisplayId {
            year: now.year(),
            sequence: 0,
        },
        title: "Website redesign".to_string(),
        description: None,
        initiator_id: ALICE.to_string(),
        initiator_address: Some(ALICE_ADDRESS.to_string()),
        counterparty_id: Some(BOB.to_string()),
        counterparty_address: Some(BOB_ADDRESS.to_string()),
        signing_mode: SigningMode::Direct,
        amount_drops: 50_000_000,
        amount_fiat: dec!(100),
        fiat_currency: "USD".to_string(),
        exchange_rate: dec!(2),
        release_type: ReleaseType::Custom,
        release_at: None,
        finish_after: None,
        cancel_after: None,
        status,
        progress: 0,
        create_tx_hash: None,
        ledger_sequence: None,
        condition: None,
        cancel_reason: None,
        created_at: now,
        updated_at: now,
        completed_at: None,
        cancelled_at: None,
    }
}

pub fn sample_milestones(escrow_id: Uuid) -> Vec<Milestone> {
    [("Design", dec!(40), 20_000_000), ("Build", dec!(60), 30_000_000)]
        .into_iter()
        .enumerate()
        .map(|(index, (title, fiat, drops))| Milestone {
            id: Uuid::new_v4(),
            escrow_id,
            order_index: index as u32,
            title: title.to_string(),
            description: None,
            amount_fiat: fiat,
            amount_drops: drops,
            status: MilestoneStatus::Pending,
            completed_at: None,
        })
        .collect()
}

/// Records every notification; optionally fails them all.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<(String, EscrowEvent)>>,
    pub failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn events_for(&self, user_id: &str) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(user, _)| user == user_id)
            .map(|(_, event)| event.as_str().to_string())
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(
        &self,
        user_id: &str,
        event: EscrowEvent,
        _payload: Value,
    ) -> Result<(), NotificationError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationError("push service down".to_string()));
        }
        self.events
            .lock()
            .unwrap()
            .push((user_id.to_string(), event));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingBalances {
    refreshed: Mutex<Vec<String>>,
    pub failing: AtomicBool,
}

impl RecordingBalances {
    pub fn refreshed(&self) -> Vec<String> {
        self.refreshed.lock().unwrap().clone()
    }
}

#[async_trait]
impl BalanceRefresher for RecordingBalances {
    async fn refresh_balances(&self, address: &str) -> Result<Balances, LedgerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LedgerError::Transport("balance service down".to_string()));
        }
        self.refreshed.lock().unwrap().push(address.to_string());
        Ok(Balances {
            address: address.to_string(),
            balance_drops: 0,
            owner_count: 0,
            refreshed_at: Utc::now(),
        })
    }
}

pub struct UnavailableRates;

#[async_trait]
impl ExchangeRateProvider for UnavailableRates {
    async fn get_rate(&self, pair: &CurrencyPair) -> Result<Decimal, RateError> {
        Err(RateError::Unavailable {
            pair: pair.to_string(),
            reason: "provider offline".to_string(),
        })
    }
}

/// A fully wired service over fakes and a temporary database.
pub struct Harness {
    pub service: EscrowService,
    pub ledger: Arc<FakeLedger>,
    pub gateway: Arc<FakeGateway>,
    pub db: Arc<EscrowDatabase>,
    pub notifier: Arc<RecordingNotifier>,
    pub balances: Arc<RecordingBalances>,
    _dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_rates(Arc::new(FixedRate(dec!(2))))
    }

    pub fn with_rates(rates: Arc<dyn ExchangeRateProvider>) -> Self {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(EscrowDatabase::open(&dir.path().join("escrow.redb")).unwrap());
        let ledger = Arc::new(FakeLedger::default());
        ledger.fund(ALICE_ADDRESS, 10, 1_000_000_000);
        let gateway = Arc::new(FakeGateway::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let balances = Arc::new(RecordingBalances::default());

        let parties = serde_json::json!({
            "parties": [
                { "user_id": ALICE, "address": ALICE_ADDRESS, "signing_mode": "direct", "seed": ALICE_SEED },
                { "user_id": BOB, "address": BOB_ADDRESS },
                { "user_id": CAROL, "address": CAROL_ADDRESS, "signing_mode": "delegated" },
                { "user_id": DAVE },
                { "user_id": ERIN, "address": ERIN_ADDRESS, "signing_mode": "direct", "seed": ALICE_SEED }
            ]
        });
        let directory = Arc::new(FileDirectory::from_json(&parties.to_string()).unwrap());

        let deps = EngineDeps {
            store: db.clone(),
            ledger: ledger.clone(),
            direct_signer: Arc::new(DirectSigner::new(
                directory.clone(),
                ledger.clone(),
                FeePolicy::default(),
            )),
            gateway: Some(gateway.clone() as Arc<dyn SigningGateway>),
            directory,
            rates,
            notifier: notifier.clone(),
            balances: balances.clone(),
        };
        let settings = EngineSettings {
            terms: TermsPolicy::default(),
            confirm: ConfirmPolicy::provisional_only(),
            side_effect_timeout: std::time::Duration::from_millis(200),
            history: HistoryWindow::default(),
        };

        Self {
            service: EscrowService::new(deps, settings),
            ledger,
            gateway,
            db,
            notifier,
            balances,
            _dir: dir,
        }
    }

    /// Hand the service to the HTTP layer; keep the directory alive alongside.
    pub fn into_app_state(self) -> (AppState, TempDir) {
        (AppState::new(self.service, self.db), self._dir)
    }

    /// 100 USD, released on request.
    pub fn create_request(&self, counterparty: &str) -> CreateEscrowRequest {
        CreateEscrowRequest {
            title: "Logo design".to_string(),
            description: None,
            counterparty_id: counterparty.to_string(),
            amount_fiat: Some(dec!(100)),
            amount_xrp: None,
            fiat_currency: None,
            release_type: ReleaseType::Custom,
            release_at: None,
            milestones: Vec::new(),
            condition: None,
        }
    }

    /// Make the escrow's create transaction visible with a releasable open commitment.
    pub fn publish_commitment(&self, escrow_id: Uuid, sequence: u32) {
        let now = Utc::now();
        self.publish_commitment_between(
            escrow_id,
            sequence,
            now - chrono::Duration::minutes(1),
            now + chrono::Duration::days(1),
        );
    }

    /// Same as [`Self::publish_commitment`] with explicit time bounds.
    pub fn publish_commitment_between(
        &self,
        escrow_id: Uuid,
        sequence: u32,
        finish_after: DateTime<Utc>,
        cancel_after: DateTime<Utc>,
    ) {
        let escrow = self.db.get_escrow(escrow_id).unwrap().unwrap();
        let hash = escrow.create_tx_hash.clone().unwrap();
        let owner = escrow.initiator_address.clone().unwrap();

        self.ledger.put_transaction(LedgerTransaction {
            hash: hash.clone(),
            account: owner.clone(),
            transaction_type: "EscrowCreate".to_string(),
            sequence: Some(sequence),
            destination: escrow.counterparty_address.clone(),
            amount_drops: Some(escrow.amount_drops),
            result_code: Some("tesSUCCESS".to_string()),
            validated: true,
            ..Default::default()
        });
        self.ledger.put_commitment(
            &owner,
            CommitmentObject {
                index: format!("OBJ{sequence}"),
                account: owner.clone(),
                destination: escrow.counterparty_address.clone().unwrap(),
                amount_drops: escrow.amount_drops,
                finish_after: to_ripple_time(finish_after),
                cancel_after: to_ripple_time(cancel_after),
                condition: escrow.condition.clone(),
                destination_tag: None,
                previous_txn_id: Some(hash),
                sequence: None,
            },
        );
    }

    /// Finish the commitment outside the engine.
    pub fn record_finish(&self, escrow_id: Uuid, sequence: u32, finish_hash: &str) {
        let escrow = self.db.get_escrow(escrow_id).unwrap().unwrap();
        let owner = escrow.initiator_address.unwrap();
        self.ledger.clear_commitments(&owner);
        self.ledger.push_history(
            &owner,
            LedgerTransaction {
                hash: finish_hash.to_string(),
                account: owner.clone(),
                transaction_type: "EscrowFinish".to_string(),
                owner: Some(owner.clone()),
                offer_sequence: Some(sequence),
                result_code: Some("tesSUCCESS".to_string()),
                validated: true,
                ..Default::default()
            },
        );
    }
}
