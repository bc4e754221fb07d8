// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger types and constants.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// XRP Ledger network configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Network name for display
    pub name: &'static str,
    /// JSON-RPC endpoint URL
    pub rpc_url: &'static str,
    /// Block explorer URL
    pub explorer_url: &'static str,
}

/// XRP Ledger mainnet configuration.
pub const XRPL_MAINNET: NetworkConfig = NetworkConfig {
    name: "XRP Ledger Mainnet",
    rpc_url: "https://s1.ripple.com:51234",
    explorer_url: "https://livenet.xrpl.org",
};

/// XRP Ledger testnet configuration.
pub const XRPL_TESTNET: NetworkConfig = NetworkConfig {
    name: "XRP Ledger Testnet",
    rpc_url: "https://s.altnet.rippletest.net:51234",
    explorer_url: "https://testnet.xrpl.org",
};

/// Resolve a network by its short name (`mainnet` / `testnet`).
pub fn network_by_name(raw: &str) -> Result<NetworkConfig, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "mainnet" => Ok(XRPL_MAINNET),
        "testnet" => Ok(XRPL_TESTNET),
        other => Err(format!("Unknown XRPL network `{other}`")),
    }
}

/// Drops per XRP.
pub const DROPS_PER_XRP: u64 = 1_000_000;

/// Offset between the Unix epoch and the Ripple epoch (2000-01-01T00:00:00Z).
pub const RIPPLE_EPOCH_OFFSET: i64 = 946_684_800;

/// Convert a UTC timestamp to seconds since the Ripple epoch.
pub fn to_ripple_time(at: DateTime<Utc>) -> Option<u32> {
    u32::try_from(at.timestamp() - RIPPLE_EPOCH_OFFSET).ok()
}

/// Convert seconds since the Ripple epoch to a UTC timestamp.
pub fn from_ripple_time(seconds: u32) -> DateTime<Utc> {
    Utc.timestamp_opt(i64::from(seconds) + RIPPLE_EPOCH_OFFSET, 0)
        .single()
        .unwrap_or_default()
}

/// Escrow-related transaction types emitted or inspected by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum EscrowTxKind {
    EscrowCreate,
    EscrowFinish,
    EscrowCancel,
}

impl EscrowTxKind {
    /// Wire name used in `TransactionType`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EscrowCreate => "EscrowCreate",
            Self::EscrowFinish => "EscrowFinish",
            Self::EscrowCancel => "EscrowCancel",
        }
    }

    /// Numeric transaction type used by the binary codec.
    pub fn type_code(self) -> u16 {
        match self {
            Self::EscrowCreate => 1,
            Self::EscrowFinish => 2,
            Self::EscrowCancel => 4,
        }
    }

    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw {
            "EscrowCreate" => Some(Self::EscrowCreate),
            "EscrowFinish" => Some(Self::EscrowFinish),
            "EscrowCancel" => Some(Self::EscrowCancel),
            _ => None,
        }
    }
}

/// Subset of `account_info` the engine relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub address: String,
    /// Next usable account sequence.
    pub sequence: u32,
    /// Spendable balance in drops.
    pub balance_drops: u64,
    /// Number of objects the account owns (escrows count towards reserve).
    pub owner_count: u32,
}

/// Result of submitting a signed blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResult {
    /// Engine result code, e.g. `tesSUCCESS`.
    pub result_code: String,
    /// Human-readable engine message returned by the server.
    pub result_message: String,
    /// Hash of the submitted transaction.
    pub tx_hash: String,
}

impl SubmitResult {
    pub fn class(&self) -> ResultClass {
        ResultClass::of(&self.result_code)
    }

    pub fn is_accepted(&self) -> bool {
        self.class().is_accepted()
    }
}

/// Classification of XRPL engine result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultClass {
    /// `tes*`: applied.
    Success,
    /// `terQUEUED`: held in the open-ledger queue, expected to apply.
    Queued,
    /// `ter*`: retry class, not applied.
    Retry,
    /// `tec*`: fee claimed, operation failed.
    Claimed,
    /// `tef*`: failed, cannot succeed in this form.
    Failure,
    /// `tem*`: malformed transaction.
    Malformed,
    /// `tel*`: rejected locally by the server.
    Local,
    Unknown,
}

impl ResultClass {
    pub fn of(code: &str) -> Self {
        if code == "terQUEUED" {
            return Self::Queued;
        }
        match code.get(..3) {
            Some("tes") => Self::Success,
            Some("ter") => Self::Retry,
            Some("tec") => Self::Claimed,
            Some("tef") => Self::Failure,
            Some("tem") => Self::Malformed,
            Some("tel") => Self::Local,
            _ => Self::Unknown,
        }
    }

    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Success | Self::Queued)
    }
}

/// Translate an engine result code into a domain-meaningful message.
pub fn describe_result(code: &str) -> String {
    let message = match code {
        "tesSUCCESS" => "transaction applied",
        "terQUEUED" => "transaction queued for the next ledger",
        "tecUNFUNDED" | "tecUNFUNDED_PAYMENT" => "insufficient funds for commitment and fee",
        "tecINSUFFICIENT_RESERVE" => "account reserve too low to hold another escrow",
        "tecNO_DST" | "tecNO_DST_INSUF_XRP" => "destination account does not exist on the ledger",
        "tecDST_TAG_NEEDED" => "destination requires a destination tag",
        "tecNO_TARGET" => "escrow commitment no longer exists on the ledger",
        "tecNO_PERMISSION" => "escrow time bounds do not allow this operation yet",
        "tecCRYPTOCONDITION_ERROR" => "escrow condition was not satisfied",
        "tecNO_AUTH" => "account is not authorised for this operation",
        "tefPAST_SEQ" => "account sequence already used, transaction is stale",
        "tefMAX_LEDGER" => "transaction expired before it was included in a ledger",
        "tefBAD_AUTH" | "tefBAD_AUTH_MASTER" => "signing key is not authorised for the account",
        "terPRE_SEQ" => "account sequence is ahead of the ledger",
        "terINSUF_FEE_B" => "account cannot pay the transaction fee",
        "telINSUF_FEE_P" => "fee too low for current server load",
        "temBAD_AMOUNT" => "escrow amount is invalid",
        "temBAD_EXPIRATION" => "escrow expiration is invalid",
        "temBAD_FEE" => "transaction fee is invalid",
        "temINVALID" => "transaction is malformed",
        "temDST_IS_SRC" => "escrow destination equals its source",
        _ => return format!("ledger rejected the transaction ({code})"),
    };
    message.to_string()
}

/// Typed view of a transaction returned by `tx` or `account_tx`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LedgerTransaction {
    pub hash: String,
    pub account: String,
    pub transaction_type: String,
    /// Account sequence consumed by the transaction (0 when a ticket was used).
    pub sequence: Option<u32>,
    pub ticket_sequence: Option<u32>,
    pub owner: Option<String>,
    pub offer_sequence: Option<u32>,
    pub destination: Option<String>,
    pub amount_drops: Option<u64>,
    /// Final `TransactionResult` from metadata, if present.
    pub result_code: Option<String>,
    pub validated: bool,
    pub ledger_index: Option<u32>,
}

impl LedgerTransaction {
    pub fn kind(&self) -> Option<EscrowTxKind> {
        EscrowTxKind::from_wire(&self.transaction_type)
    }

    /// Sequence that identifies a commitment created by this transaction.
    pub fn commitment_sequence(&self) -> Option<u32> {
        match self.sequence {
            Some(0) | None => self.ticket_sequence,
            Some(seq) => Some(seq),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.result_code
            .as_deref()
            .map(|code| ResultClass::of(code) == ResultClass::Success)
            .unwrap_or(false)
    }
}

/// Open escrow object as listed by `account_objects`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitmentObject {
    /// Ledger object id.
    pub index: String,
    pub account: String,
    pub destination: String,
    pub amount_drops: u64,
    pub finish_after: Option<u32>,
    pub cancel_after: Option<u32>,
    pub condition: Option<String>,
    pub destination_tag: Option<u32>,
    /// Hash of the transaction that last touched the object.
    pub previous_txn_id: Option<String>,
    /// Object-level sequence, only exposed by some servers.
    pub sequence: Option<u32>,
}

/// Window used when scanning account history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryWindow {
    /// Maximum number of transactions to return.
    pub limit: u32,
    /// Lowest ledger index to include (`None` = earliest available).
    pub ledger_index_min: Option<u32>,
}

impl Default for HistoryWindow {
    fn default() -> Self {
        Self {
            limit: 200,
            ledger_index_min: None,
        }
    }
}

/// Format drops as a human-readable XRP amount.
pub fn format_drops(drops: u64) -> String {
    let whole = drops / DROPS_PER_XRP;
    let remainder = drops % DROPS_PER_XRP;
    if remainder == 0 {
        return whole.to_string();
    }
    let decimal_str = format!("{remainder:06}");
    format!("{}.{}", whole, decimal_str.trim_end_matches('0'))
}
