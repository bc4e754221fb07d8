// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Typed parsing of XRPL JSON-RPC responses.
//!
//! Servers disagree on where a field lives (API v1 puts transaction fields at
//! the top level, API v2 nests them under `tx_json`, `account_tx` wraps them in
//! `tx`). Every logical value is therefore described by an ordered list of
//! JSON pointers and the first one that yields a value wins.

use serde_json::Value;

use super::client::LedgerError;
use super::types::{AccountInfo, CommitmentObject, LedgerTransaction, SubmitResult};

const HASH_PATHS: &[&str] = &["/hash", "/tx_json/hash", "/tx/hash"];
const ACCOUNT_PATHS: &[&str] = &["/Account", "/tx_json/Account", "/tx/Account"];
const TYPE_PATHS: &[&str] = &[
    "/TransactionType",
    "/tx_json/TransactionType",
    "/tx/TransactionType",
];
const SEQUENCE_PATHS: &[&str] = &["/Sequence", "/tx_json/Sequence", "/tx/Sequence"];
const TICKET_PATHS: &[&str] = &[
    "/TicketSequence",
    "/tx_json/TicketSequence",
    "/tx/TicketSequence",
];
const OWNER_PATHS: &[&str] = &["/Owner", "/tx_json/Owner", "/tx/Owner"];
const OFFER_SEQUENCE_PATHS: &[&str] = &[
    "/OfferSequence",
    "/tx_json/OfferSequence",
    "/tx/OfferSequence",
];
const DESTINATION_PATHS: &[&str] = &["/Destination", "/tx_json/Destination", "/tx/Destination"];
const AMOUNT_PATHS: &[&str] = &[
    "/Amount",
    "/tx_json/Amount",
    "/tx/Amount",
    "/DeliverMax",
    "/tx_json/DeliverMax",
];
const RESULT_PATHS: &[&str] = &[
    "/meta/TransactionResult",
    "/metaData/TransactionResult",
    "/tx/meta/TransactionResult",
];
const LEDGER_INDEX_PATHS: &[&str] = &["/ledger_index", "/tx_json/ledger_index", "/tx/ledger_index"];

const ACCOUNT_SEQUENCE_PATHS: &[&str] = &["/account_data/Sequence", "/account_data/sequence"];
const ACCOUNT_BALANCE_PATHS: &[&str] = &["/account_data/Balance"];
const OWNER_COUNT_PATHS: &[&str] = &["/account_data/OwnerCount"];

const OBJECT_SEQUENCE_PATHS: &[&str] = &["/Sequence", "/sequence", "/OfferSequence"];
const SUBMIT_HASH_PATHS: &[&str] = &["/tx_json/hash", "/hash"];

/// Try each pointer in order and return the first match.
pub fn first_match<'a>(value: &'a Value, pointers: &[&str]) -> Option<&'a Value> {
    pointers.iter().find_map(|pointer| value.pointer(pointer))
}

pub fn extract_str(value: &Value, pointers: &[&str]) -> Option<String> {
    first_match(value, pointers)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Integers may arrive as JSON numbers or as decimal strings.
pub fn extract_u64(value: &Value, pointers: &[&str]) -> Option<u64> {
    pointers
        .iter()
        .filter_map(|pointer| value.pointer(pointer))
        .find_map(|found| match found {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        })
}

pub fn extract_u32(value: &Value, pointers: &[&str]) -> Option<u32> {
    extract_u64(value, pointers).and_then(|n| u32::try_from(n).ok())
}

fn require<T>(found: Option<T>, what: &str) -> Result<T, LedgerError> {
    found.ok_or_else(|| LedgerError::MalformedResponse(format!("missing {what}")))
}

/// Parse the `result` object of `account_info`.
pub fn parse_account_info(result: &Value) -> Result<AccountInfo, LedgerError> {
    Ok(AccountInfo {
        address: require(
            extract_str(result, &["/account_data/Account"]),
            "account_data.Account",
        )?,
        sequence: require(
            extract_u32(result, ACCOUNT_SEQUENCE_PATHS),
            "account_data.Sequence",
        )?,
        balance_drops: require(
            extract_u64(result, ACCOUNT_BALANCE_PATHS),
            "account_data.Balance",
        )?,
        owner_count: extract_u32(result, OWNER_COUNT_PATHS).unwrap_or(0),
    })
}

/// Parse the `result` object of `submit`.
pub fn parse_submit(result: &Value) -> Result<SubmitResult, LedgerError> {
    Ok(SubmitResult {
        result_code: require(extract_str(result, &["/engine_result"]), "engine_result")?,
        result_message: extract_str(result, &["/engine_result_message"]).unwrap_or_default(),
        tx_hash: require(extract_str(result, SUBMIT_HASH_PATHS), "transaction hash")?,
    })
}

/// Parse a transaction from either a `tx` result or an `account_tx` entry.
pub fn parse_transaction(value: &Value) -> Result<LedgerTransaction, LedgerError> {
    Ok(LedgerTransaction {
        hash: require(extract_str(value, HASH_PATHS), "transaction hash")?,
        account: require(extract_str(value, ACCOUNT_PATHS), "transaction Account")?,
        transaction_type: require(extract_str(value, TYPE_PATHS), "TransactionType")?,
        sequence: extract_u32(value, SEQUENCE_PATHS),
        ticket_sequence: extract_u32(value, TICKET_PATHS),
        owner: extract_str(value, OWNER_PATHS),
        offer_sequence: extract_u32(value, OFFER_SEQUENCE_PATHS),
        destination: extract_str(value, DESTINATION_PATHS),
        // Issued-currency amounts are objects and intentionally yield `None`.
        amount_drops: extract_u64(value, AMOUNT_PATHS),
        result_code: extract_str(value, RESULT_PATHS),
        validated: first_match(value, &["/validated"])
            .and_then(Value::as_bool)
            .unwrap_or(false),
        ledger_index: extract_u32(value, LEDGER_INDEX_PATHS),
    })
}

/// Parse one escrow entry of `account_objects`.
pub fn parse_commitment(value: &Value) -> Result<CommitmentObject, LedgerError> {
    Ok(CommitmentObject {
        index: require(extract_str(value, &["/index"]), "escrow index")?,
        account: require(extract_str(value, &["/Account"]), "escrow Account")?,
        destination: require(extract_str(value, &["/Destination"]), "escrow Destination")?,
        amount_drops: require(extract_u64(value, &["/Amount"]), "escrow Amount")?,
        finish_after: extract_u32(value, &["/FinishAfter"]),
        cancel_after: extract_u32(value, &["/CancelAfter"]),
        condition: extract_str(value, &["/Condition"]),
        destination_tag: extract_u32(value, &["/DestinationTag"]),
        previous_txn_id: extract_str(value, &["/PreviousTxnID"]),
        sequence: extract_u32(value, OBJECT_SEQUENCE_PATHS),
    })
}

/// Parse every entry of a JSON array, skipping (and logging) malformed items.
pub fn parse_list<T>(
    items: Option<&Value>,
    parse: fn(&Value) -> Result<T, LedgerError>,
    what: &str,
) -> Vec<T> {
    let Some(items) = items.and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match parse(item) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!(error = %e, kind = what, "Skipping malformed ledger entry");
                None
            }
        })
        .collect()
}
