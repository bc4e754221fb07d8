// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Escrow transaction templates and local signing.
//!
//! A [`TxTemplate`] is the unsigned form of an `EscrowCreate`, `EscrowFinish`
//! or `EscrowCancel`. It is either signed locally ([`sign_template`]) or handed
//! to a delegated signing gateway as JSON ([`TxTemplate::to_json`]).

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};

use super::codec::{self, CodecError, FieldId, FieldValue};
use super::keys::{decode_address, KeyPair};
use super::types::{EscrowTxKind, DROPS_PER_XRP};

/// Require a fully-canonical signature.
pub const TF_FULLY_CANONICAL_SIG: u32 = 0x8000_0000;

/// Unsigned escrow transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxTemplate {
    pub kind: EscrowTxKind,
    /// Submitting account.
    pub account: String,
    pub destination: Option<String>,
    pub amount_drops: Option<u64>,
    /// Commitment owner (finish / cancel).
    pub owner: Option<String>,
    /// Sequence of the creating transaction (finish / cancel).
    pub offer_sequence: Option<u32>,
    /// Ripple-epoch seconds.
    pub finish_after: Option<u32>,
    /// Ripple-epoch seconds.
    pub cancel_after: Option<u32>,
    /// Crypto-condition, upper-case hex.
    pub condition: Option<String>,
    pub destination_tag: Option<u32>,
    pub sequence: Option<u32>,
    pub fee_drops: Option<u64>,
    pub last_ledger_sequence: Option<u32>,
    pub flags: Option<u32>,
}

impl TxTemplate {
    fn empty(kind: EscrowTxKind, account: &str) -> Self {
        Self {
            kind,
            account: account.to_string(),
            destination: None,
            amount_drops: None,
            owner: None,
            offer_sequence: None,
            finish_after: None,
            cancel_after: None,
            condition: None,
            destination_tag: None,
            sequence: None,
            fee_drops: None,
            last_ledger_sequence: None,
            flags: None,
        }
    }

    /// Lock `amount_drops` from `account` for `destination`.
    pub fn escrow_create(
        account: &str,
        destination: &str,
        amount_drops: u64,
        finish_after: Option<u32>,
        cancel_after: Option<u32>,
    ) -> Self {
        Self {
            destination: Some(destination.to_string()),
            amount_drops: Some(amount_drops),
            finish_after,
            cancel_after,
            ..Self::empty(EscrowTxKind::EscrowCreate, account)
        }
    }

    /// Deliver the commitment created by `owner` at `offer_sequence`.
    pub fn escrow_finish(account: &str, owner: &str, offer_sequence: u32) -> Self {
        Self {
            owner: Some(owner.to_string()),
            offer_sequence: Some(offer_sequence),
            ..Self::empty(EscrowTxKind::EscrowFinish, account)
        }
    }

    /// Return an expired commitment to its owner.
    pub fn escrow_cancel(account: &str, owner: &str, offer_sequence: u32) -> Self {
        Self {
            owner: Some(owner.to_string()),
            offer_sequence: Some(offer_sequence),
            ..Self::empty(EscrowTxKind::EscrowCancel, account)
        }
    }

    pub fn with_destination_tag(mut self, tag: Option<u32>) -> Self {
        self.destination_tag = tag;
        self
    }

    /// JSON form (`tx_json`) understood by signing gateways and `submit`.
    pub fn to_json(&self) -> Value {
        let mut tx = Map::new();
        tx.insert("TransactionType".into(), json!(self.kind.as_str()));
        tx.insert("Account".into(), json!(self.account));

        let strings = [
            ("Destination", &self.destination),
            ("Owner", &self.owner),
            ("Condition", &self.condition),
        ];
        for (name, value) in strings {
            if let Some(value) = value {
                tx.insert(name.into(), json!(value));
            }
        }

        // Native amounts are decimal strings of drops.
        if let Some(drops) = self.amount_drops {
            tx.insert("Amount".into(), json!(drops.to_string()));
        }
        if let Some(drops) = self.fee_drops {
            tx.insert("Fee".into(), json!(drops.to_string()));
        }

        let numbers = [
            ("OfferSequence", self.offer_sequence),
            ("FinishAfter", self.finish_after),
            ("CancelAfter", self.cancel_after),
            ("DestinationTag", self.destination_tag),
            ("Sequence", self.sequence),
            ("LastLedgerSequence", self.last_ledger_sequence),
            ("Flags", self.flags),
        ];
        for (name, value) in numbers {
            if let Some(value) = value {
                tx.insert(name.into(), json!(value));
            }
        }

        Value::Object(tx)
    }

    /// Typed field list for the binary codec.
    pub fn fields(
        &self,
        signing_pub_key: &[u8],
        signature: Option<&[u8]>,
    ) -> Result<Vec<(FieldId, FieldValue)>, CodecError> {
        let sequence = self.sequence.ok_or(CodecError::MissingField("Sequence"))?;
        let fee = self.fee_drops.ok_or(CodecError::MissingField("Fee"))?;

        let mut fields = vec![
            (
                codec::TRANSACTION_TYPE,
                FieldValue::UInt16(self.kind.type_code()),
            ),
            (codec::SEQUENCE, FieldValue::UInt32(sequence)),
            (codec::FEE, FieldValue::Drops(fee)),
            (
                codec::ACCOUNT,
                FieldValue::Account(decode_address(&self.account)?),
            ),
            (
                codec::SIGNING_PUB_KEY,
                FieldValue::Blob(signing_pub_key.to_vec()),
            ),
        ];

        match self.kind {
            EscrowTxKind::EscrowCreate => {
                let destination = self
                    .destination
                    .as_deref()
                    .ok_or(CodecError::MissingField("Destination"))?;
                let amount = self.amount_drops.ok_or(CodecError::MissingField("Amount"))?;
                fields.push((
                    codec::DESTINATION,
                    FieldValue::Account(decode_address(destination)?),
                ));
                fields.push((codec::AMOUNT, FieldValue::Drops(amount)));
            }
            EscrowTxKind::EscrowFinish | EscrowTxKind::EscrowCancel => {
                let owner = self
                    .owner
                    .as_deref()
                    .ok_or(CodecError::MissingField("Owner"))?;
                let offer_sequence = self
                    .offer_sequence
                    .ok_or(CodecError::MissingField("OfferSequence"))?;
                fields.push((codec::OWNER, FieldValue::Account(decode_address(owner)?)));
                fields.push((codec::OFFER_SEQUENCE, FieldValue::UInt32(offer_sequence)));
            }
        }

        let optional_u32 = [
            (codec::FLAGS, self.flags),
            (codec::FINISH_AFTER, self.finish_after),
            (codec::CANCEL_AFTER, self.cancel_after),
            (codec::DESTINATION_TAG, self.destination_tag),
            (codec::LAST_LEDGER_SEQUENCE, self.last_ledger_sequence),
        ];
        fields.extend(
            optional_u32
                .into_iter()
                .filter_map(|(id, value)| value.map(|v| (id, FieldValue::UInt32(v)))),
        );

        if let Some(condition) = &self.condition {
            let bytes = hex::decode(condition).map_err(|e| CodecError::InvalidHex {
                field: "Condition",
                reason: e.to_string(),
            })?;
            fields.push((codec::CONDITION, FieldValue::Blob(bytes)));
        }
        if let Some(signature) = signature {
            fields.push((codec::TXN_SIGNATURE, FieldValue::Blob(signature.to_vec())));
        }

        Ok(fields)
    }
}

/// A signed transaction ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    /// Upper-case hex of the signed blob.
    pub blob_hex: String,
    /// Transaction id.
    pub tx_hash: String,
}

/// Sign a fully-filled template with a local key pair.
pub fn sign_template(
    template: &TxTemplate,
    key_pair: &KeyPair,
) -> Result<SignedTransaction, CodecError> {
    let public_key = key_pair.public_key();
    let unsigned = template.fields(public_key, None)?;
    let digest = codec::signing_hash(&unsigned)?;
    let signature = key_pair.sign_digest(&digest)?;

    let signed = template.fields(public_key, Some(&signature))?;
    let blob = codec::encode_fields(&signed, false)?;

    Ok(SignedTransaction {
        tx_hash: codec::transaction_id(&blob),
        blob_hex: hex::encode_upper(blob),
    })
}

/// Convert an XRP amount to drops, truncating below one drop.
///
/// Returns `None` for negative amounts or amounts that do not fit in `u64`.
pub fn xrp_to_drops(xrp: Decimal) -> Option<u64> {
    if xrp.is_sign_negative() {
        return None;
    }
    xrp.checked_mul(Decimal::from(DROPS_PER_XRP))?
        .trunc()
        .to_u64()
}

/// Convert drops to an exact XRP amount.
pub fn drops_to_xrp(drops: u64) -> Decimal {
    Decimal::from(drops) / Decimal::from(DROPS_PER_XRP)
}
