// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Canonical binary serialisation for the XRPL field subset used by escrow
//! transactions.
//!
//! ## Field ordering
//!
//! Fields are written sorted by `(type code, field code)`. Each field starts
//! with a 1-3 byte header packing both codes; variable-length values (blobs,
//! account ids) carry a length prefix.

use super::keys::sha512_half;

/// Prefix hashed in front of the signing serialisation (`STX\0`).
pub const HASH_PREFIX_SIGN: [u8; 4] = [0x53, 0x54, 0x58, 0x00];
/// Prefix hashed in front of a signed blob to obtain its id (`TXN\0`).
pub const HASH_PREFIX_TX_ID: [u8; 4] = [0x54, 0x58, 0x4E, 0x00];

/// Maximum number of drops that can ever exist (100 billion XRP).
const MAX_DROPS: u64 = 100_000_000_000_000_000;
/// Bit marking an amount as a positive native (XRP) amount.
const POSITIVE_NATIVE_AMOUNT: u64 = 0x4000_0000_0000_0000;

const TYPE_UINT16: u8 = 1;
const TYPE_UINT32: u8 = 2;
const TYPE_AMOUNT: u8 = 6;
const TYPE_BLOB: u8 = 7;
const TYPE_ACCOUNT: u8 = 8;

/// Identity of a serialised field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldId {
    pub type_code: u8,
    pub field_code: u8,
}

impl FieldId {
    const fn new(type_code: u8, field_code: u8) -> Self {
        Self {
            type_code,
            field_code,
        }
    }

    /// Field header bytes.
    pub fn header(self) -> Vec<u8> {
        let (t, f) = (self.type_code, self.field_code);
        match (t < 16, f < 16) {
            (true, true) => vec![(t << 4) | f],
            (true, false) => vec![t << 4, f],
            (false, true) => vec![f, t],
            (false, false) => vec![0, t, f],
        }
    }
}

pub const TRANSACTION_TYPE: FieldId = FieldId::new(TYPE_UINT16, 2);

pub const FLAGS: FieldId = FieldId::new(TYPE_UINT32, 2);
pub const SOURCE_TAG: FieldId = FieldId::new(TYPE_UINT32, 3);
pub const SEQUENCE: FieldId = FieldId::new(TYPE_UINT32, 4);
pub const DESTINATION_TAG: FieldId = FieldId::new(TYPE_UINT32, 14);
pub const OFFER_SEQUENCE: FieldId = FieldId::new(TYPE_UINT32, 25);
pub const LAST_LEDGER_SEQUENCE: FieldId = FieldId::new(TYPE_UINT32, 27);
pub const CANCEL_AFTER: FieldId = FieldId::new(TYPE_UINT32, 36);
pub const FINISH_AFTER: FieldId = FieldId::new(TYPE_UINT32, 37);
pub const TICKET_SEQUENCE: FieldId = FieldId::new(TYPE_UINT32, 41);

pub const AMOUNT: FieldId = FieldId::new(TYPE_AMOUNT, 1);
pub const FEE: FieldId = FieldId::new(TYPE_AMOUNT, 8);

pub const SIGNING_PUB_KEY: FieldId = FieldId::new(TYPE_BLOB, 3);
pub const TXN_SIGNATURE: FieldId = FieldId::new(TYPE_BLOB, 4);
pub const FULFILLMENT: FieldId = FieldId::new(TYPE_BLOB, 16);
pub const CONDITION: FieldId = FieldId::new(TYPE_BLOB, 17);

pub const ACCOUNT: FieldId = FieldId::new(TYPE_ACCOUNT, 1);
pub const OWNER: FieldId = FieldId::new(TYPE_ACCOUNT, 2);
pub const DESTINATION: FieldId = FieldId::new(TYPE_ACCOUNT, 3);

/// A typed field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    UInt16(u16),
    UInt32(u32),
    /// Native amount in drops.
    Drops(u64),
    Blob(Vec<u8>),
    Account([u8; 20]),
}

/// Serialise a set of fields in canonical order.
///
/// With `for_signing` set, fields that are not part of the signed payload
/// (`TxnSignature`) are skipped.
pub fn encode_fields(
    fields: &[(FieldId, FieldValue)],
    for_signing: bool,
) -> Result<Vec<u8>, CodecError> {
    let mut sorted: Vec<&(FieldId, FieldValue)> = fields
        .iter()
        .filter(|(id, _)| !(for_signing && *id == TXN_SIGNATURE))
        .collect();
    sorted.sort_by_key(|(id, _)| *id);

    if let Some(pair) = sorted.windows(2).find(|pair| pair[0].0 == pair[1].0) {
        return Err(CodecError::DuplicateField(pair[0].0));
    }

    let mut out = Vec::with_capacity(256);
    for (id, value) in sorted {
        out.extend_from_slice(&id.header());
        encode_value(id, value, &mut out)?;
    }
    Ok(out)
}

fn encode_value(id: &FieldId, value: &FieldValue, out: &mut Vec<u8>) -> Result<(), CodecError> {
    let expected = match value {
        FieldValue::UInt16(_) => TYPE_UINT16,
        FieldValue::UInt32(_) => TYPE_UINT32,
        FieldValue::Drops(_) => TYPE_AMOUNT,
        FieldValue::Blob(_) => TYPE_BLOB,
        FieldValue::Account(_) => TYPE_ACCOUNT,
    };
    if expected != id.type_code {
        return Err(CodecError::TypeMismatch(*id));
    }

    match value {
        FieldValue::UInt16(v) => out.extend_from_slice(&v.to_be_bytes()),
        FieldValue::UInt32(v) => out.extend_from_slice(&v.to_be_bytes()),
        FieldValue::Drops(drops) => {
            if *drops > MAX_DROPS {
                return Err(CodecError::AmountOutOfRange(*drops));
            }
            out.extend_from_slice(&(drops | POSITIVE_NATIVE_AMOUNT).to_be_bytes());
        }
        FieldValue::Blob(bytes) => {
            encode_length(bytes.len(), out)?;
            out.extend_from_slice(bytes);
        }
        FieldValue::Account(id) => {
            encode_length(id.len(), out)?;
            out.extend_from_slice(id);
        }
    }
    Ok(())
}

/// Variable-length prefix (1, 2 or 3 bytes).
pub fn encode_length(len: usize, out: &mut Vec<u8>) -> Result<(), CodecError> {
    match len {
        0..=192 => out.push(len as u8),
        193..=12_480 => {
            let rest = len - 193;
            out.push(193 + (rest >> 8) as u8);
            out.push((rest & 0xff) as u8);
        }
        12_481..=918_744 => {
            let rest = len - 12_481;
            out.push(241 + (rest >> 16) as u8);
            out.push(((rest >> 8) & 0xff) as u8);
            out.push((rest & 0xff) as u8);
        }
        _ => return Err(CodecError::LengthOutOfRange(len)),
    }
    Ok(())
}

/// Digest that is signed for a transaction.
pub fn signing_hash(fields: &[(FieldId, FieldValue)]) -> Result<[u8; 32], CodecError> {
    let payload = encode_fields(fields, true)?;
    Ok(sha512_half(&[&HASH_PREFIX_SIGN, &payload]))
}

/// Transaction id (upper-case hex) of a signed blob.
pub fn transaction_id(blob: &[u8]) -> String {
    hex::encode_upper(sha512_half(&[&HASH_PREFIX_TX_ID, blob]))
}

/// Errors raised while serialising a transaction.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Field {0:?} does not match its value type")]
    TypeMismatch(FieldId),

    #[error("Field {0:?} appears more than once")]
    DuplicateField(FieldId),

    #[error("Amount of {0} drops is out of range")]
    AmountOutOfRange(u64),

    #[error("Variable-length field of {0} bytes is too long")]
    LengthOutOfRange(usize),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid hex in {field}: {reason}")]
    InvalidHex { field: &'static str, reason: String },

    #[error(transparent)]
    Key(#[from] super::keys::KeyError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_headers_match_protocol_encoding() {
        assert_eq!(TRANSACTION_TYPE.header(), vec![0x12]);
        assert_eq!(FLAGS.header(), vec![0x22]);
        assert_eq!(SEQUENCE.header(), vec![0x24]);
        assert_eq!(DESTINATION_TAG.header(), vec![0x2E]);
        assert_eq!(OFFER_SEQUENCE.header(), vec![0x20, 0x19]);
        assert_eq!(LAST_LEDGER_SEQUENCE.header(), vec![0x20, 0x1B]);
        assert_eq!(CANCEL_AFTER.header(), vec![0x20, 0x24]);
        assert_eq!(FINISH_AFTER.header(), vec![0x20, 0x25]);
        assert_eq!(AMOUNT.header(), vec![0x61]);
        assert_eq!(FEE.header(), vec![0x68]);
        assert_eq!(SIGNING_PUB_KEY.header(), vec![0x73]);
        assert_eq!(TXN_SIGNATURE.header(), vec![0x74]);
        assert_eq!(CONDITION.header(), vec![0x70, 0x11]);
        assert_eq!(ACCOUNT.header(), vec![0x81]);
        assert_eq!(OWNER.header(), vec![0x82]);
        assert_eq!(DESTINATION.header(), vec![0x83]);

        assert_eq!(FieldId::new(16, 1).header(), vec![0x01, 16]);
        assert_eq!(FieldId::new(16, 17).header(), vec![0x00, 16, 17]);
    }

    #[test]
    fn length_prefix_boundaries() {
        let mut out = Vec::new();
        encode_length(192, &mut out).unwrap();
        assert_eq!(out, vec![192]);

        let mut out = Vec::new();
        encode_length(193, &mut out).unwrap();
        assert_eq!(out, vec![193, 0]);

        let mut out = Vec::new();
        encode_length(12_480, &mut out).unwrap();
        assert_eq!(out, vec![240, 255]);

        let mut out = Vec::new();
        encode_length(12_481, &mut out).unwrap();
        assert_eq!(out, vec![241, 0, 0]);

        assert!(encode_length(918_745, &mut Vec::new()).is_err());
    }

    #[test]
    fn fields_are_sorted_and_encoded() {
        let fields = vec![
            (FEE, FieldValue::Drops(12)),
            (ACCOUNT, FieldValue::Account([0u8; 20])),
            (TRANSACTION_TYPE, FieldValue::UInt16(1)),
            (SEQUENCE, FieldValue::UInt32(5)),
        ];
        let bytes = encode_fields(&fields, false).unwrap();

        let mut expected = vec![0x12, 0x00, 0x01];
        expected.extend_from_slice(&[0x24, 0, 0, 0, 5]);
        expected.push(0x68);
        expected.extend_from_slice(&(12u64 | POSITIVE_NATIVE_AMOUNT).to_be_bytes());
        expected.extend_from_slice(&[0x81, 0x14]);
        expected.extend_from_slice(&[0u8; 20]);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn signing_serialisation_skips_signature() {
        let fields = vec![
            (TRANSACTION_TYPE, FieldValue::UInt16(2)),
            (TXN_SIGNATURE, FieldValue::Blob(vec![1, 2, 3])),
        ];
        assert_eq!(encode_fields(&fields, true).unwrap(), vec![0x12, 0x00, 0x02]);
        assert_eq!(encode_fields(&fields, false).unwrap().len(), 3 + 1 + 1 + 3);
    }

    #[test]
    fn rejects_mismatched_and_duplicate_fields() {
        let mismatched = vec![(FEE, FieldValue::UInt32(1))];
        assert!(matches!(
            encode_fields(&mismatched, false),
            Err(CodecError::TypeMismatch(_))
        ));

        let duplicate = vec![(SEQUENCE, FieldValue::UInt32(1)), (SEQUENCE, FieldValue::UInt32(2))];
        assert!(matches!(
            encode_fields(&duplicate, false),
            Err(CodecError::DuplicateField(_))
        ));

        let too_much = vec![(AMOUNT, FieldValue::Drops(MAX_DROPS + 1))];
        assert!(matches!(
            encode_fields(&too_much, false),
            Err(CodecError::AmountOutOfRange(_))
        ));
    }

    #[test]
    fn transaction_id_is_prefixed_sha512_half() {
        let blob = [0xAB, 0xCD];
        let expected = hex::encode_upper(sha512_half(&[&[0x54, 0x58, 0x4E, 0x00], &blob]));
        assert_eq!(transaction_id(&blob), expected);
        assert_eq!(transaction_id(&blob).len(), 64);
    }
}
