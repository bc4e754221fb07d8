// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! XRPL key handling: family seeds, secp256k1 key derivation and the
//! classic-address codec.

use k256::{
    ecdsa::{signature::hazmat::PrehashSigner, Signature, SigningKey},
    elliptic_curve::sec1::ToEncodedPoint,
    NonZeroScalar, SecretKey,
};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroizing;

/// Version byte of a secp256k1 family seed.
const SEED_VERSION: u8 = 0x21;
/// Version prefix of an Ed25519 seed (`sEd…`).
const ED25519_SEED_PREFIX: [u8; 3] = [0x01, 0xE1, 0x4B];
/// Version byte of a classic account address.
const ACCOUNT_VERSION: u8 = 0x00;

/// First half of SHA-512, the hash used throughout the XRPL protocol.
pub fn sha512_half(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..32]);
    out
}

/// 20-byte account id of a public key: RIPEMD160(SHA256(pubkey)).
pub fn account_id(public_key: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(public_key);
    let ripe = Ripemd160::digest(sha);
    let mut out = [0u8; 20];
    out.copy_from_slice(&ripe);
    out
}

/// Encode an account id as a classic `r…` address.
pub fn encode_address(account_id: &[u8; 20]) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(ACCOUNT_VERSION);
    payload.extend_from_slice(account_id);
    bs58::encode(payload)
        .with_alphabet(bs58::Alphabet::RIPPLE)
        .with_check()
        .into_string()
}

/// Decode a classic `r…` address into its account id.
pub fn decode_address(address: &str) -> Result<[u8; 20], KeyError> {
    let decoded = bs58::decode(address)
        .with_alphabet(bs58::Alphabet::RIPPLE)
        .with_check(Some(ACCOUNT_VERSION))
        .into_vec()
        .map_err(|e| KeyError::InvalidAddress(format!("{address}: {e}")))?;

    // Payload is the version byte followed by the 20-byte account id.
    if decoded.len() != 21 {
        return Err(KeyError::InvalidAddress(format!(
            "{address}: unexpected length {}",
            decoded.len()
        )));
    }
    let mut id = [0u8; 20];
    id.copy_from_slice(&decoded[1..]);
    Ok(id)
}

/// Whether a string is a well-formed classic address.
pub fn is_valid_address(address: &str) -> bool {
    address.starts_with('r') && decode_address(address).is_ok()
}

/// A secp256k1 key pair derived from a family seed.
pub struct KeyPair {
    signing_key: SigningKey,
    public_key: [u8; 33],
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &hex::encode_upper(self.public_key))
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Derive the account key pair (account index 0) from a family seed.
    pub fn from_seed(seed: &str) -> Result<Self, KeyError> {
        let entropy = decode_seed(seed)?;
        let root = derive_scalar(&[entropy.as_slice()])?;
        let root_public = compressed_point(&root);

        let tweak = derive_scalar(&[&root_public, &0u32.to_be_bytes()])?;
        let combined = *root.as_ref() + *tweak.as_ref();
        let scalar = Option::<NonZeroScalar>::from(NonZeroScalar::new(combined))
            .ok_or_else(|| KeyError::Derivation("derived key is zero".into()))?;

        let secret = SecretKey::from(scalar);
        let signing_key = SigningKey::from(&secret);
        let public_key = compressed_point(&scalar);

        Ok(Self {
            signing_key,
            public_key,
        })
    }

    /// Compressed public key (33 bytes).
    pub fn public_key(&self) -> &[u8; 33] {
        &self.public_key
    }

    /// Upper-case hex of the public key, as carried in `SigningPubKey`.
    pub fn public_key_hex(&self) -> String {
        hex::encode_upper(self.public_key)
    }

    /// Classic address controlled by this key pair.
    pub fn address(&self) -> String {
        encode_address(&account_id(&self.public_key))
    }

    /// Sign a 32-byte digest, returning a low-S DER signature.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<Vec<u8>, KeyError> {
        let signature: Signature = self
            .signing_key
            .sign_prehash(digest)
            .map_err(|e| KeyError::Signing(e.to_string()))?;
        let signature = signature.normalize_s().unwrap_or(signature);
        Ok(signature.to_der().as_bytes().to_vec())
    }

    #[cfg(test)]
    pub(crate) fn verifying_key(&self) -> &k256::ecdsa::VerifyingKey {
        self.signing_key.verifying_key()
    }
}

/// Decode a family seed to its 16 bytes of entropy.
fn decode_seed(seed: &str) -> Result<Zeroizing<Vec<u8>>, KeyError> {
    let decoded = Zeroizing::new(
        bs58::decode(seed.trim())
            .with_alphabet(bs58::Alphabet::RIPPLE)
            .with_check(None)
            .into_vec()
            .map_err(|_| KeyError::InvalidSeed)?,
    );

    if decoded.len() == 19 && decoded[..3] == ED25519_SEED_PREFIX {
        return Err(KeyError::UnsupportedKeyType("ed25519"));
    }
    if decoded.len() != 17 || decoded[0] != SEED_VERSION {
        return Err(KeyError::InvalidSeed);
    }
    Ok(Zeroizing::new(decoded[1..].to_vec()))
}

/// Hash `parts ‖ counter` until the result is a valid non-zero scalar below
/// the curve order.
fn derive_scalar(parts: &[&[u8]]) -> Result<NonZeroScalar, KeyError> {
    for counter in 0u32..=u32::MAX {
        let counter_bytes = counter.to_be_bytes();
        let mut input: Vec<&[u8]> = parts.to_vec();
        input.push(&counter_bytes);
        let candidate = Zeroizing::new(sha512_half(&input));

        if let Ok(secret) = SecretKey::from_slice(candidate.as_slice()) {
            return Ok(secret.to_nonzero_scalar());
        }
    }
    Err(KeyError::Derivation("no valid scalar found".into()))
}

fn compressed_point(scalar: &NonZeroScalar) -> [u8; 33] {
    let public = k256::PublicKey::from_secret_scalar(scalar);
    let encoded = public.to_encoded_point(true);
    let mut out = [0u8; 33];
    out.copy_from_slice(encoded.as_bytes());
    out
}

/// Errors raised while handling keys and addresses.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("Invalid family seed")]
    InvalidSeed,

    #[error("Unsupported key type: {0}")]
    UnsupportedKeyType(&'static str),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Key derivation failed: {0}")]
    Derivation(String),

    #[error("Signing failed: {0}")]
    Signing(String),
}
