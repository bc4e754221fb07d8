// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction signing.
//!
//! Two signers sit behind [`TransactionSigner`]:
//!
//! - [`DirectSigner`] holds platform-custodied seeds and signs immediately.
//! - [`DelegatedSigner`] hands the unsigned template to a signing gateway and
//!   returns a pending handle; the escrow poller resolves it later.

use async_trait::async_trait;

use crate::ledger::codec::CodecError;
use crate::ledger::keys::KeyError;
use crate::ledger::{LedgerError, SignedTransaction, TxTemplate};

pub mod delegated;
pub mod direct;

pub use delegated::{DelegatedSigner, GatewayError, GatewayHandle, GatewayState, SigningGateway};
pub use direct::{DirectSigner, FeePolicy, SecretVault};

/// Result of asking a signer for a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignOutcome {
    /// Signed now; ready for submission.
    Signed(SignedTransaction),
    /// Waiting on the end user at the signing gateway.
    Pending(GatewayHandle),
}

#[async_trait]
pub trait TransactionSigner: Send + Sync {
    async fn sign(&self, template: TxTemplate) -> Result<SignOutcome, SignerError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("Signing key for {expected} derives address {derived}")]
    SignerMismatch { expected: String, derived: String },

    #[error("No signing secret held for {0}")]
    MissingSecret(String),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("Transaction encoding failed: {0}")]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}
