// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Direct signing with platform-held family seeds.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use zeroize::Zeroizing;

use super::{SignOutcome, SignerError, TransactionSigner};
use crate::ledger::keys::KeyPair;
use crate::ledger::{sign_template, LedgerRpc, TxTemplate, TF_FULLY_CANONICAL_SIG};

/// Source of custodied signing secrets, keyed by ledger address.
pub trait SecretVault: Send + Sync {
    fn seed_for(&self, address: &str) -> Option<Zeroizing<String>>;
}

/// Fee and expiry parameters filled into every locally signed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeePolicy {
    pub fee_drops: u64,
    /// Ledgers after the current one in which the transaction may apply.
    pub last_ledger_offset: u32,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            fee_drops: 12,
            last_ledger_offset: 20,
        }
    }
}

pub struct DirectSigner {
    vault: Arc<dyn SecretVault>,
    ledger: Arc<dyn LedgerRpc>,
    fees: FeePolicy,
}

impl DirectSigner {
    pub fn new(vault: Arc<dyn SecretVault>, ledger: Arc<dyn LedgerRpc>, fees: FeePolicy) -> Self {
        Self {
            vault,
            ledger,
            fees,
        }
    }

    fn key_pair_for(&self, address: &str) -> Result<KeyPair, SignerError> {
        let seed = self
            .vault
            .seed_for(address)
            .ok_or_else(|| SignerError::MissingSecret(address.to_string()))?;
        let pair = KeyPair::from_seed(&seed)?;

        let derived = pair.address();
        if derived != address {
            return Err(SignerError::SignerMismatch {
                expected: address.to_string(),
                derived,
            });
        }
        Ok(pair)
    }
}

#[async_trait]
impl TransactionSigner for DirectSigner {
    async fn sign(&self, mut template: TxTemplate) -> Result<SignOutcome, SignerError> {
        // Key check first so a misconfigured secret never reaches the ledger.
        let pair = self.key_pair_for(&template.account)?;

        let sequence = self.ledger.account_sequence(&template.account).await?;
        let current = self.ledger.current_ledger_index().await?;

        template.sequence = Some(sequence);
        template.fee_drops = Some(self.fees.fee_drops);
        template.last_ledger_sequence = Some(current.saturating_add(self.fees.last_ledger_offset));
        template.flags = Some(template.flags.unwrap_or(0) | TF_FULLY_CANONICAL_SIG);

        let signed = sign_template(&template, &pair)?;
        debug!(
            account = %template.account,
            kind = template.kind.as_str(),
            sequence,
            tx_hash = %signed.tx_hash,
            "Signed transaction locally"
        );
        Ok(SignOutcome::Signed(signed))
    }
}
