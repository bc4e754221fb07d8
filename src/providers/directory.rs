// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Party directory: maps platform user ids to ledger accounts.
//!
//! The bundled implementation reads a JSON file of the form
//!
//! ```json
//! { "parties": [
//!   { "user_id": "user_a", "address": "r…", "signing_mode": "direct", "seed": "s…" },
//!   { "user_id": "user_b", "address": "r…", "signing_mode": "delegated" }
//! ] }
//! ```
//!
//! Seeds of directly-signing parties stay in zeroizing buffers and are only
//! handed out through [`SecretVault`].

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use zeroize::Zeroizing;

use crate::escrow::model::SigningMode;
use crate::ledger::keys::is_valid_address;
use crate::signing::SecretVault;

/// A platform user and the ledger account they transact with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PartyAccount {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default)]
    pub signing_mode: SigningMode,
}

#[async_trait]
pub trait PartyDirectory: Send + Sync {
    async fn resolve_party(&self, user_id: &str) -> Result<Option<PartyAccount>, DirectoryError>;

    async fn resolve_ledger_address(&self, user_id: &str) -> Result<Option<String>, DirectoryError> {
        Ok(self
            .resolve_party(user_id)
            .await?
            .and_then(|party| party.address))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Failed to read party directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse party directory: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Party {user_id} has an invalid ledger address: {address}")]
    InvalidAddress { user_id: String, address: String },
}

#[derive(Deserialize)]
struct PartiesFile {
    #[serde(default)]
    parties: Vec<PartyEntry>,
}

#[derive(Deserialize)]
struct PartyEntry {
    #[serde(flatten)]
    account: PartyAccount,
    #[serde(default)]
    seed: Option<String>,
}

/// File-backed directory that also serves as the custody vault.
#[derive(Default)]
pub struct FileDirectory {
    parties: HashMap<String, PartyAccount>,
    seeds: HashMap<String, Zeroizing<String>>,
}

impl FileDirectory {
    pub fn load(path: &Path) -> Result<Self, DirectoryError> {
        let raw = Zeroizing::new(std::fs::read_to_string(path)?);
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, DirectoryError> {
        let file: PartiesFile = serde_json::from_str(raw)?;

        let mut directory = Self::default();
        for entry in file.parties {
            let account = entry.account;
            if let Some(address) = &account.address {
                if !is_valid_address(address) {
                    return Err(DirectoryError::InvalidAddress {
                        user_id: account.user_id.clone(),
                        address: address.clone(),
                    });
                }
                if let Some(seed) = entry.seed {
                    directory.seeds.insert(address.clone(), Zeroizing::new(seed));
                }
            }
            directory.parties.insert(account.user_id.clone(), account);
        }
        Ok(directory)
    }

    pub fn len(&self) -> usize {
        self.parties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parties.is_empty()
    }
}

#[async_trait]
impl PartyDirectory for FileDirectory {
    async fn resolve_party(&self, user_id: &str) -> Result<Option<PartyAccount>, DirectoryError> {
        Ok(self.parties.get(user_id).cloned())
    }
}

impl SecretVault for FileDirectory {
    fn seed_for(&self, address: &str) -> Option<Zeroizing<String>> {
        self.seeds.get(address).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GENESIS: &str = "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh";

    #[tokio::test]
    async fn loads_parties_and_seeds() {
        let directory = FileDirectory::from_json(&format!(
            r#"{{ "parties": [
                {{ "user_id": "alice", "address": "{GENESIS}", "seed": "snoPBrXtMeMyMHUVTgbuqAfg1SUTb" }},
                {{ "user_id": "bob", "signing_mode": "delegated" }}
            ] }}"#
        ))
        .unwrap();
        assert_eq!(directory.len(), 2);

        let alice = directory.resolve_party("alice").await.unwrap().unwrap();
        assert_eq!(alice.signing_mode, SigningMode::Direct);
        assert_eq!(
            directory.resolve_ledger_address("alice").await.unwrap().as_deref(),
            Some(GENESIS)
        );
        assert!(directory.seed_for(GENESIS).is_some());

        let bob = directory.resolve_party("bob").await.unwrap().unwrap();
        assert_eq!(bob.signing_mode, SigningMode::Delegated);
        assert_eq!(directory.resolve_ledger_address("bob").await.unwrap(), None);
        assert!(directory.resolve_party("carol").await.unwrap().is_none());
    }

    #[test]
    fn rejects_malformed_addresses() {
        let result = FileDirectory::from_json(
            r#"{ "parties": [ { "user_id": "mallory", "address": "rNotAnAddress" } ] }"#,
        );
        assert!(matches!(result, Err(DirectoryError::InvalidAddress { .. })));
    }
}
