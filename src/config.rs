// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is read from the environment once at startup into
//! [`EngineConfig`].
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Directory holding the escrow database | `/data` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `XRPL_NETWORK` | `mainnet` or `testnet` | `testnet` |
//! | `XRPL_RPC_URL` | Override of the network's JSON-RPC endpoint | network default |
//! | `LEDGER_TIMEOUT_SECS` | Timeout of every ledger RPC | `8` |
//! | `GATEWAY_TIMEOUT_SECS` | Timeout of every signing-gateway call | `8` |
//! | `FEE_DROPS` | Fee of locally signed transactions | `12` |
//! | `LAST_LEDGER_OFFSET` | Ledgers a signed transaction stays valid | `20` |
//! | `FINISH_AFTER_DELAY_SECS` | Earliest release of non time-based escrows | `30` |
//! | `CANCEL_AFTER_DAYS` | Window after `FinishAfter` before a commitment expires | `90` |
//! | `HISTORY_LIMIT` | Account transactions scanned for a finish or cancel | `200` |
//! | `FIAT_CURRENCY` | Fiat reference currency | `USD` |
//! | `RATE_API_URL` | Exchange-rate API base URL | CoinGecko |
//! | `RATE_OVERRIDE` | Fixed fiat price of one XRP (sandbox) | unset |
//! | `XUMM_API_BASE_URL` | Signing gateway base URL | `https://xumm.app` |
//! | `XUMM_API_KEY` / `XUMM_API_SECRET` | Signing gateway credentials | unset (delegated signing off) |
//! | `XUMM_AUTO_SUBMIT` | Let the gateway submit signed transactions | `false` |
//! | `PARTIES_FILE` | JSON party directory and custodied seeds | `$DATA_DIR/parties.json` |

use std::path::PathBuf;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::ledger::{network_by_name, NetworkConfig, XRPL_TESTNET};

/// Environment variable name for the data directory path.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

const DEFAULT_DATA_DIR: &str = "/data";
const DEFAULT_RATE_API_URL: &str = "https://api.coingecko.com";
const DATABASE_FILE: &str = "escrows.redb";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub network: NetworkConfig,
    pub rpc_url: Option<String>,
    pub ledger_timeout: Duration,
    pub gateway_timeout: Duration,
    pub fee_drops: u64,
    pub last_ledger_offset: u32,
    pub finish_after_delay: Duration,
    pub cancel_after_window: Duration,
    pub history_limit: u32,
    pub fiat_currency: String,
    pub rate_api_url: String,
    pub rate_override: Option<Decimal>,
    pub parties_file: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from(DEFAULT_DATA_DIR);
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            parties_file: data_dir.join("parties.json"),
            data_dir,
            network: XRPL_TESTNET,
            rpc_url: None,
            ledger_timeout: Duration::from_secs(8),
            gateway_timeout: Duration::from_secs(8),
            fee_drops: 12,
            last_ledger_offset: 20,
            finish_after_delay: Duration::from_secs(30),
            cancel_after_window: Duration::from_secs(90 * 24 * 60 * 60),
            history_limit: 200,
            fiat_currency: "USD".to_string(),
            rate_api_url: DEFAULT_RATE_API_URL.to_string(),
            rate_override: None,
        }
    }
}

impl EngineConfig {
    /// Read the configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let data_dir = env_optional(DATA_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let network = match env_optional("XRPL_NETWORK") {
            Some(raw) => network_by_name(&raw).map_err(|reason| ConfigError::Invalid {
                name: "XRPL_NETWORK",
                reason,
            })?,
            None => defaults.network,
        };

        Ok(Self {
            host: env_or_default("HOST", &defaults.host),
            port: env_parse("PORT", defaults.port)?,
            parties_file: env_optional("PARTIES_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("parties.json")),
            data_dir,
            network,
            rpc_url: env_optional("XRPL_RPC_URL"),
            ledger_timeout: Duration::from_secs(env_parse("LEDGER_TIMEOUT_SECS", 8)?),
            gateway_timeout: Duration::from_secs(env_parse("GATEWAY_TIMEOUT_SECS", 8)?),
            fee_drops: env_parse("FEE_DROPS", defaults.fee_drops)?,
            last_ledger_offset: env_parse("LAST_LEDGER_OFFSET", defaults.last_ledger_offset)?,
            finish_after_delay: Duration::from_secs(env_parse("FINISH_AFTER_DELAY_SECS", 30)?),
            cancel_after_window: Duration::from_secs(
                env_parse::<u64>("CANCEL_AFTER_DAYS", 90)? * 24 * 60 * 60,
            ),
            history_limit: env_parse("HISTORY_LIMIT", defaults.history_limit)?,
            fiat_currency: env_or_default("FIAT_CURRENCY", &defaults.fiat_currency)
                .to_ascii_uppercase(),
            rate_api_url: env_or_default("RATE_API_URL", DEFAULT_RATE_API_URL),
            rate_override: env_optional("RATE_OVERRIDE")
                .map(|raw| {
                    raw.parse::<Decimal>().map_err(|e| ConfigError::Invalid {
                        name: "RATE_OVERRIDE",
                        reason: e.to_string(),
                    })
                })
                .transpose()?,
        })
    }

    /// Path of the embedded escrow database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }
}

pub fn env_optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Missing variables are reported by name.
pub(crate) fn env_required(name: &str) -> Result<String, String> {
    env_optional(name).ok_or_else(|| name.to_string())
}

pub(crate) fn env_or_default(name: &str, default: &str) -> String {
    env_optional(name).unwrap_or_else(|| default.to_string())
}

fn env_parse<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env_optional(name) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
