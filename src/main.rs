// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::process::ExitCode;
use std::sync::Arc;

use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use relational_escrow_engine::{
    api::router,
    config::{env_optional, ConfigError, EngineConfig},
    escrow::{EngineDeps, EngineSettings, EscrowService, TermsPolicy},
    ledger::{ConfirmPolicy, HistoryWindow, LedgerError, XrplClient},
    providers::{
        CoinGeckoRates, DirectoryError, ExchangeRateProvider, FileDirectory, FixedRate,
        LedgerBalanceRefresher, RateError, TracingNotifier, XummGateway,
    },
    signing::{DirectSigner, FeePolicy, GatewayError, SigningGateway},
    state::AppState,
    storage::{EscrowDatabase, StoreError},
};

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to open escrow database: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to build ledger client: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Failed to configure signing gateway: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Failed to configure exchange rates: {0}")]
    Rates(#[from] RateError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Escrow engine stopped");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let subscriber = tracing_subscriber::registry().with(env_filter);

    match env_optional("LOG_FORMAT").as_deref() {
        Some("json") => subscriber.with(fmt::layer().json().with_target(true)).init(),
        _ => subscriber.with(fmt::layer().pretty().with_target(true)).init(),
    }
}

async fn run() -> Result<(), StartupError> {
    let config = EngineConfig::from_env()?;
    info!(
        network = config.network.name,
        data_dir = %config.data_dir.display(),
        "Starting escrow engine"
    );

    std::fs::create_dir_all(&config.data_dir)?;
    let db = Arc::new(EscrowDatabase::open(&config.database_path())?);

    let ledger = Arc::new(XrplClient::new(
        config.network,
        config.rpc_url.as_deref(),
        config.ledger_timeout,
    )?);

    let directory = if config.parties_file.exists() {
        let directory = FileDirectory::load(&config.parties_file)?;
        info!(parties = directory.len(), "Loaded party directory");
        directory
    } else {
        warn!(
            path = %config.parties_file.display(),
            "Party directory not found, no party can create escrows"
        );
        FileDirectory::default()
    };
    let directory = Arc::new(directory);

    let rates: Arc<dyn ExchangeRateProvider> = match config.rate_override {
        Some(rate) => {
            warn!(%rate, currency = %config.fiat_currency, "Using fixed exchange rate");
            Arc::new(FixedRate(rate))
        }
        None => Arc::new(CoinGeckoRates::new(
            config.rate_api_url.clone(),
            config.ledger_timeout,
        )?),
    };

    let gateway: Option<Arc<dyn SigningGateway>> = if XummGateway::is_configured() {
        info!("Delegated signing enabled");
        let gateway = XummGateway::from_env(config.gateway_timeout)?;
        Some(Arc::new(gateway) as Arc<dyn SigningGateway>)
    } else {
        info!("Delegated signing disabled (no gateway credentials)");
        None
    };

    let fees = FeePolicy {
        fee_drops: config.fee_drops,
        last_ledger_offset: config.last_ledger_offset,
    };
    let deps = EngineDeps {
        store: db.clone(),
        ledger: ledger.clone(),
        direct_signer: Arc::new(DirectSigner::new(directory.clone(), ledger.clone(), fees)),
        gateway,
        directory,
        rates,
        notifier: Arc::new(TracingNotifier),
        balances: Arc::new(LedgerBalanceRefresher::new(ledger)),
    };
    let settings = EngineSettings {
        terms: TermsPolicy {
            fiat_currency: config.fiat_currency.clone(),
            finish_after_delay: config.finish_after_delay,
            cancel_after_window: config.cancel_after_window,
        },
        confirm: ConfirmPolicy::default(),
        side_effect_timeout: config.ledger_timeout,
        history: HistoryWindow {
            limit: config.history_limit,
            ledger_index_min: None,
        },
    };

    let state = AppState::new(EscrowService::new(deps, settings), db);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(addr = %listener.local_addr()?, "Escrow engine listening (docs at /docs)");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Escrow engine stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
