//! Binary entry points.
//!
//! The `agency-client` binary only calls [`run`]; everything it wires up is
//! reachable from here so integration tests can drive a run with an explicit
//! [`AppConfig`].

use anyhow::{Context, Result, anyhow};
use ortho_config::OrthoConfig;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    client::{AgencyClient, RunReport},
    config::AppConfig,
    connector::TcpConnector,
    records::load_records,
    shutdown::{self, ShutdownToken},
};

/// Load configuration, install logging and run the client until it finishes
/// or a termination signal arrives.
///
/// # Errors
/// Returns configuration, record loading and protocol failures.
pub async fn run() -> Result<()> {
    let config = AppConfig::load_from_iter(std::env::args_os())
        .map_err(|err| anyhow!("failed to load configuration: {err}"))?;
    init_tracing(&config.log_level);
    let (trigger, token) = shutdown::channel();
    tokio::spawn(shutdown::listen_for_signals(trigger));
    match run_with_config(&config, token).await {
        Ok(report) if report.cancelled => {
            info!(confirmed = report.confirmed, "action: graceful_shutdown | result: success");
            Ok(())
        }
        Ok(report) => {
            info!(
                "action: consulta_ganadores | result: success | cant_ganadores: {}",
                report.winners.len()
            );
            Ok(())
        }
        Err(err) => {
            error!(error = %err, "action: run | result: fail");
            Err(err)
        }
    }
}

/// Run one agency with an already loaded configuration.
///
/// # Errors
/// Returns validation, record loading and protocol failures.
pub async fn run_with_config(config: &AppConfig, shutdown: ShutdownToken) -> Result<RunReport> {
    let settings = config.settings()?;
    let records = load_records(&config.data_file)
        .await
        .with_context(|| format!("failed to read bets from {}", config.data_file))?;
    let connector =
        TcpConnector::new(settings.server_address.clone()).with_timeout(settings.connect_timeout);
    let client = AgencyClient::new(connector, settings, shutdown);
    Ok(client.run(&records).await?)
}

/// Install the global `fmt` subscriber; `RUST_LOG` overrides `default_level`.
///
/// Later calls are no-ops.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    if tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_err()
    {
        debug!("action: init_tracing | result: already_installed");
    }
}
