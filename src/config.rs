//! Layered configuration for the agency client binary.
//!
//! Values come from defaults, then `.agency.toml`, then `AGENCY_*` environment
//! variables, then the command line. [`AppConfig::settings`] validates the
//! merged values into the [`ClientSettings`] the protocol code consumes.

#![expect(
    non_snake_case,
    reason = "Clap/OrthoConfig derive macros generate helper modules with uppercase names"
)]
#![allow(
    missing_docs,
    reason = "OrthoConfig and Clap derive macros generate items that cannot be documented"
)]
#![allow(
    unfulfilled_lint_expectations,
    reason = "derive macros conditionally generate items"
)]

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Args;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

use crate::{
    client::ClientSettings,
    submitter::{ConnectionPolicy, DEFAULT_BATCH_SIZE},
};

/// Runtime configuration for one agency process.
#[expect(
    missing_docs,
    reason = "OrthoConfig derive macro generates items that cannot be documented"
)]
#[derive(Args, OrthoConfig, Serialize, Deserialize, Default, Debug, Clone)]
#[ortho_config(prefix = "AGENCY_")]
pub struct AppConfig {
    /// Agency identifier.
    #[ortho_config(default = 1)]
    #[arg(long, default_value_t = 1)]
    pub id: u8,
    /// Aggregator address as `host:port`.
    #[ortho_config(default = "server:12345".to_owned())]
    #[arg(long, default_value_t = String::from("server:12345"))]
    pub server_address: String,
    /// Maximum bets per batch; zero selects the default.
    #[ortho_config(default = DEFAULT_BATCH_SIZE)]
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_max_amount: usize,
    /// Retries allowed for a failing batch.
    #[ortho_config(default = 3)]
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,
    /// Pause between winners polls in milliseconds.
    #[ortho_config(default = 100)]
    #[arg(long, default_value_t = 100)]
    pub poll_backoff_ms: u64,
    /// Upper bound on winners polling in milliseconds; zero polls forever.
    #[ortho_config(default = 0)]
    #[arg(long, default_value_t = 0)]
    pub max_poll_ms: u64,
    /// Read/write deadline in milliseconds.
    #[ortho_config(default = 5000)]
    #[arg(long, default_value_t = 5000)]
    pub io_timeout_ms: u64,
    /// Connect deadline in milliseconds.
    #[ortho_config(default = 5000)]
    #[arg(long, default_value_t = 5000)]
    pub connect_timeout_ms: u64,
    /// `per-batch` or `persistent`.
    #[ortho_config(default = "per-batch".to_owned())]
    #[arg(long, default_value_t = String::from("per-batch"))]
    pub connection_policy: String,
    /// Path of the agency's bet file.
    #[ortho_config(default = "/data/agency.csv".to_owned())]
    #[arg(long, default_value_t = String::from("/data/agency.csv"))]
    pub data_file: String,
    /// Log filter used when `RUST_LOG` is unset.
    #[ortho_config(default = "info".to_owned())]
    #[arg(long, default_value_t = String::from("info"))]
    pub log_level: String,
}

impl AppConfig {
    /// Validate the merged values into protocol settings.
    ///
    /// # Errors
    /// Fails on an empty server address, a zero I/O or connect timeout, or an
    /// unknown connection policy.
    pub fn settings(&self) -> Result<ClientSettings> {
        let server_address = self.server_address.trim();
        if server_address.is_empty() {
            bail!("server address must not be empty");
        }
        if self.io_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            bail!("timeouts must be greater than zero");
        }
        let policy: ConnectionPolicy = self
            .connection_policy
            .parse()
            .context("invalid connection policy")?;
        let batch_size = match self.batch_max_amount {
            0 => DEFAULT_BATCH_SIZE,
            n => n,
        };
        Ok(ClientSettings {
            agency: self.id,
            server_address: server_address.to_owned(),
            batch_size,
            max_retries: self.max_retries,
            policy,
            poll_backoff: Duration::from_millis(self.poll_backoff_ms),
            max_poll: (self.max_poll_ms > 0).then(|| Duration::from_millis(self.max_poll_ms)),
            io_timeout: Duration::from_millis(self.io_timeout_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        })
    }
}
