//! CLI argument definitions for the Abode chatbot service.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

use abode_core::config::AbodeConfig;

/// Abode: assisted query chatbot for the property and services marketplace.
#[derive(Parser, Debug)]
#[command(name = "abode", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Data directory for the SQLite database.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Send every message through the LLM path.
    #[arg(long = "no-fast-path")]
    pub no_fast_path: bool,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > ABODE_CONFIG env var > ./abode.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("ABODE_CONFIG") {
            return PathBuf::from(p);
        }
        PathBuf::from("abode.toml")
    }

    /// Apply flag overrides on top of a config that already carries file
    /// and environment values.
    pub fn apply_to(&self, config: &mut AbodeConfig) {
        if let Some(port) = self.port {
            config.general.port = port;
        }
        if let Some(ref dir) = self.data_dir {
            config.general.data_dir = dir.to_string_lossy().to_string();
        }
        if let Some(ref level) = self.log_level {
            config.general.log_level = level.clone();
        }
        if self.no_fast_path {
            config.chat.fast_path_enabled = false;
        }
    }
}
