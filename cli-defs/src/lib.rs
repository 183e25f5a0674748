//! Shared CLI type definitions for betwire build and runtime.
//!
//! This crate provides the command-line argument types used by both the
//! `build.rs` script (for man page generation) and the client binary.
//! Keeping them in a separate crate lets the build script render the man page
//! without pulling in the tokio runtime or the protocol engine.
//!
//! Every override is optional. Values left unset on the command line fall
//! through to environment variables, the configuration file and finally the
//! built-in defaults; the runtime merges those layers with `figment`.

use clap::{Args, Parser};
use serde::{Deserialize, Serialize};

/// Configuration file consulted when `--config` is not supplied.
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Per-field overrides accepted on the command line.
///
/// Unset fields are skipped during serialisation so they never mask values
/// coming from lower-precedence layers.
#[derive(Args, Serialize, Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct ClientArgs {
    /// Agency identifier; must fit in an unsigned 16-bit integer.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Lottery server address as `host:port`.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_address: Option<String>,
    /// Total time budget for the client run, e.g. `1m2s`.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_lapse: Option<String>,
    /// Delay between winner poll attempts, e.g. `5s`.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_period: Option<String>,
    /// Maximum number of bets per batch.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    /// Bets input file. Defaults to `agency-<id>.csv`.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bets_file: Option<String>,
    /// Deadline applied to each network read or write, e.g. `30s`.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub io_timeout: Option<String>,
    /// Log level used when `RUST_LOG` is not set.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

/// Top-level CLI entry point consumed by the client binary.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Submit agency bets and poll for the lottery draw result")]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: String,
    /// Configuration overrides (merged with files, environment and defaults).
    #[command(flatten)]
    pub overrides: ClientArgs,
}
