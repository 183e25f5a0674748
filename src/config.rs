//! Layered client configuration.
//!
//! Values are merged with `figment` from, in increasing precedence: built-in
//! defaults, a TOML file, `CLI_`-prefixed environment variables, and command
//! line overrides. The merged raw values are then validated into an immutable
//! [`ClientConfig`].

use std::{num::NonZeroUsize, time::Duration};

use camino::{Utf8Path, Utf8PathBuf};
use cli_defs::{Cli, ClientArgs};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::protocol::AgencyId;

/// Prefix shared by every configuration environment variable.
pub const ENV_PREFIX: &str = "CLI_";

const DEFAULT_BATCH_SIZE: NonZeroUsize = match NonZeroUsize::new(100) {
    Some(size) => size,
    None => NonZeroUsize::MIN,
};
const DEFAULT_LOOP_LAPSE: Duration = Duration::from_secs(60);
const DEFAULT_LOOP_PERIOD: Duration = Duration::from_secs(5);

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration sources could not be merged or deserialised.
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    /// No agency id was supplied by any source.
    #[error("agency id is required")]
    MissingId,
    /// The agency id does not fit the wire format.
    #[error("agency id {0:?} is not an integer between 0 and 65535")]
    InvalidId(String),
    /// The server address is blank.
    #[error("server address cannot be empty")]
    EmptyServerAddress,
    /// The batch size is zero.
    #[error("batch size must be at least 1")]
    ZeroBatchSize,
    /// A duration setting could not be parsed.
    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration {
        /// Setting name.
        field: &'static str,
        /// Raw value supplied.
        value: String,
    },
}

/// Accept either a string or an integer for text settings.
///
/// Environment values such as `CLI_ID=1` reach serde as integers.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Signed(i64),
        Unsigned(u64),
    }

    Ok(Option::<Scalar>::deserialize(deserializer)?.map(|scalar| match scalar {
        Scalar::Text(text) => text,
        Scalar::Signed(n) => n.to_string(),
        Scalar::Unsigned(n) => n.to_string(),
    }))
}

/// Unvalidated configuration as merged from all sources.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawConfig {
    /// Agency identifier.
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    /// Server address as `host:port`.
    pub server_address: String,
    /// Total time budget, as a human-readable duration.
    pub loop_lapse: String,
    /// Delay between winner poll attempts, as a human-readable duration.
    pub loop_period: String,
    /// Maximum bets per batch.
    pub batch_size: usize,
    /// Bets input file; `agency-<id>.csv` when unset.
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub bets_file: Option<String>,
    /// Per-operation I/O deadline; unset means no deadline.
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub io_timeout: Option<String>,
    /// Default log level.
    pub log_level: String,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            id: None,
            server_address: "server:12345".to_owned(),
            loop_lapse: humantime::format_duration(DEFAULT_LOOP_LAPSE).to_string(),
            loop_period: humantime::format_duration(DEFAULT_LOOP_PERIOD).to_string(),
            batch_size: DEFAULT_BATCH_SIZE.get(),
            bets_file: None,
            io_timeout: None,
            log_level: "info".to_owned(),
        }
    }
}

impl RawConfig {
    /// Merge defaults, `config_file`, the environment and `overrides`.
    ///
    /// A missing configuration file is treated as empty.
    ///
    /// # Errors
    /// Returns [`ConfigError::Load`] when a source is malformed or a value has
    /// the wrong type.
    pub fn load(config_file: &Utf8Path, overrides: &ClientArgs) -> Result<Self, ConfigError> {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(config_file.as_std_path()))
            .merge(Env::prefixed(ENV_PREFIX))
            .merge(Serialized::defaults(overrides))
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))
    }
}

fn parse_duration(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|_| ConfigError::InvalidDuration {
        field,
        value: value.to_owned(),
    })
}

/// Validated, immutable client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    agency: AgencyId,
    server_address: String,
    loop_lapse: Duration,
    loop_period: Duration,
    batch_size: NonZeroUsize,
    bets_file: Utf8PathBuf,
    io_timeout: Option<Duration>,
    log_level: String,
}

impl TryFrom<RawConfig> for ClientConfig {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let id = raw.id.ok_or(ConfigError::MissingId)?;
        let agency = id.parse().map_err(|_| ConfigError::InvalidId(id.clone()))?;
        if raw.server_address.trim().is_empty() {
            return Err(ConfigError::EmptyServerAddress);
        }
        let batch_size = NonZeroUsize::new(raw.batch_size).ok_or(ConfigError::ZeroBatchSize)?;
        let bets_file = raw
            .bets_file
            .map_or_else(|| default_bets_file(agency), Utf8PathBuf::from);
        let io_timeout = raw
            .io_timeout
            .as_deref()
            .map(|value| parse_duration("io_timeout", value))
            .transpose()?;
        Ok(Self {
            agency,
            server_address: raw.server_address,
            loop_lapse: parse_duration("loop_lapse", &raw.loop_lapse)?,
            loop_period: parse_duration("loop_period", &raw.loop_period)?,
            batch_size,
            bets_file,
            io_timeout,
            log_level: raw.log_level,
        })
    }
}

/// Input file used when none is configured: `agency-<id>.csv`.
#[must_use]
pub fn default_bets_file(agency: AgencyId) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("agency-{agency}.csv"))
}

impl ClientConfig {
    /// Build a configuration from the essentials, using defaults elsewhere.
    #[must_use]
    pub fn new(agency: AgencyId, server_address: impl Into<String>) -> Self {
        Self {
            agency,
            server_address: server_address.into(),
            loop_lapse: DEFAULT_LOOP_LAPSE,
            loop_period: DEFAULT_LOOP_PERIOD,
            batch_size: DEFAULT_BATCH_SIZE,
            bets_file: default_bets_file(agency),
            io_timeout: None,
            log_level: RawConfig::default().log_level,
        }
    }

    /// Load and validate configuration for a parsed command line.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if loading or validation fails.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        RawConfig::load(Utf8Path::new(&cli.config), &cli.overrides)?.try_into()
    }

    /// Override the delay between winner poll attempts.
    #[must_use]
    pub const fn with_loop_period(mut self, loop_period: Duration) -> Self {
        self.loop_period = loop_period;
        self
    }

    /// Override the maximum bets per batch.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: NonZeroUsize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Override the bets input file.
    #[must_use]
    pub fn with_bets_file(mut self, bets_file: impl Into<Utf8PathBuf>) -> Self {
        self.bets_file = bets_file.into();
        self
    }

    /// Override the per-operation I/O deadline.
    #[must_use]
    pub const fn with_io_timeout(mut self, io_timeout: Option<Duration>) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// Agency identifier.
    #[must_use]
    pub const fn agency(&self) -> AgencyId { self.agency }

    /// Server address as `host:port`.
    #[must_use]
    pub fn server_address(&self) -> &str { &self.server_address }

    /// Total time budget for the run.
    #[must_use]
    pub const fn loop_lapse(&self) -> Duration { self.loop_lapse }

    /// Delay between winner poll attempts.
    #[must_use]
    pub const fn loop_period(&self) -> Duration { self.loop_period }

    /// Maximum bets per batch.
    #[must_use]
    pub const fn batch_size(&self) -> NonZeroUsize { self.batch_size }

    /// Bets input file.
    #[must_use]
    pub fn bets_file(&self) -> &Utf8Path { &self.bets_file }

    /// Per-operation I/O deadline, if any.
    #[must_use]
    pub const fn io_timeout(&self) -> Option<Duration> { self.io_timeout }

    /// Log level used when `RUST_LOG` is unset.
    #[must_use]
    pub fn log_level(&self) -> &str { &self.log_level }
}
