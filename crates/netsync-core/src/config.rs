//! Configuration loading and typed config structures for the netsync mirror.
//!
//! The canonical configuration lives in `netsync-config.yaml`. Every field
//! has a default, so an empty file (or no file at all) yields a working
//! configuration that talks to a local NATS server and falls back to the
//! synthetic feed when none is running.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Environment variable overriding [`TransportConfig::url`].
pub const URL_ENV: &str = "NETSYNC_URL";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The configuration parsed but is not usable.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level mirror configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SyncConfig {
    /// Live transport settings.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Synthetic fallback feed settings.
    #[serde(default)]
    pub fallback: FallbackConfig,

    /// Consensus delivery settings.
    #[serde(default)]
    pub consensus: ConsensusConfig,

    /// Logging settings (consumed by the client binary).
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SyncConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `NETSYNC_URL` overrides `transport.url` when set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&contents)?;
        config.transport.apply_env_overrides();
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the values that would make the engine misbehave.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero fallback tick, a zero
    /// pacing interval, fallback weights that are all zero, or an empty
    /// synthetic graph.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fallback.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                reason: "fallback.tick_interval_ms must be at least 1".to_owned(),
            });
        }
        if self.consensus.pacing_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                reason: "consensus.pacing_interval_ms must be at least 1".to_owned(),
            });
        }
        if self.fallback.weights.total() == 0 {
            return Err(ConfigError::Invalid {
                reason: "fallback.weights must not all be zero".to_owned(),
            });
        }
        if self.fallback.entity_count == 0 {
            return Err(ConfigError::Invalid {
                reason: "fallback.entity_count must be at least 1".to_owned(),
            });
        }
        Ok(())
    }
}

/// Live transport configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransportConfig {
    /// Server address (a NATS URL for the bundled connector).
    #[serde(default = "default_url")]
    pub url: String,

    /// Subject namespace for inbound events and outbound requests.
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,

    /// Upper bound on a single connection attempt.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Retries after the first failed attempt before falling back.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,

    /// Fixed delay between attempts.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl TransportConfig {
    /// Override the URL with `NETSYNC_URL` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(URL_ENV) {
            self.url = val;
        }
    }

    /// Connection attempt timeout as a [`Duration`].
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Delay between attempts as a [`Duration`].
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            subject_prefix: default_subject_prefix(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

/// Synthetic fallback feed configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FallbackConfig {
    /// Whether to run the synthetic feed when the transport is unreachable.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Milliseconds between synthetic updates.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Seed for the synthetic feed.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Number of entities in the synthetic graph.
    #[serde(default = "default_entity_count")]
    pub entity_count: u32,

    /// Relative frequency of each synthetic update kind.
    #[serde(default)]
    pub weights: FallbackWeights,
}

impl FallbackConfig {
    /// Tick interval as a [`Duration`].
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_ms: default_tick_interval_ms(),
            seed: default_seed(),
            entity_count: default_entity_count(),
            weights: FallbackWeights::default(),
        }
    }
}

/// Integer weights selecting the kind of each synthetic update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct FallbackWeights {
    /// Weight of metrics updates.
    #[serde(default = "default_metrics_weight")]
    pub metrics: u32,

    /// Weight of node-attribute deltas.
    #[serde(default = "default_node_delta_weight")]
    pub node_delta: u32,

    /// Weight of consensus events.
    #[serde(default = "default_consensus_weight")]
    pub consensus: u32,
}

impl FallbackWeights {
    /// Sum of all weights (saturating).
    pub const fn total(&self) -> u32 {
        self.metrics
            .saturating_add(self.node_delta)
            .saturating_add(self.consensus)
    }
}

impl Default for FallbackWeights {
    fn default() -> Self {
        Self {
            metrics: default_metrics_weight(),
            node_delta: default_node_delta_weight(),
            consensus: default_consensus_weight(),
        }
    }
}

/// Consensus delivery configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConsensusConfig {
    /// Pause between successive consensus notifications.
    #[serde(default = "default_pacing_interval_ms")]
    pub pacing_interval_ms: u64,

    /// Delivered rounds kept per entity for history queries.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl ConsensusConfig {
    /// Pacing interval as a [`Duration`].
    pub const fn pacing_interval(&self) -> Duration {
        Duration::from_millis(self.pacing_interval_ms)
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            pacing_interval_ms: default_pacing_interval_ms(),
            history_limit: default_history_limit(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,

    /// Seconds between mirror summaries in the client (0 disables them).
    #[serde(default = "default_summary_interval_secs")]
    pub summary_interval_secs: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            summary_interval_secs: default_summary_interval_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_url() -> String {
    "nats://localhost:4222".to_owned()
}

fn default_subject_prefix() -> String {
    "netsync".to_owned()
}

const fn default_connect_timeout_ms() -> u64 {
    5000
}

const fn default_reconnect_attempts() -> u32 {
    5
}

const fn default_reconnect_delay_ms() -> u64 {
    1000
}

const fn default_true() -> bool {
    true
}

const fn default_tick_interval_ms() -> u64 {
    2000
}

const fn default_seed() -> u64 {
    42
}

const fn default_entity_count() -> u32 {
    6
}

const fn default_metrics_weight() -> u32 {
    3
}

const fn default_node_delta_weight() -> u32 {
    5
}

const fn default_consensus_weight() -> u32 {
    2
}

const fn default_pacing_interval_ms() -> u64 {
    500
}

const fn default_history_limit() -> usize {
    50
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_summary_interval_secs() -> u64 {
    30
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn shipped_config_matches_defaults() {
        let config = SyncConfig::parse(include_str!("../../../netsync-config.yaml")).unwrap();
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn empty_yaml_yields_defaults() {
        let config = SyncConfig::parse("").unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.transport.url, "nats://localhost:4222");
        assert_eq!(config.transport.reconnect_attempts, 5);
        assert_eq!(config.consensus.pacing_interval(), Duration::from_millis(500));
        assert!(config.fallback.enabled);
    }

    #[test]
    fn partial_yaml_overrides_only_named_fields() {
        let yaml = r"
transport:
  url: nats://mirror.example:4222
  reconnect_attempts: 2
fallback:
  seed: 7
  weights:
    consensus: 10
consensus:
  pacing_interval_ms: 250
";
        let config = SyncConfig::parse(yaml).unwrap();
        assert_eq!(config.transport.url, "nats://mirror.example:4222");
        assert_eq!(config.transport.reconnect_attempts, 2);
        assert_eq!(config.transport.reconnect_delay_ms, 1000);
        assert_eq!(config.fallback.seed, 7);
        assert_eq!(config.fallback.weights.consensus, 10);
        assert_eq!(config.fallback.weights.metrics, 3);
        assert_eq!(config.consensus.pacing_interval_ms, 250);
    }

    #[test]
    fn zero_pacing_is_rejected() {
        let err = SyncConfig::parse("consensus:\n  pacing_interval_ms: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn all_zero_weights_are_rejected() {
        let yaml = "fallback:\n  weights:\n    metrics: 0\n    node_delta: 0\n    consensus: 0\n";
        let err = SyncConfig::parse(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn invalid_yaml_is_a_yaml_error() {
        let err = SyncConfig::parse("transport: [unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml { .. }));
    }
}
