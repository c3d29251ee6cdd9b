//! Command-line client for the netsync network mirror.
//!
//! Connects to the configured NATS publisher (or falls back to the
//! synthetic feed), logs every update that reaches the bus, and prints a
//! periodic summary of the mirrored graph.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `netsync-config.yaml` (or `NETSYNC_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Build the sync engine over the NATS connector
//! 4. Attach logging handlers for every bus topic and paced consensus
//! 5. Connect and report the resulting mode
//! 6. Log mirror summaries until Ctrl-C, then disconnect and shut down

mod error;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use netsync_core::config::{LoggingConfig, SyncConfig};
use netsync_core::dispatcher::{BusEvent, EventKind};
use netsync_core::engine::SyncEngine;
use netsync_core::nats::NatsConnector;
use netsync_types::ConsensusEvent;
use tokio::time::Interval;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::ClientError;

/// Environment variable naming the config file.
const CONFIG_ENV: &str = "NETSYNC_CONFIG";

/// Config file read when `NETSYNC_CONFIG` is unset.
const DEFAULT_CONFIG_PATH: &str = "netsync-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration or logging cannot be set up, or if
/// the shutdown signal cannot be awaited.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, source) = load_config()?;
    init_tracing(&config.logging)?;
    info!(
        source = %source,
        url = config.transport.url,
        subject_prefix = config.transport.subject_prefix,
        fallback = config.fallback.enabled,
        "netsync-client starting"
    );

    let connector = NatsConnector::from_config(&config.transport);
    let summary_secs = config.logging.summary_interval_secs;
    let engine = SyncEngine::new(config, connector);

    for kind in EventKind::ALL {
        engine.on(kind, |event| {
            log_event(event);
            Ok(())
        });
    }
    engine.on_consensus_event(|event| {
        log_consensus(event);
        Ok(())
    });

    let state = engine.connect_configured().await;
    info!(state = %state, "connection settled");

    let mut summary = (summary_secs > 0).then(|| {
        let mut interval = tokio::time::interval(Duration::from_secs(summary_secs));
        interval.reset();
        interval
    });

    loop {
        tokio::select! {
            () = next_summary(&mut summary) => log_summary(&engine),
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(ClientError::from)?;
                info!("interrupt received, shutting down");
                break;
            }
        }
    }

    engine.disconnect();
    engine.shutdown();
    log_summary(&engine);
    Ok(())
}

/// Where the configuration came from.
enum ConfigSource {
    File(PathBuf),
    Defaults(PathBuf),
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Defaults(path) => write!(f, "defaults ({} not found)", path.display()),
        }
    }
}

/// Load the config file, or defaults when it does not exist.
///
/// `NETSYNC_URL` applies either way.
fn load_config() -> anyhow::Result<(SyncConfig, ConfigSource)> {
    let path = std::env::var_os(CONFIG_ENV)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    if path.exists() {
        let config = SyncConfig::from_file(&path)
            .map_err(ClientError::from)
            .with_context(|| format!("loading {}", path.display()))?;
        Ok((config, ConfigSource::File(path)))
    } else {
        let mut config = SyncConfig::default();
        config.transport.apply_env_overrides();
        Ok((config, ConfigSource::Defaults(path)))
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `logging.level`.
fn init_tracing(logging: &LoggingConfig) -> Result<(), ClientError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .map_err(|e| ClientError::Logging {
            message: format!("invalid log filter: {e}"),
        })?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| ClientError::Logging {
        message: e.to_string(),
    })
}

async fn next_summary(summary: &mut Option<Interval>) {
    match summary {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn log_event(event: &BusEvent) {
    match event {
        BusEvent::Connect(mode) => info!(mode = ?mode, "connected"),
        BusEvent::Disconnect(reason) => info!(reason = ?reason, "disconnected"),
        BusEvent::Error(message) => warn!(error = %message, "transport error"),
        BusEvent::State(state) => info!(
            version = state.version,
            nodes = state.nodes.len(),
            channels = state.channels.len(),
            "full state"
        ),
        BusEvent::Delta(delta) => info!(
            added_nodes = delta.added_nodes.len(),
            updated_nodes = delta.updated_nodes.len(),
            removed_nodes = delta.removed_nodes.len(),
            added_channels = delta.added_channels.len(),
            updated_channels = delta.updated_channels.len(),
            removed_channels = delta.removed_channels.len(),
            "delta"
        ),
        BusEvent::Metrics(metrics) => info!(
            entities = metrics.entity_count,
            channels = metrics.channel_count,
            tvl = %metrics.total_value_locked,
            health = metrics.health_score,
            "metrics"
        ),
        BusEvent::Consensus(_) => {}
        BusEvent::Swap(change, swap) => info!(
            change = ?change,
            swap_id = swap.id,
            source = %swap.source_entity,
            target = %swap.target_entity,
            status = ?swap.status,
            "swap"
        ),
    }
}

fn log_consensus(event: &ConsensusEvent) {
    info!(
        entity_id = %event.entity_id,
        round = event.round,
        consensus_type = ?event.consensus_type,
        success = event.success,
        duration_ms = event.duration,
        "consensus round"
    );
}

fn log_summary(engine: &SyncEngine<NatsConnector>) {
    let reader = engine.reader();
    let stats = engine.stats();
    info!(
        state = %engine.connection_state(),
        version = reader.version(),
        nodes = reader.node_count(),
        channels = reader.channel_count(),
        frames = stats.frames_received,
        malformed = stats.malformed_frames,
        stale_states = stats.stale_states,
        ignored_items = stats.ignored_items,
        handler_failures = stats.handler_failures,
        consensus_delivered = stats.consensus_delivered,
        pending_consensus = engine.pending_consensus(),
        fallback_ticks = stats.fallback_ticks,
        "mirror summary"
    );
}
