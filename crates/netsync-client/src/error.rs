//! Error types for the client binary.

/// Top-level error for the client binary.
///
/// Nothing inside the engine is fatal; these are the startup and shutdown
/// failures `main` propagates with `?`.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: netsync_core::config::ConfigError,
    },

    /// The log filter or subscriber could not be installed.
    #[error("logging error: {message}")]
    Logging {
        /// Description of the logging failure.
        message: String,
    },

    /// Waiting for the shutdown signal failed.
    #[error("signal error: {source}")]
    Signal {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}
