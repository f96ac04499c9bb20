//! # Configuration
//!
//! One TOML document, one table per component. Every field is optional;
//! missing fields keep their defaults.
//!
//! ```toml
//! [connection]
//! heartbeat_interval_ms = 1000
//! max_reconnect_attempts = 5
//!
//! [transport.kinds.placeBomb]
//! priority = 0
//!
//! [prediction]
//! divergence_tolerance = 0.5
//! ```

use serde::{Deserialize, Serialize};

use crate::connection::ConnectionConfig;
use crate::error::ConfigError;
use crate::prediction::PredictionConfig;
use crate::protocol::CodecConfig;
use crate::transport::TransportConfig;

/// Configuration of the whole synchronization core.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Channel supervision.
    pub connection: ConnectionConfig,
    /// Outgoing scheduling.
    pub transport: TransportConfig,
    /// Prediction and reconciliation.
    pub prediction: PredictionConfig,
    /// Delta codec.
    pub codec: CodecConfig,
}

impl SyncConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for bad TOML or unknown value types,
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(document: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(document).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Renders the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Short timings for a server on the same machine.
    #[must_use]
    pub fn local() -> Self {
        Self {
            connection: ConnectionConfig::local(),
            ..Self::default()
        }
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, why: &str| Err(ConfigError::Invalid(format!("{field} {why}")));

        let c = &self.connection;
        if c.heartbeat_interval_ms == 0 {
            return invalid("connection.heartbeat_interval_ms", "must be positive");
        }
        if c.heartbeat_timeout_ms == 0 {
            return invalid("connection.heartbeat_timeout_ms", "must be positive");
        }
        if c.connect_timeout_ms == 0 {
            return invalid("connection.connect_timeout_ms", "must be positive");
        }
        if c.reconnect_base_delay_ms == 0 {
            return invalid("connection.reconnect_base_delay_ms", "must be positive");
        }
        if c.max_offline_queue == 0 {
            return invalid("connection.max_offline_queue", "must be positive");
        }

        let t = &self.transport;
        if t.max_batch_size == 0 {
            return invalid("transport.max_batch_size", "must be positive");
        }
        if t.batch_idle_ms == 0 || t.batch_max_delay_ms == 0 {
            return invalid("transport.batch_idle_ms/batch_max_delay_ms", "must be positive");
        }
        if t.batch_max_delay_ms < t.batch_idle_ms {
            return invalid("transport.batch_max_delay_ms", "must be at least batch_idle_ms");
        }

        let p = &self.prediction;
        if !p.divergence_tolerance.is_finite() || p.divergence_tolerance < 0.0 {
            return invalid("prediction.divergence_tolerance", "must be finite and >= 0");
        }
        if p.pending_timeout_ms == 0 {
            return invalid("prediction.pending_timeout_ms", "must be positive");
        }
        if !(p.movement.step > 0.0 && p.movement.width >= 0.0 && p.movement.height >= 0.0) {
            return invalid("prediction.movement", "needs a positive step and non-negative bounds");
        }

        if self.codec.max_desync_before_fatal == 0 {
            return invalid("codec.max_desync_before_fatal", "must be positive");
        }
        if self.codec.full_state_retry_deltas == 0 {
            return invalid("codec.full_state_retry_deltas", "must be positive");
        }

        Ok(())
    }
}
