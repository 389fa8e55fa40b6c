//! Engine Configuration
//!
//! Knobs that bound the scheduler. Configuration is plain data so hosts can
//! keep it next to the rest of their settings and load it with serde.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Configuration for a [`Runtime`](crate::reactive::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on fixed-point passes within one tick. A tick that
    /// still has dirty nodes after this many passes fails with
    /// [`EngineError::Unsettled`].
    pub max_passes_per_tick: usize,

    /// Emit a debug-level summary line after every tick.
    pub log_ticks: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_passes_per_tick: 32,
            log_ticks: true,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(EngineError::body)?;
        Ok(config.normalized())
    }

    /// Set the pass bound.
    pub fn with_max_passes(mut self, passes: usize) -> Self {
        self.max_passes_per_tick = passes;
        self.normalized()
    }

    // A bound of zero would make every tick fail before running anything.
    fn normalized(mut self) -> Self {
        self.max_passes_per_tick = self.max_passes_per_tick.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = EngineConfig::from_json(r#"{ "log_ticks": false }"#).unwrap();
        assert_eq!(config.max_passes_per_tick, 32);
        assert!(!config.log_ticks);
    }

    #[test]
    fn zero_passes_is_clamped() {
        let config = EngineConfig::from_json(r#"{ "max_passes_per_tick": 0 }"#).unwrap();
        assert_eq!(config.max_passes_per_tick, 1);
        assert_eq!(EngineConfig::default().with_max_passes(0).max_passes_per_tick, 1);
    }

    #[test]
    fn malformed_json_is_a_body_error() {
        let err = EngineConfig::from_json("{ nope").unwrap_err();
        assert!(err.is_body());
    }
}
