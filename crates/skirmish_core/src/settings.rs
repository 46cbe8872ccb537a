//! Lockstep tuning loaded from RON.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GameError, Result};

/// Default number of frames between issuing an order and applying it.
pub const DEFAULT_ORDER_LATENCY: u32 = 3;

/// Default simulation timestep in milliseconds.
pub const DEFAULT_TIMESTEP_MS: u32 = 40;

/// Settings shared by the world and the order manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockstepSettings {
    /// Frames of lookahead applied to locally issued orders.
    pub order_latency: u32,
    /// Wall-clock duration of one frame.
    pub timestep_ms: u32,
    /// Keep per-frame sync reports for desync post-mortems.
    pub sync_reports: bool,
    /// Where to write the sync report when a desync is detected.
    pub sync_report_dir: Option<PathBuf>,
}

impl Default for LockstepSettings {
    fn default() -> Self {
        Self {
            order_latency: DEFAULT_ORDER_LATENCY,
            timestep_ms: DEFAULT_TIMESTEP_MS,
            sync_reports: true,
            sync_report_dir: None,
        }
    }
}

impl LockstepSettings {
    /// Parse settings from a RON string.
    pub fn from_ron(source: &str) -> Result<Self> {
        let settings: Self = ron::from_str(source).map_err(|e| GameError::DataParseError {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a RON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let settings: Self = ron::from_str(&contents).map_err(|e| GameError::DataParseError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the lockstep barrier cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.order_latency == 0 {
            return Err(GameError::InvalidState(
                "order_latency must be at least one frame".to_string(),
            ));
        }
        if self.timestep_ms == 0 {
            return Err(GameError::InvalidState(
                "timestep_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = LockstepSettings::default();
        assert_eq!(settings.order_latency, 3);
        assert_eq!(settings.timestep_ms, 40);
        assert!(settings.sync_reports);
    }

    #[test]
    fn test_partial_ron_uses_defaults() {
        let settings = LockstepSettings::from_ron("(order_latency: 5)").unwrap();
        assert_eq!(settings.order_latency, 5);
        assert_eq!(settings.timestep_ms, DEFAULT_TIMESTEP_MS);
    }

    #[test]
    fn test_zero_latency_rejected() {
        assert!(matches!(
            LockstepSettings::from_ron("(order_latency: 0)"),
            Err(GameError::InvalidState(_))
        ));
    }

    #[test]
    fn test_malformed_ron() {
        assert!(matches!(
            LockstepSettings::from_ron("(order_latency: \"three\")"),
            Err(GameError::DataParseError { .. })
        ));
    }
}
