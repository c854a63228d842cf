//! Market configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MarketError, Result};

/// Configuration shared by a market and every session it creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Delay between the end of one entitlement check and the start of the next.
    pub revalidate_interval_ms: u64,
    /// Replicate feeds in live mode.
    pub live: bool,
    /// Capacity of each session's event channel.
    ///
    /// A full channel stalls only the session that owns it, and only until
    /// its transport closes.
    pub event_buffer: usize,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            revalidate_interval_ms: 1000,
            live: true,
            event_buffer: 64,
        }
    }
}

impl MarketConfig {
    /// Parse and validate a JSON config. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| MarketError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.revalidate_interval_ms == 0 {
            return Err(MarketError::Config(
                "revalidate_interval_ms must be positive".into(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(MarketError::Config("event_buffer must be positive".into()));
        }
        Ok(())
    }

    /// The revalidation interval as a `Duration`.
    pub fn revalidate_interval(&self) -> Duration {
        Duration::from_millis(self.revalidate_interval_ms)
    }

    /// Builder-style override of the revalidation interval, in whole
    /// milliseconds. Saturates at `u64::MAX` ms.
    pub fn with_revalidate_interval(mut self, interval: Duration) -> Self {
        self.revalidate_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MarketConfig::default();
        assert_eq!(config.revalidate_interval(), Duration::from_secs(1));
        assert!(config.live);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = MarketConfig::from_json(r#"{"revalidate_interval_ms": 250}"#).unwrap();
        assert_eq!(config.revalidate_interval(), Duration::from_millis(250));
        assert!(config.live);
        assert_eq!(config.event_buffer, 64);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = MarketConfig::from_json(r#"{"revalidate_interval_ms": 0}"#).unwrap_err();
        assert!(matches!(err, MarketError::Config(_)));
    }

    #[test]
    fn test_interval_override() {
        let config = MarketConfig::default().with_revalidate_interval(Duration::from_millis(40));
        assert_eq!(config.revalidate_interval_ms, 40);

        let huge = MarketConfig::default().with_revalidate_interval(Duration::MAX);
        assert_eq!(huge.revalidate_interval_ms, u64::MAX);
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(matches!(
            MarketConfig::from_json("{live: yes}"),
            Err(MarketError::Config(_))
        ));
    }
}
