//! Add-in Configuration
//!
//! Everything that used to be process-wide mutable state (display name,
//! default category, RTD switch, server timings and placeholder texts) lives
//! in one [`AddinConfig`] value handed to [`Addin`](crate::Addin) at startup.
//! Every field has a default, so a partial JSON document is enough.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Top-level add-in settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddinConfig {
    /// Name shown in the host's add-in manager.
    pub display_name: String,

    /// Category assigned to functions that do not name one.
    pub default_category: String,

    /// Whether the RTD server is offered at all.
    pub enable_rtd: bool,

    /// RTD server settings.
    pub rtd: RtdConfig,
}

impl Default for AddinConfig {
    fn default() -> Self {
        Self {
            display_name: "Default".to_string(),
            default_category: "XLL Functions".to_string(),
            enable_rtd: true,
            rtd: RtdConfig::default(),
        }
    }
}

impl AddinConfig {
    /// Parse a JSON document, filling missing fields with defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// RTD server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtdConfig {
    /// Program id the worksheet-side call passes to the host.
    pub prog_id: String,

    /// Interval the host should use between heartbeat calls.
    pub heartbeat_interval_ms: u64,

    /// Sleep between worker loop cycles.
    pub poll_interval_ms: u64,

    /// How long a stop waits for a task thread to notice cancellation
    /// before the thread is abandoned.
    pub stop_grace_ms: u64,

    /// Placeholder a topic carries from connection until its function
    /// supplies a default.
    pub connect_default: String,

    /// Text published for a topic that has neither a value nor a default.
    pub missing_value_text: String,

    /// Text returned to the cell when the host rejects an RTD call.
    pub call_failure_text: String,
}

impl Default for RtdConfig {
    fn default() -> Self {
        Self {
            prog_id: "rtdserver".to_string(),
            heartbeat_interval_ms: 15_000,
            poll_interval_ms: 1_000,
            stop_grace_ms: 250,
            connect_default: "Default Value".to_string(),
            missing_value_text: "No initial value".to_string(),
            call_failure_text: "RTD service exception".to_string(),
        }
    }
}

impl RtdConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_host_conventions() {
        let config = AddinConfig::default();
        assert_eq!(config.display_name, "Default");
        assert_eq!(config.default_category, "XLL Functions");
        assert!(config.enable_rtd);
        assert_eq!(config.rtd.prog_id, "rtdserver");
        assert_eq!(config.rtd.heartbeat_interval(), Duration::from_secs(15));
        assert_eq!(config.rtd.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = AddinConfig::from_json_str(
            r#"{ "display_name": "Quotes", "rtd": { "poll_interval_ms": 50 } }"#,
        )
        .unwrap();
        assert_eq!(config.display_name, "Quotes");
        assert_eq!(config.default_category, "XLL Functions");
        assert_eq!(config.rtd.poll_interval_ms, 50);
        assert_eq!(config.rtd.heartbeat_interval_ms, 15_000);
    }

    #[test]
    fn invalid_json_is_a_config_error() {
        let err = AddinConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }
}
