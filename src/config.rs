//! Bridge configuration.
//!
//! Every setting is a CLI flag with an environment fallback, so the same
//! value can come from `--default-timeout 900` or `DEFAULT_TIMEOUT=900`.
//! The parsed value is passed explicitly into the client and bridge
//! constructors.
//!
//! ```bash
//! COMFYUI_SERVER_HOST=10.0.0.4 DEFAULT_TIMEOUT=900 ./bridge_server
//! ```

use std::time::Duration;

use clap::Parser;

/// Configuration for the engine client, the completion poller and the
/// optional HTTP surface.
#[derive(Debug, Clone, Parser)]
#[command(name = "bridge_server")]
#[command(about = "Synchronous submit-and-wait bridge for ComfyUI")]
pub struct BridgeConfig {
    /// Host of the ComfyUI engine
    #[arg(long, default_value = "127.0.0.1", env = "COMFYUI_SERVER_HOST")]
    pub engine_host: String,

    /// Port of the ComfyUI engine
    #[arg(long, default_value = "8188", env = "COMFYUI_SERVER_PORT")]
    pub engine_port: u16,

    // === Waiting ===
    /// Job deadline in seconds when the caller gives none
    #[arg(long = "default-timeout", default_value = "600", env = "DEFAULT_TIMEOUT")]
    pub default_timeout_secs: u64,

    /// Fixed delay between completion checks, in milliseconds
    #[arg(long = "poll-interval-ms", default_value = "1000", env = "POLL_INTERVAL_MS")]
    pub poll_interval_ms: u64,

    /// Extra result fetches after the job leaves the queue without a result
    #[arg(long = "settle-rechecks", default_value = "2", env = "SETTLE_RECHECKS")]
    pub settle_rechecks: u32,

    /// Delay between settle re-checks, in milliseconds
    #[arg(long = "settle-delay-ms", default_value = "100", env = "SETTLE_DELAY_MS")]
    pub settle_delay_ms: u64,

    // === Remote calls ===
    /// Per-call timeout for requests to the engine, in seconds
    #[arg(long = "request-timeout", default_value = "30", env = "REQUEST_TIMEOUT")]
    pub request_timeout_secs: u64,

    /// Retries for idempotent reads (queue, history, view)
    #[arg(long = "read-retries", default_value = "2", env = "READ_RETRIES")]
    pub read_retries: u32,

    // === Readiness ===
    /// Health probes before giving up on an engine that is still starting
    #[arg(long = "startup-probe-attempts", default_value = "60", env = "STARTUP_PROBE_ATTEMPTS")]
    pub startup_probe_attempts: u32,

    /// Seconds between readiness probes
    #[arg(long = "startup-probe-interval", default_value = "5", env = "STARTUP_PROBE_INTERVAL")]
    pub startup_probe_interval_secs: u64,

    // === HTTP surface ===
    /// Host/IP the bridge server listens on
    #[arg(long, default_value = "0.0.0.0", env = "SERVER_HOST")]
    pub server_host: String,

    /// Port the bridge server listens on
    #[arg(long, default_value = "18188", env = "SERVER_PORT")]
    pub server_port: u16,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    pub log_level: String,
}

impl BridgeConfig {
    /// `host:port` of the engine, as reported by health checks.
    pub fn engine_address(&self) -> String {
        format!("{}:{}", self.engine_host, self.engine_port)
    }

    /// Base URL for engine requests.
    pub fn engine_base_url(&self) -> String {
        format!("http://{}", self.engine_address())
    }

    /// `host:port` the bridge server binds to.
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn startup_probe_interval(&self) -> Duration {
        Duration::from_secs(self.startup_probe_interval_secs)
    }

    /// Reject values the poller cannot work with.
    pub fn validate(&self) -> Result<(), String> {
        if self.engine_host.trim().is_empty() {
            return Err("Engine host must not be empty".to_string());
        }
        if self.default_timeout_secs == 0 {
            return Err("Default timeout must be > 0".to_string());
        }
        if self.poll_interval_ms == 0 {
            return Err("Poll interval must be > 0".to_string());
        }
        if self.request_timeout_secs == 0 {
            return Err("Request timeout must be > 0".to_string());
        }
        if self.startup_probe_attempts == 0 {
            return Err("Startup probe attempts must be >= 1".to_string());
        }
        if self.settle_rechecks > 5 {
            return Err("Settle rechecks must be 0-5".to_string());
        }
        Ok(())
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            engine_host: "127.0.0.1".to_string(),
            engine_port: 8188,
            default_timeout_secs: 600,
            poll_interval_ms: 1_000,
            settle_rechecks: 2,
            settle_delay_ms: 100,
            request_timeout_secs: 30,
            read_retries: 2,
            startup_probe_attempts: 60,
            startup_probe_interval_secs: 5,
            server_host: "0.0.0.0".to_string(),
            server_port: 18188,
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.engine_address(), "127.0.0.1:8188");
        assert_eq!(config.engine_base_url(), "http://127.0.0.1:8188");
        assert_eq!(config.server_address(), "0.0.0.0:18188");
        assert_eq!(config.default_timeout(), Duration::from_secs(600));
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_matches_default() {
        let parsed = BridgeConfig::try_parse_from(["bridge_server"]).unwrap();
        let default = BridgeConfig::default();
        // Env vars may be set on CI; only compare fields nobody overrides there.
        assert_eq!(parsed.settle_rechecks, default.settle_rechecks);
        assert_eq!(parsed.read_retries, default.read_retries);
    }

    #[test]
    fn test_parse_flags() {
        let parsed = BridgeConfig::try_parse_from([
            "bridge_server",
            "--engine-host",
            "10.0.0.4",
            "--engine-port",
            "9000",
            "--default-timeout",
            "30",
            "--poll-interval-ms",
            "250",
        ])
        .unwrap();
        assert_eq!(parsed.engine_address(), "10.0.0.4:9000");
        assert_eq!(parsed.default_timeout(), Duration::from_secs(30));
        assert_eq!(parsed.poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = BridgeConfig::default();
        config.default_timeout_secs = 0;
        assert!(config.validate().unwrap_err().contains("Default timeout"));
    }

    #[test]
    fn test_validate_zero_poll_interval() {
        let mut config = BridgeConfig::default();
        config.poll_interval_ms = 0;
        assert!(config.validate().unwrap_err().contains("Poll interval"));
    }

    #[test]
    fn test_validate_probe_attempts() {
        let mut config = BridgeConfig::default();
        config.startup_probe_attempts = 0;
        assert!(config.validate().unwrap_err().contains("Startup probe"));
    }

    #[test]
    fn test_validate_settle_rechecks_bound() {
        let mut config = BridgeConfig::default();
        config.settle_rechecks = 5;
        assert!(config.validate().is_ok());
        config.settle_rechecks = 6;
        assert!(config.validate().unwrap_err().contains("Settle rechecks"));
    }

    #[test]
    fn test_validate_empty_host() {
        let mut config = BridgeConfig::default();
        config.engine_host = "  ".to_string();
        assert!(config.validate().is_err());
    }
}
