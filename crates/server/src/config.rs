//! Server configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default `127.0.0.1`)
/// - `PORT`: listen port (default `8080`)
/// - `DATA_DIR`: directory holding the JSON collections (default `./data`)
/// - `SWEEP_INTERVAL_SECS`: how often pending orders are checked (default `60`)
/// - `MAX_FRAME_BYTES`: longest accepted request line (default 1 MiB)
/// - `METRICS_PORT`: Prometheus exporter port, disabled when unset
/// - `RUST_LOG`: tracing filter directive (default `info`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub sweep_interval_secs: u64,
    pub max_frame_bytes: usize,
    pub metrics_port: Option<u16>,
    pub log_level: String,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup. Unparseable
    /// values fall back to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            data_dir: lookup("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            sweep_interval_secs: lookup("SWEEP_INTERVAL_SECS")
                .and_then(|s| s.parse().ok())
                .filter(|s| *s > 0)
                .unwrap_or(defaults.sweep_interval_secs),
            max_frame_bytes: lookup("MAX_FRAME_BYTES")
                .and_then(|s| s.parse().ok())
                .filter(|s| *s > 0)
                .unwrap_or(defaults.max_frame_bytes),
            metrics_port: lookup("METRICS_PORT").and_then(|p| p.parse().ok()),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the Prometheus listener address if an exporter port is set.
    pub fn metrics_addr(&self) -> Option<String> {
        self.metrics_port.map(|port| format!("{}:{}", self.host, port))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            metrics_port: None,
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.sweep_interval(), Duration::from_secs(60));
        assert_eq!(config.max_frame_bytes, 1_048_576);
        assert_eq!(config.metrics_addr(), None);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "0.0.0.0".to_string(),
            port: 9000,
            ..Config::default()
        };
        assert_eq!(config.addr(), "0.0.0.0:9000");
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "7000"),
            ("DATA_DIR", "/var/lib/market"),
            ("SWEEP_INTERVAL_SECS", "5"),
            ("METRICS_PORT", "9100"),
        ]));
        assert_eq!(config.addr(), "127.0.0.1:7000");
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/market"));
        assert_eq!(config.sweep_interval(), Duration::from_secs(5));
        assert_eq!(config.metrics_addr().as_deref(), Some("127.0.0.1:9100"));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "not-a-port"),
            ("SWEEP_INTERVAL_SECS", "0"),
            ("MAX_FRAME_BYTES", "-1"),
        ]));
        assert_eq!(config.port, 8080);
        assert_eq!(config.sweep_interval_secs, 60);
        assert_eq!(config.max_frame_bytes, 1_048_576);
    }
}
