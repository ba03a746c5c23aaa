//! # Dispatch Configuration
//!
//! Every tunable of the dispatch core in one serde struct (camelCase on the
//! wire, every field defaulted), plus `Duration` accessors.
//!
//! With the `configs` feature the struct can also be layered from a JSON5
//! file and `DISPATCH_*` environment variables (`.env` is honoured).

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchConfig {
    /// Raw service address as entered by the user; normalized before use.
    pub service_address: String,
    /// Ceiling on concurrently running jobs. `0` is unbounded.
    pub max_concurrency: usize,
    pub health_ttl_ms: u64,
    pub health_timeout_ms: u64,
    pub preflight_timeout_ms: u64,
    pub warmup_ttl_ms: u64,
    pub warmup_enabled: bool,
    pub ws_open_timeout_ms: u64,
    /// Retries after the first open attempt.
    pub ws_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub backoff_jitter_ms: u64,
    /// Route jobs through REST until the first delivery succeeds.
    pub cold_start_rest: bool,
    /// Retries after the first connect/send attempt of a job.
    pub job_retries: u32,
    pub job_retry_gap_ms: u64,
    pub poll_interval_ms: u64,
    pub poll_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub result_cache_ttl_ms: u64,
    pub result_cache_max: usize,
    pub asset_cache_ttl_ms: u64,
    pub asset_cache_max: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            service_address: "http://localhost:8080".to_string(),
            max_concurrency: 0,
            health_ttl_ms: 5_000,
            health_timeout_ms: 5_000,
            preflight_timeout_ms: 10_000,
            warmup_ttl_ms: 600_000,
            warmup_enabled: true,
            ws_open_timeout_ms: 20_000,
            ws_retries: 6,
            backoff_base_ms: 500,
            backoff_cap_ms: 5_000,
            backoff_jitter_ms: 300,
            cold_start_rest: true,
            job_retries: 2,
            job_retry_gap_ms: 3_000,
            poll_interval_ms: 800,
            poll_timeout_ms: 180_000,
            request_timeout_ms: 30_000,
            result_cache_ttl_ms: 600_000,
            result_cache_max: 200,
            asset_cache_ttl_ms: 1_800_000,
            asset_cache_max: 64,
        }
    }
}

impl DispatchConfig {
    pub fn health_ttl(&self) -> Duration {
        Duration::from_millis(self.health_ttl_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn preflight_timeout(&self) -> Duration {
        Duration::from_millis(self.preflight_timeout_ms)
    }

    pub fn warmup_ttl(&self) -> Duration {
        Duration::from_millis(self.warmup_ttl_ms)
    }

    pub fn ws_open_timeout(&self) -> Duration {
        Duration::from_millis(self.ws_open_timeout_ms)
    }

    pub fn job_retry_gap(&self) -> Duration {
        Duration::from_millis(self.job_retry_gap_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn result_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.result_cache_ttl_ms)
    }

    pub fn asset_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.asset_cache_ttl_ms)
    }
}

#[cfg(feature = "configs")]
mod layered {
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::str::FromStr;

    use thiserror::Error;

    use super::DispatchConfig;

    /// Prefix of every environment override, e.g. `DISPATCH_WS_RETRIES`.
    pub const ENV_PREFIX: &str = "DISPATCH_";

    #[derive(Debug, Error)]
    pub enum ConfigError {
        #[error("Failed to read config file {path}: {source}")]
        Io {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },

        #[error("Failed to parse config: {0}")]
        Parse(String),

        #[error("Invalid value {value:?} for {key}")]
        InvalidValue { key: String, value: String },
    }

    fn parse_var<T: FromStr>(
        lookup: &impl Fn(&str) -> Option<String>,
        name: &str,
    ) -> Result<Option<T>, ConfigError> {
        let key = format!("{}{}", ENV_PREFIX, name);
        match lookup(&key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        }
    }

    impl DispatchConfig {
        /// Parses a JSON5 document; missing fields keep their defaults.
        pub fn from_json5_str(raw: &str) -> Result<Self, ConfigError> {
            serde_json5::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
        }

        pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
            let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            Self::from_json5_str(&raw)
        }

        /// Defaults, then the file at `path` (if it exists), then the environment.
        pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
            if let Err(e) = dotenvy::dotenv() {
                log::debug!("No .env loaded: {}", e);
            }

            let mut config = match path {
                Some(p) if p.exists() => Self::from_file(p)?,
                Some(p) => {
                    log::info!("Config file not found at {}. Using defaults and environment.", p.display());
                    Self::default()
                }
                None => Self::default(),
            };
            config.apply_overrides(|key| std::env::var(key).ok())?;
            Ok(config)
        }

        /// Applies `DISPATCH_*` overrides read through `lookup`.
        pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
            if let Some(v) = parse_var::<String>(&lookup, "SERVICE_ADDRESS")? {
                self.service_address = v;
            }
            if let Some(v) = parse_var(&lookup, "MAX_CONCURRENCY")? {
                self.max_concurrency = v;
            }
            if let Some(v) = parse_var(&lookup, "HEALTH_TTL_MS")? {
                self.health_ttl_ms = v;
            }
            if let Some(v) = parse_var(&lookup, "HEALTH_TIMEOUT_MS")? {
                self.health_timeout_ms = v;
            }
            if let Some(v) = parse_var(&lookup, "PREFLIGHT_TIMEOUT_MS")? {
                self.preflight_timeout_ms = v;
            }
            if let Some(v) = parse_var(&lookup, "WARMUP_TTL_MS")? {
                self.warmup_ttl_ms = v;
            }
            if let Some(v) = parse_var(&lookup, "WARMUP_ENABLED")? {
                self.warmup_enabled = v;
            }
            if let Some(v) = parse_var(&lookup, "WS_OPEN_TIMEOUT_MS")? {
                self.ws_open_timeout_ms = v;
            }
            if let Some(v) = parse_var(&lookup, "WS_RETRIES")? {
                self.ws_retries = v;
            }
            if let Some(v) = parse_var(&lookup, "COLD_START_REST")? {
                self.cold_start_rest = v;
            }
            if let Some(v) = parse_var(&lookup, "JOB_RETRIES")? {
                self.job_retries = v;
            }
            if let Some(v) = parse_var(&lookup, "POLL_INTERVAL_MS")? {
                self.poll_interval_ms = v;
            }
            if let Some(v) = parse_var(&lookup, "POLL_TIMEOUT_MS")? {
                self.poll_timeout_ms = v;
            }
            if let Some(v) = parse_var(&lookup, "REQUEST_TIMEOUT_MS")? {
                self.request_timeout_ms = v;
            }
            Ok(())
        }
    }
}

#[cfg(feature = "configs")]
pub use layered::{ConfigError, ENV_PREFIX};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = DispatchConfig::default();
        assert_eq!(config.health_ttl(), Duration::from_secs(5));
        assert_eq!(config.preflight_timeout(), Duration::from_secs(10));
        assert_eq!(config.ws_open_timeout(), Duration::from_secs(20));
        assert_eq!(config.ws_retries, 6);
        assert_eq!(config.job_retries, 2);
        assert_eq!(config.poll_timeout(), Duration::from_secs(180));
        assert_eq!(config.max_concurrency, 0);
    }

    #[test]
    fn camel_case_with_defaults_for_missing_fields() {
        let config: DispatchConfig =
            serde_json::from_str(r#"{"serviceAddress":"https://svc.example","wsRetries":1}"#).unwrap();
        assert_eq!(config.service_address, "https://svc.example");
        assert_eq!(config.ws_retries, 1);
        assert_eq!(config.poll_interval_ms, 800);
    }

    #[cfg(feature = "configs")]
    mod layered_tests {
        use super::super::*;
        use std::collections::HashMap;
        use std::io::Write;

        #[test]
        fn json5_file_allows_comments() {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            writeln!(file, "{{\n  // local dev box\n  serviceAddress: '0.0.0.0:9000',\n  maxConcurrency: 4,\n}}").unwrap();
            let config = DispatchConfig::from_file(file.path()).unwrap();
            assert_eq!(config.service_address, "0.0.0.0:9000");
            assert_eq!(config.max_concurrency, 4);
        }

        #[test]
        fn env_overrides_file_values() {
            let env: HashMap<&str, &str> = HashMap::from([
                ("DISPATCH_SERVICE_ADDRESS", "http://10.0.0.2:8080"),
                ("DISPATCH_WS_RETRIES", "3"),
                ("DISPATCH_WARMUP_ENABLED", "false"),
                ("DISPATCH_COLD_START_REST", "false"),
            ]);
            let mut config = DispatchConfig::default();
            config
                .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
                .unwrap();
            assert_eq!(config.service_address, "http://10.0.0.2:8080");
            assert_eq!(config.ws_retries, 3);
            assert!(!config.warmup_enabled);
            assert!(!config.cold_start_rest);
        }

        #[test]
        fn bad_env_value_is_reported() {
            let mut config = DispatchConfig::default();
            let err = config
                .apply_overrides(|k| (k == "DISPATCH_JOB_RETRIES").then(|| "many".to_string()))
                .unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "DISPATCH_JOB_RETRIES"));
        }

        #[test]
        fn missing_file_is_an_io_error() {
            let err = DispatchConfig::from_file(std::path::Path::new("/nonexistent/dispatch.json5")).unwrap_err();
            assert!(matches!(err, ConfigError::Io { .. }));
        }
    }
}
