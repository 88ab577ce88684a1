use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::features::{Feature, Features, DEFAULT_FEATURES};
use crate::sink::dispatch::FailurePolicy;
use crate::sink::TargetDevice;

/// Top-level configuration for the pumpsync tool.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Pump event feed connection configuration.
    #[serde(default)]
    pub source: SourceConfig,

    /// Tracking service connection configuration.
    #[serde(default)]
    pub destination: DestinationConfig,

    /// The pump to sync.
    #[serde(default)]
    pub device: DeviceConfig,

    /// Enabled features. Default: BASAL, BOLUS, PUMP_EVENTS.
    #[serde(default = "default_features")]
    pub features: Vec<Feature>,

    /// Dry run: read and translate, but write nothing. Default: false.
    #[serde(default)]
    pub pretend: bool,

    /// Behavior when a processor fails. Default: isolate.
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Window length when no explicit start is given. Default: 24h.
    #[serde(default = "default_lookback", with = "humantime_serde")]
    pub lookback: Duration,

    /// Prometheus text-format dump configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Pump event feed connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Feed API base URL.
    #[serde(default)]
    pub endpoint: String,

    /// Bearer token for the feed API.
    #[serde(default)]
    pub access_token: String,

    /// Request timeout. Default: 30s.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Tracking service connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DestinationConfig {
    /// Service base URL.
    #[serde(default)]
    pub url: String,

    /// Access token, sent as the `token` query parameter.
    #[serde(default)]
    pub token: String,

    /// Request timeout. Default: 30s.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Value written to `enteredBy` on treatments. Default: "pumpsync".
    #[serde(default = "default_entered_by")]
    pub entered_by: String,
}

/// The pump to sync.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub device_id: String,

    /// Newest event time already synced. Runs without an explicit start
    /// begin no earlier than this.
    #[serde(default)]
    pub max_date_with_events: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    /// Path to write metrics to after each run. Unset disables the dump.
    #[serde(default)]
    pub textfile: Option<PathBuf>,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_features() -> Vec<Feature> {
    DEFAULT_FEATURES.to_vec()
}

fn default_lookback() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_entered_by() -> String {
    "pumpsync".to_string()
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            source: SourceConfig::default(),
            destination: DestinationConfig::default(),
            device: DeviceConfig::default(),
            features: default_features(),
            pretend: false,
            failure_policy: FailurePolicy::default(),
            lookback: default_lookback(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            access_token: String::new(),
            timeout: default_timeout(),
        }
    }
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: String::new(),
            timeout: default_timeout(),
            entered_by: default_entered_by(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.source.endpoint.is_empty() {
            bail!("source.endpoint is required");
        }

        if self.destination.url.is_empty() {
            bail!("destination.url is required");
        }

        if self.device.device_id.is_empty() {
            bail!("device.device_id is required");
        }

        if self.source.timeout.is_zero() {
            bail!("source.timeout must be positive");
        }

        if self.destination.timeout.is_zero() {
            bail!("destination.timeout must be positive");
        }

        if self.lookback.is_zero() {
            bail!("lookback must be positive");
        }

        if chrono::Duration::from_std(self.lookback).is_err() {
            bail!("lookback {:?} is out of range", self.lookback);
        }

        Ok(())
    }

    /// The enabled feature set.
    pub fn feature_set(&self) -> Features {
        Features::new(&self.features)
    }

    /// The sync target described by the device section.
    pub fn target_device(&self) -> TargetDevice {
        TargetDevice {
            device_id: self.device.device_id.clone(),
            max_date_with_events: self.device.max_date_with_events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> Config {
        Config {
            source: SourceConfig {
                endpoint: "https://source.example".to_string(),
                access_token: "secret".to_string(),
                ..Default::default()
            },
            destination: DestinationConfig {
                url: "https://ns.example".to_string(),
                ..Default::default()
            },
            device: DeviceConfig {
                device_id: "1234".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.lookback, Duration::from_secs(86_400));
        assert_eq!(cfg.source.timeout, Duration::from_secs(30));
        assert_eq!(cfg.destination.entered_by, "pumpsync");
        assert_eq!(cfg.failure_policy, FailurePolicy::Isolate);
        assert!(!cfg.pretend);
        assert_eq!(cfg.feature_set().to_string(), "BASAL,BOLUS,PUMP_EVENTS");
    }

    #[test]
    fn test_validate_accepts_valid_config() {
        valid_config().validate().expect("valid config");
    }

    #[test]
    fn test_validate_required_fields() {
        let mut cfg = valid_config();
        cfg.source.endpoint.clear();
        assert!(cfg.validate().is_err());

        let mut cfg = valid_config();
        cfg.destination.url.clear();
        assert!(cfg.validate().is_err());

        let mut cfg = valid_config();
        cfg.device.device_id.clear();
        let err = cfg.validate().expect_err("missing device id");
        assert!(err.to_string().contains("device.device_id"));
    }

    #[test]
    fn test_validate_rejects_zero_durations() {
        let mut cfg = valid_config();
        cfg.lookback = Duration::ZERO;
        assert!(cfg.validate().is_err());

        let mut cfg = valid_config();
        cfg.destination.timeout = Duration::ZERO;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_yaml() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"
log_level: debug
source:
  endpoint: https://source.example
  access_token: secret
  timeout: 10s
destination:
  url: https://ns.example
  token: abc
device:
  device_id: "1234"
  max_date_with_events: 2024-03-01T12:00:00Z
features: [BOLUS, BOLUS_BG, PROFILES]
pretend: true
failure_policy: fail_fast
lookback: 6h
metrics:
  textfile: /var/lib/node_exporter/pumpsync.prom
"#
        )
        .expect("write config");

        let cfg = Config::load(file.path()).expect("config loads");
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.source.timeout, Duration::from_secs(10));
        assert_eq!(cfg.destination.timeout, Duration::from_secs(30));
        assert_eq!(cfg.destination.entered_by, "pumpsync");
        assert_eq!(cfg.lookback, Duration::from_secs(6 * 3600));
        assert_eq!(cfg.failure_policy, FailurePolicy::FailFast);
        assert!(cfg.pretend);

        let features = cfg.feature_set();
        assert!(features.contains(Feature::BolusBg));
        assert!(!features.contains(Feature::Basal));

        let device = cfg.target_device();
        assert_eq!(device.device_id, "1234");
        assert_eq!(
            device.max_date_with_events.map(|t| t.to_rfc3339()),
            Some("2024-03-01T12:00:00+00:00".to_string())
        );
        assert_eq!(
            cfg.metrics.textfile,
            Some(PathBuf::from("/var/lib/node_exporter/pumpsync.prom"))
        );
    }

    #[test]
    fn test_load_rejects_unknown_feature() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "features: [TELEPORT]\n").expect("write config");
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(Config::load(Path::new("/nonexistent/pumpsync.yaml")).is_err());
    }
}
